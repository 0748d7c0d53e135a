use rand::Rng;
use uuid::Uuid;

/// Expected database schema version
/// Databases written by another version are refused at startup
pub const EXPECTED_DB_VERSION: &str = "1";

/// Default size of one upload chunk (1 MiB), matching the browser recorder
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Name of the cookie carrying the teacher session token
pub const SESSION_COOKIE: &str = "proctor_session";

/// Generate an opaque short id for exams, students and recordings
/// (first 8 hex characters of a v4 UUID)
pub fn generate_token() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Generate a teacher session token
pub fn generate_session_token() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(32)
        .map(char::from)
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), 8);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn test_session_token_shape() {
        let token = generate_session_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
