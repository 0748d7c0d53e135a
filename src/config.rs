use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::constants::DEFAULT_CHUNK_SIZE;
use crate::credentials::{get_password, CredentialType, Credentials};

fn default_port() -> u16 {
    5000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_recording_bytes() -> u64 {
    4 * 1024 * 1024 * 1024
}

fn default_room_capacity() -> usize {
    256
}

fn default_session_ttl_hours() -> i64 {
    12
}

fn default_presign_expiry_secs() -> u64 {
    3600
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_path_style() -> bool {
    true
}

/// Relay server configuration file structure
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// API server port (default: 5000)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory holding the SQLite database and the recordings/ folder (default: data)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Byte size of one upload chunk; chunk N is written at offset N * chunk_size
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Largest recording accepted; chunks ending past this offset are rejected (default: 4 GiB)
    #[serde(default = "default_max_recording_bytes")]
    pub max_recording_bytes: u64,
    /// Buffered events per room before slow subscribers start skipping
    #[serde(default = "default_room_capacity")]
    pub room_capacity: usize,
    /// Lifetime of a teacher login session in hours (default: 12)
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
    /// Teacher credentials (maps to [teacher] section in TOML)
    pub teacher: TeacherConfig,
    /// Optional S3-compatible storage for finished recordings
    pub object_store: Option<ObjectStoreConfig>,
}

/// Teacher login (maps to [teacher] section in TOML)
#[derive(Debug, Clone, Deserialize)]
pub struct TeacherConfig {
    pub username: String,
    /// Inline password; takes precedence over `credential_profile`
    pub password: Option<String>,
    /// Profile name to look up the password under [teacher.<profile>] in the credentials file
    pub credential_profile: Option<String>,
}

/// S3-compatible object store (maps to [object_store] section in TOML)
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreConfig {
    /// Endpoint base URL, e.g. https://s3.amazonaws.com or http://minio:9000
    pub endpoint: String,
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    pub access_key_id: String,
    /// Inline secret; takes precedence over `credential_profile`
    pub secret_access_key: Option<String>,
    /// Profile name to look up the secret under [object_store.<profile>] in the credentials file
    pub credential_profile: Option<String>,
    /// Use path-style addressing (endpoint/bucket/key) instead of bucket.endpoint/key
    #[serde(default = "default_path_style")]
    pub path_style: bool,
    /// Validity of pre-signed download links in seconds (default: 3600)
    #[serde(default = "default_presign_expiry_secs")]
    pub presign_expiry_secs: u64,
}

impl RelayConfig {
    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: RelayConfig = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be greater than 0".to_string());
        }
        if self.max_recording_bytes < self.chunk_size {
            return Err("max_recording_bytes must be at least chunk_size".to_string());
        }
        if self.room_capacity == 0 {
            return Err("room_capacity must be greater than 0".to_string());
        }
        if self.session_ttl_hours <= 0 {
            return Err("session_ttl_hours must be greater than 0".to_string());
        }
        if self.teacher.username.is_empty() {
            return Err("[teacher] username must not be empty".to_string());
        }
        if self.teacher.password.is_none() && self.teacher.credential_profile.is_none() {
            return Err(
                "[teacher] section needs either password or credential_profile".to_string(),
            );
        }
        if let Some(store) = &self.object_store {
            if store.secret_access_key.is_none() && store.credential_profile.is_none() {
                return Err(
                    "[object_store] section needs either secret_access_key or credential_profile"
                        .to_string(),
                );
            }
            url::Url::parse(&store.endpoint)
                .map_err(|e| format!("[object_store] endpoint is not a valid URL: {}", e))?;
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("proctoring.sqlite")
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.data_dir.join("recordings")
    }

    /// Resolve the teacher password from inline config or the credentials file
    pub fn teacher_password(&self, credentials: &Option<Credentials>) -> Result<String, String> {
        match (&self.teacher.password, &self.teacher.credential_profile) {
            (Some(password), _) => Ok(password.clone()),
            (None, Some(profile)) => get_password(credentials, CredentialType::Teacher, profile),
            (None, None) => Err("No teacher password configured".to_string()),
        }
    }
}

impl ObjectStoreConfig {
    /// Resolve the secret key from inline config or the credentials file
    pub fn secret(&self, credentials: &Option<Credentials>) -> Result<String, String> {
        match (&self.secret_access_key, &self.credential_profile) {
            (Some(secret), _) => Ok(secret.clone()),
            (None, Some(profile)) => {
                get_password(credentials, CredentialType::ObjectStore, profile)
            }
            (None, None) => Err("No object store secret configured".to_string()),
        }
    }
}
