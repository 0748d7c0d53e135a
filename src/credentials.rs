use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Credentials file structure
///
/// Format:
/// ```toml
/// [teacher.profile_name]
/// password = "teacher_login_password"
///
/// [object_store.profile_name]
/// password = "s3_secret_access_key"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Credentials {
    #[serde(default)]
    pub teacher: HashMap<String, CredentialProfile>,
    #[serde(default)]
    pub object_store: HashMap<String, CredentialProfile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialProfile {
    pub password: String,
}

/// Credential type for looking up secrets
#[derive(Debug, Clone, Copy)]
pub enum CredentialType {
    Teacher,
    ObjectStore,
}

/// Get the default credentials file path: ~/.config/proctor_relay/credentials.toml
pub fn get_credentials_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("proctor_relay")
            .join("credentials.toml"),
    )
}

/// Load credentials from the default location
/// Returns None if HOME is unset or the file doesn't exist
pub fn load_credentials() -> Result<Option<Credentials>, Box<dyn std::error::Error + Send + Sync>> {
    match get_credentials_path() {
        Some(path) => load_credentials_from(&path),
        None => Ok(None),
    }
}

/// Load credentials from an explicit path
pub fn load_credentials_from(
    path: &Path,
) -> Result<Option<Credentials>, Box<dyn std::error::Error + Send + Sync>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)?;
    let credentials: Credentials = toml::from_str(&content)?;

    Ok(Some(credentials))
}

/// Get the secret for a specific profile and credential type
pub fn get_password(
    credentials: &Option<Credentials>,
    cred_type: CredentialType,
    profile: &str,
) -> Result<String, String> {
    let section_name = match cred_type {
        CredentialType::Teacher => "teacher",
        CredentialType::ObjectStore => "object_store",
    };

    match credentials {
        Some(creds) => {
            let profiles = match cred_type {
                CredentialType::Teacher => &creds.teacher,
                CredentialType::ObjectStore => &creds.object_store,
            };
            profiles
                .get(profile)
                .map(|p| p.password.clone())
                .ok_or_else(|| {
                    format!(
                        "Credential profile '[{}.{}]' not found in credentials file",
                        section_name, profile
                    )
                })
        }
        None => Err(match get_credentials_path() {
            Some(path) => format!("Credentials file not found. Expected at: {}", path.display()),
            None => "Credentials file not found (HOME is not set)".to_string(),
        }),
    }
}
