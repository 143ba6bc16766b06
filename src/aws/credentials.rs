//! AWS credentials
//!
//! Base credentials come from the environment or a shared credentials file
//! profile. Member-account credentials are produced by `sts::assume_role`
//! and never written back to the process environment.

use crate::inventory::error::SetupError;
use std::fmt;
use std::path::PathBuf;

const DEFAULT_PROFILE: &str = "default";

#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

// Keep secrets out of debug logs
impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AwsCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    /// `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN`
    pub fn from_env() -> Option<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok().filter(|s| !s.is_empty())?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok().filter(|s| !s.is_empty())?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok().filter(|s| !s.is_empty());
        Some(Self::new(access_key_id, secret_access_key, session_token))
    }

    /// Read one `[profile]` section of a shared credentials file
    pub fn from_profile(contents: &str, profile: &str) -> Option<Self> {
        let mut in_section = false;
        let mut access_key_id = None;
        let mut secret_access_key = None;
        let mut session_token = None;

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                in_section = section.trim() == profile;
                continue;
            }
            if !in_section {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().to_string();
                match key.trim() {
                    "aws_access_key_id" => access_key_id = Some(value),
                    "aws_secret_access_key" => secret_access_key = Some(value),
                    "aws_session_token" => session_token = Some(value),
                    _ => {}
                }
            }
        }

        Some(Self::new(access_key_id?, secret_access_key?, session_token))
    }

    /// Environment first, then the shared credentials file
    pub fn load() -> Result<Self, SetupError> {
        if let Some(creds) = Self::from_env() {
            tracing::debug!("Using AWS credentials from environment");
            return Ok(creds);
        }

        let profile = std::env::var("AWS_PROFILE").unwrap_or_else(|_| DEFAULT_PROFILE.to_string());
        let path = credentials_file_path().ok_or_else(|| SetupError::NoCredentials {
            provider: "AWS",
            reason: "no home directory for the shared credentials file".to_string(),
        })?;

        let contents = std::fs::read_to_string(&path).map_err(|e| SetupError::NoCredentials {
            provider: "AWS",
            reason: format!("AWS_ACCESS_KEY_ID not set and {} unreadable: {}", path.display(), e),
        })?;

        tracing::debug!("Using AWS profile '{}' from {}", profile, path.display());
        Self::from_profile(&contents, &profile).ok_or_else(|| SetupError::NoCredentials {
            provider: "AWS",
            reason: format!("profile '{}' has no access keys in {}", profile, path.display()),
        })
    }
}

fn credentials_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("AWS_SHARED_CREDENTIALS_FILE") {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".aws").join("credentials"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = "
[default]
aws_access_key_id = AKIADEFAULT
aws_secret_access_key = secret1

# audit account
[audit]
aws_access_key_id=ASIAAUDIT
aws_secret_access_key=secret2
aws_session_token=token2
region = eu-west-1
";

    #[test]
    fn test_from_profile() {
        let default = AwsCredentials::from_profile(FILE, "default").unwrap();
        assert_eq!(default.access_key_id, "AKIADEFAULT");
        assert_eq!(default.session_token, None);

        let audit = AwsCredentials::from_profile(FILE, "audit").unwrap();
        assert_eq!(audit.secret_access_key, "secret2");
        assert_eq!(audit.session_token.as_deref(), Some("token2"));

        assert!(AwsCredentials::from_profile(FILE, "missing").is_none());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = AwsCredentials::new("AKIA", "very-secret", Some("tok".to_string()));
        let debug = format!("{:?}", creds);
        assert!(debug.contains("AKIA"));
        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("tok\""));
    }
}
