//! Credential sources for the artifact store.
//!
//! ```toml
//! [credentials]
//! type = "service_account"
//! key_file = "/etc/steward/service-account.json"
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// OAuth scope requested for service-account grants when none is configured.
pub const DEFAULT_SERVICE_ACCOUNT_SCOPE: &str =
    "https://www.googleapis.com/auth/devstorage.read_only";

/// Where the bearer token for artifact downloads comes from.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialSource {
    /// Anonymous downloads.
    #[default]
    None,
    /// A static bearer token.
    Token {
        value: String,
    },
    /// A bearer token read from a file on every download.
    TokenFile {
        path: PathBuf,
    },
    /// An OAuth2 JWT-bearer grant signed with a service-account key.
    ServiceAccount {
        key_file: PathBuf,
        #[serde(default = "default_scope")]
        scope: String,
    },
}

fn default_scope() -> String {
    DEFAULT_SERVICE_ACCOUNT_SCOPE.to_string()
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Token { .. } => f.debug_struct("Token").field("value", &"<redacted>").finish(),
            Self::TokenFile { path } => f.debug_struct("TokenFile").field("path", path).finish(),
            Self::ServiceAccount { key_file, scope } => f
                .debug_struct("ServiceAccount")
                .field("key_file", key_file)
                .field("scope", scope)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Wrapper {
        credentials: CredentialSource,
    }

    #[test]
    fn test_service_account_default_scope() {
        let parsed: Wrapper = toml::from_str(
            r#"
[credentials]
type = "service_account"
key_file = "/etc/key.json"
"#,
        )
        .unwrap();
        assert_eq!(
            parsed.credentials,
            CredentialSource::ServiceAccount {
                key_file: PathBuf::from("/etc/key.json"),
                scope: DEFAULT_SERVICE_ACCOUNT_SCOPE.to_string(),
            }
        );
    }

    #[test]
    fn test_token_is_redacted_in_debug() {
        let source = CredentialSource::Token {
            value: "s3cret".to_string(),
        };
        let rendered = format!("{source:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
    }
}
