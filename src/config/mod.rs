//! Configuration loading for steward.
//!
//! - [`steward`]: the installation's TOML file ([`StewardConfig`])
//! - [`credentials`]: how artifact downloads authenticate ([`CredentialSource`])
//!
//! Update scheduling lives in [`crate::upgrade::config::UpgradeConfig`] under
//! the `[upgrade]` table of the same file.

pub mod credentials;
pub mod steward;

pub use credentials::CredentialSource;
pub use steward::StewardConfig;
