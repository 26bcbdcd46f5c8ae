//! Application state shared across all request handlers.

use chainbell_core::ledger::Ledger;
use chainbell_core::registry::SubscriptionRegistry;
use ring::digest::{SHA256, digest};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Admin API credentials. Reloadable via SIGHUP.
#[derive(Debug, Clone, Default)]
pub struct AdminConfig {
    token_digest: Option<Vec<u8>>,
}

impl AdminConfig {
    /// Only a digest of the token is kept.
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token_digest: token.map(token_digest),
        }
    }

    /// Whether `presented` is the admin token. Digests are compared, never
    /// the raw strings.
    pub fn verify(&self, presented: &str) -> bool {
        self.token_digest
            .as_deref()
            .is_some_and(|expected| expected == token_digest(presented).as_slice())
    }
}

fn token_digest(token: &str) -> Vec<u8> {
    digest(&SHA256, token.as_bytes()).as_ref().to_vec()
}

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn SubscriptionRegistry>,
    pub ledger: Arc<dyn Ledger>,
    pub admin: Arc<RwLock<AdminConfig>>,
}

impl AppState {
    pub fn new(
        registry: Arc<dyn SubscriptionRegistry>,
        ledger: Arc<dyn Ledger>,
        admin: AdminConfig,
    ) -> Self {
        Self {
            registry,
            ledger,
            admin: Arc::new(RwLock::new(admin)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_token_verification() {
        let admin = AdminConfig::new(Some("hunter2"));
        assert!(admin.verify("hunter2"));
        assert!(!admin.verify("hunter3"));
        assert!(!admin.verify(""));
    }

    #[test]
    fn test_no_token_rejects_everything() {
        let admin = AdminConfig::new(None);
        assert!(!admin.verify(""));
        assert!(!admin.verify("anything"));
    }
}
