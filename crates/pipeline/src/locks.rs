//! Per-tenant execution locks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use quicksync_core::error::CoreError;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per tenant, created on first use. Holding the guard
/// means no other execute is running for that tenant.
#[derive(Default)]
pub struct TenantLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TenantLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait up to `timeout` for the tenant's lock.
    pub async fn acquire(
        &self,
        tenant_id: &str,
        timeout: Duration,
    ) -> Result<OwnedMutexGuard<()>, CoreError> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(tenant_id.to_string()).or_default().clone()
        };
        tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| {
                CoreError::Conflict(format!(
                    "another migration is already executing for tenant '{tenant_id}'"
                ))
            })
    }
}
