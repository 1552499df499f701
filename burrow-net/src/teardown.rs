//! Idempotent removal of a provisioned network namespace and its link

use std::sync::Arc;
use tracing::{debug, info, warn};

use burrow_core::{Error, InterfaceName, LifecycleEvent, NetNamespaceName, Result};

use crate::backend::NetworkBackend;
use crate::config::{NatConfig, NetworkConfig};

/// Removes whatever part of a link setup is present
///
/// Every removal checks for existence first, so a teardown is safe after a
/// complete setup, after a setup that failed at any step, and when repeated.
/// An object that disappears between the check and the delete counts as
/// already removed: the kernel destroys the host end of a deleted
/// namespace's veth pair in the background.
/// IP forwarding is host-global and is never switched back off.
pub struct TeardownCoordinator<B: NetworkBackend + ?Sized> {
    backend: Arc<B>,
}

impl<B: NetworkBackend + ?Sized> TeardownCoordinator<B> {
    /// Create a coordinator over `backend`
    pub const fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Remove the masquerade rule, the namespace and the host-side link
    ///
    /// Each step runs even if an earlier one failed; the first error is
    /// returned after all steps were attempted.
    ///
    /// Returns the number of objects actually removed, `0` when there was
    /// nothing left to do.
    pub async fn teardown(&self, config: &NetworkConfig) -> Result<usize> {
        info!(namespace = %config.namespace, "Tearing down network namespace");

        let mut removed = 0;
        let mut first_error = None;

        let nat = match &config.nat {
            Some(nat) => self.remove_masquerade(nat).await,
            None => Ok(false),
        };
        let results = [
            nat,
            self.remove_namespace(&config.namespace).await,
            self.remove_link(&config.host_if).await,
        ];

        for result in results {
            match result {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(namespace = %config.namespace, error = %e, "Teardown step failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        LifecycleEvent::torn_down(config.namespace.as_str(), removed).emit_trace();
        Ok(removed)
    }

    /// Delete a namespace known only by name
    ///
    /// The namespace-side veth end goes with it, and the kernel destroys the
    /// host-side peer in turn.
    pub async fn teardown_namespace(&self, name: &NetNamespaceName) -> Result<usize> {
        let removed = usize::from(self.remove_namespace(name).await?);
        LifecycleEvent::torn_down(name.as_str(), removed).emit_trace();
        Ok(removed)
    }

    /// Remove the masquerade rule if installed
    ///
    /// Without `iptables` on the host no rule can be installed either.
    pub async fn remove_masquerade(&self, nat: &NatConfig) -> Result<bool> {
        let exists = match self.backend.masquerade_exists(nat).await {
            Ok(exists) => exists,
            Err(Error::ToolMissing { program }) => {
                warn!(%program, subnet = %nat.subnet, "Firewall tool missing, no rule to remove");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        if !exists {
            debug!(subnet = %nat.subnet, "No masquerade rule to remove");
            return Ok(false);
        }

        self.backend.remove_masquerade(nat).await?;
        debug!(subnet = %nat.subnet, "Masquerade rule removed");
        Ok(true)
    }

    /// Delete the namespace if it exists
    pub async fn remove_namespace(&self, name: &NetNamespaceName) -> Result<bool> {
        if !self.backend.namespace_exists(name).await? {
            debug!(namespace = %name, "Namespace already absent");
            return Ok(false);
        }

        match self.backend.delete_namespace(name).await {
            Ok(()) => {
                debug!(namespace = %name, "Namespace deleted");
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                debug!(namespace = %name, "Namespace vanished before delete");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete a host link if it exists
    pub async fn remove_link(&self, link: &InterfaceName) -> Result<bool> {
        if !self.backend.link_exists(link, None).await? {
            debug!(link = %link, "Host link already absent");
            return Ok(false);
        }

        match self.backend.delete_link(link, None).await {
            Ok(()) => {
                debug!(link = %link, "Host link deleted");
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                debug!(link = %link, "Host link vanished before delete");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, Operation};
    use crate::ip::IpCommandBackend;
    use crate::provisioner::Provisioner;

    #[tokio::test]
    async fn test_teardown_of_nothing() {
        let backend = Arc::new(MockBackend::new());
        let coordinator = TeardownCoordinator::new(Arc::clone(&backend));

        let removed = coordinator.teardown(&NetworkConfig::internet()).await.unwrap();
        assert_eq!(removed, 0);

        // Only existence checks ran; nothing was deleted.
        assert_eq!(backend.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_stray_host_link_removed() {
        let backend = Arc::new(MockBackend::new());
        let config = NetworkConfig::default();
        backend
            .create_veth_pair(&config.host_if, &config.ns_if)
            .await
            .unwrap();

        let coordinator = TeardownCoordinator::new(Arc::clone(&backend));
        assert_eq!(coordinator.teardown(&config).await.unwrap(), 1);
        assert!(!backend.link_exists(&config.ns_if, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_failure_does_not_skip_later_steps() {
        let backend = Arc::new(MockBackend::new());
        let config = NetworkConfig::default();
        backend.create_namespace(&config.namespace).await.unwrap();
        backend
            .create_veth_pair(&InterfaceName::new("stray0").unwrap(), &config.host_if)
            .await
            .unwrap();
        backend.fail_on(Operation::DeleteNamespace).await;

        let coordinator = TeardownCoordinator::new(Arc::clone(&backend));
        assert!(coordinator.teardown(&config).await.is_err());
        assert!(!backend.link_exists(&config.host_if, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_host_link_gone_before_delete() {
        let backend = Arc::new(MockBackend::new());
        backend.defer_peer_removal().await;
        let config = NetworkConfig::default();
        Provisioner::new(Arc::clone(&backend))
            .setup(&config)
            .await
            .unwrap();

        let coordinator = TeardownCoordinator::new(Arc::clone(&backend));
        assert_eq!(coordinator.teardown(&config).await.unwrap(), 1);
        assert!(!backend.link_exists(&config.host_if, None).await.unwrap());
        assert_eq!(coordinator.teardown(&config).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_firewall_tool_means_no_rule() {
        let backend = IpCommandBackend::new().with_programs(
            "/nonexistent/ip",
            "/nonexistent/iptables",
            "/nonexistent/ping",
        );
        let config = NetworkConfig::internet();
        let nat = config.nat.as_ref().unwrap();

        let coordinator = TeardownCoordinator::new(Arc::new(backend));
        assert!(!coordinator.remove_masquerade(nat).await.unwrap());
    }
}
