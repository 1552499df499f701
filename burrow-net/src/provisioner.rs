//! Ordered, transactional provisioning of a veth link into a network namespace
//!
//! Setup runs as a fixed sequence of [`SetupStep`]s. If any step fails,
//! everything this call created is removed again and the error is returned
//! wrapped with the step it happened at, so the host is left as it was found.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use burrow_core::{InterfaceName, LifecycleEvent, NetNamespaceName, Result, SetupStep};

use crate::backend::{LinkState, NetworkBackend};
use crate::config::NetworkConfig;
use crate::teardown::TeardownCoordinator;

/// A provisioned veth link
///
/// `ns_if` lives inside `namespace`; `host_if` stays in the host namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VethPair {
    /// Host-side end
    pub host_if: InterfaceName,
    /// Namespace-side end
    pub ns_if: InterfaceName,
    /// Namespace holding `ns_if`
    pub namespace: NetNamespaceName,
}

/// Objects created by a setup call, for rollback
#[derive(Debug, Default)]
struct Created {
    namespace: bool,
    veth: bool,
    masquerade: bool,
}

impl Created {
    const fn any(&self) -> bool {
        self.namespace || self.veth || self.masquerade
    }
}

/// Runs the link setup protocol against a backend
pub struct Provisioner<B: NetworkBackend + ?Sized> {
    backend: Arc<B>,
    teardown: TeardownCoordinator<B>,
}

impl<B: NetworkBackend + ?Sized> Provisioner<B> {
    /// Create a provisioner over `backend`
    pub fn new(backend: Arc<B>) -> Self {
        let teardown = TeardownCoordinator::new(Arc::clone(&backend));
        Self { backend, teardown }
    }

    /// Backend in use
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Coordinator removing what `setup` creates
    pub const fn teardown(&self) -> &TeardownCoordinator<B> {
        &self.teardown
    }

    /// Create the namespace, the veth pair, addresses and optional NAT
    ///
    /// # Errors
    /// `Error::Setup` naming the failed step, wrapping the original error
    /// (`NamespaceExists`, `InterfaceExists`, `MoveFailed`,
    /// `ConfigurationFailed`, `CommandFailed` or `InvalidConfig`). Objects
    /// created before the failure have been removed.
    pub async fn setup(&self, config: &NetworkConfig) -> Result<VethPair> {
        info!(
            namespace = %config.namespace,
            host_if = %config.host_if,
            ns_if = %config.ns_if,
            nat = config.nat.is_some(),
            "Provisioning network namespace"
        );

        let mut created = Created::default();

        for step in SetupStep::ALL {
            if step == SetupStep::EnableNat && config.nat.is_none() {
                continue;
            }

            if let Err(e) = self.run_step(step, config, &mut created).await {
                LifecycleEvent::step_failed(config.namespace.as_str(), step, e.to_string())
                    .emit_trace();
                if created.any() {
                    self.rollback(config, &created).await;
                }
                return Err(e.at_step(step));
            }

            LifecycleEvent::step_completed(config.namespace.as_str(), step).emit_trace();
        }

        info!(namespace = %config.namespace, "Network namespace ready");

        Ok(VethPair {
            host_if: config.host_if.clone(),
            ns_if: config.ns_if.clone(),
            namespace: config.namespace.clone(),
        })
    }

    async fn run_step(
        &self,
        step: SetupStep,
        config: &NetworkConfig,
        created: &mut Created,
    ) -> Result<()> {
        let backend = &self.backend;
        let ns = Some(&config.namespace);

        match step {
            SetupStep::Validate => config.validate(),
            SetupStep::CreateNamespace => {
                backend.create_namespace(&config.namespace).await?;
                created.namespace = true;
                Ok(())
            }
            SetupStep::CreateVethPair => {
                backend
                    .create_veth_pair(&config.host_if, &config.ns_if)
                    .await?;
                created.veth = true;
                Ok(())
            }
            SetupStep::MoveToNamespace => {
                backend.move_link(&config.ns_if, &config.namespace).await
            }
            SetupStep::ConfigureHost => {
                backend
                    .add_address(&config.host_if, None, config.host_addr)
                    .await?;
                backend
                    .set_link_state(&config.host_if, None, LinkState::Up)
                    .await
            }
            SetupStep::ConfigureNamespace => {
                backend
                    .add_address(&config.ns_if, ns, config.ns_addr)
                    .await?;
                backend
                    .set_link_state(&config.ns_if, ns, LinkState::Up)
                    .await?;
                backend
                    .set_link_state(&InterfaceName::loopback(), ns, LinkState::Up)
                    .await
            }
            SetupStep::EnableNat => {
                let Some(nat) = &config.nat else {
                    return Ok(());
                };

                backend.enable_forwarding().await?;
                backend
                    .add_default_route(&config.namespace, config.host_addr.addr())
                    .await?;
                if backend.masquerade_exists(nat).await? {
                    debug!(subnet = %nat.subnet, "Masquerade rule already installed");
                    return Ok(());
                }
                backend.add_masquerade(nat).await?;
                created.masquerade = true;
                Ok(())
            }
        }
    }

    /// Remove what this setup call created; failures are logged, not returned
    async fn rollback(&self, config: &NetworkConfig, created: &Created) {
        warn!(namespace = %config.namespace, ?created, "Rolling back partial setup");

        if created.masquerade {
            if let Some(nat) = &config.nat {
                if let Err(e) = self.teardown.remove_masquerade(nat).await {
                    warn!(error = %e, "Rollback could not remove masquerade rule");
                }
            }
        }

        if created.namespace {
            if let Err(e) = self.teardown.remove_namespace(&config.namespace).await {
                warn!(error = %e, "Rollback could not delete namespace");
            }
        }

        // The host end survives the namespace when the move never happened.
        if created.veth {
            if let Err(e) = self.teardown.remove_link(&config.host_if).await {
                warn!(error = %e, "Rollback could not delete host link");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, Operation};
    use burrow_core::Error;
    use std::net::Ipv4Addr;

    fn provisioner() -> (Arc<MockBackend>, Provisioner<MockBackend>) {
        let backend = Arc::new(MockBackend::new());
        (Arc::clone(&backend), Provisioner::new(backend))
    }

    #[tokio::test]
    async fn test_setup_blue() {
        let (backend, provisioner) = provisioner();
        let config = NetworkConfig::default();

        let pair = provisioner.setup(&config).await.unwrap();
        assert_eq!(pair.namespace.as_str(), "blue");

        let ns = Some(&config.namespace);
        assert!(backend.link_exists(&config.host_if, None).await.unwrap());
        assert!(backend.link_exists(&config.ns_if, ns).await.unwrap());
        assert!(!backend.link_exists(&config.ns_if, None).await.unwrap());
        assert!(backend.is_up(&InterfaceName::loopback(), ns).await);
        assert_eq!(
            backend.addresses(&config.ns_if, ns).await.unwrap(),
            vec![config.ns_addr]
        );

        assert!(backend.ping(ns, config.host_addr.addr()).await.unwrap());
        assert!(backend.ping(None, config.ns_addr.addr()).await.unwrap());
        assert!(!backend.forwarding().await);
        assert_eq!(backend.default_route(&config.namespace).await, None);
        assert!(!backend.ping(ns, Ipv4Addr::new(8, 8, 8, 8)).await.unwrap());
    }

    #[tokio::test]
    async fn test_setup_with_nat() {
        let (backend, provisioner) = provisioner();
        let config = NetworkConfig::internet();
        let external = Ipv4Addr::new(8, 8, 8, 8);

        provisioner.setup(&config).await.unwrap();
        assert!(backend.forwarding().await);
        assert_eq!(backend.masquerade_rules().await.len(), 1);
        assert_eq!(
            backend.default_route(&config.namespace).await,
            Some(config.host_addr.addr())
        );
        assert!(backend.ping(Some(&config.namespace), external).await.unwrap());

        // Without the masquerade rule the outside is unreachable.
        let nat = config.nat.as_ref().unwrap();
        backend.remove_masquerade(nat).await.unwrap();
        assert!(!backend.ping(Some(&config.namespace), external).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_config_touches_nothing() {
        let (backend, provisioner) = provisioner();
        let config = NetworkConfig::default().with_addresses(
            "10.0.0.1/24".parse().unwrap(),
            "10.9.0.2/24".parse().unwrap(),
        );

        let err = provisioner.setup(&config).await.unwrap_err();
        assert_eq!(err.step(), Some(SetupStep::Validate));
        assert!(matches!(err.root(), Error::InvalidConfig { .. }));
        assert_eq!(backend.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_existing_namespace_is_left_alone() {
        let (backend, provisioner) = provisioner();
        let config = NetworkConfig::default();
        backend.create_namespace(&config.namespace).await.unwrap();

        let err = provisioner.setup(&config).await.unwrap_err();
        assert_eq!(err.step(), Some(SetupStep::CreateNamespace));
        assert!(matches!(err.root(), Error::NamespaceExists { .. }));
        assert!(backend.namespace_exists(&config.namespace).await.unwrap());
    }

    #[tokio::test]
    async fn test_step_three_failure_rolls_back() {
        let (backend, provisioner) = provisioner();
        let config = NetworkConfig::default();
        backend.fail_on(Operation::MoveLink).await;

        let err = provisioner.setup(&config).await.unwrap_err();
        assert_eq!(err.step(), Some(SetupStep::MoveToNamespace));
        assert!(matches!(err.root(), Error::MoveFailed { .. }));

        assert!(!backend.namespace_exists(&config.namespace).await.unwrap());
        assert!(!backend.link_exists(&config.host_if, None).await.unwrap());
        assert!(!backend.link_exists(&config.ns_if, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_route_failure_rolls_back_nat() {
        let (backend, provisioner) = provisioner();
        let config = NetworkConfig::internet();
        backend.fail_on(Operation::AddRoute).await;

        let err = provisioner.setup(&config).await.unwrap_err();
        assert_eq!(err.step(), Some(SetupStep::EnableNat));
        assert!(!backend.namespace_exists(&config.namespace).await.unwrap());
        assert!(backend.masquerade_rules().await.is_empty());
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let (backend, provisioner) = provisioner();
        provisioner.setup(&NetworkConfig::internet()).await.unwrap();

        assert_eq!(
            backend.calls().await,
            vec![
                Operation::CreateNamespace,
                Operation::CreateVethPair,
                Operation::MoveLink,
                Operation::AddAddress,
                Operation::SetLinkState,
                Operation::AddAddress,
                Operation::SetLinkState,
                Operation::SetLinkState,
                Operation::EnableForwarding,
                Operation::AddRoute,
                Operation::AddMasquerade,
            ]
        );
    }
}
