//! Network configuration backend trait for pluggable implementations

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::Mutex;

use burrow_core::{Error, InterfaceName, NetNamespaceName, Result};

use crate::addr::Ipv4Cidr;
use crate::config::NatConfig;

/// Administrative state of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// Link enabled
    Up,
    /// Link disabled
    Down,
}

impl LinkState {
    /// Keyword used by `ip link set`
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

/// Operations of the network configuration subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Create a named network namespace
    CreateNamespace,
    /// Delete a named network namespace
    DeleteNamespace,
    /// Create a veth pair
    CreateVethPair,
    /// Delete a link
    DeleteLink,
    /// Move a link into a namespace
    MoveLink,
    /// Assign an address
    AddAddress,
    /// Change link state
    SetLinkState,
    /// Add a default route
    AddRoute,
    /// Enable IPv4 forwarding
    EnableForwarding,
    /// Install a masquerade rule
    AddMasquerade,
    /// Remove a masquerade rule
    RemoveMasquerade,
    /// Reachability probe
    Ping,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreateNamespace => "create namespace",
            Self::DeleteNamespace => "delete namespace",
            Self::CreateVethPair => "create veth pair",
            Self::DeleteLink => "delete link",
            Self::MoveLink => "move link",
            Self::AddAddress => "add address",
            Self::SetLinkState => "set link state",
            Self::AddRoute => "add route",
            Self::EnableForwarding => "enable forwarding",
            Self::AddMasquerade => "add masquerade",
            Self::RemoveMasquerade => "remove masquerade",
            Self::Ping => "ping",
        };
        f.write_str(name)
    }
}

/// Trait for network configuration backends
///
/// This allows for different implementations:
/// - [`IpCommandBackend`](crate::IpCommandBackend) - Production, drives `ip` and `iptables`
/// - [`MockBackend`] - Testing without touching the host
///
/// `namespace: None` addresses the host's own network namespace.
///
/// # Thread Safety
/// All implementations must be `Send + Sync` for use across async tasks.
#[async_trait]
pub trait NetworkBackend: Send + Sync {
    /// Create a named network namespace
    ///
    /// # Errors
    /// `NamespaceExists` if the name is taken
    async fn create_namespace(&self, name: &NetNamespaceName) -> Result<()>;

    /// Delete a named network namespace and every link inside it
    ///
    /// # Errors
    /// `NamespaceNotFound` if there is no such namespace
    async fn delete_namespace(&self, name: &NetNamespaceName) -> Result<()>;

    /// Check whether a named network namespace exists
    async fn namespace_exists(&self, name: &NetNamespaceName) -> Result<bool>;

    /// List named network namespaces
    async fn list_namespaces(&self) -> Result<Vec<NetNamespaceName>>;

    /// Create a veth pair in the host namespace
    ///
    /// # Errors
    /// `InterfaceExists` if either name is taken
    async fn create_veth_pair(&self, host_if: &InterfaceName, peer: &InterfaceName) -> Result<()>;

    /// Delete a link; a veth peer goes with it
    ///
    /// # Errors
    /// `LinkNotFound` if the link does not exist
    async fn delete_link(
        &self,
        link: &InterfaceName,
        namespace: Option<&NetNamespaceName>,
    ) -> Result<()>;

    /// Check whether a link exists
    async fn link_exists(
        &self,
        link: &InterfaceName,
        namespace: Option<&NetNamespaceName>,
    ) -> Result<bool>;

    /// List links
    async fn list_links(&self, namespace: Option<&NetNamespaceName>) -> Result<Vec<InterfaceName>>;

    /// Move a host link into a namespace
    ///
    /// # Errors
    /// `MoveFailed` if the link or namespace is missing
    async fn move_link(&self, link: &InterfaceName, namespace: &NetNamespaceName) -> Result<()>;

    /// Assign an address to a link
    async fn add_address(
        &self,
        link: &InterfaceName,
        namespace: Option<&NetNamespaceName>,
        cidr: Ipv4Cidr,
    ) -> Result<()>;

    /// Set a link's administrative state
    async fn set_link_state(
        &self,
        link: &InterfaceName,
        namespace: Option<&NetNamespaceName>,
        state: LinkState,
    ) -> Result<()>;

    /// Route everything off-link from `namespace` through `gateway`
    async fn add_default_route(&self, namespace: &NetNamespaceName, gateway: Ipv4Addr)
    -> Result<()>;

    /// Enable IPv4 forwarding on the host
    async fn enable_forwarding(&self) -> Result<()>;

    /// Install a masquerade rule
    async fn add_masquerade(&self, nat: &NatConfig) -> Result<()>;

    /// Remove a masquerade rule
    async fn remove_masquerade(&self, nat: &NatConfig) -> Result<()>;

    /// Check whether a masquerade rule is installed
    async fn masquerade_exists(&self, nat: &NatConfig) -> Result<bool>;

    /// Probe reachability of `target` from a namespace
    async fn ping(&self, namespace: Option<&NetNamespaceName>, target: Ipv4Addr) -> Result<bool>;
}

/// Mock backend for testing (doesn't touch the host)
///
/// Models the kernel behaviour the provisioning protocol relies on:
/// deleting a namespace destroys the links inside it, deleting one veth end
/// destroys its peer, and only a moved link can be configured inside a
/// namespace. Off-link targets need a default route, forwarding and a
/// masquerade rule. Any operation can be made to fail with
/// [`MockBackend::fail_on`].
///
/// # Example
/// ```
/// use burrow_net::{MockBackend, NetworkBackend};
/// use burrow_core::{InterfaceName, NetNamespaceName};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let backend = MockBackend::new();
/// let blue = NetNamespaceName::new("blue").unwrap();
/// let host = InterfaceName::new("veth-host").unwrap();
/// let peer = InterfaceName::new("veth-blue").unwrap();
///
/// backend.create_namespace(&blue).await.unwrap();
/// backend.create_veth_pair(&host, &peer).await.unwrap();
/// backend.move_link(&peer, &blue).await.unwrap();
///
/// // Deleting the namespace takes the whole pair with it.
/// backend.delete_namespace(&blue).await.unwrap();
/// assert!(!backend.link_exists(&host, None).await.unwrap());
/// # });
/// ```
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Clone)]
struct MockLink {
    peer: Option<InterfaceName>,
    addresses: Vec<Ipv4Cidr>,
    up: bool,
    /// Peer namespace deleted, kernel cleanup still pending
    dying: bool,
}

impl MockLink {
    const fn new(peer: Option<InterfaceName>) -> Self {
        Self {
            peer,
            addresses: Vec::new(),
            up: false,
            dying: false,
        }
    }
}

type LinkTable = BTreeMap<InterfaceName, MockLink>;

#[derive(Default)]
struct MockState {
    host: LinkTable,
    namespaces: BTreeMap<NetNamespaceName, LinkTable>,
    routes: BTreeMap<NetNamespaceName, Ipv4Addr>,
    forwarding: bool,
    deferred_peer_removal: bool,
    masquerade: Vec<NatConfig>,
    failures: HashSet<Operation>,
    calls: Vec<Operation>,
}

impl MockState {
    fn with_host_loopback() -> Self {
        let mut lo = MockLink::new(None);
        lo.up = true;
        lo.addresses.push(Ipv4Cidr::slash24(Ipv4Addr::LOCALHOST));

        let mut state = Self::default();
        state.host.insert(InterfaceName::loopback(), lo);
        state
    }

    fn record(&mut self, op: Operation) -> Result<()> {
        self.calls.push(op);
        self.host.retain(|_, link| !link.dying);

        if self.failures.contains(&op) {
            tracing::debug!(operation = %op, "Mock: Injected failure");
            return Err(Error::ConfigurationFailed {
                operation: op.to_string(),
                reason: "injected failure".to_string(),
            });
        }

        Ok(())
    }

    fn links(&self, namespace: Option<&NetNamespaceName>) -> Result<&LinkTable> {
        match namespace {
            None => Ok(&self.host),
            Some(name) => self.namespaces.get(name).ok_or_else(|| no_namespace(name)),
        }
    }

    fn links_mut(&mut self, namespace: Option<&NetNamespaceName>) -> Result<&mut LinkTable> {
        match namespace {
            None => Ok(&mut self.host),
            Some(name) => self
                .namespaces
                .get_mut(name)
                .ok_or_else(|| no_namespace(name)),
        }
    }

    fn link_mut(
        &mut self,
        link: &InterfaceName,
        namespace: Option<&NetNamespaceName>,
        op: Operation,
    ) -> Result<&mut MockLink> {
        self.links_mut(namespace)?
            .get_mut(link)
            .ok_or_else(|| Error::ConfigurationFailed {
                operation: op.to_string(),
                reason: format!("Cannot find device \"{link}\""),
            })
    }

    /// Remove the peer of a destroyed veth end, wherever it lives
    ///
    /// With deferred removal a host-side peer is only marked dying; it
    /// still shows up in existence checks until the next mutating call.
    fn remove_peer(&mut self, end: &InterfaceName, peer: &InterfaceName) {
        let is_peer = |l: &MockLink| l.peer.as_ref() == Some(end);

        if self.host.get(peer).is_some_and(is_peer) {
            if self.deferred_peer_removal {
                if let Some(link) = self.host.get_mut(peer) {
                    link.dying = true;
                    link.up = false;
                }
            } else {
                self.host.remove(peer);
            }
            return;
        }

        for links in self.namespaces.values_mut() {
            if links.get(peer).is_some_and(is_peer) {
                links.remove(peer);
                return;
            }
        }
    }

    fn find_peer(&self, end: &InterfaceName, link: &MockLink) -> Option<&MockLink> {
        let peer = link.peer.as_ref()?;
        std::iter::once(&self.host)
            .chain(self.namespaces.values())
            .find_map(|links| links.get(peer).filter(|l| l.peer.as_ref() == Some(end)))
    }

    /// Local address through which `target` answers on an up veth peer
    fn neighbour(&self, links: &LinkTable, target: Ipv4Addr) -> Option<Ipv4Cidr> {
        links.iter().filter(|(_, l)| l.up).find_map(|(name, link)| {
            let peer = self.find_peer(name, link).filter(|p| p.up)?;
            if !peer.addresses.iter().any(|a| a.addr() == target) {
                return None;
            }
            link.addresses.iter().find(|a| a.contains(target)).copied()
        })
    }

    fn reachable(&self, namespace: Option<&NetNamespaceName>, target: Ipv4Addr) -> bool {
        let Ok(links) = self.links(namespace) else {
            return false;
        };

        let mut local = links.values().filter(|l| l.up).flat_map(|l| &l.addresses);

        if local.clone().any(|a| a.addr() == target) {
            return true;
        }

        // On-link targets are answered by the peer or not at all.
        if local.any(|a| a.contains(target)) {
            return self.neighbour(links, target).is_some();
        }

        // Off-link: default route to the host, which masquerades the source
        let Some(gateway) = namespace.and_then(|ns| self.routes.get(ns)) else {
            return false;
        };
        let Some(source) = self.neighbour(links, *gateway) else {
            return false;
        };

        self.forwarding
            && self
                .masquerade
                .iter()
                .any(|m| m.subnet.contains(source.addr()))
    }
}

fn no_namespace(name: &NetNamespaceName) -> Error {
    Error::NamespaceNotFound {
        name: name.to_string(),
    }
}

impl MockBackend {
    /// Create a new mock backend with only the host loopback present
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::with_host_loopback())),
        }
    }

    /// Make every future call of `op` fail
    pub async fn fail_on(&self, op: Operation) {
        self.state.lock().await.failures.insert(op);
    }

    /// Stop injecting failures for `op`
    pub async fn clear_failure(&self, op: Operation) {
        self.state.lock().await.failures.remove(&op);
    }

    /// Keep the host-side peer of a deleted namespace visible to
    /// `link_exists` until the next mutating call, as the kernel does
    /// while it finishes the cleanup
    pub async fn defer_peer_removal(&self) {
        self.state.lock().await.deferred_peer_removal = true;
    }

    /// Operations called so far, in order
    pub async fn calls(&self) -> Vec<Operation> {
        self.state.lock().await.calls.clone()
    }

    /// Get the number of backend calls made (for testing)
    pub async fn call_count(&self) -> usize {
        self.state.lock().await.calls.len()
    }

    /// Addresses assigned to a link, `None` if the link does not exist
    pub async fn addresses(
        &self,
        link: &InterfaceName,
        namespace: Option<&NetNamespaceName>,
    ) -> Option<Vec<Ipv4Cidr>> {
        let state = self.state.lock().await;
        state
            .links(namespace)
            .ok()?
            .get(link)
            .map(|l| l.addresses.clone())
    }

    /// Whether a link exists and is up
    pub async fn is_up(&self, link: &InterfaceName, namespace: Option<&NetNamespaceName>) -> bool {
        let state = self.state.lock().await;
        state
            .links(namespace)
            .ok()
            .and_then(|links| links.get(link))
            .is_some_and(|l| l.up)
    }

    /// Whether forwarding has been enabled
    pub async fn forwarding(&self) -> bool {
        self.state.lock().await.forwarding
    }

    /// Default gateway of a namespace
    pub async fn default_route(&self, namespace: &NetNamespaceName) -> Option<Ipv4Addr> {
        self.state.lock().await.routes.get(namespace).copied()
    }

    /// Installed masquerade rules
    pub async fn masquerade_rules(&self) -> Vec<NatConfig> {
        self.state.lock().await.masquerade.clone()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend").finish_non_exhaustive()
    }
}

#[async_trait]
impl NetworkBackend for MockBackend {
    async fn create_namespace(&self, name: &NetNamespaceName) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(Operation::CreateNamespace)?;

        if state.namespaces.contains_key(name) {
            return Err(Error::NamespaceExists {
                name: name.to_string(),
            });
        }

        let mut links = LinkTable::new();
        links.insert(InterfaceName::loopback(), MockLink::new(None));
        state.namespaces.insert(name.clone(), links);

        tracing::debug!(namespace = %name, "Mock: Created namespace");
        Ok(())
    }

    async fn delete_namespace(&self, name: &NetNamespaceName) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(Operation::DeleteNamespace)?;

        let links = state.namespaces.remove(name).ok_or_else(|| no_namespace(name))?;
        state.routes.remove(name);
        for (link_name, link) in &links {
            if let Some(peer) = &link.peer {
                state.remove_peer(link_name, peer);
            }
        }

        tracing::debug!(namespace = %name, links_removed = links.len(), "Mock: Deleted namespace");
        Ok(())
    }

    async fn namespace_exists(&self, name: &NetNamespaceName) -> Result<bool> {
        Ok(self.state.lock().await.namespaces.contains_key(name))
    }

    async fn list_namespaces(&self) -> Result<Vec<NetNamespaceName>> {
        Ok(self.state.lock().await.namespaces.keys().cloned().collect())
    }

    async fn create_veth_pair(&self, host_if: &InterfaceName, peer: &InterfaceName) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(Operation::CreateVethPair)?;

        for name in [host_if, peer] {
            if state.host.contains_key(name) {
                return Err(Error::InterfaceExists {
                    name: name.to_string(),
                });
            }
        }

        state
            .host
            .insert(host_if.clone(), MockLink::new(Some(peer.clone())));
        state
            .host
            .insert(peer.clone(), MockLink::new(Some(host_if.clone())));

        tracing::debug!(host_if = %host_if, peer = %peer, "Mock: Created veth pair");
        Ok(())
    }

    async fn delete_link(
        &self,
        link: &InterfaceName,
        namespace: Option<&NetNamespaceName>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(Operation::DeleteLink)?;

        let removed = state
            .links_mut(namespace)?
            .remove(link)
            .ok_or_else(|| Error::LinkNotFound {
                name: link.to_string(),
            })?;

        if let Some(peer) = &removed.peer {
            state.remove_peer(link, peer);
        }

        tracing::debug!(link = %link, "Mock: Deleted link");
        Ok(())
    }

    async fn link_exists(
        &self,
        link: &InterfaceName,
        namespace: Option<&NetNamespaceName>,
    ) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state
            .links(namespace)
            .is_ok_and(|links| links.contains_key(link)))
    }

    async fn list_links(&self, namespace: Option<&NetNamespaceName>) -> Result<Vec<InterfaceName>> {
        let state = self.state.lock().await;
        Ok(state.links(namespace)?.keys().cloned().collect())
    }

    async fn move_link(&self, link: &InterfaceName, namespace: &NetNamespaceName) -> Result<()> {
        let mut state = self.state.lock().await;

        let move_failed = |reason: String| Error::MoveFailed {
            interface: link.to_string(),
            namespace: namespace.to_string(),
            reason,
        };

        state
            .record(Operation::MoveLink)
            .map_err(|e| move_failed(e.to_string()))?;

        let target = state
            .namespaces
            .get(namespace)
            .ok_or_else(|| move_failed("namespace not found".to_string()))?;
        if target.contains_key(link) {
            return Err(move_failed("name already used in namespace".to_string()));
        }

        let moved = state
            .host
            .remove(link)
            .ok_or_else(|| move_failed("link not in host namespace".to_string()))?;

        // Moving resets the link: addresses are dropped and it comes up down.
        let mut moved = moved;
        moved.addresses.clear();
        moved.up = false;

        if let Some(links) = state.namespaces.get_mut(namespace) {
            links.insert(link.clone(), moved);
        }

        tracing::debug!(link = %link, namespace = %namespace, "Mock: Moved link");
        Ok(())
    }

    async fn add_address(
        &self,
        link: &InterfaceName,
        namespace: Option<&NetNamespaceName>,
        cidr: Ipv4Cidr,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(Operation::AddAddress)?;

        let entry = state.link_mut(link, namespace, Operation::AddAddress)?;
        if entry.addresses.contains(&cidr) {
            return Err(Error::ConfigurationFailed {
                operation: Operation::AddAddress.to_string(),
                reason: format!("{cidr} already assigned to {link}"),
            });
        }
        entry.addresses.push(cidr);

        tracing::debug!(link = %link, address = %cidr, "Mock: Added address");
        Ok(())
    }

    async fn set_link_state(
        &self,
        link: &InterfaceName,
        namespace: Option<&NetNamespaceName>,
        link_state: LinkState,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(Operation::SetLinkState)?;

        state.link_mut(link, namespace, Operation::SetLinkState)?.up = link_state == LinkState::Up;

        tracing::debug!(link = %link, state = link_state.as_str(), "Mock: Set link state");
        Ok(())
    }

    async fn add_default_route(
        &self,
        namespace: &NetNamespaceName,
        gateway: Ipv4Addr,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(Operation::AddRoute)?;

        let route_failed = |reason: &str| Error::ConfigurationFailed {
            operation: format!("add default route via {gateway}"),
            reason: reason.to_string(),
        };

        let links = state.links(Some(namespace))?;
        let on_link = links
            .values()
            .filter(|l| l.up)
            .any(|l| l.addresses.iter().any(|a| a.contains(gateway)));
        if !on_link {
            return Err(route_failed("Nexthop has invalid gateway"));
        }
        if state.routes.contains_key(namespace) {
            return Err(route_failed("File exists"));
        }

        state.routes.insert(namespace.clone(), gateway);

        tracing::debug!(namespace = %namespace, gateway = %gateway, "Mock: Added default route");
        Ok(())
    }

    async fn enable_forwarding(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(Operation::EnableForwarding)?;
        state.forwarding = true;
        Ok(())
    }

    async fn add_masquerade(&self, nat: &NatConfig) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(Operation::AddMasquerade)?;
        state.masquerade.push(nat.clone());

        tracing::debug!(subnet = %nat.subnet, "Mock: Added masquerade");
        Ok(())
    }

    async fn remove_masquerade(&self, nat: &NatConfig) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(Operation::RemoveMasquerade)?;

        let index = state
            .masquerade
            .iter()
            .position(|rule| rule == nat)
            .ok_or_else(|| Error::ConfigurationFailed {
                operation: Operation::RemoveMasquerade.to_string(),
                reason: format!("no masquerade rule for {}", nat.subnet),
            })?;
        state.masquerade.remove(index);

        tracing::debug!(subnet = %nat.subnet, "Mock: Removed masquerade");
        Ok(())
    }

    async fn masquerade_exists(&self, nat: &NatConfig) -> Result<bool> {
        Ok(self.state.lock().await.masquerade.contains(nat))
    }

    async fn ping(&self, namespace: Option<&NetNamespaceName>, target: Ipv4Addr) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.record(Operation::Ping)?;
        Ok(state.reachable(namespace, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> NetNamespaceName {
        NetNamespaceName::new(s).unwrap()
    }

    fn link(s: &str) -> InterfaceName {
        InterfaceName::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_new_namespace_has_only_loopback_down() {
        let backend = MockBackend::new();
        let blue = name("blue");

        backend.create_namespace(&blue).await.unwrap();

        let links = backend.list_links(Some(&blue)).await.unwrap();
        assert_eq!(links, vec![InterfaceName::loopback()]);
        assert!(!backend.is_up(&InterfaceName::loopback(), Some(&blue)).await);
    }

    #[tokio::test]
    async fn test_duplicate_namespace() {
        let backend = MockBackend::new();
        backend.create_namespace(&name("blue")).await.unwrap();

        let err = backend.create_namespace(&name("blue")).await.unwrap_err();
        assert!(matches!(err, Error::NamespaceExists { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_interface() {
        let backend = MockBackend::new();
        backend
            .create_veth_pair(&link("veth-host"), &link("veth-blue"))
            .await
            .unwrap();

        let err = backend
            .create_veth_pair(&link("veth-host"), &link("veth-other"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InterfaceExists { .. }));
    }

    #[tokio::test]
    async fn test_deleting_one_end_removes_peer() {
        let backend = MockBackend::new();
        backend
            .create_veth_pair(&link("veth-host"), &link("veth-blue"))
            .await
            .unwrap();

        backend.delete_link(&link("veth-blue"), None).await.unwrap();
        assert!(!backend.link_exists(&link("veth-host"), None).await.unwrap());
    }

    #[tokio::test]
    async fn test_move_into_missing_namespace() {
        let backend = MockBackend::new();
        backend
            .create_veth_pair(&link("veth-host"), &link("veth-blue"))
            .await
            .unwrap();

        let err = backend
            .move_link(&link("veth-blue"), &name("blue"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MoveFailed { .. }));
        assert!(backend.link_exists(&link("veth-blue"), None).await.unwrap());
    }

    #[tokio::test]
    async fn test_injected_failure_and_call_log() {
        let backend = MockBackend::new();
        backend.fail_on(Operation::CreateNamespace).await;

        assert!(backend.create_namespace(&name("blue")).await.is_err());
        assert_eq!(backend.calls().await, vec![Operation::CreateNamespace]);

        backend.clear_failure(Operation::CreateNamespace).await;
        assert!(backend.create_namespace(&name("blue")).await.is_ok());
        assert_eq!(backend.call_count().await, 2);
    }

    #[tokio::test]
    async fn test_delete_missing_objects_is_not_found() {
        let backend = MockBackend::new();

        let err = backend.delete_namespace(&name("blue")).await.unwrap_err();
        assert!(matches!(err, Error::NamespaceNotFound { .. }));

        let err = backend.delete_link(&link("veth-host"), None).await.unwrap_err();
        assert!(matches!(err, Error::LinkNotFound { .. }));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_deferred_peer_removal() {
        let backend = MockBackend::new();
        backend.defer_peer_removal().await;
        backend.create_namespace(&name("blue")).await.unwrap();
        backend
            .create_veth_pair(&link("veth-host"), &link("veth-blue"))
            .await
            .unwrap();
        backend.move_link(&link("veth-blue"), &name("blue")).await.unwrap();

        backend.delete_namespace(&name("blue")).await.unwrap();

        // Still listed, but gone by the time the delete lands.
        assert!(backend.link_exists(&link("veth-host"), None).await.unwrap());
        let err = backend.delete_link(&link("veth-host"), None).await.unwrap_err();
        assert!(matches!(err, Error::LinkNotFound { .. }));
        assert!(!backend.link_exists(&link("veth-host"), None).await.unwrap());
    }

    #[tokio::test]
    async fn test_default_route_needs_on_link_gateway() {
        let backend = MockBackend::new();
        let blue = name("blue");
        backend.create_namespace(&blue).await.unwrap();

        let err = backend
            .add_default_route(&blue, Ipv4Addr::new(10, 0, 0, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConfigurationFailed { .. }));
        assert_eq!(backend.default_route(&blue).await, None);
    }

    #[tokio::test]
    async fn test_off_link_needs_default_route() {
        let backend = MockBackend::new();
        let blue = name("blue");
        let (host, peer) = (link("veth-host"), link("veth-blue"));
        let subnet: Ipv4Cidr = "10.0.0.0/24".parse().unwrap();
        let external = Ipv4Addr::new(8, 8, 8, 8);

        backend.create_namespace(&blue).await.unwrap();
        backend.create_veth_pair(&host, &peer).await.unwrap();
        backend.move_link(&peer, &blue).await.unwrap();
        backend
            .add_address(&host, None, "10.0.0.1/24".parse().unwrap())
            .await
            .unwrap();
        backend.set_link_state(&host, None, LinkState::Up).await.unwrap();
        backend
            .add_address(&peer, Some(&blue), "10.0.0.2/24".parse().unwrap())
            .await
            .unwrap();
        backend
            .set_link_state(&peer, Some(&blue), LinkState::Up)
            .await
            .unwrap();
        backend.enable_forwarding().await.unwrap();
        backend
            .add_masquerade(&NatConfig {
                subnet,
                outbound: None,
            })
            .await
            .unwrap();

        assert!(!backend.ping(Some(&blue), external).await.unwrap());

        backend
            .add_default_route(&blue, Ipv4Addr::new(10, 0, 0, 1))
            .await
            .unwrap();
        assert!(backend.ping(Some(&blue), external).await.unwrap());

        // The route goes away with the namespace.
        backend.delete_namespace(&blue).await.unwrap();
        assert_eq!(backend.default_route(&blue).await, None);
    }

    #[tokio::test]
    async fn test_masquerade_rules() {
        let backend = MockBackend::new();
        let nat = NatConfig {
            subnet: "10.0.1.0/24".parse().unwrap(),
            outbound: None,
        };

        assert!(!backend.masquerade_exists(&nat).await.unwrap());
        backend.add_masquerade(&nat).await.unwrap();
        assert!(backend.masquerade_exists(&nat).await.unwrap());
        backend.remove_masquerade(&nat).await.unwrap();
        assert!(backend.remove_masquerade(&nat).await.is_err());
    }
}
