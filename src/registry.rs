//! Interface to server mapping.
//!
//! Each [`InterfaceNode`] holds a bounded list of references into the
//! registry's [`ServerStore`], an optional BOOTP gateway and its packet
//! counters. The registry keeps three things true after every call:
//!
//! - an entry's reference count equals the number of nodes pointing at it,
//! - a node exists only while it has a server or a gateway,
//! - a failed call leaves the registry exactly as it was.
//!
//! The registry does no locking; the relay wraps each one in a single
//! mutex and holds it for whole operations, fan-out sends included.

use std::collections::HashMap;
use std::fmt::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::stats::{PacketCounters, StatsTable};
use crate::store::{EntryRef, ServerKey, ServerStore};

/// Default per-interface bound for IPv4: 8 DHCP helpers plus 8 UDP
/// forward targets.
pub const IPV4_SERVER_CAPACITY: usize = 16;

/// Default per-interface bound for DHCPv6 servers.
pub const IPV6_SERVER_CAPACITY: usize = 8;

/// Relay state for one interface.
#[derive(Debug)]
pub struct InterfaceNode {
    name: String,
    servers: Vec<EntryRef>,
    bootp_gateway: Option<Ipv4Addr>,
    counters: Arc<PacketCounters>,
}

impl InterfaceNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Servers in slot order; there are never holes.
    pub fn servers(&self) -> &[EntryRef] {
        &self.servers
    }

    /// Servers registered for one destination port.
    pub fn servers_on_port(&self, port: u16) -> impl Iterator<Item = &ServerKey> + '_ {
        self.servers
            .iter()
            .map(EntryRef::key)
            .filter(move |key| key.port == port)
    }

    pub fn bootp_gateway(&self) -> Option<Ipv4Addr> {
        self.bootp_gateway
    }

    pub fn counters(&self) -> &Arc<PacketCounters> {
        &self.counters
    }

    fn contains(&self, key: &ServerKey) -> bool {
        self.servers.iter().any(|entry| entry.matches(key))
    }

    fn is_unused(&self) -> bool {
        self.servers.is_empty() && self.bootp_gateway.is_none()
    }
}

/// What [`Registry::apply_server_diff`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerDiff {
    pub added: Vec<ServerKey>,
    pub removed: Vec<ServerKey>,
}

impl ServerDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Interfaces and the servers configured on them.
#[derive(Debug)]
pub struct Registry {
    capacity: usize,
    store: ServerStore,
    nodes: HashMap<String, InterfaceNode>,
    stats: Option<Arc<StatsTable>>,
}

impl Registry {
    /// A registry whose nodes keep private counters.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            store: ServerStore::new(),
            nodes: HashMap::new(),
            stats: None,
        }
    }

    /// A registry that publishes node counters in `stats`.
    ///
    /// Counters are registered when a node is created and forgotten when it
    /// is removed.
    pub fn with_stats(capacity: usize, stats: Arc<StatsTable>) -> Self {
        Self {
            stats: Some(stats),
            ..Self::new(capacity)
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn store(&self) -> &ServerStore {
        &self.store
    }

    pub fn node(&self, interface: &str) -> Option<&InterfaceNode> {
        self.nodes.get(interface)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &InterfaceNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, interface: &str, key: &ServerKey) -> bool {
        self.nodes
            .get(interface)
            .is_some_and(|node| node.contains(key))
    }

    pub fn ref_count(&self, key: &ServerKey) -> u32 {
        self.store.ref_count(key)
    }

    /// Adds `key` to the servers of `interface`.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateServer`] if the interface already references it.
    /// - [`Error::CapacityExceeded`] if the interface is full.
    ///
    /// The registry is unchanged on error.
    pub fn add_reference(&mut self, interface: &str, key: ServerKey) -> Result<()> {
        let held = match self.nodes.get(interface) {
            Some(node) if node.contains(&key) => {
                return Err(Error::DuplicateServer {
                    interface: interface.to_string(),
                    server: key.to_string(),
                });
            }
            Some(node) => node.servers.len(),
            None => 0,
        };

        if held >= self.capacity {
            return Err(Error::CapacityExceeded {
                interface: interface.to_string(),
                capacity: self.capacity,
            });
        }

        let entry = self.store.acquire(key);
        debug!(
            "Added server {} to interface {} (refcount {})",
            entry.key(),
            interface,
            self.store.ref_count(entry.key())
        );
        self.node_mut_or_create(interface).servers.push(entry);
        Ok(())
    }

    /// Removes `key` from the servers of `interface`.
    ///
    /// Returns `false`, changing nothing, when the interface does not
    /// reference it. The last slot fills the hole left behind.
    pub fn remove_reference(&mut self, interface: &str, key: &ServerKey) -> bool {
        let Some(node) = self.nodes.get_mut(interface) else {
            return false;
        };
        let Some(slot) = node.servers.iter().position(|entry| entry.matches(key)) else {
            return false;
        };

        let entry = node.servers.swap_remove(slot);
        self.store.release(&entry);
        debug!(
            "Removed server {} from interface {} (refcount {})",
            key,
            interface,
            self.store.ref_count(key)
        );

        self.remove_if_unused(interface);
        true
    }

    /// Sets or clears the BOOTP gateway of `interface`.
    ///
    /// Clearing the gateway of a node with no servers removes the node.
    pub fn set_bootp_gateway(&mut self, interface: &str, gateway: Option<Ipv4Addr>) {
        match gateway {
            Some(address) => {
                let node = self.node_mut_or_create(interface);
                let old = node.bootp_gateway.replace(address);
                if old != Some(address) {
                    info!(
                        "BOOTP gateway on {} changed. old: {:?}, new: {}",
                        interface, old, address
                    );
                }
            }
            None => {
                if let Some(node) = self.nodes.get_mut(interface)
                    && let Some(old) = node.bootp_gateway.take()
                {
                    info!("BOOTP gateway {} removed from {}", old, interface);
                    self.remove_if_unused(interface);
                }
            }
        }
    }

    pub fn bootp_gateway(&self, interface: &str) -> Option<Ipv4Addr> {
        self.nodes
            .get(interface)
            .and_then(InterfaceNode::bootp_gateway)
    }

    /// Makes the servers of `interface` equal to `desired`.
    ///
    /// Removals run before additions. When the result would not fit the
    /// capacity nothing is applied and [`Error::CapacityExceeded`] is
    /// returned.
    pub fn apply_server_diff(&mut self, interface: &str, desired: &[ServerKey]) -> Result<ServerDiff> {
        let current: &[EntryRef] = self
            .nodes
            .get(interface)
            .map_or(&[], |node| node.servers.as_slice());

        let mut diff = ServerDiff::default();
        for entry in current {
            if !desired.contains(entry.key()) {
                diff.removed.push(entry.key().clone());
            }
        }
        for key in desired {
            let held = current.iter().any(|entry| entry.matches(key));
            if !held && !diff.added.contains(key) {
                diff.added.push(key.clone());
            }
        }

        let resulting = current.len() - diff.removed.len() + diff.added.len();
        if resulting > self.capacity {
            return Err(Error::CapacityExceeded {
                interface: interface.to_string(),
                capacity: self.capacity,
            });
        }

        for key in &diff.removed {
            self.remove_reference(interface, key);
        }
        for key in &diff.added {
            self.add_reference(interface, key.clone())?;
        }

        Ok(diff)
    }

    /// Drops every server reference and the gateway of `interface`.
    ///
    /// Returns the keys that were removed.
    pub fn remove_interface(&mut self, interface: &str) -> Vec<ServerKey> {
        let Some(node) = self.nodes.remove(interface) else {
            return Vec::new();
        };

        let removed = node
            .servers
            .iter()
            .map(|entry| {
                self.store.release(entry);
                entry.key().clone()
            })
            .collect();

        if let Some(stats) = &self.stats {
            stats.forget(interface);
        }
        info!("Interface {} removed from relay", interface);
        removed
    }

    /// Renders per-interface servers and reference counts.
    ///
    /// With `port` set, only servers on that port are listed.
    pub fn dump(&self, interface: Option<&str>, port: Option<u16>) -> String {
        let mut names: Vec<&String> = self
            .nodes
            .keys()
            .filter(|name| interface.is_none_or(|wanted| wanted == name.as_str()))
            .collect();
        names.sort();

        let mut out = String::new();
        for name in names {
            let node = &self.nodes[name];
            let _ = writeln!(out, "Interface {}: {}", node.name, node.servers.len());

            if self.stats.is_some() {
                let counters = node.counters.snapshot();
                let _ = writeln!(out, "client request dropped packets = {}", counters.client_drops);
                let _ = writeln!(out, "client request valid packets = {}", counters.client_valids);
                let _ = writeln!(out, "server request dropped packets = {}", counters.serv_drops);
                let _ = writeln!(out, "server request valid packets = {}", counters.serv_valids);
                let _ = writeln!(
                    out,
                    "client request dropped packets with option 82 = {}",
                    counters.client_drops_with_option82
                );
                let _ = writeln!(
                    out,
                    "client request valid packets with option 82 = {}",
                    counters.client_valids_with_option82
                );
                let _ = writeln!(
                    out,
                    "server request dropped packets with option 82 = {}",
                    counters.serv_drops_with_option82
                );
                let _ = writeln!(
                    out,
                    "server request valid packets with option 82 = {}",
                    counters.serv_valids_with_option82
                );
                let _ = writeln!(out, "{}", node.bootp_gateway.unwrap_or(Ipv4Addr::UNSPECIFIED));
            }

            let mut found = false;
            for entry in &node.servers {
                let key = entry.key();
                if port.is_some_and(|port| port != key.port) {
                    continue;
                }
                found = true;
                let ref_count = self.store.ref_count(key);
                match key.address {
                    IpAddr::V4(address) => {
                        let _ = writeln!(out, "Port {} - {},{}", key.port, address, ref_count);
                    }
                    IpAddr::V6(address) => {
                        let _ = writeln!(
                            out,
                            "{},{},egress {}",
                            address,
                            ref_count,
                            key.egress.as_deref().unwrap_or("-")
                        );
                    }
                }
            }

            if let Some(port) = port
                && !found
            {
                let _ = writeln!(out, "No IP address associated with this port: {}", port);
            }
        }
        out
    }

    fn node_mut_or_create(&mut self, interface: &str) -> &mut InterfaceNode {
        let stats = self.stats.as_ref();
        self.nodes
            .entry(interface.to_string())
            .or_insert_with(|| {
                debug!("Created relay node for {}", interface);
                InterfaceNode {
                    name: interface.to_string(),
                    servers: Vec::new(),
                    bootp_gateway: None,
                    counters: stats.map_or_else(Arc::default, |stats| stats.track(interface)),
                }
            })
    }

    fn remove_if_unused(&mut self, interface: &str) {
        if self.nodes.get(interface).is_some_and(InterfaceNode::is_unused) {
            self.nodes.remove(interface);
            if let Some(stats) = &self.stats {
                stats.forget(interface);
            }
            debug!("Removed relay node for {}", interface);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    fn helper(last: u8) -> ServerKey {
        ServerKey::new(Ipv4Addr::new(10, 0, 0, last), 67)
    }

    #[test]
    fn test_shared_entry_dedup_and_cleanup() {
        let mut registry = Registry::new(IPV4_SERVER_CAPACITY);

        registry.add_reference("eth1", helper(1)).unwrap();
        registry.add_reference("eth2", helper(1)).unwrap();
        assert_eq!(registry.store().len(), 1);
        assert_eq!(registry.ref_count(&helper(1)), 2);

        assert!(registry.remove_reference("eth1", &helper(1)));
        assert_eq!(registry.ref_count(&helper(1)), 1);
        assert!(registry.node("eth1").is_none());

        assert!(registry.remove_reference("eth2", &helper(1)));
        assert!(registry.store().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_node_with_gateway_survives_last_server() {
        let mut registry = Registry::new(IPV4_SERVER_CAPACITY);
        registry.add_reference("eth1", helper(1)).unwrap();
        registry.set_bootp_gateway("eth1", Some(Ipv4Addr::new(10, 0, 0, 254)));

        assert!(registry.remove_reference("eth1", &helper(1)));
        assert!(registry.node("eth1").is_some());
        assert_eq!(
            registry.bootp_gateway("eth1"),
            Some(Ipv4Addr::new(10, 0, 0, 254))
        );

        registry.set_bootp_gateway("eth1", None);
        assert!(registry.node("eth1").is_none());
    }

    #[test]
    fn test_clearing_gateway_keeps_node_with_servers() {
        let mut registry = Registry::new(IPV4_SERVER_CAPACITY);
        registry.set_bootp_gateway("eth1", Some(Ipv4Addr::new(10, 0, 0, 254)));
        registry.add_reference("eth1", helper(1)).unwrap();
        registry.set_bootp_gateway("eth1", None);

        assert!(registry.contains("eth1", &helper(1)));
        assert_eq!(registry.bootp_gateway("eth1"), None);
        registry.set_bootp_gateway("eth9", None);
        assert!(registry.node("eth9").is_none());
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut registry = Registry::new(IPV4_SERVER_CAPACITY);
        registry.add_reference("eth1", helper(1)).unwrap();

        assert!(!registry.remove_reference("eth1", &helper(2)));
        assert!(!registry.remove_reference("eth2", &helper(1)));
        assert_eq!(registry.ref_count(&helper(1)), 1);
        assert_eq!(registry.node("eth1").unwrap().servers().len(), 1);
    }

    #[test]
    fn test_capacity_exceeded_leaves_list_unchanged() {
        let mut registry = Registry::new(3);
        for last in 1..=3 {
            registry.add_reference("eth1", helper(last)).unwrap();
        }
        let before: Vec<ServerKey> = registry
            .node("eth1")
            .unwrap()
            .servers()
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let result = registry.add_reference("eth1", helper(4));
        assert!(matches!(
            result,
            Err(Error::CapacityExceeded { capacity: 3, .. })
        ));

        let after: Vec<ServerKey> = registry
            .node("eth1")
            .unwrap()
            .servers()
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        assert_eq!(before, after);
        assert_eq!(registry.ref_count(&helper(4)), 0);
    }

    #[test]
    fn test_zero_capacity_creates_nothing() {
        let mut registry = Registry::new(0);
        assert!(registry.add_reference("eth1", helper(1)).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_reference_rejected() {
        let mut registry = Registry::new(IPV4_SERVER_CAPACITY);
        registry.add_reference("eth1", helper(1)).unwrap();

        let result = registry.add_reference("eth1", helper(1));
        assert!(matches!(result, Err(Error::DuplicateServer { .. })));
        assert_eq!(registry.ref_count(&helper(1)), 1);
    }

    #[test]
    fn test_swap_remove_keeps_list_contiguous() {
        let mut registry = Registry::new(IPV4_SERVER_CAPACITY);
        for last in 1..=4 {
            registry.add_reference("eth1", helper(last)).unwrap();
        }

        registry.remove_reference("eth1", &helper(2));
        let servers: Vec<_> = registry
            .node("eth1")
            .unwrap()
            .servers()
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        assert_eq!(servers, vec![helper(1), helper(4), helper(3)]);
    }

    #[test]
    fn test_servers_on_port() {
        let mut registry = Registry::new(IPV4_SERVER_CAPACITY);
        registry.add_reference("eth1", helper(1)).unwrap();
        registry
            .add_reference("eth1", ServerKey::new(Ipv4Addr::new(10, 0, 0, 53), 53))
            .unwrap();

        let node = registry.node("eth1").unwrap();
        assert_eq!(node.servers_on_port(67).count(), 1);
        assert_eq!(node.servers_on_port(53).count(), 1);
        assert_eq!(node.servers_on_port(123).count(), 0);
    }

    #[test]
    fn test_apply_server_diff() {
        let mut registry = Registry::new(IPV4_SERVER_CAPACITY);
        registry.add_reference("eth1", helper(1)).unwrap();
        registry.add_reference("eth1", helper(2)).unwrap();

        let diff = registry
            .apply_server_diff("eth1", &[helper(2), helper(3), helper(3)])
            .unwrap();
        assert_eq!(diff.removed, vec![helper(1)]);
        assert_eq!(diff.added, vec![helper(3)]);
        assert!(registry.contains("eth1", &helper(2)));
        assert!(registry.contains("eth1", &helper(3)));
        assert!(!registry.contains("eth1", &helper(1)));

        let diff = registry.apply_server_diff("eth1", &[]).unwrap();
        assert_eq!(diff.removed.len(), 2);
        assert!(registry.node("eth1").is_none());
    }

    #[test]
    fn test_apply_server_diff_over_capacity_is_all_or_nothing() {
        let mut registry = Registry::new(2);
        registry.add_reference("eth1", helper(1)).unwrap();

        let result = registry.apply_server_diff("eth1", &[helper(2), helper(3), helper(4)]);
        assert!(matches!(result, Err(Error::CapacityExceeded { .. })));
        assert!(registry.contains("eth1", &helper(1)));
        assert_eq!(registry.node("eth1").unwrap().servers().len(), 1);
        assert_eq!(registry.store().len(), 1);
    }

    #[test]
    fn test_remove_interface_releases_references() {
        let mut registry = Registry::new(IPV4_SERVER_CAPACITY);
        registry.add_reference("eth1", helper(1)).unwrap();
        registry.add_reference("eth2", helper(1)).unwrap();
        registry.set_bootp_gateway("eth1", Some(Ipv4Addr::new(10, 0, 0, 254)));

        let removed = registry.remove_interface("eth1");
        assert_eq!(removed, vec![helper(1)]);
        assert!(registry.node("eth1").is_none());
        assert_eq!(registry.ref_count(&helper(1)), 1);
        assert!(registry.remove_interface("eth1").is_empty());
    }

    #[test]
    fn test_stats_follow_node_lifetime() {
        let stats = Arc::new(StatsTable::new());
        let mut registry = Registry::with_stats(IPV4_SERVER_CAPACITY, Arc::clone(&stats));

        registry.add_reference("eth1", helper(1)).unwrap();
        registry.node("eth1").unwrap().counters().record_client(true, false);
        assert_eq!(stats.snapshot_counters("eth1").unwrap().client_valids, 1);

        registry.remove_reference("eth1", &helper(1));
        assert!(stats.get("eth1").is_none());
    }

    #[test]
    fn test_dump_format() {
        let stats = Arc::new(StatsTable::new());
        let mut registry = Registry::with_stats(IPV4_SERVER_CAPACITY, stats);
        registry.add_reference("eth1", helper(1)).unwrap();
        registry
            .add_reference("eth1", ServerKey::new(Ipv4Addr::new(10, 0, 0, 53), 53))
            .unwrap();
        registry.add_reference("eth2", helper(1)).unwrap();

        let dump = registry.dump(Some("eth1"), None);
        assert!(dump.starts_with("Interface eth1: 2\n"));
        assert!(dump.contains("client request valid packets = 0\n"));
        assert!(dump.contains("server request dropped packets with option 82 = 0\n"));
        assert!(dump.contains("0.0.0.0\n"));
        assert!(dump.contains("Port 67 - 10.0.0.1,2\n"));
        assert!(dump.contains("Port 53 - 10.0.0.53,1\n"));
        assert!(!dump.contains("eth2"));

        let filtered = registry.dump(Some("eth2"), Some(123));
        assert!(filtered.contains("No IP address associated with this port: 123\n"));
    }

    #[test]
    fn test_dump_ipv6_entries() {
        let mut registry = Registry::new(IPV6_SERVER_CAPACITY);
        let server: Ipv6Addr = "fe80::1".parse().unwrap();
        registry
            .add_reference(
                "eth1",
                ServerKey::with_egress(server, 547, Some("eth3".to_string())),
            )
            .unwrap();

        let dump = registry.dump(None, None);
        assert_eq!(dump, "Interface eth1: 1\nfe80::1,1,egress eth3\n");
    }
}
