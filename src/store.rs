//! Shared, reference-counted server records.
//!
//! Two interfaces pointing at the same server share one [`ServerEntry`].
//! The store owns the entries; interface nodes hold [`EntryRef`]s and the
//! registry keeps `ref_count` equal to the number of those references.
//!
//! The store is not synchronised on its own. It lives inside a
//! [`Registry`](crate::registry::Registry), which is always used behind
//! the relay's single registry lock.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use serde::Serialize;

/// Identity of a configured server.
///
/// `port` separates DHCP helpers (67) from UDP forward targets on other
/// ports. `egress` is only set for DHCPv6 servers that must be reached
/// through a named interface; IPv4 keys always leave it `None`, so a
/// missing egress compares equal only to another missing egress.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ServerKey {
    pub address: IpAddr,
    pub port: u16,
    pub egress: Option<String>,
}

impl ServerKey {
    pub fn new(address: impl Into<IpAddr>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            egress: None,
        }
    }

    pub fn with_egress(address: impl Into<IpAddr>, port: u16, egress: Option<String>) -> Self {
        Self {
            address: address.into(),
            port,
            egress,
        }
    }
}

impl fmt::Display for ServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.egress {
            Some(egress) => write!(f, "{}%{}:{}", self.address, egress, self.port),
            None => write!(f, "{}:{}", self.address, self.port),
        }
    }
}

/// A borrowed handle to a stored entry.
///
/// Cloning the handle does not change the reference count; only
/// [`ServerStore::acquire`] and [`ServerStore::release`] do.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryRef(Arc<ServerKey>);

impl EntryRef {
    pub fn key(&self) -> &ServerKey {
        &self.0
    }

    pub fn matches(&self, key: &ServerKey) -> bool {
        *self.0 == *key
    }
}

impl std::ops::Deref for EntryRef {
    type Target = ServerKey;

    fn deref(&self) -> &ServerKey {
        &self.0
    }
}

#[derive(Debug)]
pub struct ServerEntry {
    key: Arc<ServerKey>,
    ref_count: u32,
}

impl ServerEntry {
    pub fn key(&self) -> &ServerKey {
        &self.key
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }
}

/// Owner of every [`ServerEntry`], keyed by value.
#[derive(Debug, Default)]
pub struct ServerStore {
    entries: HashMap<ServerKey, ServerEntry>,
}

impl ServerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle to the entry for `key`, creating it on first use.
    pub fn acquire(&mut self, key: ServerKey) -> EntryRef {
        let entry = self.entries.entry(key).or_insert_with_key(|key| ServerEntry {
            key: Arc::new(key.clone()),
            ref_count: 0,
        });
        entry.ref_count += 1;
        EntryRef(Arc::clone(&entry.key))
    }

    /// Drops one reference; the entry is removed when none remain.
    ///
    /// Releasing an entry that is no longer stored is a bookkeeping bug in
    /// the caller. It is logged and otherwise ignored.
    pub fn release(&mut self, entry: &EntryRef) {
        let Some(stored) = self.entries.get_mut(entry.key()) else {
            tracing::error!("Released server entry {} that is not stored", entry.key());
            return;
        };

        stored.ref_count -= 1;
        if stored.ref_count == 0 {
            self.entries.remove(entry.key());
        }
    }

    pub fn get(&self, key: &ServerKey) -> Option<&ServerEntry> {
        self.entries.get(key)
    }

    pub fn ref_count(&self, key: &ServerKey) -> u32 {
        self.entries.get(key).map_or(0, ServerEntry::ref_count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerEntry> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn helper(last: u8) -> ServerKey {
        ServerKey::new(Ipv4Addr::new(10, 0, 0, last), 67)
    }

    #[test]
    fn test_acquire_shares_entry() {
        let mut store = ServerStore::new();

        let first = store.acquire(helper(1));
        let second = store.acquire(helper(1));

        assert_eq!(store.len(), 1);
        assert_eq!(store.ref_count(&helper(1)), 2);
        assert_eq!(first, second);
    }

    #[test]
    fn test_release_removes_at_zero() {
        let mut store = ServerStore::new();
        let entry = store.acquire(helper(1));
        store.acquire(helper(1));

        store.release(&entry);
        assert_eq!(store.ref_count(&helper(1)), 1);

        store.release(&entry);
        assert!(store.get(&helper(1)).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_release_of_unknown_entry_is_ignored() {
        let mut store = ServerStore::new();
        let entry = store.acquire(helper(1));
        store.release(&entry);
        store.release(&entry);
        assert!(store.is_empty());
    }

    #[test]
    fn test_port_distinguishes_entries() {
        let mut store = ServerStore::new();
        store.acquire(ServerKey::new(Ipv4Addr::new(10, 0, 0, 1), 67));
        store.acquire(ServerKey::new(Ipv4Addr::new(10, 0, 0, 1), 53));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_egress_equality_rule() {
        let server: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let none = ServerKey::with_egress(server, 547, None);
        let eth1 = ServerKey::with_egress(server, 547, Some("eth1".to_string()));
        let eth2 = ServerKey::with_egress(server, 547, Some("eth2".to_string()));

        assert_ne!(none, eth1);
        assert_ne!(eth1, eth2);
        assert_eq!(eth1, ServerKey::with_egress(server, 547, Some("eth1".to_string())));

        let mut store = ServerStore::new();
        store.acquire(none.clone());
        store.acquire(eth1.clone());
        store.acquire(eth1.clone());
        assert_eq!(store.len(), 2);
        assert_eq!(store.ref_count(&none), 1);
        assert_eq!(store.ref_count(&eth1), 2);
    }

    #[test]
    fn test_display() {
        assert_eq!(helper(1).to_string(), "10.0.0.1:67");
        let key = ServerKey::with_egress(
            "fe80::1".parse::<Ipv6Addr>().unwrap(),
            547,
            Some("eth0".to_string()),
        );
        assert_eq!(key.to_string(), "fe80::1%eth0:547");
    }
}
