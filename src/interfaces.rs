//! Identity of the interfaces the relay listens on.
//!
//! The decision engine needs each interface's index, hardware address and
//! IP addresses: the index becomes the option 82 Circuit-ID, the MAC or an
//! address becomes the Remote-ID, and the lowest address is stamped into
//! `giaddr`. Enumerating them from the OS is left to the caller; the table
//! is filled from configuration.

use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A 48-bit Ethernet address, written `aa:bb:cc:dd:ee:ff` in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddress {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let mut octets = [0u8; 6];
        let mut parts = value.split([':', '-']);

        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| Error::InvalidAddress(format!("MAC address too short: {}", value)))?;
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| Error::InvalidAddress(format!("Invalid MAC address: {}", value)))?;
        }

        if parts.next().is_some() {
            return Err(Error::InvalidAddress(format!(
                "MAC address too long: {}",
                value
            )));
        }

        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        )
    }
}

/// One relay-facing interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub index: u32,
    pub mac: MacAddress,
    pub addresses: Vec<Ipv4Addr>,
    pub ipv6_addresses: Vec<Ipv6Addr>,
}

impl InterfaceInfo {
    /// The address the relay speaks for on this interface.
    ///
    /// The numerically lowest configured address, or `None` when the
    /// interface has no usable IPv4 address.
    pub fn primary_address(&self) -> Option<Ipv4Addr> {
        self.addresses
            .iter()
            .copied()
            .filter(|address| !address.is_unspecified())
            .min()
    }

    pub fn owns(&self, address: Ipv4Addr) -> bool {
        !address.is_unspecified() && self.addresses.contains(&address)
    }

    pub fn owns_v6(&self, address: Ipv6Addr) -> bool {
        self.ipv6_addresses.contains(&address)
    }

    /// First global unicast IPv6 address, used as the Relay-Forward
    /// link-address.
    pub fn global_ipv6_address(&self) -> Option<Ipv6Addr> {
        self.ipv6_addresses
            .iter()
            .copied()
            .find(|address| !address.is_unspecified() && !is_link_local_v6(*address))
    }
}

pub fn is_link_local_v6(address: Ipv6Addr) -> bool {
    (address.segments()[0] & 0xffc0) == 0xfe80
}

/// Interfaces known to the relay, addressable by index, name or address.
#[derive(Debug, Clone, Default)]
pub struct InterfaceTable {
    interfaces: HashMap<String, InterfaceInfo>,
    names_by_index: HashMap<u32, String>,
}

impl InterfaceTable {
    pub fn new(interfaces: impl IntoIterator<Item = InterfaceInfo>) -> Self {
        let mut table = Self::default();
        for interface in interfaces {
            table.insert(interface);
        }
        table
    }

    /// Adds or replaces an interface.
    pub fn insert(&mut self, interface: InterfaceInfo) {
        if let Some(previous) = self.interfaces.get(&interface.name)
            && previous.index != interface.index
        {
            self.names_by_index.remove(&previous.index);
        }
        self.names_by_index
            .insert(interface.index, interface.name.clone());
        self.interfaces.insert(interface.name.clone(), interface);
    }

    pub fn by_name(&self, name: &str) -> Option<&InterfaceInfo> {
        self.interfaces.get(name)
    }

    pub fn by_index(&self, index: u32) -> Option<&InterfaceInfo> {
        self.names_by_index
            .get(&index)
            .and_then(|name| self.interfaces.get(name))
    }

    /// The interface that owns an IPv4 address.
    ///
    /// Used to find the client-facing interface of a server reply from
    /// its `giaddr`.
    pub fn by_address(&self, address: Ipv4Addr) -> Option<&InterfaceInfo> {
        self.interfaces
            .values()
            .find(|interface| interface.owns(address))
    }

    pub fn by_ipv6_address(&self, address: Ipv6Addr) -> Option<&InterfaceInfo> {
        self.interfaces
            .values()
            .find(|interface| interface.owns_v6(address))
    }

    pub fn iter(&self) -> impl Iterator<Item = &InterfaceInfo> {
        self.interfaces.values()
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}
