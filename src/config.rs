use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::dhcpv6::DHCPV6_SERVER_PORT;
use crate::error::{Error, Result};
use crate::interfaces::{InterfaceInfo, MacAddress, is_link_local_v6};
use crate::option82::{Policy, RemoteIdKind, ReplyValidation};
use crate::packet::{DHCP_CLIENT_PORT, DHCP_SERVER_PORT};
use crate::registry::{IPV4_SERVER_CAPACITY, IPV6_SERVER_CAPACITY};
use crate::stats::{STATS_DEFAULT_INTERVAL_MS, sync_interval};
use crate::store::ServerKey;

/// Most DHCP helper addresses one interface may list.
pub const MAX_HELPER_ADDRESSES: usize = 8;

/// Most UDP forward targets one interface may list.
pub const MAX_UDP_FORWARDS: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub features: Features,
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
    #[serde(default = "default_ipv4_capacity")]
    pub ipv4_server_capacity: usize,
    #[serde(default = "default_ipv6_capacity")]
    pub ipv6_server_capacity: usize,
    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,
}

fn default_stats_interval_ms() -> u64 {
    STATS_DEFAULT_INTERVAL_MS
}

fn default_ipv4_capacity() -> usize {
    IPV4_SERVER_CAPACITY
}

fn default_ipv6_capacity() -> usize {
    IPV6_SERVER_CAPACITY
}

/// Global switches and option 82 policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Features {
    pub dhcp_relay: bool,
    pub hop_count_increment: bool,
    pub option82: bool,
    pub option82_validate: bool,
    pub option82_policy: Policy,
    pub option82_remote_id: RemoteIdKind,
    pub udp_forwarder: bool,
    pub dhcpv6_relay: bool,
    pub dhcpv6_option79: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            dhcp_relay: true,
            hop_count_increment: true,
            option82: false,
            option82_validate: false,
            option82_policy: Policy::Replace,
            option82_remote_id: RemoteIdKind::Mac,
            udp_forwarder: false,
            dhcpv6_relay: false,
            dhcpv6_option79: false,
        }
    }
}

impl Features {
    /// How server replies are checked before the block is stripped.
    pub fn reply_validation(&self) -> ReplyValidation {
        if self.option82_validate {
            ReplyValidation::Strict
        } else if self.option82 {
            ReplyValidation::RejectCorrupt
        } else {
            ReplyValidation::Off
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,
    pub index: u32,
    pub mac: MacAddress,
    #[serde(default)]
    pub addresses: Vec<Ipv4Addr>,
    #[serde(default)]
    pub ipv6_addresses: Vec<Ipv6Addr>,
    #[serde(default)]
    pub helper_addresses: Vec<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootp_gateway: Option<Ipv4Addr>,
    #[serde(default)]
    pub udp_forward: Vec<UdpForward>,
    #[serde(default)]
    pub dhcpv6_servers: Vec<Dhcpv6Server>,
}

impl InterfaceConfig {
    pub fn info(&self) -> InterfaceInfo {
        InterfaceInfo {
            name: self.name.clone(),
            index: self.index,
            mac: self.mac,
            addresses: self.addresses.clone(),
            ipv6_addresses: self.ipv6_addresses.clone(),
        }
    }

    /// Helper addresses on port 67 followed by UDP forward targets.
    pub fn ipv4_servers(&self) -> Vec<ServerKey> {
        self.helper_addresses
            .iter()
            .map(|address| ServerKey::new(*address, DHCP_SERVER_PORT))
            .chain(
                self.udp_forward
                    .iter()
                    .map(|target| ServerKey::new(target.address, target.port.0)),
            )
            .collect()
    }

    pub fn ipv6_servers(&self) -> Vec<ServerKey> {
        self.dhcpv6_servers
            .iter()
            .map(|server| {
                ServerKey::with_egress(server.address, DHCPV6_SERVER_PORT, server.egress.clone())
            })
            .collect()
    }
}

/// A generic UDP broadcast forwarding target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpForward {
    pub address: Ipv4Addr,
    pub port: UdpPort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dhcpv6Server {
    pub address: Ipv6Addr,
    /// Interface used to reach a link-local server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress: Option<String>,
}

/// Well-known protocols accepted by name for UDP forwarding.
const UDP_PORT_NAMES: &[(&str, u16)] = &[
    ("dns", 53),
    ("ntp", 123),
    ("netbios-ns", 137),
    ("netbios-dgm", 138),
    ("radius", 1812),
    ("radius-old", 1645),
    ("rip", 520),
    ("snmp", 161),
    ("snmp-trap", 162),
    ("tftp", 69),
    ("timep", 37),
];

/// UDP destination port, written as a number or a protocol name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PortValue", into = "u16")]
pub struct UdpPort(pub u16);

impl UdpPort {
    pub fn name(&self) -> Option<&'static str> {
        UDP_PORT_NAMES
            .iter()
            .find(|(_, port)| *port == self.0)
            .map(|(name, _)| *name)
    }
}

impl FromStr for UdpPort {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        if let Ok(port) = value.parse::<u16>() {
            return Ok(Self(port));
        }
        UDP_PORT_NAMES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(value))
            .map(|(_, port)| Self(*port))
            .ok_or_else(|| Error::InvalidConfig(format!("unknown UDP port '{}'", value)))
    }
}

impl fmt::Display for UdpPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", self.0, name),
            None => write!(f, "{}", self.0),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u16),
    Name(String),
}

impl TryFrom<PortValue> for UdpPort {
    type Error = Error;

    fn try_from(value: PortValue) -> Result<Self> {
        match value {
            PortValue::Number(port) => Ok(Self(port)),
            PortValue::Name(name) => name.parse(),
        }
    }
}

impl From<UdpPort> for u16 {
    fn from(port: UdpPort) -> Self {
        port.0
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            features: Features::default(),
            stats_interval_ms: STATS_DEFAULT_INTERVAL_MS,
            ipv4_server_capacity: IPV4_SERVER_CAPACITY,
            ipv6_server_capacity: IPV6_SERVER_CAPACITY,
            interfaces: vec![InterfaceConfig {
                name: "eth1".to_string(),
                index: 2,
                mac: MacAddress([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]),
                addresses: vec![Ipv4Addr::new(192, 168, 1, 1)],
                ipv6_addresses: Vec::new(),
                helper_addresses: vec![Ipv4Addr::new(10, 0, 0, 10)],
                bootp_gateway: None,
                udp_forward: Vec::new(),
                dhcpv6_servers: Vec::new(),
            }],
        }
    }
}

impl RelayConfig {
    /// Loads the file at `path`, writing the defaults there first if it
    /// does not exist.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            Self::load(path)
        } else {
            let config = RelayConfig::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RelayConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.ipv4_server_capacity == 0 || self.ipv6_server_capacity == 0 {
            return Err(Error::InvalidConfig(
                "server capacities must be greater than 0".to_string(),
            ));
        }

        let mut names = HashSet::new();
        let mut indices = HashSet::new();

        for interface in &self.interfaces {
            if interface.name.is_empty() {
                return Err(Error::InvalidConfig(
                    "interface name must not be empty".to_string(),
                ));
            }
            if !names.insert(interface.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "interface {} is listed twice",
                    interface.name
                )));
            }
            if !indices.insert(interface.index) {
                return Err(Error::InvalidConfig(format!(
                    "interface index {} is used twice",
                    interface.index
                )));
            }

            self.validate_interface(interface)?;
        }

        for interface in &self.interfaces {
            for server in &interface.dhcpv6_servers {
                if let Some(egress) = &server.egress
                    && !names.contains(egress.as_str())
                {
                    return Err(Error::InvalidConfig(format!(
                        "DHCPv6 server {} on {} uses unknown egress interface {}",
                        server.address, interface.name, egress
                    )));
                }
            }
        }

        Ok(())
    }

    fn validate_interface(&self, interface: &InterfaceConfig) -> Result<()> {
        let name = &interface.name;

        if interface.helper_addresses.len() > MAX_HELPER_ADDRESSES {
            return Err(Error::InvalidConfig(format!(
                "{} lists {} helper addresses, at most {} are allowed",
                name,
                interface.helper_addresses.len(),
                MAX_HELPER_ADDRESSES
            )));
        }
        if interface.udp_forward.len() > MAX_UDP_FORWARDS {
            return Err(Error::InvalidConfig(format!(
                "{} lists {} UDP forward targets, at most {} are allowed",
                name,
                interface.udp_forward.len(),
                MAX_UDP_FORWARDS
            )));
        }

        for address in &interface.helper_addresses {
            validate_helper_address(*address)?;
        }
        for target in &interface.udp_forward {
            validate_forward_address(target.address)?;
            if matches!(target.port.0, 0 | DHCP_SERVER_PORT | DHCP_CLIENT_PORT) {
                return Err(Error::InvalidConfig(format!(
                    "{} cannot forward UDP port {}",
                    name, target.port
                )));
            }
        }
        for server in &interface.dhcpv6_servers {
            validate_dhcpv6_server(server)?;
        }

        let ipv4 = interface.ipv4_servers();
        if has_duplicates(&ipv4) {
            return Err(Error::InvalidConfig(format!(
                "{} lists the same server twice",
                name
            )));
        }
        if ipv4.len() > self.ipv4_server_capacity {
            return Err(Error::InvalidConfig(format!(
                "{} lists {} IPv4 servers, capacity is {}",
                name,
                ipv4.len(),
                self.ipv4_server_capacity
            )));
        }

        let ipv6 = interface.ipv6_servers();
        if has_duplicates(&ipv6) {
            return Err(Error::InvalidConfig(format!(
                "{} lists the same DHCPv6 server twice",
                name
            )));
        }
        if ipv6.len() > self.ipv6_server_capacity {
            return Err(Error::InvalidConfig(format!(
                "{} lists {} DHCPv6 servers, capacity is {}",
                name,
                ipv6.len(),
                self.ipv6_server_capacity
            )));
        }

        if let Some(gateway) = interface.bootp_gateway
            && !interface.addresses.contains(&gateway)
        {
            return Err(Error::InvalidConfig(format!(
                "bootp gateway {} is not an address of {}",
                gateway, name
            )));
        }

        Ok(())
    }

    pub fn interface(&self, name: &str) -> Option<&InterfaceConfig> {
        self.interfaces.iter().find(|interface| interface.name == name)
    }

    /// Export period, raised to the minimum if configured lower.
    pub fn stats_interval(&self) -> Duration {
        sync_interval(self.stats_interval_ms)
    }
}

fn has_duplicates(keys: &[ServerKey]) -> bool {
    let mut seen = HashSet::new();
    keys.iter().any(|key| !seen.insert(key))
}

/// A DHCP helper must be a plain unicast address.
pub fn validate_helper_address(address: Ipv4Addr) -> Result<()> {
    if address.is_unspecified()
        || address.is_broadcast()
        || address.is_multicast()
        || address.is_loopback()
    {
        return Err(Error::InvalidAddress(format!(
            "{} cannot be used as a DHCP helper address",
            address
        )));
    }
    Ok(())
}

/// A UDP forward target may be a unicast or a directed broadcast address.
pub fn validate_forward_address(address: Ipv4Addr) -> Result<()> {
    if address.is_unspecified()
        || address.is_broadcast()
        || address.is_multicast()
        || address.is_loopback()
    {
        return Err(Error::InvalidAddress(format!(
            "{} cannot be used as a UDP forward address",
            address
        )));
    }
    Ok(())
}

/// A DHCPv6 server must be unicast; link-local servers need an egress.
pub fn validate_dhcpv6_server(server: &Dhcpv6Server) -> Result<()> {
    let address = server.address;
    if address.is_unspecified() || address.is_multicast() || address.is_loopback() {
        return Err(Error::InvalidAddress(format!(
            "{} cannot be used as a DHCPv6 server address",
            address
        )));
    }
    if is_link_local_v6(address) && server.egress.is_none() {
        return Err(Error::InvalidAddress(format!(
            "link-local DHCPv6 server {} needs an egress interface",
            address
        )));
    }
    Ok(())
}

/// Checks a configured server address against the rules for its port.
pub fn validate_server_key(key: &ServerKey) -> Result<()> {
    match key.address {
        IpAddr::V4(address) if key.port == DHCP_SERVER_PORT => validate_helper_address(address),
        IpAddr::V4(address) => validate_forward_address(address),
        IpAddr::V6(address) => validate_dhcpv6_server(&Dhcpv6Server {
            address,
            egress: key.egress.clone(),
        }),
    }
}
