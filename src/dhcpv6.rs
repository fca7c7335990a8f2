//! DHCPv6 unicast relay (RFC 8415 relay agent behaviour).
//!
//! Client messages are wrapped in a Relay-Forward and unicast to every
//! DHCPv6 server configured on the ingress interface. Relay-Reply messages
//! from servers are unwrapped and handed to the peer named in them, on the
//! interface named by the Interface-ID option.
//!
//! ```text
//! +----------+-----------+------------------+------------------+---------+
//! | msg-type | hop-count |   link-address   |   peer-address   | options |
//! |    1     |     1     |        16        |        16        |   ...   |
//! +----------+-----------+------------------+------------------+---------+
//! ```

use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr, SocketAddrV6};

use tracing::{debug, warn};

use crate::config::Features;
use crate::error::DropReason;
use crate::interfaces::{InterfaceInfo, is_link_local_v6};
use crate::relay::{Datagram, Disposition, Outbound, RelayContext, Transport};

pub const DHCPV6_CLIENT_PORT: u16 = 546;
pub const DHCPV6_SERVER_PORT: u16 = 547;

/// Relay-Forward messages that already crossed this many relays are dropped.
pub const HOP_COUNT_LIMIT: u8 = 8;

pub const OPTION_RELAY_MSG: u16 = 9;
pub const OPTION_INTERFACE_ID: u16 = 18;
pub const OPTION_CLIENT_LINKLAYER_ADDR: u16 = 79;

const RELAY_HEADER_SIZE: usize = 34;
const LINK_LAYER_TYPE_ETHERNET: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Solicit = 1,
    Advertise = 2,
    Request = 3,
    Confirm = 4,
    Renew = 5,
    Rebind = 6,
    Reply = 7,
    Release = 8,
    Decline = 9,
    Reconfigure = 10,
    InformationRequest = 11,
    RelayForw = 12,
    RelayRepl = 13,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Solicit),
            2 => Ok(Self::Advertise),
            3 => Ok(Self::Request),
            4 => Ok(Self::Confirm),
            5 => Ok(Self::Renew),
            6 => Ok(Self::Rebind),
            7 => Ok(Self::Reply),
            8 => Ok(Self::Release),
            9 => Ok(Self::Decline),
            10 => Ok(Self::Reconfigure),
            11 => Ok(Self::InformationRequest),
            12 => Ok(Self::RelayForw),
            13 => Ok(Self::RelayRepl),
            other => Err(other),
        }
    }
}

impl MessageType {
    /// Messages a client sends towards servers.
    pub fn is_from_client(self) -> bool {
        matches!(
            self,
            Self::Solicit
                | Self::Request
                | Self::Confirm
                | Self::Renew
                | Self::Rebind
                | Self::Release
                | Self::Decline
                | Self::InformationRequest
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Solicit => "SOLICIT",
            Self::Advertise => "ADVERTISE",
            Self::Request => "REQUEST",
            Self::Confirm => "CONFIRM",
            Self::Renew => "RENEW",
            Self::Rebind => "REBIND",
            Self::Reply => "REPLY",
            Self::Release => "RELEASE",
            Self::Decline => "DECLINE",
            Self::Reconfigure => "RECONFIGURE",
            Self::InformationRequest => "INFORMATION-REQUEST",
            Self::RelayForw => "RELAY-FORW",
            Self::RelayRepl => "RELAY-REPL",
        };
        write!(f, "{}", name)
    }
}

/// A parsed Relay-Forward or Relay-Reply message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage<'a> {
    pub message_type: MessageType,
    pub hop_count: u8,
    pub link_address: Ipv6Addr,
    pub peer_address: Ipv6Addr,
    pub options: Vec<(u16, &'a [u8])>,
}

impl<'a> RelayMessage<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, DropReason> {
        if data.len() < RELAY_HEADER_SIZE {
            return Err(DropReason::Malformed);
        }

        let message_type = match MessageType::try_from(data[0]) {
            Ok(kind @ (MessageType::RelayForw | MessageType::RelayRepl)) => kind,
            _ => return Err(DropReason::Malformed),
        };

        let link_address = ipv6_at(data, 2);
        let peer_address = ipv6_at(data, 18);

        let mut options = Vec::new();
        let mut rest = &data[RELAY_HEADER_SIZE..];
        while !rest.is_empty() {
            if rest.len() < 4 {
                return Err(DropReason::Malformed);
            }
            let code = u16::from_be_bytes([rest[0], rest[1]]);
            let length = u16::from_be_bytes([rest[2], rest[3]]) as usize;
            let Some(value) = rest.get(4..4 + length) else {
                return Err(DropReason::Malformed);
            };
            options.push((code, value));
            rest = &rest[4 + length..];
        }

        Ok(Self {
            message_type,
            hop_count: data[1],
            link_address,
            peer_address,
            options,
        })
    }

    /// First occurrence of an option.
    pub fn option(&self, code: u16) -> Option<&'a [u8]> {
        self.options
            .iter()
            .find(|(option, _)| *option == code)
            .map(|(_, value)| *value)
    }
}

fn ipv6_at(data: &[u8], offset: usize) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&data[offset..offset + 16]);
    Ipv6Addr::from(octets)
}

fn push_option(buffer: &mut Vec<u8>, code: u16, value: &[u8]) {
    buffer.extend_from_slice(&code.to_be_bytes());
    buffer.extend_from_slice(&(value.len() as u16).to_be_bytes());
    buffer.extend_from_slice(value);
}

/// Wraps `message` in a Relay-Forward.
///
/// Options are Interface-ID, then Relay Message, then the client link-layer
/// address when one is given.
pub fn build_relay_forward(
    message: &[u8],
    hop_count: u8,
    link_address: Ipv6Addr,
    peer_address: Ipv6Addr,
    interface_id: &[u8],
    client_link_layer: Option<[u8; 6]>,
) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(RELAY_HEADER_SIZE + message.len() + interface_id.len() + 20);
    buffer.push(MessageType::RelayForw as u8);
    buffer.push(hop_count);
    buffer.extend_from_slice(&link_address.octets());
    buffer.extend_from_slice(&peer_address.octets());

    push_option(&mut buffer, OPTION_INTERFACE_ID, interface_id);
    push_option(&mut buffer, OPTION_RELAY_MSG, message);

    if let Some(mac) = client_link_layer {
        let mut value = LINK_LAYER_TYPE_ETHERNET.to_be_bytes().to_vec();
        value.extend_from_slice(&mac);
        push_option(&mut buffer, OPTION_CLIENT_LINKLAYER_ADDR, &value);
    }

    buffer
}

/// Recovers a MAC address from a modified EUI-64 link-local address.
pub fn mac_from_eui64(address: Ipv6Addr) -> Option<[u8; 6]> {
    if !is_link_local_v6(address) {
        return None;
    }

    let octets = address.octets();
    if octets[11] != 0xff || octets[12] != 0xfe {
        return None;
    }

    Some([
        octets[8] ^ 0x02,
        octets[9],
        octets[10],
        octets[13],
        octets[14],
        octets[15],
    ])
}

impl RelayContext {
    pub(crate) async fn relay_v6<T: Transport>(
        &self,
        transport: &T,
        features: &Features,
        payload: Vec<u8>,
        datagram: &Datagram,
    ) -> Disposition {
        let Some(&first) = payload.first() else {
            return Disposition::Dropped(DropReason::Malformed);
        };

        match MessageType::try_from(first) {
            Ok(MessageType::RelayRepl) => self.relay_v6_reply(transport, &payload).await,
            Ok(kind) if kind.is_from_client() || kind == MessageType::RelayForw => {
                self.relay_v6_forward(transport, features, kind, &payload, datagram)
                    .await
            }
            Ok(kind) => {
                debug!("Ignoring DHCPv6 {} from {}", kind, datagram.source);
                Disposition::Ignored
            }
            Err(_) => Disposition::Dropped(DropReason::Malformed),
        }
    }

    async fn relay_v6_forward<T: Transport>(
        &self,
        transport: &T,
        features: &Features,
        kind: MessageType,
        payload: &[u8],
        datagram: &Datagram,
    ) -> Disposition {
        let IpAddr::V6(peer_address) = datagram.source.ip() else {
            return Disposition::Dropped(DropReason::Malformed);
        };

        let interfaces = self.interfaces().await;
        let Some(interface) = interfaces.by_index(datagram.interface_index) else {
            return Disposition::Dropped(DropReason::NoConfigForInterface);
        };

        let (hop_count, link_address, client_link_layer) = if kind == MessageType::RelayForw {
            let inner = match RelayMessage::parse(payload) {
                Ok(inner) => inner,
                Err(reason) => return Disposition::Dropped(reason),
            };
            if inner.hop_count >= HOP_COUNT_LIMIT {
                return Disposition::Dropped(DropReason::HopLimitExceeded(inner.hop_count));
            }
            (inner.hop_count + 1, Ipv6Addr::UNSPECIFIED, None)
        } else {
            let client_link_layer = if features.dhcpv6_option79 {
                mac_from_eui64(peer_address)
            } else {
                None
            };
            (
                0,
                interface
                    .global_ipv6_address()
                    .unwrap_or(Ipv6Addr::UNSPECIFIED),
                client_link_layer,
            )
        };

        let message = build_relay_forward(
            payload,
            hop_count,
            link_address,
            peer_address,
            interface.name.as_bytes(),
            client_link_layer,
        );

        let registry = self.ipv6().lock().await;
        let Some(node) = registry.node(&interface.name) else {
            return Disposition::Dropped(DropReason::NoConfigForInterface);
        };

        let mut sent = 0;
        let mut failed = 0;
        for server in node.servers() {
            let IpAddr::V6(address) = server.address else {
                continue;
            };

            let egress = match &server.egress {
                Some(name) => match interfaces.by_name(name) {
                    Some(egress) => Some(egress.index),
                    None => {
                        warn!("Egress interface {} for DHCPv6 server {} is unknown", name, address);
                        failed += 1;
                        continue;
                    }
                },
                None => None,
            };
            let scope_id = if is_link_local_v6(address) {
                egress.unwrap_or(0)
            } else {
                0
            };

            let outbound = Outbound {
                payload: &message,
                destination: SocketAddr::V6(SocketAddrV6::new(address, DHCPV6_SERVER_PORT, 0, scope_id)),
                source_port: DHCPV6_SERVER_PORT,
                interface_index: egress,
                source_address: None,
                ttl: None,
            };
            match transport.send(outbound).await {
                Ok(()) => sent += 1,
                Err(error) => {
                    failed += 1;
                    warn!("Failed to relay DHCPv6 {} to {}: {}", kind, server.key(), error);
                }
            }
        }

        if sent + failed == 0 {
            return Disposition::Dropped(DropReason::NoConfigForInterface);
        }
        Disposition::Relayed { sent, failed }
    }

    async fn relay_v6_reply<T: Transport>(&self, transport: &T, payload: &[u8]) -> Disposition {
        let reply = match RelayMessage::parse(payload) {
            Ok(reply) => reply,
            Err(reason) => return Disposition::Dropped(reason),
        };

        let interface: Option<InterfaceInfo> = {
            let interfaces = self.interfaces().await;
            match reply.option(OPTION_INTERFACE_ID) {
                Some(id) => std::str::from_utf8(id)
                    .ok()
                    .and_then(|name| interfaces.by_name(name))
                    .cloned(),
                None => interfaces.by_ipv6_address(reply.link_address).cloned(),
            }
        };
        let Some(interface) = interface else {
            return Disposition::Dropped(DropReason::NoConfigForInterface);
        };

        let Some(inner) = reply.option(OPTION_RELAY_MSG).filter(|inner| !inner.is_empty()) else {
            return Disposition::Dropped(DropReason::Malformed);
        };

        let port = if inner[0] == MessageType::RelayRepl as u8 {
            DHCPV6_SERVER_PORT
        } else {
            DHCPV6_CLIENT_PORT
        };
        let scope_id = if is_link_local_v6(reply.peer_address) {
            interface.index
        } else {
            0
        };

        let outbound = Outbound {
            payload: inner,
            destination: SocketAddr::V6(SocketAddrV6::new(reply.peer_address, port, 0, scope_id)),
            source_port: DHCPV6_SERVER_PORT,
            interface_index: Some(interface.index),
            source_address: None,
            ttl: None,
        };
        match transport.send(outbound).await {
            Ok(()) => Disposition::Relayed { sent: 1, failed: 0 },
            Err(error) => {
                warn!(
                    "Failed to deliver DHCPv6 reply to {} on {}: {}",
                    reply.peer_address, interface.name, error
                );
                Disposition::Relayed { sent: 0, failed: 1 }
            }
        }
    }
}
