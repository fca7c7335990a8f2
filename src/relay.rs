//! Per-packet relay decisions.
//!
//! [`RelayContext`] owns everything the receive path and the configuration
//! path share: one registry per address family, the interface table, the
//! feature switches and the counters. Packets are classified by the local
//! UDP port they arrived on and by `op`:
//!
//! | port     | op           | path                                 |
//! |----------|--------------|--------------------------------------|
//! | 67 / 68  | BOOTREQUEST  | client to every DHCP helper          |
//! | 67 / 68  | BOOTREPLY    | server back to the client            |
//! | 547 (v6) | any          | DHCPv6 unicast relay                 |
//! | other    | -            | UDP broadcast forwarding             |
//!
//! Nothing here returns an error for a bad packet. Every call ends in a
//! [`Disposition`], which the receive loop logs and forgets.

use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::config::Features;
use crate::dhcpv6::DHCPV6_SERVER_PORT;
use crate::error::DropReason;
use crate::interfaces::{InterfaceInfo, InterfaceTable};
use crate::option82::{self, RemoteId, RemoteIdKind, RequestOutcome};
use crate::options::{MessageType, OptionCode};
use crate::packet::{BOOTREPLY, BOOTREQUEST, DHCP_CLIENT_PORT, DHCP_SERVER_PORT, DhcpPacket, MAX_HOPS};
use crate::registry::Registry;
use crate::stats::{CountersSnapshot, PacketCounters, StatsTable};

/// A datagram as handed over by the socket layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub source: SocketAddr,
    /// Destination address from the IP header.
    pub destination: IpAddr,
    /// Port of the socket that received it.
    pub local_port: u16,
    pub interface_index: u32,
    pub ttl: Option<u8>,
}

/// One send request to the socket layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outbound<'a> {
    pub payload: &'a [u8],
    pub destination: SocketAddr,
    /// Local port of the socket to send from.
    pub source_port: u16,
    /// Interface to leave through, when the route must not decide.
    pub interface_index: Option<u32>,
    /// Source address to use instead of the kernel's choice.
    pub source_address: Option<IpAddr>,
    pub ttl: Option<u8>,
}

/// The socket boundary.
pub trait Transport: Send + Sync {
    fn send(&self, outbound: Outbound<'_>) -> impl Future<Output = io::Result<()>> + Send;

    /// Installs a neighbour entry so a unicast reply reaches a client that
    /// has no address yet.
    fn update_neighbor(
        &self,
        interface: &InterfaceInfo,
        address: Ipv4Addr,
        hardware_type: u8,
        hardware_address: &[u8],
    ) -> io::Result<()>;
}

/// What became of one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Copies were handed to the socket layer.
    Relayed { sent: usize, failed: usize },
    Dropped(DropReason),
    /// Not for us: feature off, broadcast reply, unknown message role.
    Ignored,
}

impl Disposition {
    fn delivered(&self) -> bool {
        matches!(self, Self::Relayed { sent, .. } if *sent > 0)
    }
}

/// Shared relay state, constructed once and passed to both the receive
/// loop and the configuration path.
#[derive(Debug)]
pub struct RelayContext {
    ipv4: Mutex<Registry>,
    ipv6: Mutex<Registry>,
    features: RwLock<Features>,
    interfaces: RwLock<InterfaceTable>,
    stats: Arc<StatsTable>,
}

impl RelayContext {
    pub fn new(ipv4_capacity: usize, ipv6_capacity: usize, features: Features) -> Self {
        let stats = Arc::new(StatsTable::new());
        Self {
            ipv4: Mutex::new(Registry::with_stats(ipv4_capacity, Arc::clone(&stats))),
            ipv6: Mutex::new(Registry::new(ipv6_capacity)),
            features: RwLock::new(features),
            interfaces: RwLock::new(InterfaceTable::default()),
            stats,
        }
    }

    /// DHCP helpers and UDP forward targets.
    pub fn ipv4(&self) -> &Mutex<Registry> {
        &self.ipv4
    }

    /// DHCPv6 servers.
    pub fn ipv6(&self) -> &Mutex<Registry> {
        &self.ipv6
    }

    pub fn stats(&self) -> &Arc<StatsTable> {
        &self.stats
    }

    pub async fn features(&self) -> Features {
        *self.features.read().await
    }

    pub async fn set_features(&self, features: Features) {
        let mut current = self.features.write().await;
        if *current != features {
            info!("Relay features changed. old: {:?}, new: {:?}", *current, features);
            *current = features;
        }
    }

    pub async fn set_interfaces(&self, table: InterfaceTable) {
        *self.interfaces.write().await = table;
    }

    pub async fn interfaces(&self) -> RwLockReadGuard<'_, InterfaceTable> {
        self.interfaces.read().await
    }

    pub async fn interface_by_index(&self, index: u32) -> Option<InterfaceInfo> {
        self.interfaces.read().await.by_index(index).cloned()
    }

    pub async fn interface_by_name(&self, name: &str) -> Option<InterfaceInfo> {
        self.interfaces.read().await.by_name(name).cloned()
    }

    pub async fn interface_by_address(&self, address: Ipv4Addr) -> Option<InterfaceInfo> {
        self.interfaces.read().await.by_address(address).cloned()
    }

    pub fn snapshot_counters(&self, interface: &str) -> Option<CountersSnapshot> {
        self.stats.snapshot_counters(interface)
    }

    /// Runs one datagram through the relay.
    pub async fn handle<T: Transport>(&self, transport: &T, mut datagram: Datagram) -> Disposition {
        let features = self.features().await;
        let payload = std::mem::take(&mut datagram.payload);

        let disposition = if datagram.source.is_ipv6() {
            if features.dhcpv6_relay && datagram.local_port == DHCPV6_SERVER_PORT {
                self.relay_v6(transport, &features, payload, &datagram).await
            } else {
                Disposition::Ignored
            }
        } else {
            match datagram.local_port {
                DHCP_SERVER_PORT | DHCP_CLIENT_PORT if features.dhcp_relay => {
                    self.relay_dhcp(transport, &features, payload, &datagram).await
                }
                DHCP_SERVER_PORT | DHCP_CLIENT_PORT => Disposition::Ignored,
                _ if features.udp_forwarder => self.forward_udp(transport, payload, &datagram).await,
                _ => Disposition::Ignored,
            }
        };

        match disposition {
            Disposition::Dropped(reason) => debug!(
                "Dropped packet from {} on ifindex {}: {}",
                datagram.source, datagram.interface_index, reason
            ),
            Disposition::Relayed { sent, failed } => debug!(
                "Relayed packet from {} on ifindex {}: {} sent, {} failed",
                datagram.source, datagram.interface_index, sent, failed
            ),
            Disposition::Ignored => {}
        }
        disposition
    }

    async fn relay_dhcp<T: Transport>(
        &self,
        transport: &T,
        features: &Features,
        payload: Vec<u8>,
        datagram: &Datagram,
    ) -> Disposition {
        let packet = match DhcpPacket::parse(payload) {
            Ok(packet) => packet,
            Err(error) => {
                debug!("Unparseable DHCP packet from {}: {}", datagram.source, error);
                return Disposition::Dropped(DropReason::Malformed);
            }
        };

        match packet.op() {
            BOOTREQUEST => self.relay_request(transport, features, packet, datagram).await,
            BOOTREPLY => self.relay_reply(transport, features, packet, datagram).await,
            op => {
                debug!("Invalid DHCP operation {} from {}", op, datagram.source);
                Disposition::Ignored
            }
        }
    }

    /// Client to server.
    async fn relay_request<T: Transport>(
        &self,
        transport: &T,
        features: &Features,
        mut packet: DhcpPacket,
        datagram: &Datagram,
    ) -> Disposition {
        let Some(interface) = self.interface_by_index(datagram.interface_index).await else {
            return Disposition::Dropped(DropReason::NoConfigForInterface);
        };
        let with_option82 = carries_option82(&packet);

        let disposition = self
            .relay_request_from(transport, features, &mut packet, datagram, &interface)
            .await;

        if let Some(counters) = self.counters_for(&disposition, &interface) {
            counters.record_client(disposition.delivered(), with_option82);
        }
        disposition
    }

    async fn relay_request_from<T: Transport>(
        &self,
        transport: &T,
        features: &Features,
        packet: &mut DhcpPacket,
        datagram: &Datagram,
        interface: &InterfaceInfo,
    ) -> Disposition {
        let Some(relay_address) = interface.primary_address() else {
            return Disposition::Dropped(DropReason::NoInterfaceAddress);
        };

        if packet.hops() > MAX_HOPS {
            return Disposition::Dropped(DropReason::HopLimitExceeded(packet.hops()));
        }

        let ttl = match outbound_ttl(datagram.ttl) {
            Ok(ttl) => ttl,
            Err(reason) => return Disposition::Dropped(reason),
        };

        let registry = self.ipv4.lock().await;
        let Some(node) = registry.node(&interface.name) else {
            return Disposition::Dropped(DropReason::NoConfigForInterface);
        };
        let gateway = node.bootp_gateway().unwrap_or(relay_address);

        if packet.giaddr().is_unspecified() {
            packet.set_giaddr(gateway);
        }
        if features.hop_count_increment {
            packet.set_hops(packet.hops() + 1);
        }

        if features.option82 {
            let remote_id = match features.option82_remote_id {
                RemoteIdKind::Mac => RemoteId::Mac(interface.mac.octets()),
                RemoteIdKind::Ip => RemoteId::Ip(gateway),
            };
            match option82::process_request(packet, features.option82_policy, interface.index, remote_id) {
                Ok(RequestOutcome::NoSpace { .. }) => {
                    debug!(
                        "No room for relay agent information from {}, forwarding without it",
                        packet.format_mac()
                    );
                }
                Ok(_) => {}
                Err(reason) => return Disposition::Dropped(reason),
            }
        }

        let source_address = datagram
            .source
            .ip()
            .is_unspecified()
            .then_some(IpAddr::V4(relay_address));

        let mut sent = 0;
        let mut failed = 0;
        for server in node.servers_on_port(DHCP_SERVER_PORT) {
            let outbound = Outbound {
                payload: packet.as_bytes(),
                destination: SocketAddr::new(server.address, DHCP_SERVER_PORT),
                source_port: DHCP_SERVER_PORT,
                interface_index: None,
                source_address,
                ttl,
            };
            match transport.send(outbound).await {
                Ok(()) => sent += 1,
                Err(error) => {
                    failed += 1;
                    warn!("Failed to relay request to {}: {}", server, error);
                }
            }
        }

        if sent + failed == 0 {
            return Disposition::Dropped(DropReason::NoConfigForInterface);
        }
        Disposition::Relayed { sent, failed }
    }

    /// Server to client.
    async fn relay_reply<T: Transport>(
        &self,
        transport: &T,
        features: &Features,
        mut packet: DhcpPacket,
        datagram: &Datagram,
    ) -> Disposition {
        if let IpAddr::V4(destination) = datagram.destination
            && destination.is_broadcast()
        {
            return Disposition::Ignored;
        }

        let Some(interface) = self.interface_by_address(packet.giaddr()).await else {
            return Disposition::Dropped(DropReason::NoConfigForInterface);
        };
        let with_option82 = carries_option82(&packet);

        let disposition = self
            .relay_reply_to(transport, features, &mut packet, datagram, &interface)
            .await;

        if let Some(counters) = self.counters_for(&disposition, &interface) {
            counters.record_server(disposition.delivered(), with_option82);
        }
        disposition
    }

    async fn relay_reply_to<T: Transport>(
        &self,
        transport: &T,
        features: &Features,
        packet: &mut DhcpPacket,
        datagram: &Datagram,
        interface: &InterfaceInfo,
    ) -> Disposition {
        if packet.hops() > MAX_HOPS {
            return Disposition::Dropped(DropReason::HopLimitExceeded(packet.hops()));
        }

        let ttl = match outbound_ttl(datagram.ttl) {
            Ok(ttl) => ttl,
            Err(reason) => return Disposition::Dropped(reason),
        };

        if let Err(reason) = option82::process_reply(
            packet,
            interface,
            features.option82_remote_id,
            features.reply_validation(),
        ) {
            return Disposition::Dropped(reason);
        }

        let message_type = packet.message_type();
        let destination = if packet.is_broadcast() || message_type == Some(MessageType::Nak) {
            Ipv4Addr::BROADCAST
        } else if !packet.yiaddr().is_unspecified() {
            packet.yiaddr()
        } else if message_type == Some(MessageType::Ack) && !packet.ciaddr().is_unspecified() {
            packet.ciaddr()
        } else {
            return Disposition::Dropped(DropReason::NoClientAddress);
        };

        if !destination.is_broadcast()
            && let Err(error) =
                transport.update_neighbor(interface, destination, packet.htype(), packet.chaddr())
        {
            warn!(
                "Failed to add neighbour {} ({}) on {}: {}",
                destination,
                packet.format_mac(),
                interface.name,
                error
            );
        }

        let outbound = Outbound {
            payload: packet.as_bytes(),
            destination: SocketAddr::new(IpAddr::V4(destination), DHCP_CLIENT_PORT),
            source_port: DHCP_SERVER_PORT,
            interface_index: Some(interface.index),
            source_address: None,
            ttl,
        };
        match transport.send(outbound).await {
            Ok(()) => Disposition::Relayed { sent: 1, failed: 0 },
            Err(error) => {
                warn!("Failed to relay reply to {} on {}: {}", destination, interface.name, error);
                Disposition::Relayed { sent: 0, failed: 1 }
            }
        }
    }

    /// Generic UDP broadcast forwarding.
    async fn forward_udp<T: Transport>(
        &self,
        transport: &T,
        payload: Vec<u8>,
        datagram: &Datagram,
    ) -> Disposition {
        let Some(interface) = self.interface_by_index(datagram.interface_index).await else {
            return Disposition::Dropped(DropReason::NoConfigForInterface);
        };

        let source_address = if datagram.source.ip().is_unspecified() {
            match interface.primary_address() {
                Some(address) => Some(IpAddr::V4(address)),
                None => return Disposition::Dropped(DropReason::NoInterfaceAddress),
            }
        } else {
            None
        };

        let registry = self.ipv4.lock().await;
        let Some(node) = registry.node(&interface.name) else {
            return Disposition::Dropped(DropReason::NoConfigForInterface);
        };

        let port = datagram.local_port;
        let mut sent = 0;
        let mut failed = 0;
        for server in node.servers_on_port(port) {
            let outbound = Outbound {
                payload: &payload,
                destination: SocketAddr::new(server.address, port),
                source_port: port,
                interface_index: None,
                source_address,
                ttl: None,
            };
            match transport.send(outbound).await {
                Ok(()) => sent += 1,
                Err(error) => {
                    failed += 1;
                    warn!("Failed to forward UDP port {} to {}: {}", port, server, error);
                }
            }
        }

        if sent + failed == 0 {
            return Disposition::Dropped(DropReason::NoConfigForInterface);
        }
        Disposition::Relayed { sent, failed }
    }

    /// Counters to charge, or `None` when the packet was never ours.
    fn counters_for(&self, disposition: &Disposition, interface: &InterfaceInfo) -> Option<Arc<PacketCounters>> {
        match disposition {
            Disposition::Ignored | Disposition::Dropped(DropReason::NoConfigForInterface) => None,
            _ => self.stats.get(&interface.name),
        }
    }
}

fn carries_option82(packet: &DhcpPacket) -> bool {
    packet.find_option(OptionCode::RelayAgentInfo as u8).is_some()
}

/// TTL for a relayed copy: one less than received.
pub(crate) fn outbound_ttl(received: Option<u8>) -> Result<Option<u8>, DropReason> {
    match received {
        Some(ttl) if ttl <= 1 => Err(DropReason::TtlExpired),
        Some(ttl) => Ok(Some(ttl - 1)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::MacAddress;
    use crate::option82::Policy;
    use crate::packet::DHCP_MAGIC_COOKIE;
    use crate::store::ServerKey;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: StdMutex<Vec<(Vec<u8>, SocketAddr, Option<IpAddr>, Option<u32>)>>,
        neighbors: StdMutex<Vec<(String, Ipv4Addr)>>,
    }

    impl Transport for RecordingTransport {
        fn send(&self, outbound: Outbound<'_>) -> impl Future<Output = io::Result<()>> + Send {
            self.sent.lock().unwrap().push((
                outbound.payload.to_vec(),
                outbound.destination,
                outbound.source_address,
                outbound.interface_index,
            ));
            std::future::ready(Ok(()))
        }

        fn update_neighbor(
            &self,
            interface: &InterfaceInfo,
            address: Ipv4Addr,
            _hardware_type: u8,
            _hardware_address: &[u8],
        ) -> io::Result<()> {
            self.neighbors
                .lock()
                .unwrap()
                .push((interface.name.clone(), address));
            Ok(())
        }
    }

    const MAC: [u8; 6] = [0x02, 0, 0, 0, 0, 0x03];

    fn eth1() -> InterfaceInfo {
        InterfaceInfo {
            name: "eth1".to_string(),
            index: 3,
            mac: MacAddress(MAC),
            addresses: vec![Ipv4Addr::new(192, 168, 1, 1)],
            ipv6_addresses: vec![],
        }
    }

    async fn context(features: Features) -> RelayContext {
        let context = RelayContext::new(16, 8, features);
        context.set_interfaces(InterfaceTable::new(vec![eth1()])).await;
        context
            .ipv4()
            .lock()
            .await
            .add_reference("eth1", ServerKey::new(Ipv4Addr::new(10, 0, 0, 10), 67))
            .unwrap();
        context
    }

    fn dhcp(op: u8, message_type: MessageType) -> Vec<u8> {
        let mut data = vec![0u8; 300];
        data[0] = op;
        data[1] = 1;
        data[2] = 6;
        data[28..34].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0, 0, 1]);
        data[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);
        data[240..243].copy_from_slice(&[53, 1, message_type as u8]);
        data[243] = 255;
        data
    }

    fn from_client(payload: Vec<u8>) -> Datagram {
        Datagram {
            payload,
            source: "0.0.0.0:68".parse().unwrap(),
            destination: IpAddr::V4(Ipv4Addr::BROADCAST),
            local_port: DHCP_SERVER_PORT,
            interface_index: 3,
            ttl: Some(64),
        }
    }

    fn from_server(payload: Vec<u8>) -> Datagram {
        Datagram {
            payload,
            source: "10.0.0.10:67".parse().unwrap(),
            destination: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
            local_port: DHCP_SERVER_PORT,
            interface_index: 9,
            ttl: Some(60),
        }
    }

    #[test]
    fn test_outbound_ttl() {
        assert_eq!(outbound_ttl(Some(64)), Ok(Some(63)));
        assert_eq!(outbound_ttl(Some(1)), Err(DropReason::TtlExpired));
        assert_eq!(outbound_ttl(None), Ok(None));
    }

    #[tokio::test]
    async fn test_request_stamps_giaddr_and_hops() {
        let context = context(Features::default()).await;
        let transport = RecordingTransport::default();

        let disposition = context
            .handle(&transport, from_client(dhcp(BOOTREQUEST, MessageType::Discover)))
            .await;
        assert_eq!(disposition, Disposition::Relayed { sent: 1, failed: 0 });

        let sent = transport.sent.lock().unwrap();
        let (payload, destination, source_address, _) = &sent[0];
        let packet = DhcpPacket::parse(payload.clone()).unwrap();
        assert_eq!(*destination, "10.0.0.10:67".parse().unwrap());
        assert_eq!(*source_address, Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))));
        assert_eq!(packet.giaddr(), Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(packet.hops(), 1);
        assert!(packet.find_option(82).is_none());
    }

    #[tokio::test]
    async fn test_request_uses_bootp_gateway() {
        let context = context(Features::default()).await;
        context
            .ipv4()
            .lock()
            .await
            .set_bootp_gateway("eth1", Some(Ipv4Addr::new(192, 168, 1, 254)));
        let transport = RecordingTransport::default();

        context
            .handle(&transport, from_client(dhcp(BOOTREQUEST, MessageType::Discover)))
            .await;

        let sent = transport.sent.lock().unwrap();
        let packet = DhcpPacket::parse(sent[0].0.clone()).unwrap();
        assert_eq!(packet.giaddr(), Ipv4Addr::new(192, 168, 1, 254));
    }

    #[tokio::test]
    async fn test_request_injects_option82() {
        let features = Features {
            option82: true,
            option82_policy: Policy::Replace,
            ..Default::default()
        };
        let context = context(features).await;
        let transport = RecordingTransport::default();

        context
            .handle(&transport, from_client(dhcp(BOOTREQUEST, MessageType::Request)))
            .await;

        let sent = transport.sent.lock().unwrap();
        let packet = DhcpPacket::parse(sent[0].0.clone()).unwrap();
        let block = packet.find_option(82).unwrap();
        assert_eq!(
            option82::decode_and_validate(block, &eth1(), RemoteIdKind::Mac),
            option82::Validation::Ok(3)
        );
    }

    #[tokio::test]
    async fn test_relay_disabled_ignores() {
        let features = Features {
            dhcp_relay: false,
            ..Default::default()
        };
        let context = context(features).await;
        let transport = RecordingTransport::default();

        let disposition = context
            .handle(&transport, from_client(dhcp(BOOTREQUEST, MessageType::Discover)))
            .await;
        assert_eq!(disposition, Disposition::Ignored);
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_interface_not_counted() {
        let context = context(Features::default()).await;
        let transport = RecordingTransport::default();
        let mut datagram = from_client(dhcp(BOOTREQUEST, MessageType::Discover));
        datagram.interface_index = 42;

        let disposition = context.handle(&transport, datagram).await;
        assert_eq!(disposition, Disposition::Dropped(DropReason::NoConfigForInterface));
        assert_eq!(context.snapshot_counters("eth1"), Some(CountersSnapshot::default()));
    }

    #[tokio::test]
    async fn test_reply_unicast_to_yiaddr() {
        let context = context(Features::default()).await;
        let transport = RecordingTransport::default();
        let mut reply = dhcp(BOOTREPLY, MessageType::Offer);
        reply[16..20].copy_from_slice(&[192, 168, 1, 50]);
        reply[24..28].copy_from_slice(&[192, 168, 1, 1]);

        let disposition = context.handle(&transport, from_server(reply)).await;
        assert_eq!(disposition, Disposition::Relayed { sent: 1, failed: 0 });

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0].1, "192.168.1.50:68".parse().unwrap());
        assert_eq!(sent[0].3, Some(3));
        assert_eq!(
            transport.neighbors.lock().unwrap()[0],
            ("eth1".to_string(), Ipv4Addr::new(192, 168, 1, 50))
        );
        assert_eq!(context.snapshot_counters("eth1").unwrap().serv_valids, 1);
    }

    #[tokio::test]
    async fn test_reply_nak_broadcast() {
        let context = context(Features::default()).await;
        let transport = RecordingTransport::default();
        let mut reply = dhcp(BOOTREPLY, MessageType::Nak);
        reply[24..28].copy_from_slice(&[192, 168, 1, 1]);

        context.handle(&transport, from_server(reply)).await;

        assert_eq!(transport.sent.lock().unwrap()[0].1, "255.255.255.255:68".parse().unwrap());
        assert!(transport.neighbors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reply_ack_falls_back_to_ciaddr() {
        let context = context(Features::default()).await;
        let transport = RecordingTransport::default();
        let mut reply = dhcp(BOOTREPLY, MessageType::Ack);
        reply[12..16].copy_from_slice(&[192, 168, 1, 77]);
        reply[24..28].copy_from_slice(&[192, 168, 1, 1]);

        context.handle(&transport, from_server(reply)).await;
        assert_eq!(transport.sent.lock().unwrap()[0].1, "192.168.1.77:68".parse().unwrap());

        let mut nowhere = dhcp(BOOTREPLY, MessageType::Ack);
        nowhere[24..28].copy_from_slice(&[192, 168, 1, 1]);
        let disposition = context.handle(&transport, from_server(nowhere)).await;
        assert_eq!(disposition, Disposition::Dropped(DropReason::NoClientAddress));
        assert_eq!(context.snapshot_counters("eth1").unwrap().serv_drops, 1);
    }

    #[tokio::test]
    async fn test_broadcast_reply_ignored() {
        let context = context(Features::default()).await;
        let transport = RecordingTransport::default();
        let mut datagram = from_server(dhcp(BOOTREPLY, MessageType::Offer));
        datagram.destination = IpAddr::V4(Ipv4Addr::BROADCAST);

        assert_eq!(context.handle(&transport, datagram).await, Disposition::Ignored);
    }

    #[tokio::test]
    async fn test_udp_forward() {
        let features = Features {
            udp_forwarder: true,
            ..Default::default()
        };
        let context = context(features).await;
        context
            .ipv4()
            .lock()
            .await
            .add_reference("eth1", ServerKey::new(Ipv4Addr::new(10, 0, 0, 53), 53))
            .unwrap();
        let transport = RecordingTransport::default();

        let datagram = Datagram {
            payload: vec![1, 2, 3],
            source: "192.168.1.20:5353".parse().unwrap(),
            destination: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 255)),
            local_port: 53,
            interface_index: 3,
            ttl: Some(64),
        };
        let disposition = context.handle(&transport, datagram.clone()).await;
        assert_eq!(disposition, Disposition::Relayed { sent: 1, failed: 0 });
        {
            let sent = transport.sent.lock().unwrap();
            assert_eq!(sent[0].0, vec![1, 2, 3]);
            assert_eq!(sent[0].1, "10.0.0.53:53".parse().unwrap());
            assert_eq!(sent[0].2, None);
        }

        let mut ntp = datagram;
        ntp.local_port = 123;
        assert_eq!(
            context.handle(&transport, ntp).await,
            Disposition::Dropped(DropReason::NoConfigForInterface)
        );
    }

    #[tokio::test]
    async fn test_udp_forward_disabled() {
        let context = context(Features::default()).await;
        let transport = RecordingTransport::default();
        let datagram = Datagram {
            payload: vec![1],
            source: "192.168.1.20:5353".parse().unwrap(),
            destination: IpAddr::V4(Ipv4Addr::BROADCAST),
            local_port: 53,
            interface_index: 3,
            ttl: None,
        };
        assert_eq!(context.handle(&transport, datagram).await, Disposition::Ignored);
    }
}
