//! UDP sockets, ancillary data and the receive loop.
//!
//! One socket is bound per relayed port: 67 for DHCP, every configured UDP
//! forward port, and 547 on IPv6 when DHCPv6 servers are configured. Each
//! socket is polled by one loop that pulls a datagram with `recvmsg`, so the
//! ingress interface, the destination address and the TTL come along from
//! `IP_PKTINFO`/`IP_RECVTTL`, and hands it to the [`RelayContext`]. Nothing
//! is read ahead: the next datagram is received only once the previous one
//! has been relayed or dropped.
//!
//! Outbound copies leave through `sendmsg`, again with `IP_PKTINFO` to pin
//! the egress interface and the source address when the relay asks for it.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::mem::{self, MaybeUninit};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::{AsRawFd, RawFd};
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use dashmap::DashMap;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::io::Interest;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::dhcpv6::DHCPV6_SERVER_PORT;
use crate::error::{Error, Result};
use crate::interfaces::InterfaceInfo;
use crate::packet::{DHCP_SERVER_PORT, RECV_BUFFER_SIZE};
use crate::relay::{Datagram, Outbound, RelayContext, Transport};

const CONTROL_BUFFER_SIZE: usize = 256;

/// Control message storage with the alignment `cmsghdr` needs.
#[repr(C, align(8))]
struct ControlBuffer([u8; CONTROL_BUFFER_SIZE]);

impl ControlBuffer {
    fn zeroed() -> Self {
        Self([0; CONTROL_BUFFER_SIZE])
    }
}

/// Source, destination and ingress of one received datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PacketInfo {
    length: usize,
    source: SocketAddr,
    destination: Option<IpAddr>,
    interface_index: Option<u32>,
    ttl: Option<u8>,
}

fn ipv4_from_raw(raw: libc::in_addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from_be(raw.s_addr))
}

fn ipv4_to_raw(address: Ipv4Addr) -> libc::in_addr {
    libc::in_addr {
        s_addr: u32::from(address).to_be(),
    }
}

fn socket_address_from_storage(storage: &libc::sockaddr_storage) -> io::Result<SocketAddr> {
    match i32::from(storage.ss_family) {
        libc::AF_INET => {
            // SAFETY: The family says the storage holds a `sockaddr_in`, and
            // `sockaddr_storage` is large and aligned enough for it.
            let raw = unsafe { (&raw const *storage).cast::<libc::sockaddr_in>().read() };
            Ok(SocketAddr::V4(SocketAddrV4::new(
                ipv4_from_raw(raw.sin_addr),
                u16::from_be(raw.sin_port),
            )))
        }
        libc::AF_INET6 => {
            // SAFETY: The family says the storage holds a `sockaddr_in6`, and
            // `sockaddr_storage` is large and aligned enough for it.
            let raw = unsafe { (&raw const *storage).cast::<libc::sockaddr_in6>().read() };
            Ok(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(raw.sin6_addr.s6_addr),
                u16::from_be(raw.sin6_port),
                raw.sin6_flowinfo,
                raw.sin6_scope_id,
            )))
        }
        family => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected address family {}", family),
        )),
    }
}

/// One `recvmsg` call. Returns `WouldBlock` when the socket is drained.
fn receive_with_info(fd: RawFd, buffer: &mut [u8]) -> io::Result<PacketInfo> {
    // SAFETY: The structure has no invariants.
    let mut source: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut control = ControlBuffer::zeroed();

    let mut iov = libc::iovec {
        iov_base: buffer.as_mut_ptr().cast(),
        iov_len: buffer.len(),
    };

    let mut header = {
        let mut header: MaybeUninit<libc::msghdr> = MaybeUninit::zeroed();
        // SAFETY: A zeroed `msghdr` is a valid representation.
        let raw = unsafe { header.assume_init_mut() };
        raw.msg_name = (&raw mut source).cast();
        raw.msg_namelen = mem::size_of::<libc::sockaddr_storage>() as _;
        raw.msg_iov = &mut iov;
        raw.msg_iovlen = 1;
        raw.msg_control = control.0.as_mut_ptr().cast();
        raw.msg_controllen = CONTROL_BUFFER_SIZE as _;
        // SAFETY: All fields are either zero or point at live buffers of the
        // stated lengths.
        unsafe { header.assume_init() }
    };

    // SAFETY:
    // - `fd` is an open datagram socket.
    // - `header` points at buffers that outlive the call.
    let length = unsafe { libc::recvmsg(fd, &mut header, 0) };
    if length < 0 {
        return Err(io::Error::last_os_error());
    }
    if header.msg_flags & libc::MSG_TRUNC != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("datagram larger than {} bytes", buffer.len()),
        ));
    }

    let mut info = PacketInfo {
        length: length as usize,
        source: socket_address_from_storage(&source)?,
        destination: None,
        interface_index: None,
        ttl: None,
    };

    // SAFETY: `header` was filled in by a successful `recvmsg` and its
    // control pointer still refers to `control`.
    let mut current = unsafe { NonNull::new(libc::CMSG_FIRSTHDR(&header)) };
    while let Some(cmsg) = current {
        // SAFETY: The pointer came from `CMSG_FIRSTHDR`/`CMSG_NXTHDR` on a
        // valid control buffer.
        let cmsg_ref = unsafe { cmsg.as_ref() };
        match (cmsg_ref.cmsg_level, cmsg_ref.cmsg_type) {
            (libc::SOL_IP, libc::IP_PKTINFO) => {
                // SAFETY:
                // - The level and type were checked to match packet info.
                // - The memory is read via a copy with no alignment assumptions.
                let packet_info = unsafe {
                    libc::CMSG_DATA(cmsg_ref)
                        .cast::<libc::in_pktinfo>()
                        .read_unaligned()
                };
                info.interface_index = Some(packet_info.ipi_ifindex as u32);
                info.destination = Some(IpAddr::V4(ipv4_from_raw(packet_info.ipi_addr)));
            }
            (libc::SOL_IP, libc::IP_TTL) => {
                // SAFETY:
                // - The level and type were checked to match TTL data.
                // - The memory is read via a copy with no alignment assumptions.
                let ttl = unsafe { libc::CMSG_DATA(cmsg_ref).cast::<libc::c_int>().read_unaligned() };
                info.ttl = u8::try_from(ttl).ok();
            }
            (libc::IPPROTO_IPV6, libc::IPV6_PKTINFO) => {
                // SAFETY:
                // - The level and type were checked to match IPv6 packet info.
                // - The memory is read via a copy with no alignment assumptions.
                let packet_info = unsafe {
                    libc::CMSG_DATA(cmsg_ref)
                        .cast::<libc::in6_pktinfo>()
                        .read_unaligned()
                };
                info.interface_index = Some(packet_info.ipi6_ifindex);
                info.destination = Some(IpAddr::V6(Ipv6Addr::from(packet_info.ipi6_addr.s6_addr)));
            }
            _ => {}
        }
        // SAFETY: `header` and `cmsg` are both valid, as above.
        current = unsafe { NonNull::new(libc::CMSG_NXTHDR(&header, cmsg.as_ptr())) };
    }

    Ok(info)
}

/// Appends one control message and returns the next free header slot.
///
/// # Safety
///
/// `cmsg` must be a header slot inside the control buffer of `header`
/// with room for `CMSG_SPACE(size_of::<T>())` bytes, and the buffer must
/// be zeroed past it.
unsafe fn write_control<T>(
    header: &libc::msghdr,
    cmsg: NonNull<libc::cmsghdr>,
    level: libc::c_int,
    kind: libc::c_int,
    value: T,
) -> Option<NonNull<libc::cmsghdr>> {
    // SAFETY: Upheld by the caller.
    unsafe {
        let raw = cmsg.as_ptr();
        (*raw).cmsg_level = level;
        (*raw).cmsg_type = kind;
        (*raw).cmsg_len = libc::CMSG_LEN(mem::size_of::<T>() as u32) as _;
        libc::CMSG_DATA(raw).cast::<T>().write_unaligned(value);
        NonNull::new(libc::CMSG_NXTHDR(header, raw))
    }
}

/// One `sendmsg` call carrying the egress and source overrides of `outbound`.
fn send_with_info(fd: RawFd, outbound: &Outbound<'_>) -> io::Result<()> {
    let destination = SockAddr::from(outbound.destination);
    let mut control = ControlBuffer::zeroed();

    let mut iov = libc::iovec {
        iov_base: outbound.payload.as_ptr().cast_mut().cast(),
        iov_len: outbound.payload.len(),
    };

    let mut header = {
        let mut header: MaybeUninit<libc::msghdr> = MaybeUninit::zeroed();
        // SAFETY: A zeroed `msghdr` is a valid representation.
        let raw = unsafe { header.assume_init_mut() };
        raw.msg_name = destination.as_ptr().cast_mut().cast();
        raw.msg_namelen = destination.len();
        raw.msg_iov = &mut iov;
        raw.msg_iovlen = 1;
        raw.msg_control = control.0.as_mut_ptr().cast();
        raw.msg_controllen = CONTROL_BUFFER_SIZE as _;
        // SAFETY: All fields are either zero or point at live buffers of the
        // stated lengths.
        unsafe { header.assume_init() }
    };

    let mut used = 0usize;
    // SAFETY: The control buffer is zeroed and `msg_controllen` covers it.
    let mut slot = unsafe { NonNull::new(libc::CMSG_FIRSTHDR(&header)) };

    match outbound.destination {
        SocketAddr::V4(_) => {
            let source = match outbound.source_address {
                Some(IpAddr::V4(address)) => Some(address),
                _ => None,
            };
            if (outbound.interface_index.is_some() || source.is_some())
                && let Some(cmsg) = slot
            {
                let packet_info = libc::in_pktinfo {
                    ipi_ifindex: outbound.interface_index.unwrap_or(0) as libc::c_int,
                    ipi_spec_dst: ipv4_to_raw(source.unwrap_or(Ipv4Addr::UNSPECIFIED)),
                    ipi_addr: ipv4_to_raw(Ipv4Addr::UNSPECIFIED),
                };
                // SAFETY: `cmsg` is the next free slot of a zeroed buffer
                // sized well above two small control messages.
                slot = unsafe { write_control(&header, cmsg, libc::SOL_IP, libc::IP_PKTINFO, packet_info) };
                // SAFETY: Pure size arithmetic.
                used += unsafe { libc::CMSG_SPACE(mem::size_of::<libc::in_pktinfo>() as u32) } as usize;
            }
            if let (Some(ttl), Some(cmsg)) = (outbound.ttl, slot) {
                // SAFETY: As above.
                unsafe { write_control(&header, cmsg, libc::SOL_IP, libc::IP_TTL, libc::c_int::from(ttl)) };
                // SAFETY: Pure size arithmetic.
                used += unsafe { libc::CMSG_SPACE(mem::size_of::<libc::c_int>() as u32) } as usize;
            }
        }
        SocketAddr::V6(_) => {
            if let (Some(index), Some(cmsg)) = (outbound.interface_index, slot) {
                let source = match outbound.source_address {
                    Some(IpAddr::V6(address)) => address,
                    _ => Ipv6Addr::UNSPECIFIED,
                };
                let packet_info = libc::in6_pktinfo {
                    ipi6_addr: libc::in6_addr {
                        s6_addr: source.octets(),
                    },
                    ipi6_ifindex: index,
                };
                // SAFETY: As above.
                unsafe { write_control(&header, cmsg, libc::IPPROTO_IPV6, libc::IPV6_PKTINFO, packet_info) };
                // SAFETY: Pure size arithmetic.
                used += unsafe { libc::CMSG_SPACE(mem::size_of::<libc::in6_pktinfo>() as u32) } as usize;
            }
        }
    }

    if used == 0 {
        header.msg_control = ptr::null_mut();
    }
    header.msg_controllen = used as _;

    // SAFETY:
    // - `fd` is an open datagram socket.
    // - `header` points at buffers that outlive the call.
    let sent = unsafe { libc::sendmsg(fd, &header, 0) };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Turns on a boolean socket option that socket2 has no setter for.
fn enable_option(socket: &Socket, level: libc::c_int, name: libc::c_int) -> io::Result<()> {
    let value: libc::c_int = 1;
    // SAFETY:
    // - The socket is valid.
    // - Only known constants are used for `level` and `name`.
    // - `value` is the correct type to toggle a boolean option and
    //   `option_len` is its size.
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            (&raw const value).cast(),
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };

    match ret {
        0 => Ok(()),
        _ => Err(io::Error::last_os_error()),
    }
}

/// Opens a relay socket on `address` with packet info enabled.
fn create_socket(address: SocketAddr) -> Result<UdpSocket> {
    let domain = match address {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|error| Error::Socket(format!("Failed to create socket: {}", error)))?;

    socket
        .set_reuse_address(true)
        .map_err(|error| Error::Socket(format!("Failed to set SO_REUSEADDR: {}", error)))?;

    match address {
        SocketAddr::V4(_) => {
            socket
                .set_broadcast(true)
                .map_err(|error| Error::Socket(format!("Failed to set SO_BROADCAST: {}", error)))?;
            enable_option(&socket, libc::SOL_IP, libc::IP_PKTINFO)
                .map_err(|error| Error::Socket(format!("Failed to set IP_PKTINFO: {}", error)))?;
            enable_option(&socket, libc::SOL_IP, libc::IP_RECVTTL)
                .map_err(|error| Error::Socket(format!("Failed to set IP_RECVTTL: {}", error)))?;
        }
        SocketAddr::V6(_) => {
            socket
                .set_only_v6(true)
                .map_err(|error| Error::Socket(format!("Failed to set IPV6_V6ONLY: {}", error)))?;
            enable_option(&socket, libc::IPPROTO_IPV6, libc::IPV6_RECVPKTINFO)
                .map_err(|error| Error::Socket(format!("Failed to set IPV6_RECVPKTINFO: {}", error)))?;
        }
    }

    socket
        .set_nonblocking(true)
        .map_err(|error| Error::Socket(format!("Failed to set non-blocking: {}", error)))?;

    socket
        .bind(&address.into())
        .map_err(|error| Error::Socket(format!("Failed to bind to {}: {}", address, error)))?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
        .map_err(|error| Error::Socket(format!("Failed to create tokio socket: {}", error)))
}

/// Sends through the bound relay sockets and edits the ARP table.
#[derive(Debug)]
pub struct UdpTransport {
    ipv4: DashMap<u16, Arc<UdpSocket>>,
    ipv6: DashMap<u16, Arc<UdpSocket>>,
    /// Plain IPv4 socket used only as an ioctl handle.
    control: Socket,
}

impl UdpTransport {
    pub fn new() -> Result<Self> {
        let control = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|error| Error::Socket(format!("Failed to create control socket: {}", error)))?;
        Ok(Self {
            ipv4: DashMap::new(),
            ipv6: DashMap::new(),
            control,
        })
    }

    fn sockets(&self, address: &SocketAddr) -> &DashMap<u16, Arc<UdpSocket>> {
        match address {
            SocketAddr::V4(_) => &self.ipv4,
            SocketAddr::V6(_) => &self.ipv6,
        }
    }

    fn socket(&self, destination: &SocketAddr, port: u16) -> Option<Arc<UdpSocket>> {
        self.sockets(destination)
            .get(&port)
            .map(|entry| Arc::clone(entry.value()))
    }
}

impl Transport for UdpTransport {
    async fn send(&self, outbound: Outbound<'_>) -> io::Result<()> {
        let Some(socket) = self.socket(&outbound.destination, outbound.source_port) else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("no socket bound to port {}", outbound.source_port),
            ));
        };

        socket
            .async_io(Interest::WRITABLE, || send_with_info(socket.as_raw_fd(), &outbound))
            .await
    }

    fn update_neighbor(
        &self,
        interface: &InterfaceInfo,
        address: Ipv4Addr,
        hardware_type: u8,
        hardware_address: &[u8],
    ) -> io::Result<()> {
        // SAFETY: The structure has no invariants.
        let mut request: libc::arpreq = unsafe { mem::zeroed() };

        let protocol_address = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: 0,
            sin_addr: ipv4_to_raw(address),
            sin_zero: [0; 8],
        };
        // SAFETY: `sockaddr_in` and `sockaddr` have the same size; this writes
        // the IPv4 view of the protocol address.
        unsafe {
            (&raw mut request.arp_pa)
                .cast::<libc::sockaddr_in>()
                .write_unaligned(protocol_address);
        }

        request.arp_ha.sa_family = libc::sa_family_t::from(hardware_type);
        for (slot, byte) in request.arp_ha.sa_data.iter_mut().zip(hardware_address) {
            *slot = *byte as libc::c_char;
        }
        request.arp_flags = libc::ATF_COM;

        let device_length = request.arp_dev.len() - 1;
        for (slot, byte) in request
            .arp_dev
            .iter_mut()
            .zip(interface.name.bytes().take(device_length))
        {
            *slot = byte as libc::c_char;
        }

        // SAFETY:
        // - The control socket is valid.
        // - `SIOCSARP` takes a pointer to a fully initialised `arpreq`.
        let ret = unsafe { libc::ioctl(self.control.as_raw_fd(), libc::SIOCSARP, &mut request) };
        match ret {
            0 => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }
}

fn datagram_from(info: PacketInfo, buffer: &[u8], local_port: u16) -> Datagram {
    let destination = info.destination.unwrap_or(match info.source {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    });

    Datagram {
        payload: buffer[..info.length].to_vec(),
        source: info.source,
        destination,
        local_port,
        interface_index: info.interface_index.unwrap_or(0),
        ttl: info.ttl,
    }
}

#[cfg(test)]
async fn receive_datagram(socket: &UdpSocket, local_port: u16, buffer: &mut [u8]) -> io::Result<Datagram> {
    let info = socket
        .async_io(Interest::READABLE, || receive_with_info(socket.as_raw_fd(), buffer))
        .await?;
    Ok(datagram_from(info, buffer, local_port))
}

/// Ports that need a socket for `config`.
fn wanted_addresses(config: &RelayConfig) -> BTreeSet<SocketAddr> {
    let mut addresses = BTreeSet::new();
    addresses.insert(SocketAddr::from((Ipv4Addr::UNSPECIFIED, DHCP_SERVER_PORT)));

    for interface in &config.interfaces {
        for forward in &interface.udp_forward {
            addresses.insert(SocketAddr::from((Ipv4Addr::UNSPECIFIED, forward.port.0)));
        }
        if !interface.dhcpv6_servers.is_empty() {
            addresses.insert(SocketAddr::from((Ipv6Addr::UNSPECIFIED, DHCPV6_SERVER_PORT)));
        }
    }
    addresses
}

/// Index of the first readable socket, scanning round-robin from `start`.
///
/// Registers `cx` with every socket that is not ready yet.
fn poll_readable(sockets: &[(SocketAddr, Arc<UdpSocket>)], start: usize, cx: &mut Context<'_>) -> Poll<usize> {
    for offset in 0..sockets.len() {
        let index = (start + offset) % sockets.len();
        // A readiness error shows up again on the `recvmsg` that follows.
        if sockets[index].1.poll_recv_ready(cx).is_ready() {
            return Poll::Ready(index);
        }
    }
    Poll::Pending
}

/// Owns the sockets and runs the relay loop.
pub struct RelayServer {
    context: Arc<RelayContext>,
    transport: Arc<UdpTransport>,
    bound: Mutex<BTreeMap<SocketAddr, Arc<UdpSocket>>>,
    changed: Notify,
    stopped: AtomicBool,
}

impl RelayServer {
    pub fn new(context: Arc<RelayContext>) -> Result<Self> {
        Ok(Self {
            context,
            transport: Arc::new(UdpTransport::new()?),
            bound: Mutex::new(BTreeMap::new()),
            changed: Notify::new(),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn context(&self) -> &Arc<RelayContext> {
        &self.context
    }

    /// Opens sockets for ports `config` needs and closes the rest.
    ///
    /// Failing to bind the DHCP port is fatal; other ports are logged and
    /// skipped.
    pub async fn sync_ports(&self, config: &RelayConfig) -> Result<()> {
        let wanted = wanted_addresses(config);
        let mut bound = self.bound.lock().await;

        let stale: Vec<SocketAddr> = bound
            .keys()
            .filter(|address| !wanted.contains(address))
            .copied()
            .collect();
        for address in stale {
            bound.remove(&address);
            self.transport.sockets(&address).remove(&address.port());
            info!("Stopped listening on {}", address);
        }

        for address in wanted {
            if bound.contains_key(&address) {
                continue;
            }

            let socket = match create_socket(address) {
                Ok(socket) => Arc::new(socket),
                Err(error) if address.port() == DHCP_SERVER_PORT && address.is_ipv4() => return Err(error),
                Err(error) => {
                    warn!("Not relaying on {}: {}", address, error);
                    continue;
                }
            };

            self.transport
                .sockets(&address)
                .insert(address.port(), Arc::clone(&socket));
            bound.insert(address, socket);
            info!("Listening on {}", address);
        }

        self.changed.notify_one();
        Ok(())
    }

    /// Receives one datagram at a time from whichever socket is readable
    /// and runs it through the relay before receiving the next.
    ///
    /// Returns once [`RelayServer::shutdown`] has been called.
    pub async fn run(&self) -> Result<()> {
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
        let mut next = 0;
        info!("DHCP relay running");

        while !self.stopped.load(Ordering::Acquire) {
            let sockets: Vec<(SocketAddr, Arc<UdpSocket>)> = self
                .bound
                .lock()
                .await
                .iter()
                .map(|(address, socket)| (*address, Arc::clone(socket)))
                .collect();

            let ready = tokio::select! {
                index = std::future::poll_fn(|cx| poll_readable(&sockets, next, cx)) => index,
                () = self.changed.notified() => continue,
            };
            next = ready + 1;

            let (address, socket) = &sockets[ready];
            let received = socket.try_io(Interest::READABLE, || {
                receive_with_info(socket.as_raw_fd(), &mut buffer)
            });
            match received {
                Ok(info) => {
                    let datagram = datagram_from(info, &buffer, address.port());
                    self.context.handle(self.transport.as_ref(), datagram).await;
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {}
                Err(error) => warn!("Error receiving on {}: {}", address, error),
            }
        }

        info!("DHCP relay stopped");
        Ok(())
    }

    /// Closes every socket and stops [`RelayServer::run`].
    pub async fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        let mut bound = self.bound.lock().await;
        for address in mem::take(&mut *bound).into_keys() {
            debug!("Closed {}", address);
        }
        self.transport.ipv4.clear();
        self.transport.ipv6.clear();
        self.changed.notify_one();
    }
}
