//! In-place view of a BOOTP/DHCP message per RFC 2131.
//!
//! A relay forwards the client's bytes, so [`DhcpPacket`] wraps the
//! received buffer and exposes typed accessors over fixed offsets instead
//! of decoding into owned fields. Only `hops`, `giaddr` and the options
//! area are ever rewritten.
//!
//! # Packet Structure
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     op (1)    |   htype (1)   |   hlen (1)    |   hops (1)    |
//! +---------------+---------------+---------------+---------------+
//! |                            xid (4)                            |
//! +-------------------------------+-------------------------------+
//! |           secs (2)            |           flags (2)           |
//! +-------------------------------+-------------------------------+
//! |                          ciaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          yiaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          siaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          giaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          chaddr (16)                          |
//! +---------------------------------------------------------------+
//! |                          sname (64)                           |
//! +---------------------------------------------------------------+
//! |                          file (128)                           |
//! +---------------------------------------------------------------+
//! |                    magic cookie (4) = 99.130.83.99            |
//! +---------------------------------------------------------------+
//! |                          options (variable)                   |
//! +---------------------------------------------------------------+
//! ```
//!
//! A message without the magic cookie is plain BOOTP and has no options
//! the relay needs to look at.

use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::options::{MessageType, OptionCode, OptionIter, OverloadFlag};

/// DHCP magic cookie that identifies DHCP packets (vs BOOTP).
pub const DHCP_MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

const HOPS_OFFSET: usize = 3;
const XID_OFFSET: usize = 4;
const FLAGS_OFFSET: usize = 10;
const CIADDR_OFFSET: usize = 12;
const YIADDR_OFFSET: usize = 16;
const SIADDR_OFFSET: usize = 20;
const GIADDR_OFFSET: usize = 24;
const CHADDR_OFFSET: usize = 28;
const DHCP_CHADDR_SIZE: usize = 16;
const DHCP_SNAME_SIZE: usize = 64;
const DHCP_FILE_SIZE: usize = 128;

const DHCP_SNAME_OFFSET: usize = CHADDR_OFFSET + DHCP_CHADDR_SIZE;
const DHCP_FILE_OFFSET: usize = DHCP_SNAME_OFFSET + DHCP_SNAME_SIZE;

/// Length of the fixed BOOTP header; the magic cookie starts here.
pub const BOOTP_HEADER_SIZE: usize = DHCP_FILE_OFFSET + DHCP_FILE_SIZE;

/// Offset of the first option byte after the magic cookie.
pub const DHCP_OPTIONS_OFFSET: usize = BOOTP_HEADER_SIZE + DHCP_MAGIC_COOKIE.len();

/// Minimum BOOTP message size (RFC 1542 §2.1).
///
/// Relayed packets that shrink below this after option editing are
/// zero-padded back up to it.
pub const DHCP_MIN_PACKET_SIZE: usize = 300;

/// Largest datagram the relay accepts or produces (jumbo frame payload).
pub const RECV_BUFFER_SIZE: usize = 9228;

/// Smallest maximum-message-size value a client may advertise (RFC 2132 §9.10).
///
/// Smaller advertised values are ignored.
pub const MAX_DHCP_MESSAGE_SIZE: u16 = 576;

/// Maximum hop count before dropping the packet (RFC 1542 §4.1.1).
pub const MAX_HOPS: u8 = 16;

/// BOOTP/DHCP operation code for client requests.
pub const BOOTREQUEST: u8 = 1;

/// BOOTP/DHCP operation code for server replies.
pub const BOOTREPLY: u8 = 2;

/// Hardware type for Ethernet (most common).
pub const HTYPE_ETHERNET: u8 = 1;

/// Hardware address length for Ethernet (6 bytes).
pub const HLEN_ETHERNET: u8 = 6;

/// Bit 15 of `flags`: the client wants its reply broadcast.
pub const BROADCAST_FLAG: u16 = 0x8000;

/// Server-side UDP port.
pub const DHCP_SERVER_PORT: u16 = 67;

/// Client-side UDP port.
pub const DHCP_CLIENT_PORT: u16 = 68;

/// A received BOOTP/DHCP message, edited in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpPacket {
    buffer: Vec<u8>,
}

impl DhcpPacket {
    /// Wraps a received datagram.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] if:
    /// - The buffer is shorter than the 236-byte BOOTP header
    /// - The buffer is longer than [`RECV_BUFFER_SIZE`]
    /// - `hlen` exceeds the 16-byte `chaddr` field
    pub fn parse(buffer: Vec<u8>) -> Result<Self> {
        if buffer.len() < BOOTP_HEADER_SIZE {
            return Err(Error::InvalidPacket(format!(
                "Packet too short: {} bytes (minimum {})",
                buffer.len(),
                BOOTP_HEADER_SIZE
            )));
        }

        if buffer.len() > RECV_BUFFER_SIZE {
            return Err(Error::InvalidPacket(format!(
                "Packet too long: {} bytes (maximum {})",
                buffer.len(),
                RECV_BUFFER_SIZE
            )));
        }

        let hlen = buffer[2] as usize;
        if hlen > DHCP_CHADDR_SIZE {
            return Err(Error::InvalidPacket(format!(
                "Invalid hlen {} (chaddr holds {})",
                hlen, DHCP_CHADDR_SIZE
            )));
        }

        Ok(Self { buffer })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    /// Operation code: [`BOOTREQUEST`] (1) or [`BOOTREPLY`] (2).
    pub fn op(&self) -> u8 {
        self.buffer[0]
    }

    pub fn htype(&self) -> u8 {
        self.buffer[1]
    }

    pub fn hlen(&self) -> u8 {
        self.buffer[2]
    }

    /// Hop count, incremented by relay agents.
    pub fn hops(&self) -> u8 {
        self.buffer[HOPS_OFFSET]
    }

    pub fn set_hops(&mut self, hops: u8) {
        self.buffer[HOPS_OFFSET] = hops;
    }

    pub fn xid(&self) -> u32 {
        u32::from_be_bytes(self.read_array(XID_OFFSET))
    }

    pub fn flags(&self) -> u16 {
        u16::from_be_bytes(self.read_array(FLAGS_OFFSET))
    }

    /// Returns true if the broadcast flag (bit 15) is set.
    pub fn is_broadcast(&self) -> bool {
        (self.flags() & BROADCAST_FLAG) != 0
    }

    pub fn ciaddr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.read_array::<4>(CIADDR_OFFSET))
    }

    pub fn yiaddr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.read_array::<4>(YIADDR_OFFSET))
    }

    pub fn siaddr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.read_array::<4>(SIADDR_OFFSET))
    }

    /// Gateway IP address - the relay agent that first saw the request.
    pub fn giaddr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.read_array::<4>(GIADDR_OFFSET))
    }

    pub fn set_giaddr(&mut self, giaddr: Ipv4Addr) {
        self.buffer[GIADDR_OFFSET..GIADDR_OFFSET + 4].copy_from_slice(&giaddr.octets());
    }

    /// Returns the client hardware address bytes (respecting hlen).
    pub fn chaddr(&self) -> &[u8] {
        let len = self.hlen() as usize;
        &self.buffer[CHADDR_OFFSET..CHADDR_OFFSET + len]
    }

    /// Formats the client hardware address as a colon-separated string.
    pub fn format_mac(&self) -> String {
        format_hardware_address(self.chaddr())
    }

    /// True when the magic cookie follows the BOOTP header.
    pub fn has_magic_cookie(&self) -> bool {
        self.buffer.len() >= DHCP_OPTIONS_OFFSET
            && self.buffer[BOOTP_HEADER_SIZE..DHCP_OPTIONS_OFFSET] == DHCP_MAGIC_COOKIE
    }

    /// The options area after the magic cookie, empty for BOOTP.
    pub fn options_area(&self) -> &[u8] {
        if self.has_magic_cookie() {
            &self.buffer[DHCP_OPTIONS_OFFSET..]
        } else {
            &[]
        }
    }

    /// Option overload flag (Option 52) from the main options area.
    pub fn overload(&self) -> Option<OverloadFlag> {
        OptionIter::new(self.options_area())
            .map_while(|option| option.ok())
            .find(|option| option.code == OptionCode::OptionOverload as u8)
            .and_then(|option| option.data.first().copied())
            .and_then(|flag| OverloadFlag::try_from(flag).ok())
    }

    /// Finds the first occurrence of an option.
    ///
    /// Searches the main options area, then `file` and `sname` when the
    /// overload option says they carry options (RFC 2131 §4.1 order).
    /// A malformed region ends the search of that region only.
    pub fn find_option(&self, code: u8) -> Option<&[u8]> {
        let lookup = |region: &[u8]| -> Option<usize> {
            OptionIter::new(region)
                .map_while(|option| option.ok())
                .find(|option| option.code == code)
                .map(|option| option.offset)
        };

        let mut regions: Vec<(usize, usize)> = Vec::with_capacity(3);
        if self.has_magic_cookie() {
            regions.push((DHCP_OPTIONS_OFFSET, self.buffer.len()));
        }
        if let Some(flag) = self.overload() {
            if flag.uses_file() {
                regions.push((DHCP_FILE_OFFSET, DHCP_FILE_OFFSET + DHCP_FILE_SIZE));
            }
            if flag.uses_sname() {
                regions.push((DHCP_SNAME_OFFSET, DHCP_SNAME_OFFSET + DHCP_SNAME_SIZE));
            }
        }

        regions.into_iter().find_map(|(start, end)| {
            let region = &self.buffer[start..end];
            let offset = lookup(region)?;
            let length = region[offset + 1] as usize;
            Some(&region[offset + 2..offset + 2 + length])
        })
    }

    /// Returns the DHCP message type (Option 53) if present.
    ///
    /// Returns `None` for BOOTP packets which don't have this option.
    pub fn message_type(&self) -> Option<MessageType> {
        self.find_option(OptionCode::MessageType as u8)
            .and_then(|data| data.first().copied())
            .and_then(|value| MessageType::try_from(value).ok())
    }

    fn read_array<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.buffer[offset..offset + N]);
        bytes
    }
}

/// Formats a hardware address as colon-separated lowercase hex.
pub fn format_hardware_address(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut result = String::with_capacity(bytes.len() * 3);
    for (index, byte) in bytes.iter().enumerate() {
        if index > 0 {
            result.push(':');
        }
        let _ = write!(result, "{:02x}", byte);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_packet(op: u8, message_type: Option<MessageType>) -> Vec<u8> {
        let mut packet = vec![0u8; 300];

        packet[0] = op;
        packet[1] = HTYPE_ETHERNET;
        packet[2] = HLEN_ETHERNET;
        packet[4..8].copy_from_slice(&0x12345678u32.to_be_bytes());
        packet[10..12].copy_from_slice(&0x8000u16.to_be_bytes());
        packet[28..34].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        packet[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);

        let mut index = DHCP_OPTIONS_OFFSET;
        if let Some(message_type) = message_type {
            packet[index] = OptionCode::MessageType as u8;
            packet[index + 1] = 1;
            packet[index + 2] = message_type as u8;
            index += 3;
        }
        packet[index] = OptionCode::End as u8;
        packet
    }

    #[test]
    fn test_header_accessors() {
        let data = create_test_packet(BOOTREQUEST, Some(MessageType::Discover));
        let packet = DhcpPacket::parse(data).unwrap();

        assert_eq!(packet.op(), BOOTREQUEST);
        assert_eq!(packet.htype(), HTYPE_ETHERNET);
        assert_eq!(packet.xid(), 0x12345678);
        assert!(packet.is_broadcast());
        assert_eq!(packet.chaddr(), &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(packet.format_mac(), "aa:bb:cc:dd:ee:ff");
        assert_eq!(packet.message_type(), Some(MessageType::Discover));
    }

    #[test]
    fn test_field_offsets() {
        let mut data = create_test_packet(BOOTREPLY, None);
        data[3] = 4;
        data[12..16].copy_from_slice(&[10, 0, 0, 1]);
        data[16..20].copy_from_slice(&[10, 0, 0, 2]);
        data[20..24].copy_from_slice(&[10, 0, 0, 3]);
        data[24..28].copy_from_slice(&[10, 0, 0, 4]);
        let packet = DhcpPacket::parse(data).unwrap();

        assert_eq!(packet.hops(), 4);
        assert_eq!(packet.ciaddr(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(packet.yiaddr(), Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(packet.siaddr(), Ipv4Addr::new(10, 0, 0, 3));
        assert_eq!(packet.giaddr(), Ipv4Addr::new(10, 0, 0, 4));
    }

    #[test]
    fn test_setters_write_in_place() {
        let data = create_test_packet(BOOTREQUEST, Some(MessageType::Request));
        let mut packet = DhcpPacket::parse(data).unwrap();

        packet.set_hops(3);
        packet.set_giaddr(Ipv4Addr::new(192, 168, 5, 1));

        assert_eq!(packet.as_bytes()[3], 3);
        assert_eq!(&packet.as_bytes()[24..28], &[192, 168, 5, 1]);
        assert_eq!(packet.len(), 300);
    }

    #[test]
    fn test_too_short_rejected() {
        assert!(DhcpPacket::parse(vec![0u8; 235]).is_err());
        assert!(DhcpPacket::parse(vec![0u8; 236]).is_ok());
    }

    #[test]
    fn test_too_long_rejected() {
        assert!(DhcpPacket::parse(vec![0u8; RECV_BUFFER_SIZE + 1]).is_err());
    }

    #[test]
    fn test_hlen_bounded_by_chaddr() {
        let mut data = create_test_packet(BOOTREQUEST, None);
        data[2] = 17;
        assert!(DhcpPacket::parse(data).is_err());
    }

    #[test]
    fn test_bootp_packet_has_no_options() {
        let mut data = create_test_packet(BOOTREQUEST, None);
        data[236..240].copy_from_slice(&[0, 0, 0, 0]);
        let packet = DhcpPacket::parse(data).unwrap();

        assert!(!packet.has_magic_cookie());
        assert!(packet.options_area().is_empty());
        assert_eq!(packet.message_type(), None);
    }

    #[test]
    fn test_message_type_from_overloaded_file() {
        let mut data = create_test_packet(BOOTREPLY, None);
        data[240..243].copy_from_slice(&[52, 1, 1]);
        data[243] = 255;
        data[DHCP_FILE_OFFSET..DHCP_FILE_OFFSET + 4].copy_from_slice(&[53, 1, 6, 255]);
        let packet = DhcpPacket::parse(data).unwrap();

        assert_eq!(packet.overload(), Some(OverloadFlag::File));
        assert_eq!(packet.message_type(), Some(MessageType::Nak));
    }

    #[test]
    fn test_message_type_from_overloaded_sname() {
        let mut data = create_test_packet(BOOTREPLY, None);
        data[240..244].copy_from_slice(&[52, 1, 2, 255]);
        data[DHCP_SNAME_OFFSET..DHCP_SNAME_OFFSET + 4].copy_from_slice(&[53, 1, 5, 255]);
        let packet = DhcpPacket::parse(data).unwrap();

        assert_eq!(packet.message_type(), Some(MessageType::Ack));
    }

    #[test]
    fn test_sname_ignored_without_overload() {
        let mut data = create_test_packet(BOOTREPLY, None);
        data[DHCP_SNAME_OFFSET..DHCP_SNAME_OFFSET + 4].copy_from_slice(&[53, 1, 5, 255]);
        let packet = DhcpPacket::parse(data).unwrap();

        assert_eq!(packet.message_type(), None);
    }

    #[test]
    fn test_main_area_wins_over_overload() {
        let mut data = create_test_packet(BOOTREPLY, None);
        data[240..247].copy_from_slice(&[52, 1, 3, 53, 1, 2, 255]);
        data[DHCP_FILE_OFFSET..DHCP_FILE_OFFSET + 4].copy_from_slice(&[53, 1, 5, 255]);
        let packet = DhcpPacket::parse(data).unwrap();

        assert_eq!(packet.message_type(), Some(MessageType::Offer));
    }

    #[test]
    fn test_find_option_survives_truncation() {
        let mut data = create_test_packet(BOOTREQUEST, Some(MessageType::Discover));
        data.truncate(243);
        data.extend_from_slice(&[82, 40, 1]);
        let packet = DhcpPacket::parse(data).unwrap();

        assert_eq!(packet.message_type(), Some(MessageType::Discover));
        assert_eq!(packet.find_option(82), None);
    }

    #[test]
    fn test_format_hardware_address() {
        assert_eq!(format_hardware_address(&[]), "");
        assert_eq!(format_hardware_address(&[0x01, 0x0a]), "01:0a");
    }
}
