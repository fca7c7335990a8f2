//! Relay Agent Information option (option 82, RFC 3046).
//!
//! The block the relay writes is always
//!
//! ```text
//! +----+-----+----+---+-----------------+----+-----+-----------------+
//! | 82 | len |  1 | 4 | ifindex (be32)  |  2 | 6/4 | MAC or IPv4     |
//! +----+-----+----+---+-----------------+----+-----+-----------------+
//!            |  Circuit-ID sub-option   |  Remote-ID sub-option      |
//! ```
//!
//! On the way to the server, [`process_request`] applies the configured
//! [`Policy`]; on the way back, [`process_reply`] validates and strips the
//! block. Both edit the received buffer in place and never reorder the
//! client's other options.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DropReason, Error, Result};
use crate::interfaces::InterfaceInfo;
use crate::options::{OPTION_HEADER_SIZE, OptionCode, OptionIter, encode_option};
use crate::packet::{
    DHCP_MIN_PACKET_SIZE, DHCP_OPTIONS_OFFSET, DhcpPacket, MAX_DHCP_MESSAGE_SIZE,
    RECV_BUFFER_SIZE,
};

/// Circuit-ID sub-option type.
pub const SUBOPTION_CIRCUIT_ID: u8 = 1;

/// Remote-ID sub-option type.
pub const SUBOPTION_REMOTE_ID: u8 = 2;

const CIRCUIT_ID_SIZE: usize = 4;
const MAC_ADDRESS_SIZE: usize = 6;
const IPV4_ADDRESS_SIZE: usize = 4;

/// What to do with a client request that already carries option 82.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Forward the request with the existing block untouched.
    Keep,
    /// Discard the request.
    Drop,
    /// Strip the existing block and insert ours.
    #[default]
    Replace,
}

impl FromStr for Policy {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "keep" => Ok(Self::Keep),
            "drop" => Ok(Self::Drop),
            "replace" => Ok(Self::Replace),
            other => Err(Error::InvalidConfig(format!(
                "unknown option 82 policy '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Keep => "keep",
            Self::Drop => "drop",
            Self::Replace => "replace",
        })
    }
}

/// Which identity the relay writes into the Remote-ID sub-option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteIdKind {
    Ip,
    #[default]
    Mac,
}

impl FromStr for RemoteIdKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "ip" => Ok(Self::Ip),
            "mac" => Ok(Self::Mac),
            other => Err(Error::InvalidConfig(format!(
                "unknown option 82 remote-id '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for RemoteIdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ip => "ip",
            Self::Mac => "mac",
        })
    }
}

/// Remote-ID value written by this relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteId {
    Mac([u8; 6]),
    Ip(Ipv4Addr),
}

impl RemoteId {
    pub fn kind(&self) -> RemoteIdKind {
        match self {
            Self::Mac(_) => RemoteIdKind::Mac,
            Self::Ip(_) => RemoteIdKind::Ip,
        }
    }

    fn to_bytes(self) -> Vec<u8> {
        match self {
            Self::Mac(mac) => mac.to_vec(),
            Self::Ip(address) => address.octets().to_vec(),
        }
    }
}

/// The Circuit-ID is the ingress interface index.
pub type CircuitId = u32;

/// Outcome of [`decode_and_validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    /// The block was written by this relay for this interface.
    Ok(CircuitId),
    /// Well formed, but a sub-option is missing or identifies someone else.
    Mismatch,
    /// Structurally broken.
    Invalid,
}

/// Encoded size of our block, header included.
pub const fn encoded_length(kind: RemoteIdKind) -> usize {
    let remote = match kind {
        RemoteIdKind::Mac => MAC_ADDRESS_SIZE,
        RemoteIdKind::Ip => IPV4_ADDRESS_SIZE,
    };
    let length = OPTION_HEADER_SIZE
        + OPTION_HEADER_SIZE
        + CIRCUIT_ID_SIZE
        + OPTION_HEADER_SIZE
        + remote;
    assert!(length <= 255);
    length
}

/// Checks the body of an option 82 block (without its code and length).
///
/// Sub-options are walked as `(type, length, value)`; a trailing single
/// byte is ignored and the last occurrence of a repeated sub-option wins.
pub fn decode_and_validate(body: &[u8], identity: &InterfaceInfo, kind: RemoteIdKind) -> Validation {
    let mut circuit_id: Option<&[u8]> = None;
    let mut remote_id: Option<&[u8]> = None;
    let mut index = 0;

    while index + 1 < body.len() {
        let suboption = body[index];
        let length = body[index + 1] as usize;
        let start = index + OPTION_HEADER_SIZE;
        index = start + length;

        if index > body.len() {
            return Validation::Invalid;
        }

        let value = &body[start..index];
        match suboption {
            SUBOPTION_CIRCUIT_ID => circuit_id = Some(value),
            SUBOPTION_REMOTE_ID => remote_id = Some(value),
            _ => return Validation::Invalid,
        }
    }

    let (Some(circuit_id), Some(remote_id)) = (circuit_id, remote_id) else {
        return Validation::Mismatch;
    };

    let Ok(circuit_id) = <[u8; CIRCUIT_ID_SIZE]>::try_from(circuit_id) else {
        return Validation::Invalid;
    };

    let matches = match kind {
        RemoteIdKind::Mac => remote_id == identity.mac.octets().as_slice(),
        RemoteIdKind::Ip => <[u8; IPV4_ADDRESS_SIZE]>::try_from(remote_id)
            .map(|octets| identity.owns(Ipv4Addr::from(octets)))
            .unwrap_or(false),
    };

    if matches {
        Validation::Ok(u32::from_be_bytes(circuit_id))
    } else {
        Validation::Mismatch
    }
}

/// Removes every option 82 block from the main options area.
///
/// Following options shift left; the End marker and trailing padding
/// are kept. Returns whether anything was removed.
pub fn strip(packet: &mut DhcpPacket) -> Result<bool> {
    let mut ranges = Vec::new();
    for option in OptionIter::new(packet.options_area()) {
        let option = option?;
        if option.code == OptionCode::RelayAgentInfo as u8 {
            ranges.push((option.offset, option.end()));
        }
    }

    remove_ranges(packet, &ranges);
    Ok(!ranges.is_empty())
}

/// Appends our block and a new End marker after the last option.
///
/// Trailing End and Pad bytes are overwritten. Fails with
/// [`Error::NoSpace`] when the result would not fit the receive buffer or
/// the client's advertised maximum message size; the packet is untouched
/// in that case.
pub fn encode(
    packet: &mut DhcpPacket,
    circuit_id: CircuitId,
    remote_id: RemoteId,
    max_message_size: Option<u16>,
) -> Result<()> {
    let tail = options_tail(packet)?;
    let packet_length = tail + encoded_length(remote_id.kind());

    if packet_length >= RECV_BUFFER_SIZE {
        return Err(Error::NoSpace);
    }
    if let Some(limit) = max_message_size
        && (limit as usize) < packet_length
    {
        return Err(Error::NoSpace);
    }

    let mut body = encode_option(SUBOPTION_CIRCUIT_ID, &circuit_id.to_be_bytes())?;
    body.extend(encode_option(SUBOPTION_REMOTE_ID, &remote_id.to_bytes())?);
    let block = encode_option(OptionCode::RelayAgentInfo as u8, &body)?;

    let buffer = packet.buffer_mut();
    buffer.truncate(tail);
    buffer.extend_from_slice(&block);
    buffer.push(OptionCode::End as u8);
    pad_to_minimum(buffer);
    Ok(())
}

/// Result of running a client request through the option 82 policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Forwarded as received: plain BOOTP, no message type, or `keep`
    /// with an existing block.
    Unchanged { had_option82: bool },
    /// Our block was inserted, after stripping any existing one.
    Injected { had_option82: bool },
    /// Any existing block was stripped but ours did not fit.
    NoSpace { had_option82: bool },
}

impl RequestOutcome {
    pub fn had_option82(&self) -> bool {
        match self {
            Self::Unchanged { had_option82 }
            | Self::Injected { had_option82 }
            | Self::NoSpace { had_option82 } => *had_option82,
        }
    }
}

/// Applies `policy` to a client request and inserts our block.
///
/// Option 82 is only acted on after the message type option has been
/// seen; a block that precedes it is left alone. A maximum message size
/// option with a bad length rejects the request, and a value below 576
/// is ignored.
pub fn process_request(
    packet: &mut DhcpPacket,
    policy: Policy,
    circuit_id: CircuitId,
    remote_id: RemoteId,
) -> std::result::Result<RequestOutcome, DropReason> {
    if !packet.has_magic_cookie() {
        return Ok(RequestOutcome::Unchanged {
            had_option82: false,
        });
    }

    let mut seen_message_type = false;
    let mut max_message_size = None;
    let mut had_option82 = false;
    let mut ranges = Vec::new();

    for option in OptionIter::new(packet.options_area()) {
        let option = option.map_err(|_| DropReason::Malformed)?;

        match OptionCode::try_from(option.code) {
            Ok(OptionCode::MessageType) => seen_message_type = true,
            Ok(OptionCode::MaxMessageSize) => {
                let Ok(value) = <[u8; 2]>::try_from(option.data) else {
                    return Err(DropReason::InvalidMaxMessageSize);
                };
                let value = u16::from_be_bytes(value);
                max_message_size = (value >= MAX_DHCP_MESSAGE_SIZE).then_some(value);
            }
            Ok(OptionCode::RelayAgentInfo) if seen_message_type => {
                if packet.giaddr().is_unspecified() {
                    return Err(DropReason::Option82WithoutGateway);
                }
                had_option82 = true;
                match policy {
                    Policy::Keep => {
                        return Ok(RequestOutcome::Unchanged { had_option82 });
                    }
                    Policy::Drop => return Err(DropReason::Option82Present),
                    Policy::Replace => ranges.push((option.offset, option.end())),
                }
            }
            _ => {}
        }
    }

    if !seen_message_type {
        return Ok(RequestOutcome::Unchanged { had_option82 });
    }

    remove_ranges(packet, &ranges);

    match encode(packet, circuit_id, remote_id, max_message_size) {
        Ok(()) => Ok(RequestOutcome::Injected { had_option82 }),
        Err(Error::NoSpace) => Ok(RequestOutcome::NoSpace { had_option82 }),
        Err(_) => Err(DropReason::Malformed),
    }
}

/// How strictly server replies are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyValidation {
    /// Strip only.
    Off,
    /// Drop replies whose block is structurally broken.
    RejectCorrupt,
    /// Also drop replies whose block is missing or not ours.
    Strict,
}

/// Result of running a server reply through validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyOutcome {
    pub had_option82: bool,
    /// Circuit-ID of a block that validated.
    pub circuit_id: Option<CircuitId>,
}

/// Validates and strips option 82 from a server reply.
///
/// `identity` is the client-facing interface the reply is headed for.
pub fn process_reply(
    packet: &mut DhcpPacket,
    identity: &InterfaceInfo,
    kind: RemoteIdKind,
    validation: ReplyValidation,
) -> std::result::Result<ReplyOutcome, DropReason> {
    let mut outcome = ReplyOutcome {
        had_option82: false,
        circuit_id: None,
    };

    if !packet.has_magic_cookie() {
        return Ok(outcome);
    }

    let mut seen_message_type = false;
    let mut ranges = Vec::new();

    for option in OptionIter::new(packet.options_area()) {
        let option = option.map_err(|_| DropReason::Malformed)?;

        match OptionCode::try_from(option.code) {
            Ok(OptionCode::MessageType) => seen_message_type = true,
            Ok(OptionCode::RelayAgentInfo) if seen_message_type => {
                if packet.giaddr().is_unspecified() {
                    return Err(DropReason::Option82WithoutGateway);
                }
                outcome.had_option82 = true;
                match decode_and_validate(option.data, identity, kind) {
                    Validation::Invalid if validation != ReplyValidation::Off => {
                        return Err(DropReason::CorruptOption82);
                    }
                    Validation::Ok(circuit_id) => outcome.circuit_id = Some(circuit_id),
                    _ => {}
                }
                ranges.push((option.offset, option.end()));
            }
            _ => {}
        }
    }

    if !seen_message_type {
        return Ok(outcome);
    }

    remove_ranges(packet, &ranges);

    if validation == ReplyValidation::Strict && outcome.circuit_id.is_none() {
        return Err(DropReason::OptionMismatch);
    }

    Ok(outcome)
}

/// Offset (within the whole packet) just past the last real option.
fn options_tail(packet: &DhcpPacket) -> Result<usize> {
    if !packet.has_magic_cookie() {
        return Err(Error::InvalidPacket(
            "BOOTP packet has no options area".to_string(),
        ));
    }

    let mut tail = 0;
    for option in OptionIter::new(packet.options_area()) {
        tail = option?.end();
    }
    Ok(DHCP_OPTIONS_OFFSET + tail)
}

/// Removes option ranges (offsets relative to the options area).
fn remove_ranges(packet: &mut DhcpPacket, ranges: &[(usize, usize)]) {
    if ranges.is_empty() {
        return;
    }

    let buffer = packet.buffer_mut();
    for &(start, end) in ranges.iter().rev() {
        buffer.drain(DHCP_OPTIONS_OFFSET + start..DHCP_OPTIONS_OFFSET + end);
    }
    pad_to_minimum(buffer);
}

fn pad_to_minimum(buffer: &mut Vec<u8>) {
    if buffer.len() < DHCP_MIN_PACKET_SIZE {
        buffer.resize(DHCP_MIN_PACKET_SIZE, 0);
    }
}
