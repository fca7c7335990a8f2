//! DHCP option codes and a zero-copy option walker.
//!
//! A relay never rebuilds a client's options: it walks the TLVs where they
//! sit in the received buffer, edits the few it owns (option 82) and leaves
//! everything else byte-for-byte intact. [`OptionIter`] yields borrowed
//! [`RawOption`]s together with their offsets so callers can splice the
//! buffer in place.
//!
//! # References
//!
//! - RFC 2132: DHCP Options and BOOTP Vendor Extensions
//! - RFC 3046: DHCP Relay Agent Information Option (Option 82)

use crate::error::{Error, Result};

/// Size of the code and length bytes that precede every option body.
pub const OPTION_HEADER_SIZE: usize = 2;

/// DHCP option codes the relay inspects.
///
/// Every other code is carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionCode {
    /// Padding (no operation). Used for alignment.
    Pad = 0,
    /// Option overload - sname/file fields carry options (RFC 2132 §9.3).
    OptionOverload = 52,
    /// DHCP message type (RFC 2132 §9.6).
    MessageType = 53,
    /// Maximum DHCP message size the client accepts (RFC 2132 §9.10).
    MaxMessageSize = 57,
    /// Relay agent information (RFC 3046).
    RelayAgentInfo = 82,
    /// End of options marker.
    End = 255,
}

impl TryFrom<u8> for OptionCode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pad),
            52 => Ok(Self::OptionOverload),
            53 => Ok(Self::MessageType),
            57 => Ok(Self::MaxMessageSize),
            82 => Ok(Self::RelayAgentInfo),
            255 => Ok(Self::End),
            other => Err(other),
        }
    }
}

/// DHCP message types (Option 53) as defined in RFC 2132 §9.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Client broadcast to locate servers.
    Discover = 1,
    /// Server response to DISCOVER with IP offer.
    Offer = 2,
    /// Client request for offered parameters.
    Request = 3,
    /// Client indicates address is already in use.
    Decline = 4,
    /// Server acknowledgement with configuration.
    Ack = 5,
    /// Server negative acknowledgement.
    Nak = 6,
    /// Client releases IP address.
    Release = 7,
    /// Client requests config without IP allocation.
    Inform = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Discover),
            2 => Ok(Self::Offer),
            3 => Ok(Self::Request),
            4 => Ok(Self::Decline),
            5 => Ok(Self::Ack),
            6 => Ok(Self::Nak),
            7 => Ok(Self::Release),
            8 => Ok(Self::Inform),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Discover => "DISCOVER",
            Self::Offer => "OFFER",
            Self::Request => "REQUEST",
            Self::Decline => "DECLINE",
            Self::Ack => "ACK",
            Self::Nak => "NAK",
            Self::Release => "RELEASE",
            Self::Inform => "INFORM",
        };
        f.write_str(name)
    }
}

/// Option overload flags (Option 52) as defined in RFC 2132 §9.3.
///
/// Indicates that the `sname` and/or `file` fields in the DHCP packet
/// header contain DHCP options instead of their normal content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OverloadFlag {
    /// The `file` field contains options.
    File = 1,
    /// The `sname` field contains options.
    Sname = 2,
    /// Both `file` and `sname` fields contain options.
    Both = 3,
}

impl OverloadFlag {
    pub fn uses_file(self) -> bool {
        matches!(self, Self::File | Self::Both)
    }

    pub fn uses_sname(self) -> bool {
        matches!(self, Self::Sname | Self::Both)
    }
}

impl TryFrom<u8> for OverloadFlag {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::File),
            2 => Ok(Self::Sname),
            3 => Ok(Self::Both),
            other => Err(other),
        }
    }
}

/// One option TLV borrowed from a packet buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawOption<'a> {
    pub code: u8,
    pub data: &'a [u8],
    /// Offset of the code byte within the walked region.
    pub offset: usize,
}

impl RawOption<'_> {
    /// Length of the option on the wire, header included.
    pub fn encoded_len(&self) -> usize {
        OPTION_HEADER_SIZE + self.data.len()
    }

    /// Offset one past the last byte of this option.
    pub fn end(&self) -> usize {
        self.offset + self.encoded_len()
    }
}

/// Walks the options of one region (main area, `file` or `sname`).
///
/// Pad bytes are skipped, iteration stops at End or at the end of the
/// region. A truncated option yields one `Err` and then ends the walk.
#[derive(Debug, Clone)]
pub struct OptionIter<'a> {
    data: &'a [u8],
    index: usize,
    finished: bool,
}

impl<'a> OptionIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            index: 0,
            finished: false,
        }
    }

    fn fail(&mut self, reason: &str) -> Option<Result<RawOption<'a>>> {
        self.finished = true;
        Some(Err(Error::InvalidPacket(reason.to_string())))
    }
}

impl<'a> Iterator for OptionIter<'a> {
    type Item = Result<RawOption<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        while self.index < self.data.len() {
            let code = self.data[self.index];

            if code == OptionCode::Pad as u8 {
                self.index += 1;
                continue;
            }

            if code == OptionCode::End as u8 {
                self.finished = true;
                return None;
            }

            if self.index + 1 >= self.data.len() {
                return self.fail("Option length missing");
            }

            let length = self.data[self.index + 1] as usize;
            let start = self.index + OPTION_HEADER_SIZE;

            if start + length > self.data.len() {
                return self.fail("Option data truncated");
            }

            let option = RawOption {
                code,
                data: &self.data[start..start + length],
                offset: self.index,
            };
            self.index = start + length;
            return Some(Ok(option));
        }

        self.finished = true;
        None
    }
}

/// Encodes a single TLV.
///
/// Used for DHCP options and for the sub-options nested inside option 82,
/// which share the one-octet type and length layout.
pub fn encode_option(code: u8, data: &[u8]) -> Result<Vec<u8>> {
    let length = u8::try_from(data.len()).map_err(|_| {
        Error::InvalidPacket(format!(
            "Option {} body of {} bytes does not fit a one-octet length",
            code,
            data.len()
        ))
    })?;

    let mut encoded = Vec::with_capacity(OPTION_HEADER_SIZE + data.len());
    encoded.push(code);
    encoded.push(length);
    encoded.extend_from_slice(data);
    Ok(encoded)
}
