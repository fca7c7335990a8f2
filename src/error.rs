//! Error types for the relay agent.
//!
//! Configuration-time and I/O failures are reported through [`Result<T>`].
//! Packet-level problems are never errors: the decision engine absorbs them
//! and reports a [`Disposition`](crate::relay::Disposition) carrying a
//! [`DropReason`] instead.

/// Errors that can occur while configuring or running the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system or network I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error in the configuration file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed DHCP or DHCPv6 packet.
    ///
    /// Too short, truncated option, or a header field that cannot be relayed.
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Invalid relay configuration.
    ///
    /// Returned by [`RelayConfig::validate`](crate::RelayConfig::validate).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configured server or gateway address is not usable.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Socket creation or configuration error.
    ///
    /// Typically occurs when binding to port 67 without the required privileges.
    #[error("Socket error: {0}")]
    Socket(String),

    /// The interface already references as many servers as it may hold.
    ///
    /// The registry is left unchanged when this is returned.
    #[error("Interface {interface} already holds {capacity} server references")]
    CapacityExceeded { interface: String, capacity: usize },

    /// The server is already referenced by this interface.
    #[error("Server {server} is already configured on interface {interface}")]
    DuplicateServer { interface: String, server: String },

    /// Injecting relay agent information would exceed the receive buffer
    /// or the client's maximum message size.
    #[error("Not enough room in the packet for relay agent information")]
    NoSpace,
}

/// Why the decision engine discarded a packet.
///
/// Every variant is a packet-level condition: it is logged and counted,
/// never propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DropReason {
    /// Header or option area could not be walked.
    #[error("malformed packet")]
    Malformed,

    /// Hop count already above the relay limit.
    #[error("hop count {0} exceeds limit")]
    HopLimitExceeded(u8),

    /// Nothing is configured for the ingress interface.
    #[error("no relay configuration for interface")]
    NoConfigForInterface,

    /// The ingress interface has no IPv4 address to stamp into `giaddr`.
    #[error("interface has no address")]
    NoInterfaceAddress,

    /// Relay agent information TLV is structurally broken.
    #[error("corrupt relay agent information")]
    CorruptOption82,

    /// Relay agent information is well formed but not ours, or missing.
    #[error("relay agent information mismatch")]
    OptionMismatch,

    /// A client request already carries option 82 and policy is drop.
    #[error("request already carries relay agent information")]
    Option82Present,

    /// Option 82 present while `giaddr` is zero.
    #[error("relay agent information without gateway address")]
    Option82WithoutGateway,

    /// Maximum message size option with a length other than two.
    #[error("invalid maximum message size option")]
    InvalidMaxMessageSize,

    /// Reply addressed to no usable client address.
    #[error("reply has no client address")]
    NoClientAddress,

    /// IP time-to-live would reach zero.
    #[error("time to live exhausted")]
    TtlExpired,
}

/// A specialized Result type for relay operations.
pub type Result<T> = std::result::Result<T, Error>;
