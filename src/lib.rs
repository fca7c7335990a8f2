//! # dhcrelay
//!
//! A DHCP/BOOTP relay agent library (RFC 1542, RFC 2131) with relay agent
//! information (RFC 3046), DHCPv6 unicast relay (RFC 8415) and generic UDP
//! broadcast forwarding.
//!
//! ## Features
//!
//! - Client requests fanned out to every helper address of the ingress interface
//! - Server replies delivered by broadcast or unicast with a neighbour entry
//! - Option 82 Circuit-ID/Remote-ID insertion, replacement and reply validation
//! - Reference-counted server registries shared by all interfaces
//! - Per-interface packet counters exported on a timer
//! - Live reconfiguration by diffing the running registry against a new file
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use dhcrelay::{RelayConfig, RelayContext, RelayServer};
//!
//! #[tokio::main]
//! async fn main() -> dhcrelay::Result<()> {
//!     let config = RelayConfig::load_or_create("dhcrelay.json")?;
//!     let (context, _) = RelayContext::from_config(&config).await;
//!     let server = RelayServer::new(Arc::new(context))?;
//!     server.sync_ports(&config).await?;
//!     server.run().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`RelayConfig`] - Features, capacities and per-interface servers
//! - [`RelayContext`] - Registries, interface table and the relay decisions
//! - [`Registry`] - Per-interface server lists over a refcounted [`ServerStore`]
//! - [`DhcpPacket`] - DHCP header and option access
//! - [`option82`] - Relay agent information codec
//! - [`StatsSync`] - Periodic counter export

pub mod config;
pub mod dhcpv6;
pub mod error;
pub mod interfaces;
pub mod option82;
pub mod options;
pub mod packet;
pub mod reconcile;
pub mod registry;
pub mod relay;
#[cfg(target_os = "linux")]
pub mod server;
pub mod stats;
pub mod store;

pub use config::{Features, InterfaceConfig, RelayConfig};
pub use error::{DropReason, Error, Result};
pub use interfaces::{InterfaceInfo, InterfaceTable, MacAddress};
pub use option82::{Policy, RemoteIdKind};
pub use options::MessageType;
pub use packet::DhcpPacket;
pub use reconcile::ReconcileReport;
pub use registry::Registry;
pub use relay::{Datagram, Disposition, Outbound, RelayContext, Transport};
#[cfg(target_os = "linux")]
pub use server::{RelayServer, UdpTransport};
pub use stats::{LogSink, StatsSink, StatsSync, StatsTable};
pub use store::{ServerKey, ServerStore};
