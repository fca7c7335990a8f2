//! Applying a configuration to a running relay.
//!
//! The registries themselves are the old configuration: every interface in
//! the new file gets its server list diffed against what the registry
//! holds, and registry nodes for interfaces that left the file are torn
//! down. Bad entries are logged and skipped so one typo never takes the
//! rest of the file down with it.

use std::collections::HashSet;

use tracing::{info, warn};

use crate::config::{RelayConfig, validate_server_key};
use crate::interfaces::InterfaceTable;
use crate::registry::Registry;
use crate::relay::RelayContext;
use crate::store::ServerKey;

/// What a call to [`RelayContext::apply_config`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<(String, ServerKey)>,
    pub removed: Vec<(String, ServerKey)>,
    /// Entries skipped because they failed validation, with the reason.
    pub skipped: Vec<(String, String)>,
    /// Interfaces whose server list could not be applied at all.
    pub failed_interfaces: Vec<String>,
    pub removed_interfaces: Vec<String>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.skipped.is_empty()
            && self.failed_interfaces.is_empty()
            && self.removed_interfaces.is_empty()
    }
}

impl RelayContext {
    /// Builds a context sized and populated from `config`.
    pub async fn from_config(config: &RelayConfig) -> (Self, ReconcileReport) {
        let context = Self::new(
            config.ipv4_server_capacity,
            config.ipv6_server_capacity,
            config.features,
        );
        let report = context.apply_config(config).await;
        (context, report)
    }

    /// Brings features, interfaces, servers and gateways in line with
    /// `config`.
    ///
    /// Capacities are fixed when the context is built; a changed capacity
    /// takes effect on restart.
    pub async fn apply_config(&self, config: &RelayConfig) -> ReconcileReport {
        self.set_features(config.features).await;

        let table = InterfaceTable::new(config.interfaces.iter().map(|interface| interface.info()));
        self.set_interfaces(table).await;

        let mut report = ReconcileReport::default();
        let wanted: HashSet<&str> = config
            .interfaces
            .iter()
            .map(|interface| interface.name.as_str())
            .collect();

        {
            let mut registry = self.ipv4().lock().await;
            if registry.capacity() != config.ipv4_server_capacity {
                warn!(
                    "IPv4 server capacity change from {} to {} needs a restart",
                    registry.capacity(),
                    config.ipv4_server_capacity
                );
            }

            for interface in &config.interfaces {
                let desired = accepted(&interface.name, interface.ipv4_servers(), &mut report, |_| true);
                apply_servers(&mut registry, &interface.name, &desired, &mut report);

                let gateway = match interface.bootp_gateway {
                    Some(gateway) if !interface.addresses.contains(&gateway) => {
                        warn!(
                            "Ignoring BOOTP gateway {} on {}: not an interface address",
                            gateway, interface.name
                        );
                        report.skipped.push((
                            interface.name.clone(),
                            format!("bootp gateway {} is not an interface address", gateway),
                        ));
                        None
                    }
                    gateway => gateway,
                };
                registry.set_bootp_gateway(&interface.name, gateway);
            }

            remove_stale(&mut registry, &wanted, &mut report);
        }

        {
            let mut registry = self.ipv6().lock().await;
            if registry.capacity() != config.ipv6_server_capacity {
                warn!(
                    "IPv6 server capacity change from {} to {} needs a restart",
                    registry.capacity(),
                    config.ipv6_server_capacity
                );
            }

            for interface in &config.interfaces {
                let desired = accepted(&interface.name, interface.ipv6_servers(), &mut report, |key| {
                    key.egress
                        .as_deref()
                        .is_none_or(|egress| wanted.contains(egress))
                });
                apply_servers(&mut registry, &interface.name, &desired, &mut report);
            }

            remove_stale(&mut registry, &wanted, &mut report);
        }

        if !report.is_empty() {
            info!(
                "Configuration applied: {} added, {} removed, {} skipped, {} interfaces removed",
                report.added.len(),
                report.removed.len(),
                report.skipped.len(),
                report.removed_interfaces.len()
            );
        }
        report
    }
}

/// Keeps the keys that pass validation and `extra`, recording the rest.
fn accepted(
    interface: &str,
    keys: Vec<ServerKey>,
    report: &mut ReconcileReport,
    extra: impl Fn(&ServerKey) -> bool,
) -> Vec<ServerKey> {
    keys.into_iter()
        .filter(|key| {
            let reason = match validate_server_key(key) {
                Err(error) => Some(error.to_string()),
                Ok(()) if !extra(key) => Some(format!(
                    "egress interface {} is not configured",
                    key.egress.as_deref().unwrap_or_default()
                )),
                Ok(()) => None,
            };
            match reason {
                Some(reason) => {
                    warn!("Skipping server {} on {}: {}", key, interface, reason);
                    report.skipped.push((interface.to_string(), reason));
                    false
                }
                None => true,
            }
        })
        .collect()
}

fn apply_servers(registry: &mut Registry, interface: &str, desired: &[ServerKey], report: &mut ReconcileReport) {
    match registry.apply_server_diff(interface, desired) {
        Ok(diff) => {
            for key in diff.added {
                info!("Server {} added on {}", key, interface);
                report.added.push((interface.to_string(), key));
            }
            for key in diff.removed {
                info!("Server {} removed from {}", key, interface);
                report.removed.push((interface.to_string(), key));
            }
        }
        Err(error) => {
            warn!("Server list for {} left unchanged: {}", interface, error);
            report.failed_interfaces.push(interface.to_string());
        }
    }
}

fn remove_stale(registry: &mut Registry, wanted: &HashSet<&str>, report: &mut ReconcileReport) {
    let stale: Vec<String> = registry
        .nodes()
        .map(|node| node.name().to_string())
        .filter(|name| !wanted.contains(name.as_str()))
        .collect();

    for name in stale {
        for key in registry.remove_interface(&name) {
            report.removed.push((name.clone(), key));
        }
        if !report.removed_interfaces.contains(&name) {
            report.removed_interfaces.push(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Dhcpv6Server, InterfaceConfig, UdpForward, UdpPort};
    use crate::interfaces::MacAddress;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn interface(name: &str, index: u32, helpers: &[[u8; 4]]) -> InterfaceConfig {
        InterfaceConfig {
            name: name.to_string(),
            index,
            mac: MacAddress([0x02, 0, 0, 0, 0, index as u8]),
            addresses: vec![Ipv4Addr::new(192, 168, index as u8, 1)],
            ipv6_addresses: vec![],
            helper_addresses: helpers.iter().map(|octets| Ipv4Addr::from(*octets)).collect(),
            bootp_gateway: None,
            udp_forward: vec![],
            dhcpv6_servers: vec![],
        }
    }

    fn config(interfaces: Vec<InterfaceConfig>) -> RelayConfig {
        RelayConfig {
            interfaces,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_from_config_populates_registries() {
        let mut eth1 = interface("eth1", 1, &[[10, 0, 0, 1], [10, 0, 0, 2]]);
        eth1.udp_forward.push(UdpForward {
            address: Ipv4Addr::new(10, 0, 0, 53),
            port: UdpPort(53),
        });
        eth1.dhcpv6_servers.push(Dhcpv6Server {
            address: "2001:db8::547".parse().unwrap(),
            egress: None,
        });
        eth1.bootp_gateway = Some(Ipv4Addr::new(192, 168, 1, 1));

        let (context, report) = RelayContext::from_config(&config(vec![eth1])).await;
        assert_eq!(report.added.len(), 4);
        assert!(report.skipped.is_empty());

        let ipv4 = context.ipv4().lock().await;
        assert_eq!(ipv4.node("eth1").unwrap().servers().len(), 3);
        assert_eq!(ipv4.bootp_gateway("eth1"), Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert!(context.interface_by_name("eth1").await.is_some());
        drop(ipv4);

        let ipv6 = context.ipv6().lock().await;
        assert!(ipv6.contains(
            "eth1",
            &ServerKey::new("2001:db8::547".parse::<Ipv6Addr>().unwrap(), 547)
        ));
    }

    #[tokio::test]
    async fn test_apply_config_diffs_servers() {
        let (context, _) =
            RelayContext::from_config(&config(vec![interface("eth1", 1, &[[10, 0, 0, 1], [10, 0, 0, 2]])])).await;

        let report = context
            .apply_config(&config(vec![interface("eth1", 1, &[[10, 0, 0, 2], [10, 0, 0, 3]])]))
            .await;

        assert_eq!(
            report.added,
            vec![("eth1".to_string(), ServerKey::new(Ipv4Addr::new(10, 0, 0, 3), 67))]
        );
        assert_eq!(
            report.removed,
            vec![("eth1".to_string(), ServerKey::new(Ipv4Addr::new(10, 0, 0, 1), 67))]
        );
        assert_eq!(
            context
                .ipv4()
                .lock()
                .await
                .ref_count(&ServerKey::new(Ipv4Addr::new(10, 0, 0, 1), 67)),
            0
        );
    }

    #[tokio::test]
    async fn test_apply_config_removes_vanished_interfaces() {
        let (context, _) = RelayContext::from_config(&config(vec![
            interface("eth1", 1, &[[10, 0, 0, 1]]),
            interface("eth2", 2, &[[10, 0, 0, 1]]),
        ]))
        .await;
        assert_eq!(
            context
                .ipv4()
                .lock()
                .await
                .ref_count(&ServerKey::new(Ipv4Addr::new(10, 0, 0, 1), 67)),
            2
        );

        let report = context
            .apply_config(&config(vec![interface("eth1", 1, &[[10, 0, 0, 1]])]))
            .await;
        assert_eq!(report.removed_interfaces, vec!["eth2".to_string()]);

        let registry = context.ipv4().lock().await;
        assert!(registry.node("eth2").is_none());
        assert_eq!(registry.ref_count(&ServerKey::new(Ipv4Addr::new(10, 0, 0, 1), 67)), 1);
        assert!(context.snapshot_counters("eth2").is_none());
    }

    #[tokio::test]
    async fn test_invalid_entries_skipped() {
        let mut eth1 = interface("eth1", 1, &[[10, 0, 0, 1], [0, 0, 0, 0], [224, 0, 0, 1]]);
        eth1.bootp_gateway = Some(Ipv4Addr::new(172, 16, 0, 1));
        eth1.dhcpv6_servers.push(Dhcpv6Server {
            address: "fe80::1".parse().unwrap(),
            egress: Some("eth9".to_string()),
        });

        let (context, report) = RelayContext::from_config(&config(vec![eth1])).await;
        assert_eq!(report.added.len(), 1);
        assert_eq!(report.skipped.len(), 4);

        let registry = context.ipv4().lock().await;
        assert_eq!(registry.node("eth1").unwrap().servers().len(), 1);
        assert_eq!(registry.bootp_gateway("eth1"), None);
        assert!(context.ipv6().lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_over_capacity_leaves_interface_unchanged() {
        let mut small = config(vec![interface("eth1", 1, &[[10, 0, 0, 1]])]);
        small.ipv4_server_capacity = 2;
        let (context, _) = RelayContext::from_config(&small).await;

        let mut large = config(vec![interface("eth1", 1, &[[10, 0, 0, 2], [10, 0, 0, 3], [10, 0, 0, 4]])]);
        large.ipv4_server_capacity = 2;
        let report = context.apply_config(&large).await;

        assert_eq!(report.failed_interfaces, vec!["eth1".to_string()]);
        assert!(
            context
                .ipv4()
                .lock()
                .await
                .contains("eth1", &ServerKey::new(Ipv4Addr::new(10, 0, 0, 1), 67))
        );
    }
}
