use std::collections::HashMap;
use std::net::Ipv4Addr;

use proptest::prelude::*;

use dhcrelay::option82::{self, RemoteId, ReplyValidation};
use dhcrelay::{DhcpPacket, InterfaceInfo, MacAddress, Policy, Registry, RemoteIdKind, ServerKey};

const DHCP_MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

fn identity() -> InterfaceInfo {
    InterfaceInfo {
        name: "eth1".to_string(),
        index: 3,
        mac: MacAddress([0x02, 0, 0, 0, 0, 0x03]),
        addresses: vec![Ipv4Addr::new(192, 168, 1, 1)],
        ipv6_addresses: vec![],
    }
}

fn request_with_options(giaddr: [u8; 4], options: &[u8]) -> DhcpPacket {
    let mut packet = vec![0u8; 240];
    packet[0] = 1;
    packet[1] = 1;
    packet[2] = 6;
    packet[24..28].copy_from_slice(&giaddr);
    packet[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);
    packet.extend_from_slice(options);
    DhcpPacket::parse(packet).unwrap()
}

fn policy() -> impl Strategy<Value = Policy> {
    prop_oneof![Just(Policy::Keep), Just(Policy::Drop), Just(Policy::Replace)]
}

fn validation() -> impl Strategy<Value = ReplyValidation> {
    prop_oneof![
        Just(ReplyValidation::Off),
        Just(ReplyValidation::RejectCorrupt),
        Just(ReplyValidation::Strict)
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(5000))]

    #[test]
    fn decode_never_panics(body in prop::collection::vec(any::<u8>(), 0..64)) {
        let _ = option82::decode_and_validate(&body, &identity(), RemoteIdKind::Mac);
        let _ = option82::decode_and_validate(&body, &identity(), RemoteIdKind::Ip);
    }

    #[test]
    fn process_request_never_panics(
        options in prop::collection::vec(any::<u8>(), 0..400),
        giaddr in any::<[u8; 4]>(),
        policy in policy(),
    ) {
        let mut packet = request_with_options(giaddr, &options);
        let _ = option82::process_request(&mut packet, policy, 3, RemoteId::Mac([2, 0, 0, 0, 0, 3]));
    }

    #[test]
    fn process_reply_never_panics(
        options in prop::collection::vec(any::<u8>(), 0..400),
        giaddr in any::<[u8; 4]>(),
        validation in validation(),
    ) {
        let mut packet = request_with_options(giaddr, &options);
        let _ = option82::process_reply(&mut packet, &identity(), RemoteIdKind::Mac, validation);
    }

    #[test]
    fn injected_block_validates_and_strips(
        filler in prop::collection::vec(1u8..=254, 0..40),
    ) {
        // One opaque option (code 60) ahead of our block.
        let mut options = vec![53, 1, 1, 60, filler.len() as u8];
        options.extend_from_slice(&filler);
        options.push(255);

        let mut packet = request_with_options([192, 168, 1, 1], &options);
        option82::process_request(&mut packet, Policy::Replace, 3, RemoteId::Mac([2, 0, 0, 0, 0, 3])).unwrap();
        prop_assert!(packet.len() >= 300);

        let block = packet.find_option(82).unwrap();
        prop_assert_eq!(
            option82::decode_and_validate(block, &identity(), RemoteIdKind::Mac),
            option82::Validation::Ok(3)
        );
        prop_assert_eq!(packet.find_option(60), Some(filler.as_slice()));

        option82::process_reply(&mut packet, &identity(), RemoteIdKind::Mac, ReplyValidation::Strict).unwrap();
        prop_assert!(packet.find_option(82).is_none());
        prop_assert_eq!(packet.find_option(60), Some(filler.as_slice()));
    }

    #[test]
    fn refcount_matches_references(
        operations in prop::collection::vec((any::<bool>(), 0usize..3, 0u8..6), 0..200)
    ) {
        let interfaces = ["eth1", "eth2", "eth3"];
        let mut registry = Registry::new(4);
        let mut model: HashMap<&str, Vec<ServerKey>> = HashMap::new();

        for (add, interface, server) in operations {
            let name = interfaces[interface];
            let key = ServerKey::new(Ipv4Addr::new(10, 0, 0, server), 67);
            let held = model.entry(name).or_default();

            if add {
                let accepted = registry.add_reference(name, key.clone()).is_ok();
                let expected = !held.contains(&key) && held.len() < 4;
                prop_assert_eq!(accepted, expected);
                if accepted {
                    held.push(key);
                }
            } else {
                let removed = registry.remove_reference(name, &key);
                prop_assert_eq!(removed, held.contains(&key));
                held.retain(|existing| existing != &key);
            }
        }

        for server in 0u8..6 {
            let key = ServerKey::new(Ipv4Addr::new(10, 0, 0, server), 67);
            let references = model.values().filter(|keys| keys.contains(&key)).count();
            prop_assert_eq!(registry.ref_count(&key) as usize, references);
            prop_assert_eq!(registry.store().get(&key).is_some(), references > 0);
        }

        for name in interfaces {
            let expected = model.get(name).map_or(0, Vec::len);
            prop_assert_eq!(registry.node(name).map_or(0, |node| node.servers().len()), expected);
        }
    }
}
