//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use bgpio::api::command::{parse, ApiCommand, RibDirection, ShowNeighborMode};
use bgpio::packet::nlri::flowspec::FlowRule;
use bgpio::packet::nlri::Nlri;
use bgpio_utils::bgp::AfiSafi;

#[test]
fn test_parse_announce_route() {
    let cmd = parse(
        "announce route 203.0.113.0/24 next-hop 192.0.2.1 med 100 \
         community [ 65000:1 65000:2 ] as-path [ 65001 65002 ]",
    )
    .unwrap();

    let ApiCommand::AnnounceRoutes { selector, routes } = cmd else {
        panic!("unexpected command");
    };
    assert!(selector.addr.is_none());
    assert_eq!(routes.len(), 1);
    let (nlri, attrs, split) = &routes[0];
    assert_eq!(nlri.to_string(), "203.0.113.0/24");
    assert_eq!(attrs.base.med, Some(100));
    assert_eq!(attrs.comm.as_ref().unwrap().iter().count(), 2);
    assert_eq!(
        attrs.base.as_path.iter().collect::<Vec<_>>(),
        vec![65001, 65002]
    );
    assert!(split.is_none());
}

#[test]
fn test_parse_announce_route_split() {
    let cmd = parse(
        "announce route 10.0.0.0/22 next-hop 10.0.0.1 split /24",
    )
    .unwrap();
    let ApiCommand::AnnounceRoutes { routes, .. } = cmd else {
        panic!("unexpected command");
    };
    assert_eq!(routes[0].2, Some(24));
}

#[test]
fn test_parse_selector() {
    let cmd = parse(
        "neighbor 192.0.2.2 peer-as 65002 withdraw route 203.0.113.0/24",
    )
    .unwrap();
    let ApiCommand::WithdrawRoutes { selector, nlris } = cmd else {
        panic!("unexpected command");
    };
    assert_eq!(selector.addr, Some("192.0.2.2".parse().unwrap()));
    assert_eq!(selector.peer_as, Some(65002));
    assert_eq!(nlris.len(), 1);
}

#[test]
fn test_parse_labeled_route() {
    let cmd = parse(
        "announce route 198.51.100.0/24 next-hop 192.0.2.1 label [ 100 ] \
         rd 65000:1",
    )
    .unwrap();
    let ApiCommand::AnnounceRoutes { routes, .. } = cmd else {
        panic!("unexpected command");
    };
    let Nlri::Vpn(vpn) = &routes[0].0 else {
        panic!("expected a VPN NLRI");
    };
    assert_eq!(vpn.rd.to_string(), "65000:1");
    assert_eq!(vpn.labels.values().collect::<Vec<_>>(), vec![100]);
}

#[test]
fn test_parse_flow() {
    let cmd = parse(
        "announce flow { match { source 10.0.0.1/32; destination \
         10.0.0.2/32; protocol [ tcp ]; destination-port =3128 } then { \
         discard } }",
    )
    .unwrap();
    let ApiCommand::AnnounceRoutes { routes, .. } = cmd else {
        panic!("unexpected command");
    };
    let Nlri::Flowspec(flowspec) = &routes[0].0 else {
        panic!("expected a FlowSpec NLRI");
    };
    // Components ordered by type.
    assert!(matches!(
        flowspec.rules[0],
        FlowRule::DestinationPrefix { .. }
    ));
    assert!(matches!(flowspec.rules[1], FlowRule::SourcePrefix { .. }));
    // The discard action becomes a zero traffic-rate extended community.
    let ext_comm = routes[0].1.ext_comm.as_ref().unwrap();
    assert_eq!(ext_comm.iter().count(), 1);
    assert_eq!(ext_comm.iter().next().unwrap().0[0..2], [0x80, 0x06]);
}

#[test]
fn test_parse_vpls() {
    let cmd = parse(
        "announce vpls rd 10.0.0.1:100 endpoint 100 base 500000 offset 50 \
         size 16 next-hop 192.0.2.1",
    )
    .unwrap();
    let ApiCommand::AnnounceRoutes { routes, .. } = cmd else {
        panic!("unexpected command");
    };
    let Nlri::Vpls(vpls) = &routes[0].0 else {
        panic!("expected a VPLS NLRI");
    };
    assert_eq!(vpls.ve_id, 100);
    assert_eq!(vpls.label_base, 500000);
    assert_eq!(vpls.ve_block_offset, 50);
    assert_eq!(vpls.ve_block_size, 16);
}

#[test]
fn test_parse_eor_and_refresh() {
    let cmd = parse("announce eor ipv6 unicast").unwrap();
    let ApiCommand::AnnounceEor { afi_safi, .. } = cmd else {
        panic!("unexpected command");
    };
    assert_eq!(afi_safi, AfiSafi::Ipv6Unicast);

    let cmd = parse("announce route-refresh ipv4 mpls-vpn").unwrap();
    let ApiCommand::AnnounceRouteRefresh { afi_safi, .. } = cmd else {
        panic!("unexpected command");
    };
    assert_eq!(afi_safi, AfiSafi::Ipv4Vpn);
}

#[test]
fn test_parse_show() {
    let cmd = parse("show neighbor json").unwrap();
    assert!(matches!(
        cmd,
        ApiCommand::ShowNeighbor {
            mode: ShowNeighborMode::Json
        }
    ));

    let cmd = parse("show adj-rib in extensive").unwrap();
    assert!(matches!(
        cmd,
        ApiCommand::ShowAdjRib {
            direction: RibDirection::In,
            extensive: true
        }
    ));
}

#[test]
fn test_parse_teardown() {
    let cmd = parse("neighbor 192.0.2.2 teardown 2").unwrap();
    let ApiCommand::Teardown { selector, code } = cmd else {
        panic!("unexpected command");
    };
    assert_eq!(selector.addr, Some("192.0.2.2".parse().unwrap()));
    assert_eq!(code, 2);
}

#[test]
fn test_parse_errors() {
    // Parse errors never panic; they surface as error strings.
    assert!(parse("announce").is_err());
    assert!(parse("announce route").is_err());
    assert!(parse("announce route 203.0.113.0/24").is_err());
    assert!(parse("bogus command").is_err());
    assert!(parse("announce eor ipv9 unicast").is_err());
}
