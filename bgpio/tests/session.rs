//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use bgpio::config::NeighborCfg;
use bgpio::neighbor::{fsm, Negotiated, Neighbor};
use bgpio::packet::consts::{AddPathMode, BGP_VERSION};
use bgpio::packet::message::{
    AddPathTuple, Capability, NegotiatedCapability, OpenMsg,
};
use bgpio_utils::bgp::AfiSafi;

fn open_msg(
    holdtime: u16,
    capabilities: BTreeSet<Capability>,
) -> OpenMsg {
    OpenMsg {
        version: BGP_VERSION,
        my_as: 65002,
        holdtime,
        identifier: Ipv4Addr::new(2, 2, 2, 2),
        capabilities,
    }
}

// Negotiated families are the intersection of the two advertisements, and
// route-refresh requires both sides.
#[test]
fn test_capability_negotiation() {
    let local: BTreeSet<_> = [
        Capability::MultiProtocol {
            afi_safi: AfiSafi::Ipv4Unicast,
        },
        Capability::MultiProtocol {
            afi_safi: AfiSafi::Ipv6Unicast,
        },
        Capability::FourOctetAsNumber { asn: 65001 },
        Capability::RouteRefresh,
    ]
    .into();
    let remote = open_msg(
        180,
        [
            Capability::MultiProtocol {
                afi_safi: AfiSafi::Ipv4Unicast,
            },
            Capability::FourOctetAsNumber { asn: 65002 },
        ]
        .into(),
    );

    let nego = Negotiated::build(&local, &remote, 180);
    assert_eq!(nego.families, vec![AfiSafi::Ipv4Unicast]);
    assert!(!nego.route_refresh);
    assert!(nego.four_byte_asn);
    assert!(!nego.extended_message);
    assert_eq!(nego.max_msg_len(), 4096);
    assert_eq!(nego.remote_as, 65002);
}

// Hold time is the minimum of the two proposals; zero disables keepalives
// and the hold-down timer.
#[test]
fn test_holdtime_negotiation() {
    let local: BTreeSet<_> = [Capability::MultiProtocol {
        afi_safi: AfiSafi::Ipv4Unicast,
    }]
    .into();

    let nego = Negotiated::build(&local, &open_msg(90, [].into()), 180);
    assert_eq!(nego.holdtime, 90);
    assert_eq!(nego.keepalive, 30);

    let nego = Negotiated::build(&local, &open_msg(0, [].into()), 180);
    assert_eq!(nego.holdtime, 0);
    assert_eq!(nego.keepalive, 0);
}

// A peer that advertises no capabilities at all still gets IPv4 unicast.
#[test]
fn test_no_capabilities_default_family() {
    let local: BTreeSet<_> = [
        Capability::MultiProtocol {
            afi_safi: AfiSafi::Ipv4Unicast,
        },
        Capability::MultiProtocol {
            afi_safi: AfiSafi::Ipv6Unicast,
        },
    ]
    .into();
    let nego = Negotiated::build(&local, &open_msg(180, [].into()), 180);
    assert_eq!(nego.families, vec![AfiSafi::Ipv4Unicast]);
}

// Add-path send and receive are negotiated independently per family.
#[test]
fn test_addpath_asymmetry() {
    let local: BTreeSet<_> = [
        Capability::MultiProtocol {
            afi_safi: AfiSafi::Ipv4Unicast,
        },
        Capability::AddPath(
            [AddPathTuple {
                afi_safi: AfiSafi::Ipv4Unicast,
                mode: AddPathMode::Send,
            }]
            .into(),
        ),
    ]
    .into();
    let remote = open_msg(
        180,
        [
            Capability::MultiProtocol {
                afi_safi: AfiSafi::Ipv4Unicast,
            },
            Capability::AddPath(
                [AddPathTuple {
                    afi_safi: AfiSafi::Ipv4Unicast,
                    mode: AddPathMode::Receive,
                }]
                .into(),
            ),
        ]
        .into(),
    );

    let nego = Negotiated::build(&local, &remote, 180);
    assert!(nego
        .capabilities
        .contains(&NegotiatedCapability::AddPathTx(AfiSafi::Ipv4Unicast)));
    assert!(!nego
        .capabilities
        .contains(&NegotiatedCapability::AddPathRx(AfiSafi::Ipv4Unicast)));
}

// The extended message ceiling applies only when both sides advertised it.
#[test]
fn test_extended_message_negotiation() {
    let local: BTreeSet<_> = [
        Capability::MultiProtocol {
            afi_safi: AfiSafi::Ipv4Unicast,
        },
        Capability::ExtendedMessage,
    ]
    .into();

    let remote = open_msg(
        180,
        [
            Capability::MultiProtocol {
                afi_safi: AfiSafi::Ipv4Unicast,
            },
            Capability::ExtendedMessage,
        ]
        .into(),
    );
    let nego = Negotiated::build(&local, &remote, 180);
    assert!(nego.extended_message);
    assert_eq!(nego.max_msg_len(), 65535);

    let remote = open_msg(
        180,
        [Capability::MultiProtocol {
            afi_safi: AfiSafi::Ipv4Unicast,
        }]
        .into(),
    );
    let nego = Negotiated::build(&local, &remote, 180);
    assert!(!nego.extended_message);
}

// The remote graceful-restart state is recorded when both sides advertise
// the capability.
#[test]
fn test_graceful_restart_negotiation() {
    let local: BTreeSet<_> = [
        Capability::MultiProtocol {
            afi_safi: AfiSafi::Ipv4Unicast,
        },
        Capability::GracefulRestart {
            flags: 0,
            restart_time: 120,
            families: vec![(AfiSafi::Ipv4Unicast, 0)],
        },
    ]
    .into();
    let remote = open_msg(
        180,
        [
            Capability::MultiProtocol {
                afi_safi: AfiSafi::Ipv4Unicast,
            },
            Capability::GracefulRestart {
                flags: 0x08,
                restart_time: 90,
                families: vec![(AfiSafi::Ipv4Unicast, 0x80)],
            },
        ]
        .into(),
    );

    let nego = Negotiated::build(&local, &remote, 180);
    let gr = nego.graceful_restart.unwrap();
    assert_eq!(gr.flags, 0x08);
    assert_eq!(gr.restart_time, 90);
    assert_eq!(gr.families, vec![(AfiSafi::Ipv4Unicast, 0x80)]);
}

// Collision resolution (RFC 4271 section 6.8), checked in both router-id
// directions.
#[test]
fn test_collision_resolution() {
    let mut cfg = NeighborCfg::default();
    cfg.peer_as = 65002;
    let mut nbr =
        Neighbor::new("192.0.2.2".parse().unwrap(), cfg, 65001);

    let local_id = Ipv4Addr::new(1, 1, 1, 1);

    // An established session always rejects the new connection.
    nbr.state = fsm::State::Established;
    nbr.identifier = Some(Ipv4Addr::new(2, 2, 2, 2));
    assert!(!nbr.collision_keep_incoming(local_id));

    // In OpenConfirm the connection initiated by the higher router-id
    // wins: the remote id is higher, so the incoming connection (initiated
    // by the remote) is preferred.
    nbr.state = fsm::State::OpenConfirm;
    assert!(nbr.collision_keep_incoming(local_id));

    // With the identifiers reversed, the locally initiated connection is
    // kept and the incoming one is refused.
    let local_id = Ipv4Addr::new(3, 3, 3, 3);
    assert!(!nbr.collision_keep_incoming(local_id));

    // Before OpenConfirm, the incoming connection replaces the outgoing
    // attempt.
    nbr.state = fsm::State::OpenSent;
    assert!(nbr.collision_keep_incoming(local_id));
}
