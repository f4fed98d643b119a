//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::sync::LazyLock as Lazy;

use bgpio::packet::attribute::{AsPath, Attrs, CommList};
use bgpio::packet::consts::Origin;
use bgpio::packet::message::{Message, MpUnreachNlri, UpdateMsg};
use bgpio::packet::nlri::{InetNlri, Nlri};
use bgpio_utils::bgp::{AfiSafi, Comm};

use super::{test_decode_msg, test_encode_msg};

// UPDATE with a full base attribute set. The attribute block must start
// with the ORIGIN attribute encoded as `40 01 01 00`.
static UPDATE1: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    let mut attrs = Attrs {
        base: Default::default(),
        comm: Some(CommList(BTreeSet::from([
            Comm((65000u32 << 16) | 1),
            Comm((65000u32 << 16) | 2),
        ]))),
        ..Default::default()
    };
    attrs.base.origin = Origin::Igp;
    attrs.base.as_path = AsPath::from_sequence([65001, 65002]);
    attrs.base.nexthop = Some("192.0.2.1".parse().unwrap());
    attrs.base.med = Some(100);
    attrs.base.local_pref = Some(200);

    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x4e, 0x02,
            // Withdrawn routes length.
            0x00, 0x00,
            // Path attributes length.
            0x00, 0x33,
            // ORIGIN.
            0x40, 0x01, 0x01, 0x00,
            // AS_PATH [65001, 65002].
            0x50, 0x02, 0x00, 0x0a, 0x02, 0x02, 0x00, 0x00, 0xfd, 0xe9, 0x00,
            0x00, 0xfd, 0xea,
            // NEXT_HOP 192.0.2.1.
            0x40, 0x03, 0x04, 0xc0, 0x00, 0x02, 0x01,
            // MULTI_EXIT_DISC 100.
            0x80, 0x04, 0x04, 0x00, 0x00, 0x00, 0x64,
            // LOCAL_PREF 200.
            0x40, 0x05, 0x04, 0x00, 0x00, 0x00, 0xc8,
            // COMMUNITIES [65000:1, 65000:2].
            0xd0, 0x08, 0x00, 0x08, 0xfd, 0xe8, 0x00, 0x01, 0xfd, 0xe8, 0x00,
            0x02,
            // NLRI 203.0.113.0/24.
            0x18, 0xcb, 0x00, 0x71,
        ],
        Message::Update(Box::new(UpdateMsg {
            reach: vec![Nlri::Unicast(InetNlri {
                prefix: "203.0.113.0/24".parse().unwrap(),
                path_id: None,
            })],
            unreach: Vec::new(),
            mp_reach: None,
            mp_unreach: None,
            attrs: Some(attrs),
        })),
    )
});

// The IPv4-unicast End-of-RIB marker: an UPDATE with four zero bytes of
// payload.
static UPDATE_EOR1: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x17, 0x02, 0x00, 0x00, 0x00,
            0x00,
        ],
        Message::Update(Box::new(UpdateMsg::eor(AfiSafi::Ipv4Unicast))),
    )
});

// Other-family End-of-RIB markers are an empty MP_UNREACH_NLRI.
static UPDATE_EOR2: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x1e, 0x02, 0x00, 0x00, 0x00,
            0x07, 0x90, 0x0f, 0x00, 0x03, 0x00, 0x02, 0x01,
        ],
        Message::Update(Box::new(UpdateMsg::eor(AfiSafi::Ipv6Unicast))),
    )
});

#[test]
fn test_encode_update1() {
    let (ref bytes, ref msg) = *UPDATE1;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update1() {
    let (ref bytes, ref msg) = *UPDATE1;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_update_eor1() {
    let (ref bytes, ref msg) = *UPDATE_EOR1;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update_eor1() {
    let (ref bytes, ref msg) = *UPDATE_EOR1;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_eor_detection() {
    let (_, ref msg) = *UPDATE_EOR1;
    let Message::Update(msg) = msg else {
        unreachable!();
    };
    assert_eq!(msg.is_eor(), Some(AfiSafi::Ipv4Unicast));

    let (_, ref msg) = *UPDATE_EOR2;
    let Message::Update(msg) = msg else {
        unreachable!();
    };
    assert_eq!(msg.is_eor(), Some(AfiSafi::Ipv6Unicast));
}

#[test]
fn test_encode_update_eor2() {
    let (ref bytes, ref msg) = *UPDATE_EOR2;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update_eor2() {
    let (ref bytes, ref msg) = *UPDATE_EOR2;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_eor_is_not_mp_reach() {
    let msg = UpdateMsg {
        mp_unreach: Some(MpUnreachNlri {
            afi_safi: AfiSafi::Ipv6Unicast,
            nlris: vec![Nlri::Unicast(InetNlri {
                prefix: "2001:db8::/64".parse().unwrap(),
                path_id: None,
            })],
        }),
        ..Default::default()
    };
    assert_eq!(msg.is_eor(), None);
}
