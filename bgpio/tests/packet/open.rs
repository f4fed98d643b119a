//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::LazyLock as Lazy;

use bgpio::packet::consts::{AddPathMode, BGP_VERSION};
use bgpio::packet::message::{AddPathTuple, Capability, Message, OpenMsg};
use bgpio_utils::bgp::AfiSafi;

use super::{test_decode_msg, test_encode_msg};

static OPEN1: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x1d, 0x01, 0x04, 0x00, 0x01,
            0x00, 0xb4, 0x01, 0x01, 0x01, 0x01, 0x00,
        ],
        Message::Open(OpenMsg {
            version: BGP_VERSION,
            my_as: 1,
            holdtime: 180,
            identifier: Ipv4Addr::from_str("1.1.1.1").unwrap(),
            capabilities: [].into(),
        }),
    )
});

static OPEN2: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x25, 0x01, 0x04, 0x00, 0x01,
            0x00, 0xb4, 0x01, 0x01, 0x01, 0x01, 0x08, 0x02, 0x06, 0x01, 0x04,
            0x00, 0x01, 0x00, 0x01,
        ],
        Message::Open(OpenMsg {
            version: BGP_VERSION,
            my_as: 1,
            holdtime: 180,
            identifier: Ipv4Addr::from_str("1.1.1.1").unwrap(),
            capabilities: [Capability::MultiProtocol {
                afi_safi: AfiSafi::Ipv4Unicast,
            }]
            .into(),
        }),
    )
});

static OPEN3: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x3d, 0x01, 0x04, 0x00, 0x01,
            0x00, 0xb4, 0x01, 0x01, 0x01, 0x01, 0x20, 0x02, 0x06, 0x01, 0x04,
            0x00, 0x01, 0x00, 0x01, 0x02, 0x06, 0x01, 0x04, 0x00, 0x02, 0x00,
            0x01, 0x02, 0x02, 0x02, 0x00, 0x02, 0x06, 0x41, 0x04, 0x00, 0x01,
            0x00, 0x0e, 0x02, 0x02, 0x46, 0x00,
        ],
        Message::Open(OpenMsg {
            version: BGP_VERSION,
            my_as: 1,
            holdtime: 180,
            identifier: Ipv4Addr::from_str("1.1.1.1").unwrap(),
            capabilities: [
                Capability::MultiProtocol {
                    afi_safi: AfiSafi::Ipv4Unicast,
                },
                Capability::MultiProtocol {
                    afi_safi: AfiSafi::Ipv6Unicast,
                },
                Capability::RouteRefresh,
                Capability::FourOctetAsNumber { asn: 65550 },
                Capability::EnhancedRouteRefresh,
            ]
            .into(),
        }),
    )
});

// Extended-message, graceful-restart (restart-state flag raised, restart
// time 120s) and add-path capabilities.
static OPEN4: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x3b, 0x01, 0x04, 0x00, 0x01,
            0x00, 0xb4, 0x01, 0x01, 0x01, 0x01, 0x1e, 0x02, 0x06, 0x01, 0x04,
            0x00, 0x01, 0x00, 0x01, 0x02, 0x02, 0x06, 0x00, 0x02, 0x08, 0x40,
            0x06, 0x80, 0x78, 0x00, 0x01, 0x01, 0x00, 0x02, 0x06, 0x45, 0x04,
            0x00, 0x01, 0x01, 0x03,
        ],
        Message::Open(OpenMsg {
            version: BGP_VERSION,
            my_as: 1,
            holdtime: 180,
            identifier: Ipv4Addr::from_str("1.1.1.1").unwrap(),
            capabilities: [
                Capability::MultiProtocol {
                    afi_safi: AfiSafi::Ipv4Unicast,
                },
                Capability::ExtendedMessage,
                Capability::GracefulRestart {
                    flags: 0x08,
                    restart_time: 120,
                    families: vec![(AfiSafi::Ipv4Unicast, 0)],
                },
                Capability::AddPath(
                    [AddPathTuple {
                        afi_safi: AfiSafi::Ipv4Unicast,
                        mode: AddPathMode::ReceiveSend,
                    }]
                    .into(),
                ),
            ]
            .into(),
        }),
    )
});

#[test]
fn test_encode_open1() {
    let (ref bytes, ref msg) = *OPEN1;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_open1() {
    let (ref bytes, ref msg) = *OPEN1;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_open2() {
    let (ref bytes, ref msg) = *OPEN2;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_open2() {
    let (ref bytes, ref msg) = *OPEN2;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_open3() {
    let (ref bytes, ref msg) = *OPEN3;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_open3() {
    let (ref bytes, ref msg) = *OPEN3;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_open4() {
    let (ref bytes, ref msg) = *OPEN4;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_open4() {
    let (ref bytes, ref msg) = *OPEN4;
    test_decode_msg(bytes, msg);
}
