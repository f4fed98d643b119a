//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use bgpio::packet::nlri::flowspec::{FlowRule, FlowspecNlri, NumericOp};
use bgpio::packet::nlri::Nlri;
use bgpio_utils::bgp::AfiSafi;
use bgpio_utils::ip::AddressFamily;
use bytes::{Bytes, BytesMut};

use super::assert_eq_hex;

fn encode_nlri(nlri: &Nlri) -> Vec<u8> {
    let mut buf = BytesMut::new();
    nlri.encode(&mut buf, false);
    buf.to_vec()
}

fn decode_nlri(afi_safi: AfiSafi, data: &[u8]) -> Nlri {
    let mut buf = Bytes::copy_from_slice(data);
    Nlri::decode(afi_safi, &mut buf, false).unwrap()
}

// match { destination 10.0.0.2/32; source 10.0.0.1/32; protocol [ tcp ];
// destination-port =3128 }
#[test]
fn test_flowspec_encode1() {
    let nlri = Nlri::Flowspec(FlowspecNlri::new(
        AddressFamily::Ipv4,
        None,
        vec![
            FlowRule::DestinationPrefix {
                prefix: "10.0.0.2/32".parse().unwrap(),
                offset: 0,
            },
            FlowRule::SourcePrefix {
                prefix: "10.0.0.1/32".parse().unwrap(),
                offset: 0,
            },
            FlowRule::Protocol(vec![NumericOp::eq(6)]),
            FlowRule::DestinationPort(vec![NumericOp::eq(3128)]),
        ],
    ));

    let expected: &[u8] = &[
        0x13, 0x01, 0x20, 0x0a, 0x00, 0x00, 0x02, 0x02, 0x20, 0x0a, 0x00,
        0x00, 0x01, 0x03, 0x81, 0x06, 0x05, 0x91, 0x0c, 0x38,
    ];
    assert_eq_hex(expected, &encode_nlri(&nlri));
}

#[test]
fn test_flowspec_decode1() {
    let data: &[u8] = &[
        0x13, 0x01, 0x20, 0x0a, 0x00, 0x00, 0x02, 0x02, 0x20, 0x0a, 0x00,
        0x00, 0x01, 0x03, 0x81, 0x06, 0x05, 0x91, 0x0c, 0x38,
    ];
    let nlri = decode_nlri(AfiSafi::Ipv4Flowspec, data);
    assert_eq_hex(data, &encode_nlri(&nlri));

    let Nlri::Flowspec(flowspec) = &nlri else {
        panic!("unexpected NLRI variant");
    };
    assert_eq!(flowspec.rules.len(), 4);
    assert_eq!(
        flowspec.rules[3],
        FlowRule::DestinationPort(vec![NumericOp::eq(3128)])
    );
}

// Component ordering is strict: a source prefix after a destination port
// must be refused.
#[test]
fn test_flowspec_bad_ordering() {
    let data: &[u8] = &[
        0x0a, 0x05, 0x91, 0x0c, 0x38, 0x02, 0x20, 0x0a, 0x00, 0x00, 0x01,
    ];
    let mut buf = Bytes::copy_from_slice(data);
    assert!(Nlri::decode(AfiSafi::Ipv4Flowspec, &mut buf, false).is_err());
}

// An NLRI of 239 bytes keeps the single-byte length; 240 bytes switches to
// the two-byte 0xFnnn form.
#[test]
fn test_flowspec_length_encoding() {
    // 119 single-byte operator values: 1 type byte + 238 = 239 bytes.
    let ops: Vec<_> = (0..119u64).map(NumericOp::eq).collect();
    let nlri = Nlri::Flowspec(FlowspecNlri::new(
        AddressFamily::Ipv4,
        None,
        vec![FlowRule::DestinationPort(ops)],
    ));
    let encoded = encode_nlri(&nlri);
    assert_eq!(encoded[0], 239);
    assert_eq!(encoded.len(), 240);

    // Promote one value to two bytes: the body grows to 240 and the length
    // moves to the extended form.
    let mut ops: Vec<_> = (0..118u64).map(NumericOp::eq).collect();
    ops.push(NumericOp::eq(3128));
    let nlri = Nlri::Flowspec(FlowspecNlri::new(
        AddressFamily::Ipv4,
        None,
        vec![FlowRule::DestinationPort(ops)],
    ));
    let encoded = encode_nlri(&nlri);
    assert_eq!(&encoded[0..2], &[0xf0, 0xf0]);
    assert_eq!(encoded.len(), 242);

    // Both forms round-trip.
    let decoded = decode_nlri(AfiSafi::Ipv4Flowspec, &encoded);
    assert_eq!(nlri, decoded);
}

// IPv6 FlowSpec rules carry a pattern offset.
#[test]
fn test_flowspec_ipv6_roundtrip() {
    let nlri = Nlri::Flowspec(FlowspecNlri::new(
        AddressFamily::Ipv6,
        None,
        vec![
            FlowRule::DestinationPrefix {
                prefix: "2001:db8::/64".parse().unwrap(),
                offset: 0,
            },
            FlowRule::Protocol(vec![NumericOp::eq(58)]),
        ],
    ));
    let encoded = encode_nlri(&nlri);
    let decoded = decode_nlri(AfiSafi::Ipv6Flowspec, &encoded);
    assert_eq!(nlri, decoded);
}
