//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use bgpio::packet::nlri::{Nlri, VplsNlri};
use bgpio_utils::bgp::{AfiSafi, RouteDistinguisher};
use bytes::{Bytes, BytesMut};

// rd 10.0.0.1:100 endpoint 100 base 500000 offset 50 size 16
#[test]
fn test_vpls_encode1() {
    let nlri = Nlri::Vpls(VplsNlri {
        rd: RouteDistinguisher::from_ipv4("10.0.0.1".parse().unwrap(), 100),
        ve_id: 100,
        ve_block_offset: 50,
        ve_block_size: 16,
        label_base: 500000,
    });

    let mut buf = BytesMut::new();
    nlri.encode(&mut buf, false);

    // Two length octets plus the 17-octet body.
    assert_eq!(buf.len(), 19);
    assert_eq!(&buf[0..2], &[0x00, 0x11]);

    // Re-parse to an equal object.
    let mut data = Bytes::copy_from_slice(&buf);
    let decoded = Nlri::decode(AfiSafi::L2vpnVpls, &mut data, false).unwrap();
    assert_eq!(nlri, decoded);
}

#[test]
fn test_vpls_bad_length() {
    // A length other than 17 octets is refused.
    let data: &[u8] = &[
        0x00, 0x10, 0x00, 0x00, 0x0a, 0x00, 0x00, 0x01, 0x00, 0x64, 0x00,
        0x64, 0x00, 0x32, 0x00, 0x10, 0x7a, 0x12,
    ];
    let mut buf = Bytes::copy_from_slice(data);
    assert!(Nlri::decode(AfiSafi::L2vpnVpls, &mut buf, false).is_err());
}
