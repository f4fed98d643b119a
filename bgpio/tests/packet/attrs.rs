//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use bgpio::neighbor::PeerType;
use bgpio::packet::attribute::Attrs;
use bgpio::packet::error::UpdateMessageError;
use bgpio::packet::message::{
    DecodeCxt, MpReachNlri, MpUnreachNlri, NegotiatedCapability,
};
use bytes::Bytes;

fn decode_attrs(
    data: &[u8],
    cxt: &DecodeCxt,
    nlri_present: bool,
) -> Result<Option<Attrs>, UpdateMessageError> {
    let mut buf = Bytes::copy_from_slice(data);
    let mut nexthop: Option<Ipv4Addr> = None;
    let mut mp_unreach: Option<MpUnreachNlri> = None;
    let mut mp_reach: Option<MpReachNlri> = None;
    Attrs::decode(
        &mut buf,
        cxt,
        &mut nexthop,
        nlri_present,
        &mut mp_unreach,
        &mut mp_reach,
    )
}

fn cxt() -> DecodeCxt {
    let mut cxt = DecodeCxt::new(PeerType::Internal, 65001);
    cxt.capabilities = [NegotiatedCapability::FourOctetAsNumber].into();
    cxt
}

// A duplicated ORIGIN attribute resets the session with "Malformed
// Attribute List".
#[test]
fn test_attr_duplicate_origin() {
    let data: &[u8] = &[
        0x40, 0x01, 0x01, 0x00, // ORIGIN IGP
        0x40, 0x01, 0x01, 0x01, // ORIGIN EGP
    ];
    let result = decode_attrs(data, &cxt(), false);
    assert_eq!(result, Err(UpdateMessageError::MalformedAttributeList));
}

// A duplicated COMMUNITIES attribute is discarded, not fatal.
#[test]
fn test_attr_duplicate_communities() {
    let data: &[u8] = &[
        0x40, 0x01, 0x01, 0x00, // ORIGIN IGP
        0x50, 0x02, 0x00, 0x06, 0x02, 0x01, 0x00, 0x00, 0xfd, 0xe9, // AS_PATH
        0x40, 0x05, 0x04, 0x00, 0x00, 0x00, 0x64, // LOCAL_PREF
        0xc0, 0x08, 0x04, 0xfd, 0xe8, 0x00, 0x01, // COMMUNITIES
        0xc0, 0x08, 0x04, 0xfd, 0xe8, 0x00, 0x02, // COMMUNITIES (dup)
    ];
    let attrs = decode_attrs(data, &cxt(), false).unwrap().unwrap();
    let comm = attrs.comm.unwrap();
    let comms: Vec<_> = comm.iter().copied().collect();
    assert_eq!(comms.len(), 1);
    assert_eq!(comms[0].0, (65000 << 16) | 1);
}

// Malformed ORIGIN (bad flags) downgrades the whole UPDATE to a withdrawal
// instead of resetting the session.
#[test]
fn test_attr_bad_flags_treat_as_withdraw() {
    let data: &[u8] = &[
        0x80, 0x01, 0x01, 0x00, // ORIGIN with OPTIONAL flags
        0x50, 0x02, 0x00, 0x06, 0x02, 0x01, 0x00, 0x00, 0xfd, 0xe9, // AS_PATH
        0x40, 0x05, 0x04, 0x00, 0x00, 0x00, 0x64, // LOCAL_PREF
    ];
    let result = decode_attrs(data, &cxt(), false);
    assert_eq!(result, Ok(None));
}

// An unknown well-known (non-optional) attribute is a session reset.
#[test]
fn test_attr_unknown_well_known() {
    let data: &[u8] = &[0x40, 0x63, 0x01, 0x00];
    let result = decode_attrs(data, &cxt(), false);
    assert_eq!(
        result,
        Err(UpdateMessageError::UnrecognizedWellKnownAttribute)
    );
}

// Unknown optional transitive attributes are preserved verbatim with the
// PARTIAL flag raised; unknown optional non-transitive ones are dropped.
#[test]
fn test_attr_unknown_optional() {
    let data: &[u8] = &[
        0x40, 0x01, 0x01, 0x00, // ORIGIN IGP
        0x50, 0x02, 0x00, 0x06, 0x02, 0x01, 0x00, 0x00, 0xfd, 0xe9, // AS_PATH
        0x40, 0x05, 0x04, 0x00, 0x00, 0x00, 0x64, // LOCAL_PREF
        0xc0, 0x63, 0x02, 0xbe, 0xef, // unknown transitive
        0x80, 0x64, 0x02, 0xde, 0xad, // unknown non-transitive
    ];
    let attrs = decode_attrs(data, &cxt(), false).unwrap().unwrap();
    assert_eq!(attrs.unknown.len(), 1);
    let unknown = &attrs.unknown[0];
    assert_eq!(unknown.attr_type, 0x63);
    assert!(unknown
        .flags
        .contains(bgpio::packet::consts::AttrFlags::PARTIAL));
    assert_eq!(unknown.value.as_ref(), &[0xbe, 0xef]);
}

// AS_PATH/AS4_PATH merging on a two-octet session (RFC 6793): the AS4_PATH
// replaces the trailing portion of the AS_PATH.
#[test]
fn test_attr_as4_path_merge() {
    let mut cxt = DecodeCxt::new(PeerType::Internal, 65001);
    cxt.capabilities = Default::default();

    let data: &[u8] = &[
        0x40, 0x01, 0x01, 0x00, // ORIGIN IGP
        // AS_PATH [23456, 65001] (two-octet encoding).
        0x50, 0x02, 0x00, 0x06, 0x02, 0x02, 0x5b, 0xa0, 0xfd, 0xe9,
        0x40, 0x05, 0x04, 0x00, 0x00, 0x00, 0x64, // LOCAL_PREF
        // AS4_PATH [70000] (four-octet encoding).
        0xd0, 0x11, 0x00, 0x06, 0x02, 0x01, 0x00, 0x01, 0x11, 0x70,
    ];
    let attrs = decode_attrs(data, &cxt, false).unwrap().unwrap();
    let merged: Vec<_> = attrs.base.as_path.iter().collect();
    assert_eq!(merged, vec![23456, 70000]);
    assert!(attrs.base.as4_path.is_none());
}
