//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use bgpio::packet::nlri::bgpls::{BgpLsNlri, BgpLsNlriType, BgpLsTlv};
use bgpio::packet::nlri::evpn::{Esi, EvpnNlri, EvpnRoute};
use bgpio::packet::nlri::mup::{MupNlri, MupRoute, MUP_ARCH_3GPP_5G};
use bgpio::packet::nlri::mvpn::{MvpnNlri, MvpnRoute};
use bgpio::packet::nlri::{
    InetNlri, LabeledNlri, Nlri, SrPolicyNlri, VpnNlri,
};
use bgpio_utils::bgp::{LabelStack, PathId, RouteDistinguisher};
use bgpio_utils::ip::AddressFamily;
use bgpio_utils::mac_addr::MacAddr;
use bytes::{Bytes, BytesMut};

fn roundtrip(nlri: Nlri, addpath: bool) {
    let afi_safi = nlri.afi_safi();
    let mut buf = BytesMut::new();
    nlri.encode(&mut buf, addpath);

    let mut data = Bytes::copy_from_slice(&buf);
    let decoded = Nlri::decode(afi_safi, &mut data, addpath).unwrap();
    assert_eq!(nlri, decoded);
    assert_eq!(data.len(), 0, "trailing bytes after decode");
}

#[test]
fn test_inet_roundtrip() {
    roundtrip(
        Nlri::Unicast(InetNlri {
            prefix: "203.0.113.0/24".parse().unwrap(),
            path_id: None,
        }),
        false,
    );
    roundtrip(
        Nlri::Unicast(InetNlri {
            prefix: "2001:db8:cafe::/48".parse().unwrap(),
            path_id: None,
        }),
        false,
    );
}

#[test]
fn test_inet_addpath_roundtrip() {
    roundtrip(
        Nlri::Unicast(InetNlri {
            prefix: "203.0.113.0/24".parse().unwrap(),
            path_id: Some(PathId(7)),
        }),
        true,
    );
}

#[test]
fn test_labeled_roundtrip() {
    roundtrip(
        Nlri::LabeledUnicast(LabeledNlri {
            prefix: "198.51.100.0/24".parse().unwrap(),
            labels: LabelStack::from_values(&[100]),
            path_id: None,
        }),
        false,
    );
    // Multiple labels: only the last one carries the bottom-of-stack bit.
    roundtrip(
        Nlri::LabeledUnicast(LabeledNlri {
            prefix: "2001:db8::/64".parse().unwrap(),
            labels: LabelStack::from_values(&[100, 200]),
            path_id: None,
        }),
        false,
    );
}

#[test]
fn test_labeled_withdraw_label() {
    let nlri = Nlri::LabeledUnicast(LabeledNlri {
        prefix: "198.51.100.0/24".parse().unwrap(),
        labels: LabelStack::withdraw(),
        path_id: None,
    });
    let mut buf = BytesMut::new();
    nlri.encode(&mut buf, false);
    // 24 label bits + 24 prefix bits, then the synthetic withdrawal label.
    assert_eq!(&buf[0..4], &[48, 0x80, 0x00, 0x00]);
    roundtrip(nlri, false);
}

#[test]
fn test_vpn_roundtrip() {
    roundtrip(
        Nlri::Vpn(VpnNlri {
            rd: RouteDistinguisher::from_as2(65000, 1),
            prefix: "10.1.0.0/16".parse().unwrap(),
            labels: LabelStack::from_values(&[3012]),
            path_id: None,
        }),
        false,
    );
    roundtrip(
        Nlri::Vpn(VpnNlri {
            rd: RouteDistinguisher::from_as4(4200000000, 12),
            prefix: "2001:db8::/64".parse().unwrap(),
            labels: LabelStack::from_values(&[3012]),
            path_id: Some(PathId(2)),
        }),
        true,
    );
}

#[test]
fn test_evpn_roundtrip() {
    let rd = RouteDistinguisher::from_ipv4("192.0.2.1".parse().unwrap(), 5);
    roundtrip(
        Nlri::Evpn(EvpnNlri {
            route: EvpnRoute::MacAdvertisement {
                rd,
                esi: Esi([0; 10]),
                eth_tag: 100,
                mac: MacAddr::from([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]),
                ip: Some("192.0.2.10".parse().unwrap()),
                label1: 1000 << 4,
                label2: None,
            },
        }),
        false,
    );
    roundtrip(
        Nlri::Evpn(EvpnNlri {
            route: EvpnRoute::InclusiveMulticast {
                rd,
                eth_tag: 0,
                originator: "192.0.2.1".parse().unwrap(),
            },
        }),
        false,
    );
    roundtrip(
        Nlri::Evpn(EvpnNlri {
            route: EvpnRoute::IpPrefix {
                rd,
                esi: Esi([1; 10]),
                eth_tag: 0,
                prefix: "10.0.0.0/24".parse().unwrap(),
                gateway: "10.0.0.1".parse().unwrap(),
                label: 500 << 4,
            },
        }),
        false,
    );
}

#[test]
fn test_mvpn_roundtrip() {
    let rd = RouteDistinguisher::from_as2(65000, 7);
    roundtrip(
        Nlri::McastVpn(MvpnNlri {
            af: AddressFamily::Ipv4,
            route: MvpnRoute::IntraAsIPmsi {
                rd,
                originator: "192.0.2.1".parse().unwrap(),
            },
        }),
        false,
    );
    roundtrip(
        Nlri::McastVpn(MvpnNlri {
            af: AddressFamily::Ipv4,
            route: MvpnRoute::SourceTreeJoin {
                rd,
                source_as: 65000,
                source: "192.0.2.10".parse().unwrap(),
                group: "232.1.1.1".parse().unwrap(),
            },
        }),
        false,
    );
}

#[test]
fn test_mup_roundtrip() {
    let rd = RouteDistinguisher::from_as2(65000, 100);
    roundtrip(
        Nlri::Mup(MupNlri {
            af: AddressFamily::Ipv4,
            arch_type: MUP_ARCH_3GPP_5G,
            route: MupRoute::InterworkSegmentDiscovery {
                rd,
                prefix: "10.0.0.0/24".parse().unwrap(),
            },
        }),
        false,
    );
    roundtrip(
        Nlri::Mup(MupNlri {
            af: AddressFamily::Ipv4,
            arch_type: MUP_ARCH_3GPP_5G,
            route: MupRoute::Type1SessionTransformed {
                rd,
                prefix: "10.0.1.0/28".parse().unwrap(),
                teid: 12345,
                qfi: 9,
                endpoint: "192.0.2.1".parse().unwrap(),
            },
        }),
        false,
    );
}

#[test]
fn test_sr_policy_roundtrip() {
    roundtrip(
        Nlri::SrPolicy(SrPolicyNlri {
            distinguisher: 1,
            color: 100,
            endpoint: "192.0.2.1".parse().unwrap(),
        }),
        false,
    );
    roundtrip(
        Nlri::SrPolicy(SrPolicyNlri {
            distinguisher: 2,
            color: 200,
            endpoint: "2001:db8::1".parse().unwrap(),
        }),
        false,
    );
}

#[test]
fn test_bgpls_roundtrip() {
    let nlri = Nlri::BgpLs(BgpLsNlri {
        nlri_type: BgpLsNlriType::Node,
        protocol_id: 2,
        identifier: 0,
        descriptors: vec![BgpLsTlv {
            tlv_type: BgpLsTlv::LOCAL_NODE_DESCRIPTORS,
            // AS + IGP router-id sub-TLVs, preserved verbatim.
            value: vec![
                0x02, 0x00, 0x00, 0x04, 0x00, 0x00, 0xfd, 0xe8, 0x02, 0x03,
                0x00, 0x04, 0x0a, 0x00, 0x00, 0x01,
            ],
        }],
        rd: None,
    });
    roundtrip(nlri, false);

    let nlri = Nlri::BgpLs(BgpLsNlri {
        nlri_type: BgpLsNlriType::Ipv4Prefix,
        protocol_id: 2,
        identifier: 1,
        descriptors: vec![BgpLsTlv {
            tlv_type: 265,
            value: vec![0x18, 0x0a, 0x00, 0x00],
        }],
        rd: Some(RouteDistinguisher::from_as2(65000, 1)),
    });
    roundtrip(nlri, false);
}

// The RIB key identifies a route by family, RD, labels, prefix and path-id.
#[test]
fn test_nlri_key() {
    let nlri1 = Nlri::Unicast(InetNlri {
        prefix: "203.0.113.0/24".parse().unwrap(),
        path_id: None,
    });
    let nlri2 = Nlri::Unicast(InetNlri {
        prefix: "203.0.113.0/24".parse().unwrap(),
        path_id: Some(PathId(1)),
    });
    let nlri3 = Nlri::Multicast(InetNlri {
        prefix: "203.0.113.0/24".parse().unwrap(),
        path_id: None,
    });

    assert_eq!(nlri1.key(), nlri1.key());
    assert_ne!(nlri1.key(), nlri2.key());
    assert_ne!(nlri1.key(), nlri3.key());
}
