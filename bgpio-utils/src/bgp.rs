//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

//! BGP definitions shared by the wire codec, the adjacency RIBs and the
//! text/JSON API layer.

use std::net::Ipv4Addr;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

// Configurable (AFI,SAFI) tuples.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum AfiSafi {
    Ipv4Unicast,
    Ipv6Unicast,
    Ipv4Multicast,
    Ipv6Multicast,
    Ipv4LabeledUnicast,
    Ipv6LabeledUnicast,
    Ipv4Vpn,
    Ipv6Vpn,
    Ipv4Flowspec,
    Ipv6Flowspec,
    Ipv4FlowspecVpn,
    Ipv6FlowspecVpn,
    Ipv4McastVpn,
    Ipv6McastVpn,
    Ipv4Mup,
    Ipv6Mup,
    Ipv4SrPolicy,
    Ipv6SrPolicy,
    L2vpnVpls,
    L2vpnEvpn,
    BgpLs,
    BgpLsVpn,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum Origin {
    Igp = 0,
    Egp = 1,
    Incomplete = 2,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Comm(pub u32);

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct ExtComm(pub [u8; 8]);

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Extv6Comm(pub std::net::Ipv6Addr, pub u32);

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LargeComm(pub [u8; 12]);

// BGP Well-known Communities.
//
// IANA registry:
// https://www.iana.org/assignments/bgp-well-known-communities/bgp-well-known-communities.xhtml
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
#[repr(u32)]
pub enum WellKnownCommunities {
    NoExport = 0xFFFFFF01,
    NoAdvertise = 0xFFFFFF02,
    NoExportSubconfed = 0xFFFFFF03,
}

// Route Distinguisher, stored in its 8-byte canonical form.
//
// The first two bytes select the encoding of the remaining six (RFC 4364):
// type 0 is 2-byte ASN + 4-byte assigned number, type 1 is IPv4 address +
// 2-byte assigned number, type 2 is 4-byte ASN + 2-byte assigned number.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct RouteDistinguisher([u8; 8]);

// Stack of MPLS labels as they appear on the wire: one 3-byte entry per
// label, low bit of the last byte flagging the bottom of the stack.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LabelStack(Vec<u32>);

// Path Identifier (RFC 7911).
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct PathId(pub u32);

// ===== impl AfiSafi =====

impl AfiSafi {
    // Returns the IANA AFI number of the tuple.
    pub fn afi(&self) -> u16 {
        match self {
            AfiSafi::Ipv4Unicast
            | AfiSafi::Ipv4Multicast
            | AfiSafi::Ipv4LabeledUnicast
            | AfiSafi::Ipv4Vpn
            | AfiSafi::Ipv4Flowspec
            | AfiSafi::Ipv4FlowspecVpn
            | AfiSafi::Ipv4McastVpn
            | AfiSafi::Ipv4Mup
            | AfiSafi::Ipv4SrPolicy => 1,
            AfiSafi::Ipv6Unicast
            | AfiSafi::Ipv6Multicast
            | AfiSafi::Ipv6LabeledUnicast
            | AfiSafi::Ipv6Vpn
            | AfiSafi::Ipv6Flowspec
            | AfiSafi::Ipv6FlowspecVpn
            | AfiSafi::Ipv6McastVpn
            | AfiSafi::Ipv6Mup
            | AfiSafi::Ipv6SrPolicy => 2,
            AfiSafi::L2vpnVpls | AfiSafi::L2vpnEvpn => 25,
            AfiSafi::BgpLs | AfiSafi::BgpLsVpn => 16388,
        }
    }

    // Returns the IANA SAFI number of the tuple.
    pub fn safi(&self) -> u8 {
        match self {
            AfiSafi::Ipv4Unicast | AfiSafi::Ipv6Unicast => 1,
            AfiSafi::Ipv4Multicast | AfiSafi::Ipv6Multicast => 2,
            AfiSafi::Ipv4LabeledUnicast | AfiSafi::Ipv6LabeledUnicast => 4,
            AfiSafi::Ipv4McastVpn | AfiSafi::Ipv6McastVpn => 5,
            AfiSafi::L2vpnVpls => 65,
            AfiSafi::L2vpnEvpn => 70,
            AfiSafi::BgpLs => 71,
            AfiSafi::BgpLsVpn => 72,
            AfiSafi::Ipv4SrPolicy | AfiSafi::Ipv6SrPolicy => 73,
            AfiSafi::Ipv4Mup | AfiSafi::Ipv6Mup => 85,
            AfiSafi::Ipv4Vpn | AfiSafi::Ipv6Vpn => 128,
            AfiSafi::Ipv4Flowspec | AfiSafi::Ipv6Flowspec => 133,
            AfiSafi::Ipv4FlowspecVpn | AfiSafi::Ipv6FlowspecVpn => 134,
        }
    }

    // Maps an (AFI,SAFI) pair back to the tuple.
    pub fn from_pair(afi: u16, safi: u8) -> Option<AfiSafi> {
        Self::all().into_iter().find(|af| {
            af.afi() == afi && af.safi() == safi
        })
    }

    pub fn all() -> [AfiSafi; 22] {
        [
            AfiSafi::Ipv4Unicast,
            AfiSafi::Ipv6Unicast,
            AfiSafi::Ipv4Multicast,
            AfiSafi::Ipv6Multicast,
            AfiSafi::Ipv4LabeledUnicast,
            AfiSafi::Ipv6LabeledUnicast,
            AfiSafi::Ipv4Vpn,
            AfiSafi::Ipv6Vpn,
            AfiSafi::Ipv4Flowspec,
            AfiSafi::Ipv6Flowspec,
            AfiSafi::Ipv4FlowspecVpn,
            AfiSafi::Ipv6FlowspecVpn,
            AfiSafi::Ipv4McastVpn,
            AfiSafi::Ipv6McastVpn,
            AfiSafi::Ipv4Mup,
            AfiSafi::Ipv6Mup,
            AfiSafi::Ipv4SrPolicy,
            AfiSafi::Ipv6SrPolicy,
            AfiSafi::L2vpnVpls,
            AfiSafi::L2vpnEvpn,
            AfiSafi::BgpLs,
            AfiSafi::BgpLsVpn,
        ]
    }

    // Whether NLRIs of this family may carry a Path Identifier when the
    // ADD-PATH capability is negotiated.
    pub fn addpath_capable(&self) -> bool {
        matches!(
            self,
            AfiSafi::Ipv4Unicast
                | AfiSafi::Ipv6Unicast
                | AfiSafi::Ipv4Multicast
                | AfiSafi::Ipv6Multicast
                | AfiSafi::Ipv4LabeledUnicast
                | AfiSafi::Ipv6LabeledUnicast
                | AfiSafi::Ipv4Vpn
                | AfiSafi::Ipv6Vpn
        )
    }

    // Whether outbound prefixes of this family may be expanded by a
    // `split /N` hint. Only plain unicast allows arbitrary prefix lengths.
    pub fn splittable(&self) -> bool {
        matches!(self, AfiSafi::Ipv4Unicast | AfiSafi::Ipv6Unicast)
    }
}

impl std::fmt::Display for AfiSafi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AfiSafi::Ipv4Unicast => "ipv4 unicast",
            AfiSafi::Ipv6Unicast => "ipv6 unicast",
            AfiSafi::Ipv4Multicast => "ipv4 multicast",
            AfiSafi::Ipv6Multicast => "ipv6 multicast",
            AfiSafi::Ipv4LabeledUnicast => "ipv4 nlri-mpls",
            AfiSafi::Ipv6LabeledUnicast => "ipv6 nlri-mpls",
            AfiSafi::Ipv4Vpn => "ipv4 mpls-vpn",
            AfiSafi::Ipv6Vpn => "ipv6 mpls-vpn",
            AfiSafi::Ipv4Flowspec => "ipv4 flow",
            AfiSafi::Ipv6Flowspec => "ipv6 flow",
            AfiSafi::Ipv4FlowspecVpn => "ipv4 flow-vpn",
            AfiSafi::Ipv6FlowspecVpn => "ipv6 flow-vpn",
            AfiSafi::Ipv4McastVpn => "ipv4 mcast-vpn",
            AfiSafi::Ipv6McastVpn => "ipv6 mcast-vpn",
            AfiSafi::Ipv4Mup => "ipv4 mup",
            AfiSafi::Ipv6Mup => "ipv6 mup",
            AfiSafi::Ipv4SrPolicy => "ipv4 sr-policy",
            AfiSafi::Ipv6SrPolicy => "ipv6 sr-policy",
            AfiSafi::L2vpnVpls => "l2vpn vpls",
            AfiSafi::L2vpnEvpn => "l2vpn evpn",
            AfiSafi::BgpLs => "bgp-ls bgp-ls",
            AfiSafi::BgpLsVpn => "bgp-ls bgp-ls-vpn",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for AfiSafi {
    type Err = ();

    // Parses the `<afi> <safi>` form used by the API grammar.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let afi = words.next().ok_or(())?;
        let safi = words.next().ok_or(())?;
        let afi = match afi {
            "ipv4" => 1,
            "ipv6" => 2,
            "l2vpn" => 25,
            "bgp-ls" | "bgpls" => 16388,
            _ => return Err(()),
        };
        let safi = match safi {
            "unicast" => 1,
            "multicast" => 2,
            "nlri-mpls" => 4,
            "mcast-vpn" => 5,
            "vpls" => 65,
            "evpn" => 70,
            "bgp-ls" => 71,
            "bgp-ls-vpn" => 72,
            "sr-policy" => 73,
            "mup" => 85,
            "mpls-vpn" => 128,
            "flow" => 133,
            "flow-vpn" => 134,
            _ => return Err(()),
        };
        AfiSafi::from_pair(afi, safi).ok_or(())
    }
}

// ===== impl Comm =====

impl std::fmt::Display for Comm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use num_traits::FromPrimitive;
        match WellKnownCommunities::from_u32(self.0) {
            Some(WellKnownCommunities::NoExport) => write!(f, "no-export"),
            Some(WellKnownCommunities::NoAdvertise) => {
                write!(f, "no-advertise")
            }
            Some(WellKnownCommunities::NoExportSubconfed) => {
                write!(f, "no-export-subconfed")
            }
            None => write!(f, "{}:{}", self.0 >> 16, self.0 & 0xFFFF),
        }
    }
}

impl FromStr for Comm {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no-export" => {
                return Ok(Comm(WellKnownCommunities::NoExport as u32));
            }
            "no-advertise" => {
                return Ok(Comm(WellKnownCommunities::NoAdvertise as u32));
            }
            "no-export-subconfed" => {
                return Ok(Comm(WellKnownCommunities::NoExportSubconfed as u32));
            }
            _ => {}
        }

        if let Some((global, local)) = s.split_once(':') {
            let global = global.parse::<u16>().map_err(|_| ())?;
            let local = local.parse::<u16>().map_err(|_| ())?;
            return Ok(Comm(((global as u32) << 16) | local as u32));
        }

        s.parse::<u32>().map(Comm).map_err(|_| ())
    }
}

// ===== impl ExtComm =====

impl ExtComm {
    // Transitive two-octet-AS route-target (type 0x00, subtype 0x02).
    pub fn route_target_as2(asn: u16, local: u32) -> ExtComm {
        let mut value = [0; 8];
        value[1] = 0x02;
        value[2..4].copy_from_slice(&asn.to_be_bytes());
        value[4..8].copy_from_slice(&local.to_be_bytes());
        ExtComm(value)
    }

    // FlowSpec traffic-rate (type 0x80, subtype 0x06). A rate of zero
    // discards matching traffic.
    pub fn traffic_rate(asn: u16, rate: f32) -> ExtComm {
        let mut value = [0x80, 0x06, 0, 0, 0, 0, 0, 0];
        value[2..4].copy_from_slice(&asn.to_be_bytes());
        value[4..8].copy_from_slice(&rate.to_be_bytes());
        ExtComm(value)
    }

    // FlowSpec redirect-to-VRF (type 0x80, subtype 0x08).
    pub fn redirect(asn: u16, local: u32) -> ExtComm {
        let mut value = [0x80, 0x08, 0, 0, 0, 0, 0, 0];
        value[2..4].copy_from_slice(&asn.to_be_bytes());
        value[4..8].copy_from_slice(&local.to_be_bytes());
        ExtComm(value)
    }

    // FlowSpec traffic-marking (type 0x80, subtype 0x09).
    pub fn traffic_marking(dscp: u8) -> ExtComm {
        ExtComm([0x80, 0x09, 0, 0, 0, 0, 0, dscp])
    }
}

impl std::fmt::Display for ExtComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "0x{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            self.0[0],
            self.0[1],
            self.0[2],
            self.0[3],
            self.0[4],
            self.0[5],
            self.0[6],
            self.0[7]
        )
    }
}

impl FromStr for ExtComm {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Raw hexadecimal form.
        if let Some(hex) = s.strip_prefix("0x") {
            if hex.len() != 16 {
                return Err(());
            }
            let raw = u64::from_str_radix(hex, 16).map_err(|_| ())?;
            return Ok(ExtComm(raw.to_be_bytes()));
        }

        // "target:asn:nn" and "origin:asn:nn" forms.
        let (subtype, rest) = match s.split_once(':') {
            Some(("target", rest)) => (0x02, rest),
            Some(("origin", rest)) => (0x03, rest),
            _ => return Err(()),
        };
        let (asn, local) = rest.split_once(':').ok_or(())?;
        let asn = asn.parse::<u16>().map_err(|_| ())?;
        let local = local.parse::<u32>().map_err(|_| ())?;
        let mut value = [0; 8];
        value[1] = subtype;
        value[2..4].copy_from_slice(&asn.to_be_bytes());
        value[4..8].copy_from_slice(&local.to_be_bytes());
        Ok(ExtComm(value))
    }
}

// ===== impl LargeComm =====

impl std::fmt::Display for LargeComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            u32::from_be_bytes(self.0[0..4].try_into().unwrap()),
            u32::from_be_bytes(self.0[4..8].try_into().unwrap()),
            u32::from_be_bytes(self.0[8..12].try_into().unwrap()),
        )
    }
}

impl FromStr for LargeComm {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let mut value = [0u8; 12];
        for chunk in value.chunks_exact_mut(4) {
            let part = parts.next().ok_or(())?;
            let part = part.parse::<u32>().map_err(|_| ())?;
            chunk.copy_from_slice(&part.to_be_bytes());
        }
        if parts.next().is_some() {
            return Err(());
        }
        Ok(LargeComm(value))
    }
}

// ===== impl RouteDistinguisher =====

impl RouteDistinguisher {
    pub const LENGTH: usize = 8;

    pub fn from_as2(asn: u16, assigned: u32) -> RouteDistinguisher {
        let mut bytes = [0; 8];
        bytes[2..4].copy_from_slice(&asn.to_be_bytes());
        bytes[4..8].copy_from_slice(&assigned.to_be_bytes());
        RouteDistinguisher(bytes)
    }

    pub fn from_ipv4(addr: Ipv4Addr, assigned: u16) -> RouteDistinguisher {
        let mut bytes = [0; 8];
        bytes[1] = 1;
        bytes[2..6].copy_from_slice(&addr.octets());
        bytes[6..8].copy_from_slice(&assigned.to_be_bytes());
        RouteDistinguisher(bytes)
    }

    pub fn from_as4(asn: u32, assigned: u16) -> RouteDistinguisher {
        let mut bytes = [0; 8];
        bytes[1] = 2;
        bytes[2..6].copy_from_slice(&asn.to_be_bytes());
        bytes[6..8].copy_from_slice(&assigned.to_be_bytes());
        RouteDistinguisher(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self, bytes::TryGetError> {
        let mut bytes = [0; 8];
        buf.try_copy_to_slice(&mut bytes)?;
        Ok(RouteDistinguisher(bytes))
    }
}

impl std::fmt::Display for RouteDistinguisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rd_type = u16::from_be_bytes(self.0[0..2].try_into().unwrap());
        match rd_type {
            0 => {
                let asn = u16::from_be_bytes(self.0[2..4].try_into().unwrap());
                let nn = u32::from_be_bytes(self.0[4..8].try_into().unwrap());
                write!(f, "{}:{}", asn, nn)
            }
            1 => {
                let addr: [u8; 4] = self.0[2..6].try_into().unwrap();
                let nn = u16::from_be_bytes(self.0[6..8].try_into().unwrap());
                write!(f, "{}:{}", Ipv4Addr::from(addr), nn)
            }
            2 => {
                let asn = u32::from_be_bytes(self.0[2..6].try_into().unwrap());
                let nn = u16::from_be_bytes(self.0[6..8].try_into().unwrap());
                write!(f, "{}:{}", asn, nn)
            }
            _ => write!(f, "0x{:016X}", u64::from_be_bytes(self.0)),
        }
    }
}

impl std::fmt::Debug for RouteDistinguisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RouteDistinguisher({})", self)
    }
}

impl FromStr for RouteDistinguisher {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (left, right) = s.rsplit_once(':').ok_or(())?;
        if let Ok(addr) = left.parse::<Ipv4Addr>() {
            let assigned = right.parse::<u16>().map_err(|_| ())?;
            return Ok(RouteDistinguisher::from_ipv4(addr, assigned));
        }
        let asn = left.parse::<u32>().map_err(|_| ())?;
        if asn <= u16::MAX as u32 {
            let assigned = right.parse::<u32>().map_err(|_| ())?;
            Ok(RouteDistinguisher::from_as2(asn as u16, assigned))
        } else {
            let assigned = right.parse::<u16>().map_err(|_| ())?;
            Ok(RouteDistinguisher::from_as4(asn, assigned))
        }
    }
}

// ===== impl LabelStack =====

impl LabelStack {
    // Synthetic 3-byte label used to withdraw labeled routes (RFC 8277).
    pub const WITHDRAW: u32 = 0x800000;

    const BOTTOM_OF_STACK: u32 = 0x000001;

    // Builds a stack from plain 20-bit label values, flagging the last
    // entry as the bottom of the stack.
    pub fn from_values(values: &[u32]) -> LabelStack {
        let mut entries: Vec<_> =
            values.iter().map(|value| value << 4).collect();
        if let Some(last) = entries.last_mut() {
            *last |= Self::BOTTOM_OF_STACK;
        }
        LabelStack(entries)
    }

    // Builds the synthetic withdrawal stack.
    pub fn withdraw() -> LabelStack {
        LabelStack(vec![Self::WITHDRAW])
    }

    pub fn is_withdraw(&self) -> bool {
        self.0.as_slice() == [Self::WITHDRAW]
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    // Returns the plain 20-bit label values.
    pub fn values(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().map(|entry| entry >> 4)
    }

    // Number of wire bits occupied by the stack.
    pub fn bits(&self) -> usize {
        self.0.len() * 24
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        use crate::bytes::BytesMutExt;
        for entry in &self.0 {
            buf.put_u24(*entry);
        }
    }

    // Reads 3-byte entries until the bottom-of-stack bit (or the synthetic
    // withdrawal label) terminates the stack.
    pub fn decode(buf: &mut Bytes) -> Result<Self, bytes::TryGetError> {
        use crate::bytes::BytesExt;
        let mut entries = Vec::new();
        loop {
            let entry = buf.try_get_u24()?;
            entries.push(entry);
            if entry & Self::BOTTOM_OF_STACK != 0 || entry == Self::WITHDRAW {
                break;
            }
        }
        Ok(LabelStack(entries))
    }
}

impl std::fmt::Display for LabelStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (pos, value) in self.values().enumerate() {
            if pos > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, "]")
    }
}

// ===== impl PathId =====

impl std::fmt::Display for PathId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Dotted-quad form, matching the router-id style annotation.
        let bytes = self.0.to_be_bytes();
        write!(f, "{}", Ipv4Addr::from(bytes))
    }
}
