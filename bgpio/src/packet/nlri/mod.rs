//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod bgpls;
pub mod evpn;
pub mod flowspec;
pub mod inet;
pub mod mup;
pub mod mvpn;
pub mod srte;
pub mod vpls;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bgpio_utils::bgp::{AfiSafi, PathId};
use bgpio_utils::ip::{AddressFamily, Ipv4AddrExt, Ipv4NetworkExt, Ipv6AddrExt, Ipv6NetworkExt};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};

pub use crate::packet::nlri::bgpls::BgpLsNlri;
pub use crate::packet::nlri::evpn::EvpnNlri;
pub use crate::packet::nlri::flowspec::FlowspecNlri;
pub use crate::packet::nlri::inet::{InetNlri, LabeledNlri, VpnNlri};
pub use crate::packet::nlri::mup::MupNlri;
pub use crate::packet::nlri::mvpn::MvpnNlri;
pub use crate::packet::nlri::srte::SrPolicyNlri;
pub use crate::packet::nlri::vpls::VplsNlri;
use crate::packet::error::{DecodeResult, UpdateMessageError};

//
// Network Layer Reachability Information.
//
// One variant per NLRI shape; the AFI/SAFI of a value is derived from the
// variant and its address family. The same in-memory form is used for
// announcements and withdrawals; the wire placement (top-level, MP_REACH or
// MP_UNREACH) decides which one it is.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Nlri {
    Unicast(InetNlri),
    Multicast(InetNlri),
    LabeledUnicast(LabeledNlri),
    Vpn(VpnNlri),
    Flowspec(FlowspecNlri),
    Evpn(EvpnNlri),
    Vpls(VplsNlri),
    BgpLs(BgpLsNlri),
    McastVpn(MvpnNlri),
    Mup(MupNlri),
    SrPolicy(SrPolicyNlri),
}

// Canonical RIB index of an NLRI: the family discriminant followed by every
// identifying field (RD, labels, prefix, path-id). Two changes with equal
// keys address the same route entry.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct NlriKey(Vec<u8>);

// ===== impl Nlri =====

impl Nlri {
    pub fn afi_safi(&self) -> AfiSafi {
        match self {
            Nlri::Unicast(nlri) => match nlri.prefix {
                IpNetwork::V4(_) => AfiSafi::Ipv4Unicast,
                IpNetwork::V6(_) => AfiSafi::Ipv6Unicast,
            },
            Nlri::Multicast(nlri) => match nlri.prefix {
                IpNetwork::V4(_) => AfiSafi::Ipv4Multicast,
                IpNetwork::V6(_) => AfiSafi::Ipv6Multicast,
            },
            Nlri::LabeledUnicast(nlri) => match nlri.prefix {
                IpNetwork::V4(_) => AfiSafi::Ipv4LabeledUnicast,
                IpNetwork::V6(_) => AfiSafi::Ipv6LabeledUnicast,
            },
            Nlri::Vpn(nlri) => match nlri.prefix {
                IpNetwork::V4(_) => AfiSafi::Ipv4Vpn,
                IpNetwork::V6(_) => AfiSafi::Ipv6Vpn,
            },
            Nlri::Flowspec(nlri) => nlri.afi_safi(),
            Nlri::Evpn(_) => AfiSafi::L2vpnEvpn,
            Nlri::Vpls(_) => AfiSafi::L2vpnVpls,
            Nlri::BgpLs(nlri) => nlri.afi_safi(),
            Nlri::McastVpn(nlri) => nlri.afi_safi(),
            Nlri::Mup(nlri) => nlri.afi_safi(),
            Nlri::SrPolicy(nlri) => nlri.afi_safi(),
        }
    }

    pub fn path_id(&self) -> Option<PathId> {
        match self {
            Nlri::Unicast(nlri) | Nlri::Multicast(nlri) => nlri.path_id,
            Nlri::LabeledUnicast(nlri) => nlri.path_id,
            Nlri::Vpn(nlri) => nlri.path_id,
            _ => None,
        }
    }

    // Builds the canonical RIB index of this NLRI.
    pub fn key(&self) -> NlriKey {
        let mut buf = BytesMut::new();
        let afi_safi = self.afi_safi();
        buf.put_u16(afi_safi.afi());
        buf.put_u8(afi_safi.safi());
        match self.path_id() {
            Some(path_id) => {
                buf.put_u8(1);
                buf.put_u32(path_id.0);
            }
            None => buf.put_u8(0),
        }
        self.encode(&mut buf, false);
        NlriKey(buf.to_vec())
    }

    // Encodes the NLRI, prepending the path identifier when add-path is in
    // effect for the family and direction.
    pub fn encode(&self, buf: &mut BytesMut, addpath: bool) {
        if addpath {
            buf.put_u32(self.path_id().map(|id| id.0).unwrap_or(0));
        }
        match self {
            Nlri::Unicast(nlri) | Nlri::Multicast(nlri) => nlri.encode(buf),
            Nlri::LabeledUnicast(nlri) => nlri.encode(buf),
            Nlri::Vpn(nlri) => nlri.encode(buf),
            Nlri::Flowspec(nlri) => nlri.encode(buf),
            Nlri::Evpn(nlri) => nlri.encode(buf),
            Nlri::Vpls(nlri) => nlri.encode(buf),
            Nlri::BgpLs(nlri) => nlri.encode(buf),
            Nlri::McastVpn(nlri) => nlri.encode(buf),
            Nlri::Mup(nlri) => nlri.encode(buf),
            Nlri::SrPolicy(nlri) => nlri.encode(buf),
        }
    }

    // Decodes one NLRI of the given family from the running buffer.
    pub fn decode(
        afi_safi: AfiSafi,
        buf: &mut Bytes,
        addpath: bool,
    ) -> DecodeResult<Nlri> {
        // An optional path identifier precedes every NLRI shape when the
        // ADD-PATH capability was negotiated for the family.
        let mut path_id = None;
        if addpath && afi_safi.addpath_capable() {
            let id = buf.try_get_u32()?;
            path_id = Some(PathId(id));
        }

        let nlri = match afi_safi {
            AfiSafi::Ipv4Unicast | AfiSafi::Ipv6Unicast => {
                Nlri::Unicast(InetNlri::decode(afi_safi.af(), buf, path_id)?)
            }
            AfiSafi::Ipv4Multicast | AfiSafi::Ipv6Multicast => {
                Nlri::Multicast(InetNlri::decode(afi_safi.af(), buf, path_id)?)
            }
            AfiSafi::Ipv4LabeledUnicast | AfiSafi::Ipv6LabeledUnicast => {
                Nlri::LabeledUnicast(LabeledNlri::decode(
                    afi_safi.af(),
                    buf,
                    path_id,
                )?)
            }
            AfiSafi::Ipv4Vpn | AfiSafi::Ipv6Vpn => {
                Nlri::Vpn(VpnNlri::decode(afi_safi.af(), buf, path_id)?)
            }
            AfiSafi::Ipv4Flowspec
            | AfiSafi::Ipv6Flowspec
            | AfiSafi::Ipv4FlowspecVpn
            | AfiSafi::Ipv6FlowspecVpn => {
                Nlri::Flowspec(FlowspecNlri::decode(afi_safi, buf)?)
            }
            AfiSafi::L2vpnEvpn => Nlri::Evpn(EvpnNlri::decode(buf)?),
            AfiSafi::L2vpnVpls => Nlri::Vpls(VplsNlri::decode(buf)?),
            AfiSafi::BgpLs | AfiSafi::BgpLsVpn => {
                Nlri::BgpLs(BgpLsNlri::decode(afi_safi, buf)?)
            }
            AfiSafi::Ipv4McastVpn | AfiSafi::Ipv6McastVpn => {
                Nlri::McastVpn(MvpnNlri::decode(afi_safi.af(), buf)?)
            }
            AfiSafi::Ipv4Mup | AfiSafi::Ipv6Mup => {
                Nlri::Mup(MupNlri::decode(afi_safi.af(), buf)?)
            }
            AfiSafi::Ipv4SrPolicy | AfiSafi::Ipv6SrPolicy => {
                Nlri::SrPolicy(SrPolicyNlri::decode(afi_safi.af(), buf)?)
            }
        };

        Ok(nlri)
    }

    // Number of bytes the NLRI occupies on the wire.
    pub fn encoded_len(&self, addpath: bool) -> usize {
        let mut buf = BytesMut::new();
        self.encode(&mut buf, addpath);
        buf.len()
    }
}

impl std::fmt::Display for Nlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Nlri::Unicast(nlri) | Nlri::Multicast(nlri) => nlri.fmt(f),
            Nlri::LabeledUnicast(nlri) => nlri.fmt(f),
            Nlri::Vpn(nlri) => nlri.fmt(f),
            Nlri::Flowspec(nlri) => nlri.fmt(f),
            Nlri::Evpn(nlri) => nlri.fmt(f),
            Nlri::Vpls(nlri) => nlri.fmt(f),
            Nlri::BgpLs(nlri) => nlri.fmt(f),
            Nlri::McastVpn(nlri) => nlri.fmt(f),
            Nlri::Mup(nlri) => nlri.fmt(f),
            Nlri::SrPolicy(nlri) => nlri.fmt(f),
        }
    }
}

// ===== helper trait =====

// Address-family selector shared by the per-family decoders.
pub(crate) trait AfiSafiExt {
    fn af(&self) -> AddressFamily;
}

impl AfiSafiExt for AfiSafi {
    fn af(&self) -> AddressFamily {
        match self.afi() {
            2 => AddressFamily::Ipv6,
            _ => AddressFamily::Ipv4,
        }
    }
}

// ===== global functions =====

// Calculates the number of bytes required to encode a prefix.
pub(crate) fn prefix_wire_len(len: u8) -> usize {
    (len as usize).div_ceil(8)
}

pub(crate) fn encode_prefix(buf: &mut BytesMut, prefix: &IpNetwork) {
    // Encode prefix length.
    let plen = prefix.prefix();
    buf.put_u8(plen);

    // Encode prefix address (variable length).
    encode_prefix_bytes(buf, prefix);
}

// Encodes the address portion of a prefix, without the length byte.
pub(crate) fn encode_prefix_bytes(buf: &mut BytesMut, prefix: &IpNetwork) {
    let plen_wire = prefix_wire_len(prefix.prefix());
    match prefix {
        IpNetwork::V4(prefix) => {
            buf.put(&prefix.ip().octets()[0..plen_wire]);
        }
        IpNetwork::V6(prefix) => {
            buf.put(&prefix.ip().octets()[0..plen_wire]);
        }
    }
}

pub(crate) fn decode_prefix(
    buf: &mut Bytes,
    af: AddressFamily,
) -> DecodeResult<IpNetwork> {
    // Parse prefix length.
    let plen = buf.try_get_u8()?;
    decode_prefix_bytes(buf, af, plen)
}

// Decodes the address portion of a prefix whose length is already known.
pub(crate) fn decode_prefix_bytes(
    buf: &mut Bytes,
    af: AddressFamily,
    plen: u8,
) -> DecodeResult<IpNetwork> {
    let plen_wire = prefix_wire_len(plen);
    if plen_wire > buf.remaining() {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }

    let prefix = match af {
        AddressFamily::Ipv4 => {
            if plen > Ipv4Network::MAX_PREFIXLEN {
                return Err(UpdateMessageError::InvalidNetworkField.into());
            }
            let mut bytes = [0; Ipv4Addr::LENGTH];
            buf.copy_to_slice(&mut bytes[..plen_wire]);
            Ipv4Network::new(Ipv4Addr::from(bytes), plen)
                .map(IpNetwork::V4)
                .map_err(|_| UpdateMessageError::InvalidNetworkField)?
        }
        AddressFamily::Ipv6 => {
            if plen > Ipv6Network::MAX_PREFIXLEN {
                return Err(UpdateMessageError::InvalidNetworkField.into());
            }
            let mut bytes = [0; Ipv6Addr::LENGTH];
            buf.copy_to_slice(&mut bytes[..plen_wire]);
            Ipv6Network::new(Ipv6Addr::from(bytes), plen)
                .map(IpNetwork::V6)
                .map_err(|_| UpdateMessageError::InvalidNetworkField)?
        }
    };

    Ok(prefix)
}

// Encodes an IP address preceded by its length in bits, as used by several
// route types (EVPN, MCAST-VPN).
pub(crate) fn encode_addr_len_bits(buf: &mut BytesMut, addr: &IpAddr) {
    match addr {
        IpAddr::V4(addr) => {
            buf.put_u8(32);
            buf.put_slice(&addr.octets());
        }
        IpAddr::V6(addr) => {
            buf.put_u8(128);
            buf.put_slice(&addr.octets());
        }
    }
}

// Decodes an IP address preceded by its length in bits.
pub(crate) fn decode_addr_len_bits(buf: &mut Bytes) -> DecodeResult<IpAddr> {
    let bits = buf.try_get_u8()?;
    match bits {
        32 => {
            let addr = buf.try_get_u32()?;
            Ok(IpAddr::V4(Ipv4Addr::from(addr)))
        }
        128 => {
            let addr = buf.try_get_u128()?;
            Ok(IpAddr::V6(Ipv6Addr::from(addr)))
        }
        _ => Err(UpdateMessageError::InvalidNetworkField.into()),
    }
}
