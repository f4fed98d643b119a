//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use bgpio_utils::bgp::{LabelStack, PathId, RouteDistinguisher};
use bgpio_utils::ip::AddressFamily;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::packet::error::{DecodeResult, UpdateMessageError};
use crate::packet::nlri::{
    decode_prefix, decode_prefix_bytes, encode_prefix, encode_prefix_bytes,
};

//
// Plain CIDR reachability (unicast and multicast SAFIs).
//
// Encoding format:
//
// +---------------------------+
// | Length (1 octet)          |
// +---------------------------+
// | Prefix (variable)         |
// +---------------------------+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[skip_serializing_none]
#[derive(Deserialize, Serialize)]
pub struct InetNlri {
    pub prefix: IpNetwork,
    pub path_id: Option<PathId>,
}

//
// Labeled reachability (RFC 8277). The length byte counts the label stack
// bits in addition to the prefix bits.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[skip_serializing_none]
#[derive(Deserialize, Serialize)]
pub struct LabeledNlri {
    pub prefix: IpNetwork,
    pub labels: LabelStack,
    pub path_id: Option<PathId>,
}

//
// MPLS-VPN reachability (RFC 4364): labels, then an 8-byte Route
// Distinguisher, then the prefix.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[skip_serializing_none]
#[derive(Deserialize, Serialize)]
pub struct VpnNlri {
    pub rd: RouteDistinguisher,
    pub prefix: IpNetwork,
    pub labels: LabelStack,
    pub path_id: Option<PathId>,
}

// ===== impl InetNlri =====

impl InetNlri {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        encode_prefix(buf, &self.prefix);
    }

    pub(crate) fn decode(
        af: AddressFamily,
        buf: &mut Bytes,
        path_id: Option<PathId>,
    ) -> DecodeResult<InetNlri> {
        let prefix = decode_prefix(buf, af)?;
        Ok(InetNlri { prefix, path_id })
    }
}

impl std::fmt::Display for InetNlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.prefix)?;
        if let Some(path_id) = &self.path_id {
            write!(f, " path-information {}", path_id)?;
        }
        Ok(())
    }
}

// ===== impl LabeledNlri =====

impl LabeledNlri {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        let plen = self.prefix.prefix() as usize + self.labels.bits();
        buf.put_u8(plen as u8);
        self.labels.encode(buf);
        encode_prefix_bytes(buf, &self.prefix);
    }

    pub(crate) fn decode(
        af: AddressFamily,
        buf: &mut Bytes,
        path_id: Option<PathId>,
    ) -> DecodeResult<LabeledNlri> {
        let plen = buf.try_get_u8()?;
        let labels = LabelStack::decode(buf)
            .map_err(|_| UpdateMessageError::InvalidNetworkField)?;

        // The wire length covers the labels; what remains is the prefix.
        let prefix_bits = (plen as usize)
            .checked_sub(labels.bits())
            .ok_or(UpdateMessageError::InvalidNetworkField)?;
        let prefix = decode_prefix_bytes(buf, af, prefix_bits as u8)?;

        Ok(LabeledNlri {
            prefix,
            labels,
            path_id,
        })
    }
}

impl std::fmt::Display for LabeledNlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} label {}", self.prefix, self.labels)?;
        if let Some(path_id) = &self.path_id {
            write!(f, " path-information {}", path_id)?;
        }
        Ok(())
    }
}

// ===== impl VpnNlri =====

impl VpnNlri {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        let plen = self.prefix.prefix() as usize
            + self.labels.bits()
            + RouteDistinguisher::LENGTH * 8;
        buf.put_u8(plen as u8);
        self.labels.encode(buf);
        self.rd.encode(buf);
        encode_prefix_bytes(buf, &self.prefix);
    }

    pub(crate) fn decode(
        af: AddressFamily,
        buf: &mut Bytes,
        path_id: Option<PathId>,
    ) -> DecodeResult<VpnNlri> {
        let plen = buf.try_get_u8()?;
        let labels = LabelStack::decode(buf)
            .map_err(|_| UpdateMessageError::InvalidNetworkField)?;
        let rd = RouteDistinguisher::decode(buf)
            .map_err(|_| UpdateMessageError::InvalidNetworkField)?;

        let prefix_bits = (plen as usize)
            .checked_sub(labels.bits() + RouteDistinguisher::LENGTH * 8)
            .ok_or(UpdateMessageError::InvalidNetworkField)?;
        let prefix = decode_prefix_bytes(buf, af, prefix_bits as u8)?;

        Ok(VpnNlri {
            rd,
            prefix,
            labels,
            path_id,
        })
    }
}

impl std::fmt::Display for VpnNlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} rd {} label {}", self.prefix, self.rd, self.labels)?;
        if let Some(path_id) = &self.path_id {
            write!(f, " path-information {}", path_id)?;
        }
        Ok(())
    }
}
