//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use bgpio_utils::bgp::{AfiSafi, RouteDistinguisher};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::packet::error::{DecodeResult, UpdateMessageError};

//
// BGP-LS reachability (RFC 7752).
//
// Encoding format:
//
// +------------------+
// |  NLRI Type       |
// +------------------+
// |  Total NLRI      |
// |  Length          |
// +------------------+
// |  Protocol-ID     |
// +------------------+
// |  Identifier      |
// |  (8 octets)      |
// +------------------+
// |  Descriptor TLVs |
// |  (variable)      |
// +------------------+
//
// Descriptor TLVs are structurally opaque at this layer: their type codes
// are preserved and their payloads re-emitted byte-for-byte.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[skip_serializing_none]
#[derive(Deserialize, Serialize)]
pub struct BgpLsNlri {
    pub nlri_type: BgpLsNlriType,
    pub protocol_id: u8,
    pub identifier: u64,
    pub descriptors: Vec<BgpLsTlv>,
    // Present for the VPN flavor (SAFI 72).
    pub rd: Option<RouteDistinguisher>,
}

// BGP-LS NLRI Types.
//
// IANA registry:
// https://www.iana.org/assignments/bgp-ls-parameters/bgp-ls-parameters.xhtml
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum BgpLsNlriType {
    Node = 1,
    Link = 2,
    Ipv4Prefix = 3,
    Ipv6Prefix = 4,
}

// A raw BGP-LS TLV.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct BgpLsTlv {
    pub tlv_type: u16,
    pub value: Vec<u8>,
}

// Well-known descriptor TLV type codes.
impl BgpLsTlv {
    pub const LOCAL_NODE_DESCRIPTORS: u16 = 256;
    pub const REMOTE_NODE_DESCRIPTORS: u16 = 257;
    pub const AUTONOMOUS_SYSTEM: u16 = 512;
    pub const BGP_LS_IDENTIFIER: u16 = 513;
    pub const OSPF_AREA_ID: u16 = 514;
    pub const IGP_ROUTER_ID: u16 = 515;
}

// ===== impl BgpLsNlri =====

impl BgpLsNlri {
    pub(crate) fn afi_safi(&self) -> AfiSafi {
        if self.rd.is_some() {
            AfiSafi::BgpLsVpn
        } else {
            AfiSafi::BgpLs
        }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.nlri_type as u16);

        // The length field will be initialized later.
        let len_pos = buf.len();
        buf.put_u16(0);

        if let Some(rd) = &self.rd {
            rd.encode(buf);
        }
        buf.put_u8(self.protocol_id);
        buf.put_u64(self.identifier);
        for tlv in &self.descriptors {
            tlv.encode(buf);
        }

        // Rewrite the length field.
        let len = (buf.len() - len_pos - 2) as u16;
        buf[len_pos..len_pos + 2].copy_from_slice(&len.to_be_bytes());
    }

    pub(crate) fn decode(
        afi_safi: AfiSafi,
        buf: &mut Bytes,
    ) -> DecodeResult<BgpLsNlri> {
        let nlri_type = buf.try_get_u16()?;
        let Some(nlri_type) = BgpLsNlriType::from_u16(nlri_type) else {
            return Err(UpdateMessageError::InvalidNetworkField.into());
        };
        let len = buf.try_get_u16()? as usize;
        if len > buf.remaining() {
            return Err(UpdateMessageError::InvalidNetworkField.into());
        }
        let mut buf = buf.copy_to_bytes(len);

        let mut rd = None;
        if afi_safi == AfiSafi::BgpLsVpn {
            rd = Some(
                RouteDistinguisher::decode(&mut buf)
                    .map_err(|_| UpdateMessageError::InvalidNetworkField)?,
            );
        }
        let protocol_id = buf.try_get_u8()?;
        let identifier = buf.try_get_u64()?;

        let mut descriptors = Vec::new();
        while buf.remaining() > 0 {
            descriptors.push(BgpLsTlv::decode(&mut buf)?);
        }

        Ok(BgpLsNlri {
            nlri_type,
            protocol_id,
            identifier,
            descriptors,
            rd,
        })
    }
}

impl std::fmt::Display for BgpLsNlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.nlri_type {
            BgpLsNlriType::Node => "node",
            BgpLsNlriType::Link => "link",
            BgpLsNlriType::Ipv4Prefix => "ipv4-prefix",
            BgpLsNlriType::Ipv6Prefix => "ipv6-prefix",
        };
        write!(
            f,
            "bgp-ls {} protocol-id {} identifier {}",
            kind, self.protocol_id, self.identifier
        )?;
        if let Some(rd) = &self.rd {
            write!(f, " rd {}", rd)?;
        }
        Ok(())
    }
}

// ===== impl BgpLsTlv =====

impl BgpLsTlv {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.tlv_type);
        buf.put_u16(self.value.len() as u16);
        buf.put_slice(&self.value);
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<BgpLsTlv> {
        let tlv_type = buf.try_get_u16()?;
        let len = buf.try_get_u16()? as usize;
        if len > buf.remaining() {
            return Err(UpdateMessageError::InvalidNetworkField.into());
        }
        let value = buf.copy_to_bytes(len).to_vec();
        Ok(BgpLsTlv { tlv_type, value })
    }
}
