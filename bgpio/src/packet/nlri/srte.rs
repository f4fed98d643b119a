//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bgpio_utils::bgp::AfiSafi;
use bgpio_utils::ip::AddressFamily;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::packet::error::{DecodeResult, UpdateMessageError};

//
// SR policy reachability (draft-ietf-idr-sr-policy-safi).
//
// Encoding format:
//
// +------------------+
// | Length (1 octet) |
// +------------------+
// | Distinguisher    |
// | (4 octets)       |
// +------------------+
// | Color (4 octets) |
// +------------------+
// | Endpoint         |
// | (4 or 16 octets) |
// +------------------+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct SrPolicyNlri {
    pub distinguisher: u32,
    pub color: u32,
    pub endpoint: IpAddr,
}

// ===== impl SrPolicyNlri =====

impl SrPolicyNlri {
    pub(crate) fn afi_safi(&self) -> AfiSafi {
        match self.endpoint {
            IpAddr::V4(_) => AfiSafi::Ipv4SrPolicy,
            IpAddr::V6(_) => AfiSafi::Ipv6SrPolicy,
        }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        match self.endpoint {
            IpAddr::V4(endpoint) => {
                // Length is expressed in bits.
                buf.put_u8(96);
                buf.put_u32(self.distinguisher);
                buf.put_u32(self.color);
                buf.put_slice(&endpoint.octets());
            }
            IpAddr::V6(endpoint) => {
                buf.put_u8(192);
                buf.put_u32(self.distinguisher);
                buf.put_u32(self.color);
                buf.put_slice(&endpoint.octets());
            }
        }
    }

    pub(crate) fn decode(
        af: AddressFamily,
        buf: &mut Bytes,
    ) -> DecodeResult<SrPolicyNlri> {
        let bits = buf.try_get_u8()?;
        let distinguisher = buf.try_get_u32()?;
        let color = buf.try_get_u32()?;
        let endpoint = match (af, bits) {
            (AddressFamily::Ipv4, 96) => {
                IpAddr::V4(buf.try_get_u32()?.into())
            }
            (AddressFamily::Ipv6, 192) => {
                IpAddr::V6(buf.try_get_u128()?.into())
            }
            _ => {
                return Err(UpdateMessageError::InvalidNetworkField.into());
            }
        };

        Ok(SrPolicyNlri {
            distinguisher,
            color,
            endpoint,
        })
    }
}

impl std::fmt::Display for SrPolicyNlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sr-policy distinguisher {} color {} endpoint {}",
            self.distinguisher, self.color, self.endpoint
        )
    }
}
