//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use bgpio_utils::bgp::RouteDistinguisher;
use bgpio_utils::bytes::{BytesExt, BytesMutExt};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::packet::error::{DecodeResult, UpdateMessageError};

//
// VPLS reachability (RFC 4761).
//
// Encoding format:
//
// +------------------------------------+
// |  Length (2 octets)                 |
// +------------------------------------+
// |  Route Distinguisher (8 octets)    |
// +------------------------------------+
// |  VE ID (2 octets)                  |
// +------------------------------------+
// |  VE Block Offset (2 octets)        |
// +------------------------------------+
// |  VE Block Size (2 octets)          |
// +------------------------------------+
// |  Label Base (3 octets)             |
// +------------------------------------+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct VplsNlri {
    pub rd: RouteDistinguisher,
    pub ve_id: u16,
    pub ve_block_offset: u16,
    pub ve_block_size: u16,
    pub label_base: u32,
}

// ===== impl VplsNlri =====

impl VplsNlri {
    const BODY_LEN: u16 = 17;

    // Bottom-of-stack bit of the 3-octet label base.
    const LABEL_BOS: u32 = 0x000001;

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(Self::BODY_LEN);
        self.rd.encode(buf);
        buf.put_u16(self.ve_id);
        buf.put_u16(self.ve_block_offset);
        buf.put_u16(self.ve_block_size);
        buf.put_u24((self.label_base << 4) | Self::LABEL_BOS);
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<VplsNlri> {
        let len = buf.try_get_u16()?;
        if len != Self::BODY_LEN || len as usize > buf.remaining() {
            return Err(UpdateMessageError::InvalidNetworkField.into());
        }

        let rd = RouteDistinguisher::decode(buf)
            .map_err(|_| UpdateMessageError::InvalidNetworkField)?;
        let ve_id = buf.try_get_u16()?;
        let ve_block_offset = buf.try_get_u16()?;
        let ve_block_size = buf.try_get_u16()?;
        let label_base = buf.try_get_u24()? >> 4;

        Ok(VplsNlri {
            rd,
            ve_id,
            ve_block_offset,
            ve_block_size,
            label_base,
        })
    }
}

impl std::fmt::Display for VplsNlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "vpls rd {} endpoint {} base {} offset {} size {}",
            self.rd,
            self.ve_id,
            self.label_base,
            self.ve_block_offset,
            self.ve_block_size,
        )
    }
}
