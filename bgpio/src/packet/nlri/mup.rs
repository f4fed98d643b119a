//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bgpio_utils::bgp::{AfiSafi, RouteDistinguisher};
use bgpio_utils::ip::AddressFamily;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::packet::error::{DecodeResult, UpdateMessageError};
use crate::packet::nlri::{decode_prefix, encode_prefix};

//
// BGP Mobile User Plane reachability (draft-mpmz-bess-mup-safi).
//
// Encoding format:
//
// +-----------------------------------+
// |    Architecture Type (1 octet)    |
// +-----------------------------------+
// |     Route Type (2 octets)         |
// +-----------------------------------+
// |     Length (1 octet)              |
// +-----------------------------------+
// | Route Type specific (variable)    |
// +-----------------------------------+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MupNlri {
    pub af: AddressFamily,
    pub arch_type: u8,
    pub route: MupRoute,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum MupRoute {
    // Route type 1: Interwork Segment Discovery.
    InterworkSegmentDiscovery {
        rd: RouteDistinguisher,
        prefix: IpNetwork,
    },
    // Route type 2: Direct Segment Discovery.
    DirectSegmentDiscovery {
        rd: RouteDistinguisher,
        address: IpAddr,
    },
    // Route type 3: Type 1 Session Transformed.
    Type1SessionTransformed {
        rd: RouteDistinguisher,
        prefix: IpNetwork,
        teid: u32,
        qfi: u8,
        endpoint: IpAddr,
    },
    // Route type 4: Type 2 Session Transformed.
    Type2SessionTransformed {
        rd: RouteDistinguisher,
        endpoint: IpAddr,
        teid: u32,
    },
}

// 3GPP 5G architecture type.
pub const MUP_ARCH_3GPP_5G: u8 = 1;

// ===== impl MupNlri =====

impl MupNlri {
    pub(crate) fn afi_safi(&self) -> AfiSafi {
        match self.af {
            AddressFamily::Ipv4 => AfiSafi::Ipv4Mup,
            AddressFamily::Ipv6 => AfiSafi::Ipv6Mup,
        }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.arch_type);
        buf.put_u16(self.route.route_type());

        // The length field will be initialized later.
        let len_pos = buf.len();
        buf.put_u8(0);

        match &self.route {
            MupRoute::InterworkSegmentDiscovery { rd, prefix } => {
                rd.encode(buf);
                encode_prefix(buf, prefix);
            }
            MupRoute::DirectSegmentDiscovery { rd, address } => {
                rd.encode(buf);
                put_addr(buf, address);
            }
            MupRoute::Type1SessionTransformed {
                rd,
                prefix,
                teid,
                qfi,
                endpoint,
            } => {
                rd.encode(buf);
                encode_prefix(buf, prefix);
                buf.put_u32(*teid);
                buf.put_u8(*qfi);
                match endpoint {
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
            MupRoute::Type2SessionTransformed { rd, endpoint, teid } => {
                rd.encode(buf);
                // The endpoint length covers the address plus the full TEID.
                match endpoint {
                    IpAddr::V4(addr) => {
                        buf.put_u8(32 + 32);
                        buf.put_slice(&addr.octets());
                    }
                    IpAddr::V6(addr) => {
                        buf.put_u8(128 + 32);
                        buf.put_slice(&addr.octets());
                    }
                }
                buf.put_u32(*teid);
            }
        }

        // Rewrite the length field.
        let len = buf.len() - len_pos - 1;
        buf[len_pos] = len as u8;
    }

    pub(crate) fn decode(
        af: AddressFamily,
        buf: &mut Bytes,
    ) -> DecodeResult<MupNlri> {
        let arch_type = buf.try_get_u8()?;
        let route_type = buf.try_get_u16()?;
        let len = buf.try_get_u8()? as usize;
        if len > buf.remaining() {
            return Err(UpdateMessageError::InvalidNetworkField.into());
        }
        let mut buf = buf.copy_to_bytes(len);

        let route = match route_type {
            1 => {
                let rd = decode_rd(&mut buf)?;
                let prefix = decode_prefix(&mut buf, af)?;
                MupRoute::InterworkSegmentDiscovery { rd, prefix }
            }
            2 => {
                let rd = decode_rd(&mut buf)?;
                let address = get_addr(&mut buf, af)?;
                MupRoute::DirectSegmentDiscovery { rd, address }
            }
            3 => {
                let rd = decode_rd(&mut buf)?;
                let prefix = decode_prefix(&mut buf, af)?;
                let teid = buf.try_get_u32()?;
                let qfi = buf.try_get_u8()?;
                let ep_bits = buf.try_get_u8()?;
                let endpoint = match ep_bits {
                    32 => IpAddr::V4(buf.try_get_u32()?.into()),
                    128 => IpAddr::V6(buf.try_get_u128()?.into()),
                    _ => {
                        return Err(
                            UpdateMessageError::InvalidNetworkField.into()
                        );
                    }
                };
                MupRoute::Type1SessionTransformed {
                    rd,
                    prefix,
                    teid,
                    qfi,
                    endpoint,
                }
            }
            4 => {
                let rd = decode_rd(&mut buf)?;
                let ep_bits = buf.try_get_u8()?;
                let endpoint = match ep_bits {
                    64 => IpAddr::V4(buf.try_get_u32()?.into()),
                    160 => IpAddr::V6(buf.try_get_u128()?.into()),
                    _ => {
                        return Err(
                            UpdateMessageError::InvalidNetworkField.into()
                        );
                    }
                };
                let teid = buf.try_get_u32()?;
                MupRoute::Type2SessionTransformed { rd, endpoint, teid }
            }
            _ => {
                return Err(UpdateMessageError::InvalidNetworkField.into());
            }
        };

        Ok(MupNlri {
            af,
            arch_type,
            route,
        })
    }
}

impl std::fmt::Display for MupNlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mup route-type {}", self.route.route_type())?;
        match &self.route {
            MupRoute::InterworkSegmentDiscovery { rd, prefix } => {
                write!(f, " rd {} prefix {}", rd, prefix)
            }
            MupRoute::DirectSegmentDiscovery { rd, address } => {
                write!(f, " rd {} address {}", rd, address)
            }
            MupRoute::Type1SessionTransformed {
                rd,
                prefix,
                teid,
                qfi,
                endpoint,
            } => {
                write!(
                    f,
                    " rd {} prefix {} teid {} qfi {} endpoint {}",
                    rd, prefix, teid, qfi, endpoint
                )
            }
            MupRoute::Type2SessionTransformed { rd, endpoint, teid } => {
                write!(f, " rd {} endpoint {} teid {}", rd, endpoint, teid)
            }
        }
    }
}

// ===== impl MupRoute =====

impl MupRoute {
    pub fn route_type(&self) -> u16 {
        match self {
            MupRoute::InterworkSegmentDiscovery { .. } => 1,
            MupRoute::DirectSegmentDiscovery { .. } => 2,
            MupRoute::Type1SessionTransformed { .. } => 3,
            MupRoute::Type2SessionTransformed { .. } => 4,
        }
    }
}

// ===== helper functions =====

fn decode_rd(buf: &mut Bytes) -> DecodeResult<RouteDistinguisher> {
    RouteDistinguisher::decode(buf)
        .map_err(|_| UpdateMessageError::InvalidNetworkField.into())
}

fn put_addr(buf: &mut BytesMut, addr: &IpAddr) {
    match addr {
        IpAddr::V4(addr) => buf.put_slice(&addr.octets()),
        IpAddr::V6(addr) => buf.put_slice(&addr.octets()),
    }
}

fn get_addr(buf: &mut Bytes, af: AddressFamily) -> DecodeResult<IpAddr> {
    match af {
        AddressFamily::Ipv4 => Ok(IpAddr::V4(buf.try_get_u32()?.into())),
        AddressFamily::Ipv6 => Ok(IpAddr::V6(buf.try_get_u128()?.into())),
    }
}
