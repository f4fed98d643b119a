//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bgpio_utils::bgp::{AfiSafi, RouteDistinguisher};
use bgpio_utils::ip::AddressFamily;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::packet::error::{DecodeResult, UpdateMessageError};
use crate::packet::nlri::{decode_addr_len_bits, encode_addr_len_bits};

//
// MCAST-VPN reachability (RFC 6514).
//
// Encoding format:
//
// +-----------------------------------+
// |    Route Type (1 octet)           |
// +-----------------------------------+
// |     Length (1 octet)              |
// +-----------------------------------+
// | Route Type specific (variable)    |
// +-----------------------------------+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MvpnNlri {
    pub af: AddressFamily,
    pub route: MvpnRoute,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum MvpnRoute {
    // Route type 1.
    IntraAsIPmsi {
        rd: RouteDistinguisher,
        originator: IpAddr,
    },
    // Route type 2.
    InterAsIPmsi {
        rd: RouteDistinguisher,
        source_as: u32,
    },
    // Route type 3.
    SPmsi {
        rd: RouteDistinguisher,
        source: IpAddr,
        group: IpAddr,
        originator: IpAddr,
    },
    // Route type 4.
    LeafAd {
        route_key: Vec<u8>,
        originator: IpAddr,
    },
    // Route type 5.
    SourceActive {
        rd: RouteDistinguisher,
        source: IpAddr,
        group: IpAddr,
    },
    // Route type 6.
    SharedTreeJoin {
        rd: RouteDistinguisher,
        source_as: u32,
        source: IpAddr,
        group: IpAddr,
    },
    // Route type 7.
    SourceTreeJoin {
        rd: RouteDistinguisher,
        source_as: u32,
        source: IpAddr,
        group: IpAddr,
    },
}

// ===== impl MvpnNlri =====

impl MvpnNlri {
    pub(crate) fn afi_safi(&self) -> AfiSafi {
        match self.af {
            AddressFamily::Ipv4 => AfiSafi::Ipv4McastVpn,
            AddressFamily::Ipv6 => AfiSafi::Ipv6McastVpn,
        }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.route.route_type());

        // The length field will be initialized later.
        let len_pos = buf.len();
        buf.put_u8(0);

        match &self.route {
            MvpnRoute::IntraAsIPmsi { rd, originator } => {
                rd.encode(buf);
                put_plain_addr(buf, originator);
            }
            MvpnRoute::InterAsIPmsi { rd, source_as } => {
                rd.encode(buf);
                buf.put_u32(*source_as);
            }
            MvpnRoute::SPmsi {
                rd,
                source,
                group,
                originator,
            } => {
                rd.encode(buf);
                encode_addr_len_bits(buf, source);
                encode_addr_len_bits(buf, group);
                put_plain_addr(buf, originator);
            }
            MvpnRoute::LeafAd {
                route_key,
                originator,
            } => {
                buf.put_slice(route_key);
                put_plain_addr(buf, originator);
            }
            MvpnRoute::SourceActive { rd, source, group } => {
                rd.encode(buf);
                encode_addr_len_bits(buf, source);
                encode_addr_len_bits(buf, group);
            }
            MvpnRoute::SharedTreeJoin {
                rd,
                source_as,
                source,
                group,
            }
            | MvpnRoute::SourceTreeJoin {
                rd,
                source_as,
                source,
                group,
            } => {
                rd.encode(buf);
                buf.put_u32(*source_as);
                encode_addr_len_bits(buf, source);
                encode_addr_len_bits(buf, group);
            }
        }

        // Rewrite the length field.
        let len = buf.len() - len_pos - 1;
        buf[len_pos] = len as u8;
    }

    pub(crate) fn decode(
        af: AddressFamily,
        buf: &mut Bytes,
    ) -> DecodeResult<MvpnNlri> {
        let route_type = buf.try_get_u8()?;
        let len = buf.try_get_u8()? as usize;
        if len > buf.remaining() {
            return Err(UpdateMessageError::InvalidNetworkField.into());
        }
        let mut buf = buf.copy_to_bytes(len);

        let route = match route_type {
            1 => {
                let rd = decode_rd(&mut buf)?;
                let originator = get_plain_addr(&mut buf, af)?;
                MvpnRoute::IntraAsIPmsi { rd, originator }
            }
            2 => {
                let rd = decode_rd(&mut buf)?;
                let source_as = buf.try_get_u32()?;
                MvpnRoute::InterAsIPmsi { rd, source_as }
            }
            3 => {
                let rd = decode_rd(&mut buf)?;
                let source = decode_addr_len_bits(&mut buf)?;
                let group = decode_addr_len_bits(&mut buf)?;
                let originator = get_plain_addr(&mut buf, af)?;
                MvpnRoute::SPmsi {
                    rd,
                    source,
                    group,
                    originator,
                }
            }
            4 => {
                // The route key is the embedded S-PMSI route; it is kept
                // verbatim and re-emitted byte-for-byte.
                let addr_len = match af {
                    AddressFamily::Ipv4 => 4,
                    AddressFamily::Ipv6 => 16,
                };
                if buf.remaining() < addr_len {
                    return Err(UpdateMessageError::InvalidNetworkField.into());
                }
                let key_len = buf.remaining() - addr_len;
                let route_key = buf.copy_to_bytes(key_len).to_vec();
                let originator = get_plain_addr(&mut buf, af)?;
                MvpnRoute::LeafAd {
                    route_key,
                    originator,
                }
            }
            5 => {
                let rd = decode_rd(&mut buf)?;
                let source = decode_addr_len_bits(&mut buf)?;
                let group = decode_addr_len_bits(&mut buf)?;
                MvpnRoute::SourceActive { rd, source, group }
            }
            6 | 7 => {
                let rd = decode_rd(&mut buf)?;
                let source_as = buf.try_get_u32()?;
                let source = decode_addr_len_bits(&mut buf)?;
                let group = decode_addr_len_bits(&mut buf)?;
                if route_type == 6 {
                    MvpnRoute::SharedTreeJoin {
                        rd,
                        source_as,
                        source,
                        group,
                    }
                } else {
                    MvpnRoute::SourceTreeJoin {
                        rd,
                        source_as,
                        source,
                        group,
                    }
                }
            }
            _ => {
                return Err(UpdateMessageError::InvalidNetworkField.into());
            }
        };

        Ok(MvpnNlri { af, route })
    }
}

impl std::fmt::Display for MvpnNlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mcast-vpn route-type {}", self.route.route_type())?;
        match &self.route {
            MvpnRoute::IntraAsIPmsi { rd, originator } => {
                write!(f, " rd {} originator {}", rd, originator)
            }
            MvpnRoute::InterAsIPmsi { rd, source_as } => {
                write!(f, " rd {} source-as {}", rd, source_as)
            }
            MvpnRoute::SPmsi {
                rd,
                source,
                group,
                originator,
            } => {
                write!(
                    f,
                    " rd {} source {} group {} originator {}",
                    rd, source, group, originator
                )
            }
            MvpnRoute::LeafAd { originator, .. } => {
                write!(f, " originator {}", originator)
            }
            MvpnRoute::SourceActive { rd, source, group } => {
                write!(f, " rd {} source {} group {}", rd, source, group)
            }
            MvpnRoute::SharedTreeJoin {
                rd,
                source_as,
                source,
                group,
            }
            | MvpnRoute::SourceTreeJoin {
                rd,
                source_as,
                source,
                group,
            } => {
                write!(
                    f,
                    " rd {} source-as {} source {} group {}",
                    rd, source_as, source, group
                )
            }
        }
    }
}

// ===== impl MvpnRoute =====

impl MvpnRoute {
    pub fn route_type(&self) -> u8 {
        match self {
            MvpnRoute::IntraAsIPmsi { .. } => 1,
            MvpnRoute::InterAsIPmsi { .. } => 2,
            MvpnRoute::SPmsi { .. } => 3,
            MvpnRoute::LeafAd { .. } => 4,
            MvpnRoute::SourceActive { .. } => 5,
            MvpnRoute::SharedTreeJoin { .. } => 6,
            MvpnRoute::SourceTreeJoin { .. } => 7,
        }
    }
}

// ===== helper functions =====

fn decode_rd(buf: &mut Bytes) -> DecodeResult<RouteDistinguisher> {
    RouteDistinguisher::decode(buf)
        .map_err(|_| UpdateMessageError::InvalidNetworkField.into())
}

// Originator addresses are encoded without a length prefix; their size
// follows the address family of the SAFI.
fn put_plain_addr(buf: &mut BytesMut, addr: &IpAddr) {
    match addr {
        IpAddr::V4(addr) => buf.put_slice(&addr.octets()),
        IpAddr::V6(addr) => buf.put_slice(&addr.octets()),
    }
}

fn get_plain_addr(buf: &mut Bytes, af: AddressFamily) -> DecodeResult<IpAddr> {
    match af {
        AddressFamily::Ipv4 => Ok(IpAddr::V4(buf.try_get_u32()?.into())),
        AddressFamily::Ipv6 => Ok(IpAddr::V6(buf.try_get_u128()?.into())),
    }
}
