//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bgpio_utils::bgp::RouteDistinguisher;
use bgpio_utils::bytes::{BytesExt, BytesMutExt};
use bgpio_utils::mac_addr::MacAddr;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::packet::error::{DecodeResult, UpdateMessageError};

//
// EVPN reachability (RFC 7432, RFC 9136).
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
pub struct EvpnNlri {
    pub route: EvpnRoute,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum EvpnRoute {
    // Route type 1.
    EthernetAutoDiscovery {
        rd: RouteDistinguisher,
        esi: Esi,
        eth_tag: u32,
        label: u32,
    },
    // Route type 2.
    MacAdvertisement {
        rd: RouteDistinguisher,
        esi: Esi,
        eth_tag: u32,
        mac: MacAddr,
        ip: Option<IpAddr>,
        label1: u32,
        label2: Option<u32>,
    },
    // Route type 3.
    InclusiveMulticast {
        rd: RouteDistinguisher,
        eth_tag: u32,
        originator: IpAddr,
    },
    // Route type 4.
    EthernetSegment {
        rd: RouteDistinguisher,
        esi: Esi,
        originator: IpAddr,
    },
    // Route type 5.
    IpPrefix {
        rd: RouteDistinguisher,
        esi: Esi,
        eth_tag: u32,
        prefix: ipnetwork::IpNetwork,
        gateway: IpAddr,
        label: u32,
    },
}

// 10-byte Ethernet Segment Identifier.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Esi(pub [u8; 10]);

// ===== impl EvpnNlri =====

impl EvpnNlri {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.route.route_type());

        // The length field will be initialized later.
        let len_pos = buf.len();
        buf.put_u8(0);

        match &self.route {
            EvpnRoute::EthernetAutoDiscovery {
                rd,
                esi,
                eth_tag,
                label,
            } => {
                rd.encode(buf);
                buf.put_slice(&esi.0);
                buf.put_u32(*eth_tag);
                buf.put_u24(*label);
            }
            EvpnRoute::MacAdvertisement {
                rd,
                esi,
                eth_tag,
                mac,
                ip,
                label1,
                label2,
            } => {
                rd.encode(buf);
                buf.put_slice(&esi.0);
                buf.put_u32(*eth_tag);
                buf.put_u8((MacAddr::LENGTH * 8) as u8);
                buf.put_mac(mac);
                encode_opt_addr(buf, ip);
                buf.put_u24(*label1);
                if let Some(label2) = label2 {
                    buf.put_u24(*label2);
                }
            }
            EvpnRoute::InclusiveMulticast {
                rd,
                eth_tag,
                originator,
            } => {
                rd.encode(buf);
                buf.put_u32(*eth_tag);
                encode_opt_addr(buf, &Some(*originator));
            }
            EvpnRoute::EthernetSegment {
                rd,
                esi,
                originator,
            } => {
                rd.encode(buf);
                buf.put_slice(&esi.0);
                encode_opt_addr(buf, &Some(*originator));
            }
            EvpnRoute::IpPrefix {
                rd,
                esi,
                eth_tag,
                prefix,
                gateway,
                label,
            } => {
                rd.encode(buf);
                buf.put_slice(&esi.0);
                buf.put_u32(*eth_tag);
                buf.put_u8(prefix.prefix());
                match (prefix, gateway) {
                    (ipnetwork::IpNetwork::V4(prefix), IpAddr::V4(gw)) => {
                        buf.put_ipv4(&prefix.ip());
                        buf.put_ipv4(gw);
                    }
                    (ipnetwork::IpNetwork::V6(prefix), IpAddr::V6(gw)) => {
                        buf.put_ipv6(&prefix.ip());
                        buf.put_ipv6(gw);
                    }
                    _ => {
                        // Mixed address families are rejected at
                        // construction time; emit an all-zeroes gateway of
                        // the prefix's family.
                        match prefix {
                            ipnetwork::IpNetwork::V4(prefix) => {
                                buf.put_ipv4(&prefix.ip());
                                buf.put_ipv4(&std::net::Ipv4Addr::UNSPECIFIED);
                            }
                            ipnetwork::IpNetwork::V6(prefix) => {
                                buf.put_ipv6(&prefix.ip());
                                buf.put_ipv6(&std::net::Ipv6Addr::UNSPECIFIED);
                            }
                        }
                    }
                }
                buf.put_u24(*label);
            }
        }

        // Rewrite the length field.
        let len = buf.len() - len_pos - 1;
        buf[len_pos] = len as u8;
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<EvpnNlri> {
        let route_type = buf.try_get_u8()?;
        let len = buf.try_get_u8()? as usize;
        if len > buf.remaining() {
            return Err(UpdateMessageError::InvalidNetworkField.into());
        }
        let mut buf = buf.copy_to_bytes(len);

        let route = match route_type {
            1 => {
                let rd = decode_rd(&mut buf)?;
                let esi = Esi::decode(&mut buf)?;
                let eth_tag = buf.try_get_u32()?;
                let label = buf.try_get_u24()?;
                EvpnRoute::EthernetAutoDiscovery {
                    rd,
                    esi,
                    eth_tag,
                    label,
                }
            }
            2 => {
                let rd = decode_rd(&mut buf)?;
                let esi = Esi::decode(&mut buf)?;
                let eth_tag = buf.try_get_u32()?;
                let mac_len = buf.try_get_u8()?;
                if mac_len as usize != MacAddr::LENGTH * 8 {
                    return Err(UpdateMessageError::InvalidNetworkField.into());
                }
                let mac = buf.try_get_mac()?;
                let ip = decode_opt_addr(&mut buf)?;
                let label1 = buf.try_get_u24()?;
                let mut label2 = None;
                if buf.remaining() >= 3 {
                    label2 = Some(buf.try_get_u24()?);
                }
                EvpnRoute::MacAdvertisement {
                    rd,
                    esi,
                    eth_tag,
                    mac,
                    ip,
                    label1,
                    label2,
                }
            }
            3 => {
                let rd = decode_rd(&mut buf)?;
                let eth_tag = buf.try_get_u32()?;
                let originator = decode_opt_addr(&mut buf)?
                    .ok_or(UpdateMessageError::InvalidNetworkField)?;
                EvpnRoute::InclusiveMulticast {
                    rd,
                    eth_tag,
                    originator,
                }
            }
            4 => {
                let rd = decode_rd(&mut buf)?;
                let esi = Esi::decode(&mut buf)?;
                let originator = decode_opt_addr(&mut buf)?
                    .ok_or(UpdateMessageError::InvalidNetworkField)?;
                EvpnRoute::EthernetSegment {
                    rd,
                    esi,
                    originator,
                }
            }
            5 => {
                let rd = decode_rd(&mut buf)?;
                let esi = Esi::decode(&mut buf)?;
                let eth_tag = buf.try_get_u32()?;
                let plen = buf.try_get_u8()?;

                // The total length discriminates between the IPv4 (34
                // octets) and IPv6 (58 octets) forms.
                let (prefix, gateway) = match len {
                    34 => {
                        let addr = buf.try_get_ipv4()?;
                        let gw = buf.try_get_ipv4()?;
                        let prefix = ipnetwork::Ipv4Network::new(addr, plen)
                            .map_err(|_| {
                                UpdateMessageError::InvalidNetworkField
                            })?;
                        (ipnetwork::IpNetwork::V4(prefix), IpAddr::V4(gw))
                    }
                    58 => {
                        let addr = buf.try_get_ipv6()?;
                        let gw = buf.try_get_ipv6()?;
                        let prefix = ipnetwork::Ipv6Network::new(addr, plen)
                            .map_err(|_| {
                                UpdateMessageError::InvalidNetworkField
                            })?;
                        (ipnetwork::IpNetwork::V6(prefix), IpAddr::V6(gw))
                    }
                    _ => {
                        return Err(
                            UpdateMessageError::InvalidNetworkField.into()
                        );
                    }
                };
                let label = buf.try_get_u24()?;
                EvpnRoute::IpPrefix {
                    rd,
                    esi,
                    eth_tag,
                    prefix,
                    gateway,
                    label,
                }
            }
            _ => {
                return Err(UpdateMessageError::InvalidNetworkField.into());
            }
        };

        Ok(EvpnNlri { route })
    }
}

impl std::fmt::Display for EvpnNlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.route {
            EvpnRoute::EthernetAutoDiscovery {
                rd,
                esi,
                eth_tag,
                label,
            } => {
                write!(
                    f,
                    "evpn auto-discovery rd {} esi {} tag {} label {}",
                    rd, esi, eth_tag, label
                )
            }
            EvpnRoute::MacAdvertisement {
                rd,
                esi,
                eth_tag,
                mac,
                ip,
                ..
            } => {
                write!(f, "evpn mac rd {} esi {} tag {} mac {}", rd, esi, eth_tag, mac)?;
                if let Some(ip) = ip {
                    write!(f, " ip {}", ip)?;
                }
                Ok(())
            }
            EvpnRoute::InclusiveMulticast {
                rd,
                eth_tag,
                originator,
            } => {
                write!(f, "evpn multicast rd {} tag {} ip {}", rd, eth_tag, originator)
            }
            EvpnRoute::EthernetSegment { rd, esi, originator } => {
                write!(f, "evpn segment rd {} esi {} ip {}", rd, esi, originator)
            }
            EvpnRoute::IpPrefix {
                rd,
                esi,
                eth_tag,
                prefix,
                gateway,
                label,
            } => {
                write!(
                    f,
                    "evpn prefix rd {} esi {} tag {} prefix {} gateway {} label {}",
                    rd, esi, eth_tag, prefix, gateway, label
                )
            }
        }
    }
}

// ===== impl EvpnRoute =====

impl EvpnRoute {
    pub fn route_type(&self) -> u8 {
        match self {
            EvpnRoute::EthernetAutoDiscovery { .. } => 1,
            EvpnRoute::MacAdvertisement { .. } => 2,
            EvpnRoute::InclusiveMulticast { .. } => 3,
            EvpnRoute::EthernetSegment { .. } => 4,
            EvpnRoute::IpPrefix { .. } => 5,
        }
    }
}

// ===== impl Esi =====

impl Esi {
    pub const LENGTH: usize = 10;

    fn decode(buf: &mut Bytes) -> DecodeResult<Esi> {
        let mut bytes = [0; Self::LENGTH];
        if buf.remaining() < Self::LENGTH {
            return Err(UpdateMessageError::InvalidNetworkField.into());
        }
        buf.copy_to_slice(&mut bytes);
        Ok(Esi(bytes))
    }
}

impl std::fmt::Display for Esi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (pos, byte) in self.0.iter().enumerate() {
            if pos > 0 {
                write!(f, ":")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Esi {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0; Self::LENGTH];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or(())?;
            *byte = u8::from_str_radix(part, 16).map_err(|_| ())?;
        }
        if parts.next().is_some() {
            return Err(());
        }
        Ok(Esi(bytes))
    }
}

// ===== helper functions =====

fn decode_rd(buf: &mut Bytes) -> DecodeResult<RouteDistinguisher> {
    RouteDistinguisher::decode(buf)
        .map_err(|_| UpdateMessageError::InvalidNetworkField.into())
}

// Encodes an optional IP address preceded by its length in bits, zero
// meaning absent.
fn encode_opt_addr(buf: &mut BytesMut, addr: &Option<IpAddr>) {
    match addr {
        None => buf.put_u8(0),
        Some(IpAddr::V4(addr)) => {
            buf.put_u8(32);
            buf.put_ipv4(addr);
        }
        Some(IpAddr::V6(addr)) => {
            buf.put_u8(128);
            buf.put_ipv6(addr);
        }
    }
}

fn decode_opt_addr(buf: &mut Bytes) -> DecodeResult<Option<IpAddr>> {
    let bits = buf.try_get_u8()?;
    match bits {
        0 => Ok(None),
        32 => Ok(Some(IpAddr::V4(buf.try_get_ipv4()?))),
        128 => Ok(Some(IpAddr::V6(buf.try_get_ipv6()?))),
        _ => Err(UpdateMessageError::InvalidNetworkField.into()),
    }
}
