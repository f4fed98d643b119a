//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use bgpio_utils::bgp::{AfiSafi, RouteDistinguisher};
use bgpio_utils::ip::AddressFamily;
use bgpio_utils::ip::{Ipv4NetworkExt, Ipv6NetworkExt};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::packet::error::{DecodeResult, UpdateMessageError};

// FlowSpec NLRIs of 240 bytes or more use the two-byte length encoding
// (RFC 8955 section 4).
const LONG_LENGTH_THRESHOLD: usize = 0xF0;

//
// FlowSpec reachability (RFC 8955/8956): a length-prefixed, ordered set of
// typed traffic-filtering components. The VPN flavor carries a Route
// Distinguisher ahead of the components.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[skip_serializing_none]
#[derive(Deserialize, Serialize)]
pub struct FlowspecNlri {
    pub af: AddressFamily,
    pub rd: Option<RouteDistinguisher>,
    pub rules: Vec<FlowRule>,
}

// FlowSpec component types.
//
// IANA registry:
// https://www.iana.org/assignments/flow-spec-component-types
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum FlowComponentType {
    DestinationPrefix = 1,
    SourcePrefix = 2,
    Protocol = 3,
    Port = 4,
    DestinationPort = 5,
    SourcePort = 6,
    IcmpType = 7,
    IcmpCode = 8,
    TcpFlags = 9,
    PacketLength = 10,
    Dscp = 11,
    Fragment = 12,
}

// A single traffic-filtering component.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum FlowRule {
    DestinationPrefix { prefix: IpNetwork, offset: u8 },
    SourcePrefix { prefix: IpNetwork, offset: u8 },
    Protocol(Vec<NumericOp>),
    Port(Vec<NumericOp>),
    DestinationPort(Vec<NumericOp>),
    SourcePort(Vec<NumericOp>),
    IcmpType(Vec<NumericOp>),
    IcmpCode(Vec<NumericOp>),
    TcpFlags(Vec<BinaryOp>),
    PacketLength(Vec<NumericOp>),
    Dscp(Vec<NumericOp>),
    Fragment(Vec<BinaryOp>),
}

//
// Numeric operator.
//
// Encoding format:
//
//  0   1   2   3   4   5   6   7
// +---+---+---+---+---+---+---+---+
// | e | a |  len  | 0 |lt |gt |eq |
// +---+---+---+---+---+---+---+---+
//
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct NumericOp {
    pub and: bool,
    pub lt: bool,
    pub gt: bool,
    pub eq: bool,
    pub value: u64,
}

//
// Bitmask operator (tcp-flags and fragment components).
//
// Encoding format:
//
//  0   1   2   3   4   5   6   7
// +---+---+---+---+---+---+---+---+
// | e | a |  len  | 0 | 0 |not| m |
// +---+---+---+---+---+---+---+---+
//
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct BinaryOp {
    pub and: bool,
    pub not: bool,
    pub match_all: bool,
    pub value: u16,
}

const OP_END: u8 = 0x80;
const OP_AND: u8 = 0x40;
const OP_LEN_MASK: u8 = 0x30;
const OP_LT: u8 = 0x04;
const OP_GT: u8 = 0x02;
const OP_EQ: u8 = 0x01;
const OP_NOT: u8 = 0x02;
const OP_MATCH: u8 = 0x01;

// ===== impl FlowspecNlri =====

impl FlowspecNlri {
    // Builds a new FlowSpec NLRI, ordering the components by type as the
    // wire encoding requires.
    pub fn new(
        af: AddressFamily,
        rd: Option<RouteDistinguisher>,
        mut rules: Vec<FlowRule>,
    ) -> FlowspecNlri {
        rules.sort_by_key(|rule| rule.component_type() as u8);
        FlowspecNlri { af, rd, rules }
    }

    pub(crate) fn afi_safi(&self) -> AfiSafi {
        match (self.af, self.rd.is_some()) {
            (AddressFamily::Ipv4, false) => AfiSafi::Ipv4Flowspec,
            (AddressFamily::Ipv6, false) => AfiSafi::Ipv6Flowspec,
            (AddressFamily::Ipv4, true) => AfiSafi::Ipv4FlowspecVpn,
            (AddressFamily::Ipv6, true) => AfiSafi::Ipv6FlowspecVpn,
        }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        // Encode RD and components into a scratch buffer first; the length
        // encoding depends on the total size.
        let mut body = BytesMut::new();
        if let Some(rd) = &self.rd {
            rd.encode(&mut body);
        }
        for rule in &self.rules {
            rule.encode(&mut body, self.af);
        }

        if body.len() < LONG_LENGTH_THRESHOLD {
            buf.put_u8(body.len() as u8);
        } else {
            buf.put_u16(0xF000 | body.len() as u16);
        }
        buf.put_slice(&body);
    }

    pub(crate) fn decode(
        afi_safi: AfiSafi,
        buf: &mut Bytes,
    ) -> DecodeResult<FlowspecNlri> {
        let af = match afi_safi {
            AfiSafi::Ipv6Flowspec | AfiSafi::Ipv6FlowspecVpn => {
                AddressFamily::Ipv6
            }
            _ => AddressFamily::Ipv4,
        };
        let vpn = matches!(
            afi_safi,
            AfiSafi::Ipv4FlowspecVpn | AfiSafi::Ipv6FlowspecVpn
        );

        // Parse the one- or two-byte length.
        let first = buf.try_get_u8()?;
        let nlri_len = if first >= LONG_LENGTH_THRESHOLD as u8 {
            let second = buf.try_get_u8()?;
            (((first & 0x0F) as usize) << 8) | second as usize
        } else {
            first as usize
        };
        if nlri_len > buf.remaining() {
            return Err(UpdateMessageError::InvalidNetworkField.into());
        }
        let mut buf = buf.copy_to_bytes(nlri_len);

        let mut rd = None;
        if vpn {
            rd = Some(
                RouteDistinguisher::decode(&mut buf)
                    .map_err(|_| UpdateMessageError::InvalidNetworkField)?,
            );
        }

        // Parse components, enforcing the strictly-increasing type order.
        let mut rules = Vec::new();
        let mut last_type = 0;
        while buf.remaining() > 0 {
            let comp_type = buf.try_get_u8()?;
            if comp_type <= last_type {
                return Err(UpdateMessageError::InvalidNetworkField.into());
            }
            last_type = comp_type;

            let Some(comp_type) = FlowComponentType::from_u8(comp_type) else {
                return Err(UpdateMessageError::InvalidNetworkField.into());
            };
            let rule = FlowRule::decode(comp_type, af, &mut buf)?;
            rules.push(rule);
        }

        Ok(FlowspecNlri { af, rd, rules })
    }
}

impl std::fmt::Display for FlowspecNlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "flow")?;
        if let Some(rd) = &self.rd {
            write!(f, " rd {}", rd)?;
        }
        for rule in &self.rules {
            write!(f, " {}", rule)?;
        }
        Ok(())
    }
}

// ===== impl FlowRule =====

impl FlowRule {
    pub fn component_type(&self) -> FlowComponentType {
        match self {
            FlowRule::DestinationPrefix { .. } => {
                FlowComponentType::DestinationPrefix
            }
            FlowRule::SourcePrefix { .. } => FlowComponentType::SourcePrefix,
            FlowRule::Protocol(_) => FlowComponentType::Protocol,
            FlowRule::Port(_) => FlowComponentType::Port,
            FlowRule::DestinationPort(_) => FlowComponentType::DestinationPort,
            FlowRule::SourcePort(_) => FlowComponentType::SourcePort,
            FlowRule::IcmpType(_) => FlowComponentType::IcmpType,
            FlowRule::IcmpCode(_) => FlowComponentType::IcmpCode,
            FlowRule::TcpFlags(_) => FlowComponentType::TcpFlags,
            FlowRule::PacketLength(_) => FlowComponentType::PacketLength,
            FlowRule::Dscp(_) => FlowComponentType::Dscp,
            FlowRule::Fragment(_) => FlowComponentType::Fragment,
        }
    }

    fn encode(&self, buf: &mut BytesMut, af: AddressFamily) {
        buf.put_u8(self.component_type() as u8);

        match self {
            FlowRule::DestinationPrefix { prefix, offset }
            | FlowRule::SourcePrefix { prefix, offset } => {
                let plen = prefix.prefix();
                buf.put_u8(plen);
                if af == AddressFamily::Ipv6 {
                    buf.put_u8(*offset);
                }

                // The pattern covers the bits between the offset and the
                // prefix length.
                let start = *offset as usize / 8;
                let end = (plen as usize).div_ceil(8);
                match prefix {
                    IpNetwork::V4(prefix) => {
                        buf.put(&prefix.ip().octets()[start..end]);
                    }
                    IpNetwork::V6(prefix) => {
                        buf.put(&prefix.ip().octets()[start..end]);
                    }
                }
            }
            FlowRule::Protocol(ops)
            | FlowRule::Port(ops)
            | FlowRule::DestinationPort(ops)
            | FlowRule::SourcePort(ops)
            | FlowRule::IcmpType(ops)
            | FlowRule::IcmpCode(ops)
            | FlowRule::PacketLength(ops)
            | FlowRule::Dscp(ops) => {
                for (pos, op) in ops.iter().enumerate() {
                    op.encode(buf, pos == ops.len() - 1);
                }
            }
            FlowRule::TcpFlags(ops) | FlowRule::Fragment(ops) => {
                for (pos, op) in ops.iter().enumerate() {
                    op.encode(buf, pos == ops.len() - 1);
                }
            }
        }
    }

    fn decode(
        comp_type: FlowComponentType,
        af: AddressFamily,
        buf: &mut Bytes,
    ) -> DecodeResult<FlowRule> {
        let rule = match comp_type {
            FlowComponentType::DestinationPrefix
            | FlowComponentType::SourcePrefix => {
                let plen = buf.try_get_u8()?;
                let mut offset = 0;
                if af == AddressFamily::Ipv6 {
                    offset = buf.try_get_u8()?;
                    // Only byte-aligned pattern offsets are supported.
                    if offset % 8 != 0 || offset > plen {
                        return Err(
                            UpdateMessageError::InvalidNetworkField.into()
                        );
                    }
                }

                let start = offset as usize / 8;
                let end = (plen as usize).div_ceil(8);
                if end - start > buf.remaining() {
                    return Err(UpdateMessageError::InvalidNetworkField.into());
                }
                let prefix = match af {
                    AddressFamily::Ipv4 => {
                        if plen > Ipv4Network::MAX_PREFIXLEN {
                            return Err(
                                UpdateMessageError::InvalidNetworkField.into()
                            );
                        }
                        let mut bytes = [0; 4];
                        buf.copy_to_slice(&mut bytes[start..end]);
                        Ipv4Network::new(bytes.into(), plen)
                            .map(IpNetwork::V4)
                            .map_err(|_| {
                                UpdateMessageError::InvalidNetworkField
                            })?
                    }
                    AddressFamily::Ipv6 => {
                        if plen > Ipv6Network::MAX_PREFIXLEN {
                            return Err(
                                UpdateMessageError::InvalidNetworkField.into()
                            );
                        }
                        let mut bytes = [0; 16];
                        buf.copy_to_slice(&mut bytes[start..end]);
                        Ipv6Network::new(bytes.into(), plen)
                            .map(IpNetwork::V6)
                            .map_err(|_| {
                                UpdateMessageError::InvalidNetworkField
                            })?
                    }
                };
                match comp_type {
                    FlowComponentType::DestinationPrefix => {
                        FlowRule::DestinationPrefix { prefix, offset }
                    }
                    _ => FlowRule::SourcePrefix { prefix, offset },
                }
            }
            FlowComponentType::TcpFlags | FlowComponentType::Fragment => {
                let ops = BinaryOp::decode_list(buf)?;
                match comp_type {
                    FlowComponentType::TcpFlags => FlowRule::TcpFlags(ops),
                    _ => FlowRule::Fragment(ops),
                }
            }
            _ => {
                let ops = NumericOp::decode_list(buf)?;
                match comp_type {
                    FlowComponentType::Protocol => FlowRule::Protocol(ops),
                    FlowComponentType::Port => FlowRule::Port(ops),
                    FlowComponentType::DestinationPort => {
                        FlowRule::DestinationPort(ops)
                    }
                    FlowComponentType::SourcePort => FlowRule::SourcePort(ops),
                    FlowComponentType::IcmpType => FlowRule::IcmpType(ops),
                    FlowComponentType::IcmpCode => FlowRule::IcmpCode(ops),
                    FlowComponentType::PacketLength => {
                        FlowRule::PacketLength(ops)
                    }
                    _ => FlowRule::Dscp(ops),
                }
            }
        };

        Ok(rule)
    }
}

impl std::fmt::Display for FlowRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keyword = match self {
            FlowRule::DestinationPrefix { .. } => "destination",
            FlowRule::SourcePrefix { .. } => "source",
            FlowRule::Protocol(_) => "protocol",
            FlowRule::Port(_) => "port",
            FlowRule::DestinationPort(_) => "destination-port",
            FlowRule::SourcePort(_) => "source-port",
            FlowRule::IcmpType(_) => "icmp-type",
            FlowRule::IcmpCode(_) => "icmp-code",
            FlowRule::TcpFlags(_) => "tcp-flags",
            FlowRule::PacketLength(_) => "packet-length",
            FlowRule::Dscp(_) => "dscp",
            FlowRule::Fragment(_) => "fragment",
        };
        write!(f, "{}", keyword)?;

        match self {
            FlowRule::DestinationPrefix { prefix, .. }
            | FlowRule::SourcePrefix { prefix, .. } => {
                write!(f, " {}", prefix)
            }
            FlowRule::Protocol(ops)
            | FlowRule::Port(ops)
            | FlowRule::DestinationPort(ops)
            | FlowRule::SourcePort(ops)
            | FlowRule::IcmpType(ops)
            | FlowRule::IcmpCode(ops)
            | FlowRule::PacketLength(ops)
            | FlowRule::Dscp(ops) => {
                for op in ops {
                    write!(f, " {}", op)?;
                }
                Ok(())
            }
            FlowRule::TcpFlags(ops) | FlowRule::Fragment(ops) => {
                for op in ops {
                    write!(f, " {}", op)?;
                }
                Ok(())
            }
        }
    }
}

// ===== impl NumericOp =====

impl NumericOp {
    pub fn eq(value: u64) -> NumericOp {
        NumericOp {
            and: false,
            lt: false,
            gt: false,
            eq: true,
            value,
        }
    }

    fn encode(&self, buf: &mut BytesMut, last: bool) {
        let value_len = value_wire_len(self.value);
        let mut op = (value_len_bits(value_len)) << 4;
        if last {
            op |= OP_END;
        }
        if self.and {
            op |= OP_AND;
        }
        if self.lt {
            op |= OP_LT;
        }
        if self.gt {
            op |= OP_GT;
        }
        if self.eq {
            op |= OP_EQ;
        }
        buf.put_u8(op);
        put_uint(buf, self.value, value_len);
    }

    fn decode_list(buf: &mut Bytes) -> DecodeResult<Vec<NumericOp>> {
        let mut ops = Vec::new();
        loop {
            let op = buf.try_get_u8()?;
            let value_len = 1 << ((op & OP_LEN_MASK) >> 4);
            let value = get_uint(buf, value_len)?;
            ops.push(NumericOp {
                and: op & OP_AND != 0,
                lt: op & OP_LT != 0,
                gt: op & OP_GT != 0,
                eq: op & OP_EQ != 0,
                value,
            });
            if op & OP_END != 0 {
                break;
            }
        }
        Ok(ops)
    }
}

impl std::fmt::Display for NumericOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.and {
            write!(f, "&")?;
        }
        match (self.lt, self.gt, self.eq) {
            (false, false, true) => write!(f, "={}", self.value),
            (true, false, false) => write!(f, "<{}", self.value),
            (true, false, true) => write!(f, "<={}", self.value),
            (false, true, false) => write!(f, ">{}", self.value),
            (false, true, true) => write!(f, ">={}", self.value),
            (true, true, false) => write!(f, "!={}", self.value),
            _ => write!(f, "{}", self.value),
        }
    }
}

// ===== impl BinaryOp =====

impl BinaryOp {
    pub fn match_value(value: u16) -> BinaryOp {
        BinaryOp {
            and: false,
            not: false,
            match_all: true,
            value,
        }
    }

    fn encode(&self, buf: &mut BytesMut, last: bool) {
        let value_len = if self.value > 0xFF { 2 } else { 1 };
        let mut op = (value_len_bits(value_len)) << 4;
        if last {
            op |= OP_END;
        }
        if self.and {
            op |= OP_AND;
        }
        if self.not {
            op |= OP_NOT;
        }
        if self.match_all {
            op |= OP_MATCH;
        }
        buf.put_u8(op);
        put_uint(buf, self.value as u64, value_len);
    }

    fn decode_list(buf: &mut Bytes) -> DecodeResult<Vec<BinaryOp>> {
        let mut ops = Vec::new();
        loop {
            let op = buf.try_get_u8()?;
            let value_len = 1 << ((op & OP_LEN_MASK) >> 4);
            let value = get_uint(buf, value_len)?;
            ops.push(BinaryOp {
                and: op & OP_AND != 0,
                not: op & OP_NOT != 0,
                match_all: op & OP_MATCH != 0,
                value: value as u16,
            });
            if op & OP_END != 0 {
                break;
            }
        }
        Ok(ops)
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.and {
            write!(f, "&")?;
        }
        if self.not {
            write!(f, "!")?;
        }
        write!(f, "0x{:x}", self.value)
    }
}

// ===== helper functions =====

// Smallest power-of-two byte count able to carry the value.
fn value_wire_len(value: u64) -> usize {
    match value {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFFFF_FFFF => 4,
        _ => 8,
    }
}

fn value_len_bits(value_len: usize) -> u8 {
    match value_len {
        1 => 0b00,
        2 => 0b01,
        4 => 0b10,
        _ => 0b11,
    }
}

fn put_uint(buf: &mut BytesMut, value: u64, len: usize) {
    let bytes = value.to_be_bytes();
    buf.put_slice(&bytes[8 - len..]);
}

fn get_uint(buf: &mut Bytes, len: usize) -> DecodeResult<u64> {
    if len > buf.remaining() {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    let mut value = 0u64;
    for _ in 0..len {
        value = (value << 8) | buf.get_u8() as u64;
    }
    Ok(value)
}
