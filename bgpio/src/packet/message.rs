//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, Ipv6Addr};

use bgpio_utils::bgp::AfiSafi;
use bgpio_utils::bytes::{BytesExt, BytesMutExt, TLS_BUF};
use bgpio_utils::ip::{Ipv4AddrExt, Ipv6AddrExt};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use enum_as_inner::EnumAsInner;
use num_traits::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::neighbor::PeerType;
use crate::packet::attribute::Attrs;
use crate::packet::consts::{
    AddPathMode, AttrFlags, AttrType, BGP_VERSION, CapabilityCode, ErrorCode,
    MessageHeaderErrorSubcode, MessageType, OpenMessageErrorSubcode,
    OpenParamType, OperationalCode, RouteRefreshSubtype,
    UpdateMessageErrorSubcode,
};
use crate::packet::error::{
    AttrError, DecodeError, DecodeResult, MessageHeaderError, OpenMessageError,
    UpdateMessageError,
};
use crate::packet::nlri::Nlri;

//
// BGP message.
//
// Encoding format (message header):
//
// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                                                               |
// +                                                               +
// |                                                               |
// +                                                               +
// |                           Marker                              |
// +                                                               +
// |                                                               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |          Length               |      Type     |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Message {
    Open(OpenMsg),
    Update(Box<UpdateMsg>),
    Notification(NotificationMsg),
    Keepalive(KeepaliveMsg),
    RouteRefresh(RouteRefreshMsg),
    Operational(OperationalMsg),
}

//
// OPEN Message.
//
// Encoding format (message body):
//
// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+
// |    Version    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |     My Autonomous System      |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |           Hold Time           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         BGP Identifier                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | Opt Parm Len  |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                                                               |
// |             Optional Parameters (variable)                    |
// |                                                               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct OpenMsg {
    pub version: u8,
    pub my_as: u16,
    pub holdtime: u16,
    pub identifier: Ipv4Addr,
    pub capabilities: BTreeSet<Capability>,
}

//
// Capabilities Optional Parameter.
//
// Encoding format:
//
// +------------------------------+
// | Capability Code (1 octet)    |
// +------------------------------+
// | Capability Length (1 octet)  |
// +------------------------------+
// | Capability Value (variable)  |
// ~                              ~
// +------------------------------+
//
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(EnumAsInner)]
#[derive(Deserialize, Serialize)]
pub enum Capability {
    MultiProtocol {
        afi_safi: AfiSafi,
    },
    RouteRefresh,
    ExtendedMessage,
    GracefulRestart {
        // Restart-state and graceful-notification flags.
        flags: u8,
        // Restart time in seconds (12 bits on the wire).
        restart_time: u16,
        // Per-family forwarding-state flags.
        families: Vec<(AfiSafi, u8)>,
    },
    FourOctetAsNumber {
        asn: u32,
    },
    AddPath(BTreeSet<AddPathTuple>),
    EnhancedRouteRefresh,
    Operational,
}

// This is a stripped down version of `Capability`, containing only data that
// is relevant in terms of capability negotiation. Add-path is resolved into
// its two effective directions since send and receive are negotiated
// independently per family.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(EnumAsInner)]
#[derive(Deserialize, Serialize)]
pub enum NegotiatedCapability {
    MultiProtocol { afi_safi: AfiSafi },
    RouteRefresh,
    EnhancedRouteRefresh,
    ExtendedMessage,
    GracefulRestart,
    FourOctetAsNumber,
    AddPathTx(AfiSafi),
    AddPathRx(AfiSafi),
    Operational,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AddPathTuple {
    pub afi_safi: AfiSafi,
    pub mode: AddPathMode,
}

//
// UPDATE Message.
//
// Encoding format (message body):
//
// +-----------------------------------------------------+
// |   Withdrawn Routes Length (2 octets)                |
// +-----------------------------------------------------+
// |   Withdrawn Routes (variable)                       |
// +-----------------------------------------------------+
// |   Total Path Attribute Length (2 octets)            |
// +-----------------------------------------------------+
// |   Path Attributes (variable)                        |
// +-----------------------------------------------------+
// |   Network Layer Reachability Information (variable) |
// +-----------------------------------------------------+
//
// Top-level NLRIs are always IPv4 unicast; every other family travels
// inside the MP_REACH_NLRI/MP_UNREACH_NLRI attributes.
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[skip_serializing_none]
#[derive(Deserialize, Serialize)]
pub struct UpdateMsg {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub reach: Vec<Nlri>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub unreach: Vec<Nlri>,
    pub mp_reach: Option<MpReachNlri>,
    pub mp_unreach: Option<MpUnreachNlri>,
    pub attrs: Option<Attrs>,
}

//
// MP_REACH_NLRI attribute payload (RFC 4760).
//
// Encoding format:
//
// +---------------------------------------------------------+
// | Address Family Identifier (2 octets)                    |
// +---------------------------------------------------------+
// | Subsequent Address Family Identifier (1 octet)          |
// +---------------------------------------------------------+
// | Length of Next Hop Network Address (1 octet)            |
// +---------------------------------------------------------+
// | Network Address of Next Hop (variable)                  |
// +---------------------------------------------------------+
// | Reserved (1 octet)                                      |
// +---------------------------------------------------------+
// | Network Layer Reachability Information (variable)       |
// +---------------------------------------------------------+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MpReachNlri {
    pub afi_safi: AfiSafi,
    pub nexthop: MpNextHop,
    pub nlris: Vec<Nlri>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MpUnreachNlri {
    pub afi_safi: AfiSafi,
    pub nlris: Vec<Nlri>,
}

// Next hop carried inside MP_REACH_NLRI. The VPN forms prepend an 8-byte
// route distinguisher of zeroes; FlowSpec routes carry no next hop at all.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum MpNextHop {
    None,
    Ipv4(Ipv4Addr),
    VpnIpv4(Ipv4Addr),
    Ipv6 {
        global: Ipv6Addr,
        link_local: Option<Ipv6Addr>,
    },
    VpnIpv6(Ipv6Addr),
}

//
// NOTIFICATION Message.
//
// Encoding format (message body):
//
// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | Error code    | Error subcode |   Data (variable)             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct NotificationMsg {
    pub error_code: u8,
    pub error_subcode: u8,
    pub data: Vec<u8>,
}

//
// KEEPALIVE Message.
//
// A KEEPALIVE message consists of only the message header and has a length of
// 19 octets.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct KeepaliveMsg {}

//
// ROUTE-REFRESH Message (RFC 2918, RFC 7313).
//
// Encoding format (message body):
//
// 0       7      15      23      31
// +-------+-------+-------+-------+
// |      AFI      |Subtype| SAFI  |
// +-------+-------+-------+-------+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteRefreshMsg {
    pub afi: u16,
    pub safi: u8,
    pub subtype: RouteRefreshSubtype,
}

//
// Operational Message (draft-ietf-idr-operational-message).
//
// Encoding format (message body):
//
// +------------------------------+
// | Op Code (2 octets)           |
// +------------------------------+
// | Length (2 octets)            |
// +------------------------------+
// | AFI (2 octets)               |
// +------------------------------+
// | SAFI (1 octet)               |
// +------------------------------+
// | Data (variable)              |
// +------------------------------+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct OperationalMsg {
    pub code: OperationalCode,
    pub afi: u16,
    pub safi: u8,
    pub data: Vec<u8>,
}

// BGP message encoding context.
#[derive(Debug)]
pub struct EncodeCxt {
    pub peer_type: PeerType,
    pub capabilities: BTreeSet<NegotiatedCapability>,
}

// BGP message decoding context.
#[derive(Debug)]
pub struct DecodeCxt {
    pub peer_type: PeerType,
    pub peer_as: u32,
    pub capabilities: BTreeSet<NegotiatedCapability>,
    // Cache of the most recently parsed path-attribute block. Peers
    // commonly announce many prefixes under one attribute set; identical
    // attribute bytes reuse the previously parsed collection.
    pub attr_cache: Option<AttrCache>,
}

#[derive(Debug)]
pub struct AttrCache {
    pub bytes: Bytes,
    pub attrs: Option<Attrs>,
    pub nexthop: Option<Ipv4Addr>,
    pub mp_reach: Option<MpReachNlri>,
    pub mp_unreach: Option<MpUnreachNlri>,
}

// ===== impl Message =====

impl Message {
    pub const MIN_LEN: u16 = 19;
    pub const MAX_LEN: u16 = 4096;
    // RFC 8654 extended maximum, valid only when both sides advertised the
    // Extended Message capability.
    pub const MAX_LEN_EXT: u16 = 65535;
    const MSG_LEN_POS: std::ops::Range<usize> = 16..18;

    // Encodes BGP message into a bytes buffer.
    pub fn encode(&self, cxt: &EncodeCxt) -> Bytes {
        TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();

            // Marker field.
            buf.put_u128(u128::MAX);
            // The length field will be initialized later.
            buf.put_u16(0);

            // Message type and body.
            match self {
                Message::Open(msg) => msg.encode(&mut buf),
                Message::Update(msg) => msg.encode(&mut buf, cxt),
                Message::Notification(msg) => msg.encode(&mut buf),
                Message::Keepalive(msg) => msg.encode(&mut buf),
                Message::RouteRefresh(msg) => msg.encode(&mut buf),
                Message::Operational(msg) => msg.encode(&mut buf),
            }

            // Rewrite message length.
            let msg_len = buf.len() as u16;
            buf[Self::MSG_LEN_POS].copy_from_slice(&msg_len.to_be_bytes());

            buf.clone().freeze()
        })
    }

    // Decode buffer into a BGP message.
    //
    // This function panics if the provided buffer doesn't contain an entire
    // message.
    pub fn decode(data: &[u8], cxt: &mut DecodeCxt) -> DecodeResult<Self> {
        let mut buf = Bytes::copy_from_slice(data);

        // Parse and validate marker.
        let marker = buf.get_u128();
        if marker != u128::MAX {
            return Err(MessageHeaderError::ConnectionNotSynchronized.into());
        }

        // Parse and validate message length.
        let msg_len = buf.get_u16();
        if msg_len < Self::MIN_LEN || msg_len > cxt.max_msg_len() {
            return Err(MessageHeaderError::BadMessageLength(msg_len).into());
        }

        // Parse message type.
        let msg_type = buf.get_u8();
        let Some(msg_etype) = MessageType::from_u8(msg_type) else {
            return Err(MessageHeaderError::BadMessageType(msg_type).into());
        };

        // Parse message body.
        let min_msg_len = match msg_etype {
            MessageType::Open => OpenMsg::MIN_LEN,
            MessageType::Update => UpdateMsg::MIN_LEN,
            MessageType::Notification => NotificationMsg::MIN_LEN,
            MessageType::Keepalive => KeepaliveMsg::LEN,
            MessageType::RouteRefresh => RouteRefreshMsg::LEN,
            MessageType::Operational => OperationalMsg::MIN_LEN,
        };
        if msg_len < min_msg_len {
            return Err(MessageHeaderError::BadMessageLength(msg_len).into());
        }
        match msg_etype {
            MessageType::Open => {
                let msg = OpenMsg::decode(&mut buf)?;
                Ok(Message::Open(msg))
            }
            MessageType::Update => {
                let msg = UpdateMsg::decode(&mut buf, cxt)?;
                Ok(Message::Update(Box::new(msg)))
            }
            MessageType::Notification => {
                let msg = NotificationMsg::decode(&mut buf)?;
                Ok(Message::Notification(msg))
            }
            MessageType::Keepalive => {
                let msg = KeepaliveMsg::decode(&mut buf)?;
                Ok(Message::Keepalive(msg))
            }
            MessageType::RouteRefresh => {
                let msg = RouteRefreshMsg::decode(&mut buf)?;
                Ok(Message::RouteRefresh(msg))
            }
            MessageType::Operational => {
                let msg = OperationalMsg::decode(&mut buf)?;
                Ok(Message::Operational(msg))
            }
        }
    }

    // Parses the given buffer to determine if it contains a complete BGP
    // message, and returns the length of the message if successful.
    pub fn get_message_len(data: &[u8]) -> Option<usize> {
        // Validate that the buffer contains sufficient space for at least the
        // message header.
        let buf_size = data.len();
        if buf_size < Self::MIN_LEN as usize {
            return None;
        }

        // Ensure the buffer is big enough to hold the entire message.
        let mut buf = Bytes::copy_from_slice(&data[0..Self::MIN_LEN as usize]);
        let _marker = buf.get_u128();
        let msg_len = buf.get_u16();
        if msg_len < Self::MIN_LEN || msg_len as usize > buf_size {
            return None;
        }

        // Return the message size.
        Some(msg_len as usize)
    }
}

// ===== impl OpenMsg =====

impl OpenMsg {
    const MIN_LEN: u16 = 29;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::Open as u8);
        buf.put_u8(self.version);
        buf.put_u16(self.my_as);
        buf.put_u16(self.holdtime);
        buf.put_ipv4(&self.identifier);

        // Capabilities.
        let opt_param_len_pos = buf.len();
        buf.put_u8(0);
        for capability in &self.capabilities {
            buf.put_u8(OpenParamType::Capabilities as u8);

            // The "Parm. Length" field will be initialized later.
            let param_len_pos = buf.len();
            buf.put_u8(0);

            // Encode individual capability.
            capability.encode(buf);

            // Rewrite the "Parm. Length" field.
            let param_len = buf.len() - param_len_pos - 1;
            buf[param_len_pos] = param_len as u8;
        }

        // Rewrite the "Opt Parm Len" field.
        let opt_param_len = buf.len() - opt_param_len_pos - 1;
        buf[opt_param_len_pos] = opt_param_len as u8;
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        // Parse and validate BGP version.
        let version = buf.get_u8();
        if version != BGP_VERSION {
            return Err(
                OpenMessageError::UnsupportedVersion(BGP_VERSION).into()
            );
        }

        // Parse and validate ASN.
        let my_as = buf.get_u16();
        if my_as == 0 {
            return Err(OpenMessageError::BadPeerAs.into());
        }

        // Parse and validate hold time. Values of one and two seconds are
        // forbidden; the negotiated minimum is clamped at three.
        let holdtime = buf.get_u16();
        if holdtime == 1 || holdtime == 2 {
            return Err(OpenMessageError::UnacceptableHoldTime.into());
        }

        // Parse and validate BGP identifier.
        let identifier = buf.get_ipv4();
        if identifier.is_unspecified()
            || identifier.is_multicast()
            || identifier.is_broadcast()
        {
            return Err(OpenMessageError::BadBgpIdentifier.into());
        }

        // Parse and validate optional parameters.
        let mut capabilities = BTreeSet::new();
        let opt_param_len = buf.get_u8();
        if opt_param_len as usize > buf.remaining() {
            return Err(OpenMessageError::MalformedOptParam.into());
        }
        let mut buf_opts = buf.copy_to_bytes(opt_param_len as usize);
        while buf_opts.remaining() > 0 {
            if buf_opts.remaining() < 2 {
                return Err(OpenMessageError::MalformedOptParam.into());
            }
            let param_type = buf_opts.get_u8();
            let param_len = buf_opts.get_u8();
            if param_len as usize > buf_opts.remaining() {
                return Err(OpenMessageError::MalformedOptParam.into());
            }
            let mut buf_param_value =
                buf_opts.copy_to_bytes(param_len as usize);

            // Parse and validate capabilities.
            match OpenParamType::from_u8(param_type) {
                Some(OpenParamType::Capabilities) => {
                    while buf_param_value.remaining() > 0 {
                        if let Some(cap) =
                            Capability::decode(&mut buf_param_value)?
                        {
                            capabilities.insert(cap);
                        }
                    }
                }
                None => {
                    return Err(OpenMessageError::UnsupportedOptParam.into());
                }
            }
        }

        Ok(OpenMsg {
            version,
            my_as,
            holdtime,
            identifier,
            capabilities,
        })
    }

    pub fn real_as(&self) -> u32 {
        self.capabilities
            .iter()
            .find_map(|cap| {
                if let Capability::FourOctetAsNumber { asn } = cap {
                    Some(*asn)
                } else {
                    None
                }
            })
            .unwrap_or(self.my_as as u32)
    }
}

// ===== impl Capability =====

impl Capability {
    fn encode(&self, buf: &mut BytesMut) {
        let start_pos = buf.len();

        match self {
            Capability::MultiProtocol { afi_safi } => {
                buf.put_u8(CapabilityCode::MultiProtocol as u8);
                buf.put_u8(0);
                buf.put_u16(afi_safi.afi());
                buf.put_u8(0);
                buf.put_u8(afi_safi.safi());
            }
            Capability::RouteRefresh => {
                buf.put_u8(CapabilityCode::RouteRefresh as u8);
                buf.put_u8(0);
            }
            Capability::ExtendedMessage => {
                buf.put_u8(CapabilityCode::ExtendedMessage as u8);
                buf.put_u8(0);
            }
            Capability::GracefulRestart {
                flags,
                restart_time,
                families,
            } => {
                buf.put_u8(CapabilityCode::GracefulRestart as u8);
                buf.put_u8(0);
                buf.put_u16(
                    ((*flags as u16) << 12) | (restart_time & 0x0FFF),
                );
                for (afi_safi, fam_flags) in families {
                    buf.put_u16(afi_safi.afi());
                    buf.put_u8(afi_safi.safi());
                    buf.put_u8(*fam_flags);
                }
            }
            Capability::FourOctetAsNumber { asn } => {
                buf.put_u8(CapabilityCode::FourOctetAsNumber as u8);
                buf.put_u8(0);
                buf.put_u32(*asn);
            }
            Capability::AddPath(tuples) => {
                buf.put_u8(CapabilityCode::AddPath as u8);
                buf.put_u8(0);
                for tuple in tuples {
                    buf.put_u16(tuple.afi_safi.afi());
                    buf.put_u8(tuple.afi_safi.safi());
                    buf.put_u8(tuple.mode as u8);
                }
            }
            Capability::EnhancedRouteRefresh => {
                buf.put_u8(CapabilityCode::EnhancedRouteRefresh as u8);
                buf.put_u8(0);
            }
            Capability::Operational => {
                buf.put_u8(CapabilityCode::Operational as u8);
                buf.put_u8(0);
            }
        }

        // Rewrite the "Capability Length" field.
        let cap_len = buf.len() - start_pos - 2;
        buf[start_pos + 1] = cap_len as u8;
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Option<Self>> {
        if buf.remaining() < 2 {
            return Err(OpenMessageError::MalformedOptParam.into());
        }
        let cap_type = buf.get_u8();
        let cap_len = buf.get_u8();
        if cap_len as usize > buf.remaining() {
            return Err(OpenMessageError::MalformedOptParam.into());
        }

        let mut buf_cap = buf.copy_to_bytes(cap_len as usize);
        let cap = match CapabilityCode::from_u8(cap_type) {
            Some(CapabilityCode::MultiProtocol) => {
                if cap_len != 4 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                let afi = buf_cap.get_u16();
                let _reserved = buf_cap.get_u8();
                let safi = buf_cap.get_u8();
                let Some(afi_safi) = AfiSafi::from_pair(afi, safi) else {
                    // Ignore unknown address family.
                    return Ok(None);
                };

                Capability::MultiProtocol { afi_safi }
            }
            Some(CapabilityCode::RouteRefresh) => {
                if cap_len != 0 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                Capability::RouteRefresh
            }
            Some(CapabilityCode::ExtendedMessage) => {
                if cap_len != 0 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                Capability::ExtendedMessage
            }
            Some(CapabilityCode::GracefulRestart) => {
                if cap_len < 2 || (cap_len - 2) % 4 != 0 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                let word = buf_cap.get_u16();
                let flags = (word >> 12) as u8;
                let restart_time = word & 0x0FFF;
                let mut families = Vec::new();
                while buf_cap.remaining() > 0 {
                    let afi = buf_cap.get_u16();
                    let safi = buf_cap.get_u8();
                    let fam_flags = buf_cap.get_u8();
                    // Ignore unknown address families.
                    if let Some(afi_safi) = AfiSafi::from_pair(afi, safi) {
                        families.push((afi_safi, fam_flags));
                    }
                }
                Capability::GracefulRestart {
                    flags,
                    restart_time,
                    families,
                }
            }
            Some(CapabilityCode::FourOctetAsNumber) => {
                if cap_len != 4 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                let asn = buf_cap.get_u32();
                Capability::FourOctetAsNumber { asn }
            }
            Some(CapabilityCode::AddPath) => {
                if cap_len % 4 != 0 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                let mut tuples = BTreeSet::new();
                while buf_cap.remaining() > 0 {
                    let afi = buf_cap.get_u16();
                    let safi = buf_cap.get_u8();
                    let mode = buf_cap.get_u8();
                    // Ignore unknown address families and modes.
                    let Some(afi_safi) = AfiSafi::from_pair(afi, safi) else {
                        continue;
                    };
                    let Some(mode) = AddPathMode::from_u8(mode) else {
                        continue;
                    };
                    tuples.insert(AddPathTuple { afi_safi, mode });
                }
                Capability::AddPath(tuples)
            }
            Some(CapabilityCode::EnhancedRouteRefresh) => {
                if cap_len != 0 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                Capability::EnhancedRouteRefresh
            }
            Some(CapabilityCode::Operational) => {
                Capability::Operational
            }
            _ => {
                // Ignore unknown capability.
                return Ok(None);
            }
        };

        Ok(Some(cap))
    }

    pub fn code(&self) -> CapabilityCode {
        match self {
            Capability::MultiProtocol { .. } => CapabilityCode::MultiProtocol,
            Capability::RouteRefresh => CapabilityCode::RouteRefresh,
            Capability::ExtendedMessage => CapabilityCode::ExtendedMessage,
            Capability::GracefulRestart { .. } => {
                CapabilityCode::GracefulRestart
            }
            Capability::FourOctetAsNumber { .. } => {
                CapabilityCode::FourOctetAsNumber
            }
            Capability::AddPath { .. } => CapabilityCode::AddPath,
            Capability::EnhancedRouteRefresh => {
                CapabilityCode::EnhancedRouteRefresh
            }
            Capability::Operational => CapabilityCode::Operational,
        }
    }
}

// ===== impl UpdateMsg =====

impl UpdateMsg {
    pub const MIN_LEN: u16 = 23;

    fn encode(&self, buf: &mut BytesMut, cxt: &EncodeCxt) {
        buf.put_u8(MessageType::Update as u8);

        // Withdrawn Routes.
        let addpath = cxt.addpath_tx(AfiSafi::Ipv4Unicast);
        let start_pos = buf.len();
        buf.put_u16(0);
        if !self.unreach.is_empty() {
            // Encode prefixes.
            for nlri in &self.unreach {
                nlri.encode(buf, addpath);
            }

            // Rewrite the "Withdrawn Routes Length" field.
            let len = (buf.len() - start_pos - 2) as u16;
            buf[start_pos..start_pos + 2].copy_from_slice(&len.to_be_bytes());
        }

        // Path Attributes.
        let start_pos = buf.len();
        buf.put_u16(0);
        if self.attrs.is_some()
            || self.mp_reach.is_some()
            || self.mp_unreach.is_some()
        {
            match &self.attrs {
                Some(attrs) => {
                    // The NEXT_HOP attribute is only emitted alongside
                    // top-level IPv4 reachability.
                    let mut nexthop = None;
                    if !self.reach.is_empty()
                        && let Some(std::net::IpAddr::V4(addr)) =
                            attrs.base.nexthop
                    {
                        nexthop = Some(addr);
                    }
                    attrs.encode(
                        buf,
                        nexthop,
                        &self.mp_reach,
                        &self.mp_unreach,
                        cxt,
                    );
                }
                None => {
                    // Attribute-less MP payload (End-of-RIB markers).
                    if let Some(mp_reach) = &self.mp_reach {
                        mp_reach.encode(buf, cxt);
                    }
                    if let Some(mp_unreach) = &self.mp_unreach {
                        mp_unreach.encode(buf, cxt);
                    }
                }
            }

            // Rewrite the "Total Path Attribute Length" field.
            let len = (buf.len() - start_pos - 2) as u16;
            buf[start_pos..start_pos + 2].copy_from_slice(&len.to_be_bytes());
        }

        // Network Layer Reachability Information.
        for nlri in &self.reach {
            nlri.encode(buf, addpath);
        }
    }

    pub fn decode(buf: &mut Bytes, cxt: &mut DecodeCxt) -> DecodeResult<Self> {
        let mut reach = Vec::new();
        let mut unreach = Vec::new();
        let mut mp_reach = None;
        let mut mp_unreach = None;
        let mut attrs = None;
        let mut nexthop = None;

        let addpath = cxt.addpath_rx(AfiSafi::Ipv4Unicast);

        // Withdrawn Routes Length.
        let wdraw_len = buf.get_u16();
        if wdraw_len as usize > buf.remaining() {
            return Err(UpdateMessageError::MalformedAttributeList.into());
        }

        // Withdrawn Routes.
        let mut buf_wdraw = buf.copy_to_bytes(wdraw_len as usize);
        while buf_wdraw.remaining() > 0 {
            let nlri =
                Nlri::decode(AfiSafi::Ipv4Unicast, &mut buf_wdraw, addpath)?;
            unreach.push(nlri);
        }

        // Total Path Attribute Length.
        if buf.remaining() < 2 {
            return Err(UpdateMessageError::MalformedAttributeList.into());
        }
        let attr_len = buf.get_u16();
        if attr_len as usize > buf.remaining() {
            return Err(UpdateMessageError::MalformedAttributeList.into());
        }

        // Path Attributes.
        if attr_len != 0 {
            let buf_attr = buf.copy_to_bytes(attr_len as usize);
            let nlri_present = buf.remaining() > 0;

            // Check the attribute cache before parsing.
            if let Some(cache) = &cxt.attr_cache
                && cache.bytes == buf_attr
            {
                attrs = cache.attrs.clone();
                nexthop = cache.nexthop;
                mp_reach = cache.mp_reach.clone();
                mp_unreach = cache.mp_unreach.clone();
            } else {
                let mut buf_parse = buf_attr.clone();
                attrs = Attrs::decode(
                    &mut buf_parse,
                    cxt,
                    &mut nexthop,
                    nlri_present,
                    &mut mp_unreach,
                    &mut mp_reach,
                )?;
                cxt.attr_cache = Some(AttrCache {
                    bytes: buf_attr,
                    attrs: attrs.clone(),
                    nexthop,
                    mp_reach: mp_reach.clone(),
                    mp_unreach: mp_unreach.clone(),
                });
            }
        }

        // Network Layer Reachability Information.
        while buf.remaining() > 0 {
            let nlri = Nlri::decode(AfiSafi::Ipv4Unicast, buf, addpath)?;
            reach.push(nlri);
        }

        // Record the NEXT_HOP attribute value in the attribute set.
        if let Some(attrs) = &mut attrs
            && let Some(nexthop) = nexthop
        {
            attrs.base.nexthop = Some(nexthop.into());
        }

        Ok(UpdateMsg {
            reach,
            unreach,
            mp_reach,
            mp_unreach,
            attrs,
        })
    }

    // Builds the End-of-RIB marker for the given address family: an empty
    // UPDATE for IPv4 unicast, an empty MP_UNREACH_NLRI otherwise.
    pub fn eor(afi_safi: AfiSafi) -> UpdateMsg {
        let mut msg = UpdateMsg::default();
        if afi_safi != AfiSafi::Ipv4Unicast {
            msg.mp_unreach = Some(MpUnreachNlri {
                afi_safi,
                nlris: Vec::new(),
            });
        }
        msg
    }

    // Returns the address family when this UPDATE is an End-of-RIB marker.
    pub fn is_eor(&self) -> Option<AfiSafi> {
        if !self.reach.is_empty()
            || !self.unreach.is_empty()
            || self.attrs.is_some()
            || self.mp_reach.is_some()
        {
            return None;
        }
        match &self.mp_unreach {
            None => Some(AfiSafi::Ipv4Unicast),
            Some(mp_unreach) if mp_unreach.nlris.is_empty() => {
                Some(mp_unreach.afi_safi)
            }
            Some(_) => None,
        }
    }
}

// ===== impl MpReachNlri =====

impl MpReachNlri {
    pub const MIN_LEN: u16 = 5;

    pub(crate) fn encode(&self, buf: &mut BytesMut, cxt: &EncodeCxt) {
        buf.put_u8((AttrFlags::OPTIONAL | AttrFlags::EXTENDED).bits());
        buf.put_u8(AttrType::MpReachNlri as u8);

        // The length field will be initialized later.
        let start_pos = buf.len();
        buf.put_u16(0);

        // Encode attribute data.
        buf.put_u16(self.afi_safi.afi());
        buf.put_u8(self.afi_safi.safi());
        self.nexthop.encode(buf);
        buf.put_u8(0);
        let addpath = cxt.addpath_tx(self.afi_safi);
        for nlri in &self.nlris {
            nlri.encode(buf, addpath);
        }

        // Rewrite attribute length.
        let attr_len = (buf.len() - start_pos - 2) as u16;
        buf[start_pos..start_pos + 2].copy_from_slice(&attr_len.to_be_bytes());
    }

    pub(crate) fn decode(
        buf: &mut Bytes,
        cxt: &DecodeCxt,
        mp_reach: &mut Option<Self>,
    ) -> Result<(), AttrError> {
        if buf.remaining() < Self::MIN_LEN as usize {
            return Err(AttrError::Reset);
        }

        // Parse address family.
        let afi = buf.get_u16();
        let safi = buf.get_u8();
        let Some(afi_safi) = AfiSafi::from_pair(afi, safi) else {
            // Ignore unknown address family.
            return Err(AttrError::Discard);
        };

        // Parse next hop.
        let nexthop = MpNextHop::decode(buf)?;

        // Parse prefixes.
        let _reserved = buf.try_get_u8().map_err(|_| AttrError::Reset)?;
        let addpath = cxt.addpath_rx(afi_safi);
        let mut nlris = Vec::new();
        while buf.remaining() > 0 {
            let nlri = Nlri::decode(afi_safi, buf, addpath)
                .map_err(|_| AttrError::Reset)?;
            nlris.push(nlri);
        }

        *mp_reach = Some(MpReachNlri {
            afi_safi,
            nexthop,
            nlris,
        });
        Ok(())
    }
}

// ===== impl MpUnreachNlri =====

impl MpUnreachNlri {
    pub const MIN_LEN: u16 = 3;

    pub(crate) fn encode(&self, buf: &mut BytesMut, cxt: &EncodeCxt) {
        buf.put_u8((AttrFlags::OPTIONAL | AttrFlags::EXTENDED).bits());
        buf.put_u8(AttrType::MpUnreachNlri as u8);

        // The length field will be initialized later.
        let start_pos = buf.len();
        buf.put_u16(0);

        // Encode attribute data.
        buf.put_u16(self.afi_safi.afi());
        buf.put_u8(self.afi_safi.safi());
        let addpath = cxt.addpath_tx(self.afi_safi);
        for nlri in &self.nlris {
            nlri.encode(buf, addpath);
        }

        // Rewrite attribute length.
        let attr_len = (buf.len() - start_pos - 2) as u16;
        buf[start_pos..start_pos + 2].copy_from_slice(&attr_len.to_be_bytes());
    }

    pub(crate) fn decode(
        buf: &mut Bytes,
        cxt: &DecodeCxt,
        mp_unreach: &mut Option<Self>,
    ) -> Result<(), AttrError> {
        if buf.remaining() < Self::MIN_LEN as usize {
            return Err(AttrError::Reset);
        }

        // Parse address family.
        let afi = buf.get_u16();
        let safi = buf.get_u8();
        let Some(afi_safi) = AfiSafi::from_pair(afi, safi) else {
            // Ignore unknown address family.
            return Err(AttrError::Discard);
        };

        // Parse prefixes.
        let addpath = cxt.addpath_rx(afi_safi);
        let mut nlris = Vec::new();
        while buf.remaining() > 0 {
            let nlri = Nlri::decode(afi_safi, buf, addpath)
                .map_err(|_| AttrError::Reset)?;
            nlris.push(nlri);
        }

        *mp_unreach = Some(MpUnreachNlri { afi_safi, nlris });
        Ok(())
    }
}

// ===== impl MpNextHop =====

impl MpNextHop {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            MpNextHop::None => {
                buf.put_u8(0);
            }
            MpNextHop::Ipv4(addr) => {
                buf.put_u8(Ipv4Addr::LENGTH as u8);
                buf.put_ipv4(addr);
            }
            MpNextHop::VpnIpv4(addr) => {
                buf.put_u8((8 + Ipv4Addr::LENGTH) as u8);
                buf.put_u64(0);
                buf.put_ipv4(addr);
            }
            MpNextHop::Ipv6 { global, link_local } => {
                if let Some(link_local) = link_local {
                    buf.put_u8((Ipv6Addr::LENGTH * 2) as u8);
                    buf.put_ipv6(global);
                    buf.put_ipv6(link_local);
                } else {
                    buf.put_u8(Ipv6Addr::LENGTH as u8);
                    buf.put_ipv6(global);
                }
            }
            MpNextHop::VpnIpv6(addr) => {
                buf.put_u8((8 + Ipv6Addr::LENGTH) as u8);
                buf.put_u64(0);
                buf.put_ipv6(addr);
            }
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self, AttrError> {
        let len = buf.try_get_u8().map_err(|_| AttrError::Reset)? as usize;
        if len > buf.remaining() {
            return Err(AttrError::Reset);
        }

        let nexthop = match len {
            0 => MpNextHop::None,
            4 => MpNextHop::Ipv4(
                buf.try_get_u32().map_err(|_| AttrError::Reset)?.into(),
            ),
            12 => {
                let _rd = buf.try_get_u64().map_err(|_| AttrError::Reset)?;
                MpNextHop::VpnIpv4(
                    buf.try_get_u32().map_err(|_| AttrError::Reset)?.into(),
                )
            }
            16 => MpNextHop::Ipv6 {
                global: buf
                    .try_get_u128()
                    .map_err(|_| AttrError::Reset)?
                    .into(),
                link_local: None,
            },
            24 => {
                let _rd = buf.try_get_u64().map_err(|_| AttrError::Reset)?;
                MpNextHop::VpnIpv6(
                    buf.try_get_u128().map_err(|_| AttrError::Reset)?.into(),
                )
            }
            32 => {
                let global = buf
                    .try_get_u128()
                    .map_err(|_| AttrError::Reset)?
                    .into();
                let link_local = buf
                    .try_get_u128()
                    .map_err(|_| AttrError::Reset)?
                    .into();
                MpNextHop::Ipv6 {
                    global,
                    link_local: Some(link_local),
                }
            }
            _ => return Err(AttrError::Reset),
        };

        Ok(nexthop)
    }

    pub fn global_addr(&self) -> Option<std::net::IpAddr> {
        match self {
            MpNextHop::None => None,
            MpNextHop::Ipv4(addr) | MpNextHop::VpnIpv4(addr) => {
                Some((*addr).into())
            }
            MpNextHop::Ipv6 { global, .. } => Some((*global).into()),
            MpNextHop::VpnIpv6(addr) => Some((*addr).into()),
        }
    }
}

// ===== impl NotificationMsg =====

impl NotificationMsg {
    const MIN_LEN: u16 = 21;

    pub(crate) fn new(
        error_code: impl ToPrimitive,
        error_subcode: impl ToPrimitive,
    ) -> Self {
        NotificationMsg {
            error_code: error_code.to_u8().unwrap(),
            error_subcode: error_subcode.to_u8().unwrap(),
            data: Default::default(),
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::Notification as u8);
        buf.put_u8(self.error_code);
        buf.put_u8(self.error_subcode);
        buf.put_slice(&self.data);
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let error_code = buf.get_u8();
        let error_subcode = buf.get_u8();

        Ok(NotificationMsg {
            error_code,
            error_subcode,
            data: buf.to_vec(),
        })
    }
}

impl From<DecodeError> for NotificationMsg {
    fn from(error: DecodeError) -> NotificationMsg {
        let error_code;
        let error_subcode;
        let data = vec![];

        match error {
            DecodeError::ReadOutOfBounds => {
                error_code = ErrorCode::MessageHeaderError as u8;
                error_subcode = MessageHeaderErrorSubcode::Unspecific as u8;
            }
            DecodeError::MessageHeader(error) => {
                error_code = ErrorCode::MessageHeaderError as u8;
                error_subcode = match error {
                    MessageHeaderError::ReadOutOfBounds => {
                        MessageHeaderErrorSubcode::Unspecific
                    }
                    MessageHeaderError::ConnectionNotSynchronized => {
                        MessageHeaderErrorSubcode::ConnectionNotSynchronized
                    }
                    MessageHeaderError::BadMessageLength(..) => {
                        MessageHeaderErrorSubcode::BadMessageLength
                    }
                    MessageHeaderError::BadMessageType(..) => {
                        MessageHeaderErrorSubcode::BadMessageType
                    }
                } as u8;
            }
            DecodeError::OpenMessage(error) => {
                error_code = ErrorCode::OpenMessageError as u8;
                error_subcode = match error {
                    OpenMessageError::ReadOutOfBounds => {
                        OpenMessageErrorSubcode::Unspecific
                    }
                    OpenMessageError::UnsupportedVersion(..) => {
                        OpenMessageErrorSubcode::UnsupportedVersionNumber
                    }
                    OpenMessageError::BadPeerAs => {
                        OpenMessageErrorSubcode::BadPeerAs
                    }
                    OpenMessageError::BadBgpIdentifier => {
                        OpenMessageErrorSubcode::BadBgpIdentifier
                    }
                    OpenMessageError::UnsupportedOptParam => {
                        OpenMessageErrorSubcode::UnsupportedOptParam
                    }
                    OpenMessageError::UnacceptableHoldTime => {
                        OpenMessageErrorSubcode::UnacceptableHoldTime
                    }
                    OpenMessageError::UnsupportedCapability => {
                        OpenMessageErrorSubcode::UnsupportedCapability
                    }
                    OpenMessageError::MalformedOptParam => {
                        OpenMessageErrorSubcode::Unspecific
                    }
                } as u8;
            }
            DecodeError::UpdateMessage(error) => {
                error_code = ErrorCode::UpdateMessageError as u8;
                error_subcode = match error {
                    UpdateMessageError::ReadOutOfBounds => {
                        UpdateMessageErrorSubcode::Unspecific
                    }
                    UpdateMessageError::MalformedAttributeList => {
                        UpdateMessageErrorSubcode::MalformedAttributeList
                    }
                    UpdateMessageError::UnrecognizedWellKnownAttribute => {
                        UpdateMessageErrorSubcode::UnrecognizedWellKnownAttribute
                    }
                    UpdateMessageError::OptionalAttributeError => {
                        UpdateMessageErrorSubcode::OptionalAttributeError
                    }
                    UpdateMessageError::InvalidNetworkField => {
                        UpdateMessageErrorSubcode::InvalidNetworkField
                    }
                } as u8;
            }
        }

        NotificationMsg {
            error_code,
            error_subcode,
            data,
        }
    }
}

// ===== impl KeepaliveMsg =====

impl KeepaliveMsg {
    const LEN: u16 = 19;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::Keepalive as u8);
    }

    pub fn decode(_buf: &mut Bytes) -> DecodeResult<Self> {
        // A KEEPALIVE message consists of only the message header.
        Ok(KeepaliveMsg {})
    }
}

// ===== impl RouteRefreshMsg =====

impl RouteRefreshMsg {
    const LEN: u16 = 23;

    pub fn request(afi_safi: AfiSafi) -> RouteRefreshMsg {
        RouteRefreshMsg {
            afi: afi_safi.afi(),
            safi: afi_safi.safi(),
            subtype: RouteRefreshSubtype::Request,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::RouteRefresh as u8);
        buf.put_u16(self.afi);
        buf.put_u8(self.subtype as u8);
        buf.put_u8(self.safi);
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let afi = buf.get_u16();
        let subtype = buf.get_u8();
        let safi = buf.get_u8();
        // Unknown subtypes fall back to a plain refresh request.
        let subtype = RouteRefreshSubtype::from_u8(subtype)
            .unwrap_or(RouteRefreshSubtype::Request);
        Ok(RouteRefreshMsg { afi, safi, subtype })
    }
}

// ===== impl OperationalMsg =====

impl OperationalMsg {
    const MIN_LEN: u16 = 23;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::Operational as u8);
        buf.put_u16(self.code as u16);
        buf.put_u16((self.data.len() + 3) as u16);
        buf.put_u16(self.afi);
        buf.put_u8(self.safi);
        buf.put_slice(&self.data);
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let code = buf.get_u16();
        let Some(code) = OperationalCode::from_u16(code) else {
            return Err(MessageHeaderError::BadMessageType(code as u8).into());
        };
        let len = buf.get_u16() as usize;
        if len < 3 || len > buf.remaining() {
            return Err(
                MessageHeaderError::BadMessageLength(len as u16).into()
            );
        }
        let afi = buf.get_u16();
        let safi = buf.get_u8();
        let data = buf.copy_to_bytes(len - 3).to_vec();
        Ok(OperationalMsg {
            code,
            afi,
            safi,
            data,
        })
    }
}

// ===== impl EncodeCxt =====

impl EncodeCxt {
    pub fn four_byte_asn(&self) -> bool {
        self.capabilities
            .iter()
            .any(|cap| cap.is_four_octet_as_number())
    }

    pub fn addpath_tx(&self, afi_safi: AfiSafi) -> bool {
        self.capabilities
            .contains(&NegotiatedCapability::AddPathTx(afi_safi))
    }

    pub fn max_msg_len(&self) -> u16 {
        if self
            .capabilities
            .iter()
            .any(|cap| cap.is_extended_message())
        {
            Message::MAX_LEN_EXT
        } else {
            Message::MAX_LEN
        }
    }
}

// ===== impl DecodeCxt =====

impl DecodeCxt {
    pub fn new(peer_type: PeerType, peer_as: u32) -> DecodeCxt {
        DecodeCxt {
            peer_type,
            peer_as,
            capabilities: Default::default(),
            attr_cache: None,
        }
    }

    pub fn four_byte_asn(&self) -> bool {
        self.capabilities
            .iter()
            .any(|cap| cap.is_four_octet_as_number())
    }

    pub fn addpath_rx(&self, afi_safi: AfiSafi) -> bool {
        self.capabilities
            .contains(&NegotiatedCapability::AddPathRx(afi_safi))
    }

    pub fn max_msg_len(&self) -> u16 {
        if self
            .capabilities
            .iter()
            .any(|cap| cap.is_extended_message())
        {
            Message::MAX_LEN_EXT
        } else {
            Message::MAX_LEN
        }
    }
}
