//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use bgpio::neighbor::PeerType;
use bgpio::packet::error::{DecodeError, MessageHeaderError};
use bgpio::packet::message::{DecodeCxt, Message, NegotiatedCapability};

fn header(marker: u8, length: u16, msg_type: u8) -> Vec<u8> {
    let mut data = vec![marker; 16];
    data.extend_from_slice(&length.to_be_bytes());
    data.push(msg_type);
    data
}

#[test]
fn test_header_short_length() {
    let data = header(0xff, 18, 4);
    let mut cxt = DecodeCxt::new(PeerType::External, 65001);
    let result = Message::decode(&data, &mut cxt);
    assert_eq!(
        result,
        Err(DecodeError::MessageHeader(
            MessageHeaderError::BadMessageLength(18)
        ))
    );
}

#[test]
fn test_header_oversized_length() {
    // Without the Extended Message capability, anything above 4096 octets
    // must be refused.
    let mut data = header(0xff, 4097, 2);
    data.resize(4097, 0);
    let mut cxt = DecodeCxt::new(PeerType::External, 65001);
    let result = Message::decode(&data, &mut cxt);
    assert_eq!(
        result,
        Err(DecodeError::MessageHeader(
            MessageHeaderError::BadMessageLength(4097)
        ))
    );
}

#[test]
fn test_header_extended_length() {
    // Once both sides negotiated the Extended Message capability, the
    // header gate admits lengths above 4096 octets. An all-zero UPDATE
    // body of that size is a run of withdrawn /0 prefixes, which decodes.
    let mut data = header(0xff, 4097, 2);
    data.extend_from_slice(&4074u16.to_be_bytes());
    data.resize(4097, 0);
    let mut cxt = DecodeCxt::new(PeerType::External, 65001);
    cxt.capabilities = [NegotiatedCapability::ExtendedMessage].into();
    assert!(Message::decode(&data, &mut cxt).is_ok());
}

#[test]
fn test_header_bad_marker() {
    let data = header(0xfe, 19, 4);
    let mut cxt = DecodeCxt::new(PeerType::External, 65001);
    let result = Message::decode(&data, &mut cxt);
    assert_eq!(
        result,
        Err(DecodeError::MessageHeader(
            MessageHeaderError::ConnectionNotSynchronized
        ))
    );
}

#[test]
fn test_header_bad_type() {
    let data = header(0xff, 19, 9);
    let mut cxt = DecodeCxt::new(PeerType::External, 65001);
    let result = Message::decode(&data, &mut cxt);
    assert_eq!(
        result,
        Err(DecodeError::MessageHeader(
            MessageHeaderError::BadMessageType(9)
        ))
    );
}

#[test]
fn test_incomplete_buffer() {
    // `get_message_len` only reports a length once the whole message has
    // been buffered.
    let data = header(0xff, 100, 2);
    assert_eq!(Message::get_message_len(&data), None);

    let mut data = data;
    data.resize(100, 0);
    assert_eq!(Message::get_message_len(&data), Some(100));
}
