//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

mod attrs;
mod flowspec;
mod header;
mod keepalive;
mod nlri;
mod notification;
mod open;
mod operational;
mod route_refresh;
mod update;
mod vpls;

use bgpio::neighbor::PeerType;
use bgpio::packet::message::{
    DecodeCxt, EncodeCxt, Message, NegotiatedCapability,
};

//
// Helper functions.
//

fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|byte| format!("{:02x}", byte))
        .collect::<Vec<_>>()
        .join(" ")
}

#[track_caller]
fn assert_eq_hex(expected: &[u8], actual: &[u8]) {
    if expected != actual {
        panic!(
            "hex mismatch\n expected: {}\n   actual: {}",
            hex_dump(expected),
            hex_dump(actual)
        );
    }
}

fn test_encode_msg(bytes_expected: &[u8], msg: &Message) {
    let cxt = EncodeCxt {
        peer_type: PeerType::Internal,
        capabilities: [NegotiatedCapability::FourOctetAsNumber].into(),
    };

    let bytes_actual = msg.encode(&cxt);
    assert_eq_hex(bytes_expected, &bytes_actual);
}

fn test_decode_msg(bytes: &[u8], msg_expected: &Message) {
    let mut cxt = DecodeCxt::new(PeerType::Internal, 65550);
    cxt.capabilities = [NegotiatedCapability::FourOctetAsNumber].into();

    let msg_size = Message::get_message_len(bytes)
        .expect("Buffer doesn't contain a full BGP message");
    let msg_actual = Message::decode(&bytes[0..msg_size], &mut cxt).unwrap();
    assert_eq!(*msg_expected, msg_actual);
}
