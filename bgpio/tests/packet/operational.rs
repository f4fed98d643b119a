//
// Copyright (c) The Bgpio Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use bgpio::packet::consts::OperationalCode;
use bgpio::packet::message::{Message, OperationalMsg};

use super::{test_decode_msg, test_encode_msg};

// Advisory Demand Message carrying a free-form text.
static OPERATIONAL1: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x1e, 0x06, 0x00, 0x01, 0x00,
            0x07, 0x00, 0x01, 0x01, 0x74, 0x65, 0x73, 0x74,
        ],
        Message::Operational(OperationalMsg {
            code: OperationalCode::Adm,
            afi: 1,
            safi: 1,
            data: b"test".to_vec(),
        }),
    )
});

#[test]
fn test_encode_operational1() {
    let (ref bytes, ref msg) = *OPERATIONAL1;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_operational1() {
    let (ref bytes, ref msg) = *OPERATIONAL1;
    test_decode_msg(bytes, msg);
}
