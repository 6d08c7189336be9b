//! Fuzz target for wire message parsing.
//!
//! Run with:
//! ```bash
//! cargo +nightly fuzz run fuzz_wire_reply
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use tern_driver::wire::{HEADER_LEN, MessageHeader, OpCode, OpMsg, OpReply, reply_body};

fuzz_target!(|data: &[u8]| {
    if data.len() < HEADER_LEN {
        return;
    }
    let Ok(header) = MessageHeader::parse(&data[..HEADER_LEN]) else {
        return;
    };
    let payload = &data[HEADER_LEN..];

    match header.op_code {
        OpCode::Msg => {
            let _ = OpMsg::decode(payload);
        }
        OpCode::Reply => {
            let _ = OpReply::decode(payload);
        }
        OpCode::Query | OpCode::GetMore | OpCode::KillCursors => {}
    }
    let _ = reply_body(header.op_code, payload);
});
