//! Fuzz target for the wire record decoder.
//!
//! Run with: cargo +nightly fuzz run fuzz_message_decode
//!
//! The first byte picks the table limit; the rest is the record. Any record
//! that decodes must re-encode to a record that decodes to the same message.

#![no_main]

use fwtabled_core::protocol::Message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&limit, record)) = data.split_first() else {
        return;
    };
    let max_tables = u32::from(limit) + 1;

    if let Ok(msg) = Message::decode(record, max_tables) {
        assert!(u32::from(msg.table) < max_tables);
        assert_ne!(msg.prefix, 0);
        let again = Message::decode(&msg.encode(), max_tables).expect("re-encoded record must decode");
        assert_eq!(again, msg);
    }
});
