//! Fuzz target for the BSON decoder.
//!
//! Arbitrary bytes must either fail to decode or decode to a document whose
//! encoding decodes back to the same document.
//!
//! Run with:
//! ```bash
//! cargo +nightly fuzz run fuzz_bson_decode
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use tern_bson::{decode_document, encode_document};

fuzz_target!(|data: &[u8]| {
    if let Ok(document) = decode_document(data) {
        let bytes = encode_document(&document).expect("decoded document must encode");
        let again = decode_document(&bytes).expect("encoded document must decode");
        assert_eq!(encode_document(&again).ok(), Some(bytes));
    }
});
