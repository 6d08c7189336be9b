//! Fuzz target for the Extended JSON parser.
//!
//! Run with:
//! ```bash
//! cargo +nightly fuzz run fuzz_extended_json
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use tern_bson::{from_json, to_canonical_json};

fuzz_target!(|data: &str| {
    if let Ok(document) = from_json(data) {
        // Canonical output is a fixed point.
        let canonical = to_canonical_json(&document);
        let reparsed = from_json(&canonical).expect("canonical output must parse");
        assert_eq!(to_canonical_json(&reparsed), canonical);
    }
});
