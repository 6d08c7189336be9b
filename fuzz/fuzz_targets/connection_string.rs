//! Fuzz target for connection string parsing.
//!
//! Run with:
//! ```bash
//! cargo +nightly fuzz run fuzz_connection_string
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use tern_driver::ConnectionString;

fuzz_target!(|data: &str| {
    let _ = ConnectionString::parse(data);

    let with_scheme = format!("mongodb://{}", data);
    if let Ok(cs) = ConnectionString::parse(&with_scheme) {
        assert!(!cs.hosts().is_empty());
    }
});
