#![no_main]

use libfuzzer_sys::fuzz_target;
use vartrace::analysis::{self, Projections};
use vartrace::reader;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes interpreted as a (possibly torn) trace file
    if let Ok(input) = std::str::from_utf8(data) {
        // Neither parsing nor analysis may panic, whatever the input
        if let Ok(doc) = reader::parse(input) {
            let _ = Projections::replay(&doc.events);
            let _ = analysis::check(&doc);
        }
    }
});
