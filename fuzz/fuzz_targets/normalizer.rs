#![no_main]

use libfuzzer_sys::fuzz_target;
use querytap::normalizer::analyze;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Arbitrary SQL text must never panic the tokenizer
        let _ = analyze(input);
    }
});
