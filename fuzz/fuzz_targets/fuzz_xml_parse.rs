#![no_main]
use libfuzzer_sys::fuzz_target;
use tidyxml::parser::{parse_bytes_with_options, ParseOptions};

fuzz_target!(|data: &[u8]| {
    // External resources are never opened from fuzz input.
    let strict = ParseOptions::default()
        .load_external_dtd(false)
        .max_entity_expansions(1_000);
    // Strict mode: should never panic
    let _ = parse_bytes_with_options(data, &strict);
    // Tidy mode: should never panic
    let _ = parse_bytes_with_options(data, &strict.clone().tidy(true));
});
