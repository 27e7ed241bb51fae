#![no_main]

use libfuzzer_sys::fuzz_target;
use qkd_kme::wrapper::{decode_bits, encode_bits};

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must decode cleanly or fail, never panic
    if let Ok(bits) = decode_bits(data) {
        // Anything that decodes is canonical
        let reencoded = encode_bits(&bits).expect("decoded bits are 0/1");
        assert_eq!(reencoded, data);
    }

    let bits: Vec<u8> = data.iter().map(|b| b & 1).collect();
    let encoded = encode_bits(&bits).expect("bits are 0/1");
    assert_eq!(decode_bits(&encoded).expect("fresh encoding decodes"), bits);
});
