#![no_main]

use libfuzzer_sys::fuzz_target;
use spillway_wal::record::WalRecord;

fuzz_target!(|data: &[u8]| {
    // Limit input size to prevent timeout
    if data.len() > 1_000_000 {
        return;
    }

    // Decoding arbitrary bytes must fail cleanly, never panic
    if let Ok((_, consumed)) = WalRecord::decode(data) {
        assert!(consumed <= data.len());
    }
});
