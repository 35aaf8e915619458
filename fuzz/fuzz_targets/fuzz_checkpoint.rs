#![no_main]

use libfuzzer_sys::fuzz_target;
use spillway_checkpoint::Checkpoint;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1_000_000 {
        return;
    }

    // A damaged checkpoint must be reported, never panic
    let _ = Checkpoint::decode(data);
});
