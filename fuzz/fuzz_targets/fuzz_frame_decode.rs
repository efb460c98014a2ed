//! Fuzz the wire unpacker against arbitrary byte streams.
//!
//! Corrupt frames must surface as protocol errors, never panics or
//! oversized allocations.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rowsync::Unpacker;

fuzz_target!(|data: &[u8]| {
    // the in-memory reader never pends, so block_on cannot stall
    futures::executor::block_on(async {
        let mut unpacker = Unpacker::new(data);
        // whatever the bytes decode as, keep going until error or exhaustion
        while unpacker.next_value().await.is_ok() {}
    });

    futures::executor::block_on(async {
        let mut unpacker = Unpacker::new(data);
        let _ = unpacker.next_nullable_row().await;
        let _ = unpacker.next_key().await;
    });
});
