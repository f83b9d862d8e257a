#![no_main]

use libfuzzer_sys::fuzz_target;
use xlsx_offcrypto::{
    decrypt_encrypted_package, decrypt_xlsx_with_options, parse_encryption_info, DecryptOptions,
};

const MAX_INPUT_BYTES: usize = 1 << 20;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() || data.len() > MAX_INPUT_BYTES {
        return;
    }

    // Large spin counts turn every input into a multi-second hash loop.
    let options = DecryptOptions {
        max_spin_count: 1_000,
        ..DecryptOptions::default()
    };

    let _ = parse_encryption_info(data);
    let _ = decrypt_xlsx_with_options(data, "password", options);

    // First byte picks where to split the input into the two streams.
    let split = usize::from(data[0]) * data.len() / 256;
    let (info, package) = data[1..].split_at(split.min(data.len() - 1));
    let _ = decrypt_encrypted_package(info, package, "password", options);
});
