#![no_main]

use libfuzzer_sys::fuzz_target;
use xlsx_cfb::CompoundDocument;

/// Keep the harness bounded: a corrupt FAT can describe far more sectors than the input holds.
const MAX_INPUT_BYTES: usize = 1 << 20;

fuzz_target!(|data: &[u8]| {
    if data.len() > MAX_INPUT_BYTES {
        return;
    }
    let Ok(doc) = CompoundDocument::from_bytes(data) else {
        return;
    };
    for (path, entry) in doc.entries() {
        if entry.is_stream() {
            let _ = doc.read_stream(&path);
        } else {
            let _ = doc.children(&path);
        }
    }
});
