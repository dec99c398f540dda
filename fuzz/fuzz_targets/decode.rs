#![no_main]

use libfuzzer_sys::fuzz_target;
use opdec::decode;

fuzz_target!(|data: &[u8]| {
    // Decode in both modes - should never panic, never read past the
    // buffer. Errors for invalid sequences are fine.
    for mode in [32, 64] {
        let _ = decode(data, mode, 0x1000);
    }

    // Walk a block the way a disassembler would, formatting as we go.
    let mut offset = 0;
    let mut count = 0;
    let mut buf = [0u8; 128];
    while offset < data.len() && count < 100 {
        match decode(&data[offset..], 64, 0x1000 + offset as u64) {
            Ok(instr) => {
                assert!(instr.length() >= 1 && instr.length() <= opdec::MAX_INSTR_LEN);
                let len = opdec::format(&instr, &mut buf);
                assert_eq!(buf[len], 0);
                offset += instr.length();
            }
            Err(_) => offset += 1,
        }
        count += 1;
    }
});
