#![no_main]

use decemu_emulate::{Access, Endianness, PagedMemory};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 9 {
        return;
    }

    let endianness = if data[0] & 1 == 0 {
        Endianness::Little
    } else {
        Endianness::Big
    };
    let mut memory = PagedMemory::new(endianness, 16 + u32::from(data[0] >> 1) % 49);
    let _ = memory.allocate(0x1000, 0x2000, Access::READ_WRITE);

    // Interpret the rest as (offset, size, value) access records
    for chunk in data[1..].chunks(8) {
        let [a, b, size, v @ ..] = chunk else {
            continue;
        };
        let address = 0x0F00 + (u64::from(*a) << 8 | u64::from(*b));
        let size = [1usize, 2, 4, 8, 3][usize::from(*size) % 5];
        let value = v.iter().fold(0u64, |acc, byte| acc << 8 | u64::from(*byte));

        // Faulting writes must leave memory untouched
        let before = memory.read_uint(address, 1).ok();
        match memory.write_uint(address, value, size) {
            Ok(()) => {
                if let Ok(read) = memory.read_uint(address, size) {
                    let mask = if size == 8 { u64::MAX } else { (1u64 << (size * 8)) - 1 };
                    assert_eq!(read, value & mask);
                }
            }
            Err(_) => assert_eq!(memory.read_uint(address, 1).ok(), before),
        }
    }
});
