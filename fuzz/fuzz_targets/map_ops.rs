#![no_main]
use libfuzzer_sys::fuzz_target;
use vamap::{AddressInterval, Buffer, MemoryMap, Protection, Segment};

// Each 4-byte record is an opcode, a page number, a length in pages and a
// permission byte. The map must never map the same address twice.
fuzz_target!(|data: &[u8]| {
    let mut map = MemoryMap::new();
    for op in data.chunks_exact(4) {
        let va = u64::from(op[1]) * 0x100;
        let size = u64::from(op[2] % 8 + 1) * 0x100;
        let range = AddressInterval::base_size(va, size);
        let perms = Protection::from_bits_truncate(u32::from(op[3] & 0x17));
        match op[0] % 4 {
            0 => {
                let segment = Segment::new(Buffer::heap(size as usize).into_ptr(), 0, perms, "");
                let _ = map.insert(range, segment, op[3] & 0x80 != 0);
            }
            1 => map.erase(range),
            2 => {
                let _ = map.mprotect(range, perms, true);
            }
            _ => {
                let _ = map.write(&[op[3]; 32], va, Protection::empty(), Protection::empty());
            }
        }
        let mut last: Option<u64> = None;
        for (r, _) in map.iter() {
            if let Some(prev) = last {
                assert!(r.least() > prev);
            }
            last = Some(r.greatest());
        }
    }
});
