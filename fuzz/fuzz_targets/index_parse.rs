#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    for line in text.lines() {
        if let Ok(Some(entry)) = vamap::map::persist::parse_index_line(line) {
            assert!(vamap::Protection::from_letters(&entry.perms.to_string()).is_some());
        }
    }
});
