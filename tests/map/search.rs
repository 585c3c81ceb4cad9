use crate::common::{build_map, pattern_bytes, ANY};
use vamap::{AddressInterval, MemoryMap, Protection};

fn image() -> MemoryMap {
    let mut text = pattern_bytes(0x200, 3);
    text[0x100..0x104].copy_from_slice(&[0x55, 0x48, 0x89, 0xe5]);
    let mut rodata = b"hi\0garbage\0".to_vec();
    rodata.extend_from_slice(b"Hello, world!\0");
    build_map(&[
        (0x40_1000, &text, Protection::RX),
        (0x40_2000, &rodata, Protection::READ),
        (0x40_3000, b"rw data: Hello", Protection::RW),
    ])
}

#[test]
fn read_string_stops_at_nul() {
    let map = image();
    assert_eq!(map.read_string(0x40_2000, 64, None, None, ANY, ANY), "hi");
    assert_eq!(
        map.read_string(0x40_2003, 64, None, None, ANY, ANY),
        "garbage"
    );
    assert_eq!(map.read_string(0x40_2000, 1, None, None, ANY, ANY), "h");
    assert_eq!(
        map.read_string(0x40_2000, 64, None, None, Protection::EXEC, ANY),
        ""
    );

    let printable = |b: u8| b.is_ascii_graphic() || b == b' ';
    assert_eq!(
        map.read_string(0x40_200b, 64, Some(&printable), None, ANY, ANY),
        "Hello, world!"
    );
    let comma = |b: u8| b == b',';
    assert_eq!(
        map.read_string(0x40_200b, 64, None, Some(&comma), ANY, ANY),
        "Hello"
    );
}

#[test]
fn find_sequence_honors_permissions_and_limits() {
    let map = image();
    let all = AddressInterval::whole();
    assert_eq!(
        map.find_sequence(all, b"Hello", ANY, ANY),
        Some(0x40_200b)
    );
    assert_eq!(
        map.find_sequence(all, b"Hello", Protection::WRITE, ANY),
        Some(0x40_3009)
    );
    assert_eq!(
        map.find_sequence(all, &[0x55, 0x48, 0x89, 0xe5], Protection::EXEC, ANY),
        Some(0x40_1100)
    );
    assert_eq!(
        map.find_sequence(all, b"Hello", ANY, Protection::WRITE),
        Some(0x40_200b)
    );

    let tight = AddressInterval::hull(0x40_200b, 0x40_200e);
    assert_eq!(map.find_sequence(tight, b"Hello", ANY, ANY), None);
    let exact = AddressInterval::hull(0x40_200b, 0x40_200f);
    assert_eq!(map.find_sequence(exact, b"Hello", ANY, ANY), Some(0x40_200b));
}

#[test]
fn match_and_find_any() {
    let map = image();
    assert_eq!(map.match_bytes(0x40_2003, b"garbled", ANY, ANY), 4);
    assert_eq!(
        map.find_any(AddressInterval::hull(0x40_2000, 0x40_2fff), b"!,", ANY, ANY),
        Some(0x40_2010)
    );
}

#[test]
fn erase_zeros_trims_padding_in_code() {
    let mut text = vec![0xccu8; 0x100];
    text[0x20..0xe0].fill(0);
    let mut map = build_map(&[
        (0x1000, &text, Protection::RX),
        (0x2000, &[0u8; 0x100], Protection::RW),
    ]);
    map.erase_zeros(0x80);

    assert!(map.exists(AddressInterval::hull(0x1000, 0x101f), Protection::RX, ANY));
    assert!(map.segments().overlapping(AddressInterval::hull(0x1020, 0x10df)).next().is_none());
    assert!(map.exists(AddressInterval::hull(0x10e0, 0x10ff), Protection::RX, ANY));
    assert!(map.exists(AddressInterval::base_size(0x2000, 0x100), ANY, ANY));

    map.erase_zeros(0x10_0000);
    assert_eq!(map.len(), 3);
}
