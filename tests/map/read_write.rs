use crate::common::{build_map, map_heap, pattern_bytes, ANY};
use vamap::{
    AddressInterval, Buffer, Endianness, MapError, MemoryMap, MemoryView, Protection, Segment,
};

#[test]
fn partial_read_zero_fills_tail() {
    let map = build_map(&[(0x1000, b"abcdef", Protection::READ)]);
    let mut dst = [0xffu8; 10];
    let n = map.read(&mut dst, 0x1002, ANY, ANY);
    assert_eq!(n, 4);
    assert_eq!(&dst, b"cdef\0\0\0\0\0\0");
    assert_eq!(map.read_count(0x1002, 10, ANY, ANY), 4);
    assert_eq!(map.read_count(0x0fff, 10, ANY, ANY), 0);
}

#[test]
fn reads_cross_contiguous_segments() {
    let first = pattern_bytes(300, 1);
    let second = pattern_bytes(200, 2);
    let mut map = MemoryMap::new();
    map_heap(&mut map, 0x10_0000, &first, Protection::RX, ".text");
    map_heap(&mut map, 0x10_0000 + 300, &second, Protection::READ, ".rodata");

    let data = map.read_vec(0x10_0000, 1000, ANY, ANY);
    assert_eq!(data.len(), 500);
    assert_eq!(&data[..300], &first[..]);
    assert_eq!(&data[300..], &second[..]);

    let mut dst = [0u8; 500];
    assert_eq!(map.read1(&mut dst, 0x10_0000 + 100, ANY, ANY), 200);
    assert_eq!(map.read(&mut dst, 0x10_0000, Protection::EXEC, ANY), 300);
}

#[test]
fn backward_reads_end_below_address() {
    let map = build_map(&[
        (0x100, b"0123", Protection::READ),
        (0x104, b"4567", Protection::READ),
    ]);
    let mut dst = [0u8; 6];
    let n = map.read_backward(&mut dst, 0x108, ANY, ANY);
    assert_eq!(n, 6);
    assert_eq!(&dst, b"234567");

    let mut dst = [0u8; 6];
    let n = map.read_backward1(&mut dst, 0x108, ANY, ANY);
    assert_eq!(n, 4);
    assert_eq!(&dst, b"4567\0\0");

    assert_eq!(map.read_backward_count(0x102, 16, ANY, ANY), 2);
}

#[test]
fn writes_stop_at_first_unwritable_byte() {
    let mut map = build_map(&[
        (0x0, b"........", Protection::RW),
        (0x8, b"........", Protection::READ),
    ]);
    assert_eq!(map.write_count(0, 16, Protection::WRITE, ANY), 8);
    assert_eq!(map.write(b"ABCDEFGHIJKL", 0, Protection::WRITE, ANY), 8);
    assert_eq!(map.read_vec(0, 16, ANY, ANY), b"ABCDEFGH........");

    // Without a permission requirement only the buffer limits the write.
    assert_eq!(map.write(b"xy", 7, ANY, ANY), 2);
    assert_eq!(map.read_vec(6, 4, ANY, ANY), b"Gxy.");
    assert_eq!(map.write1(b"123", 6, ANY, ANY), 2);
}

#[test]
fn null_and_static_buffers() {
    static IMAGE: &[u8] = b"static image";
    let mut map = MemoryMap::new();
    map.insert(
        AddressInterval::base_size(0, 12),
        Segment::new(Buffer::from_static(IMAGE).into_ptr(), 0, Protection::READ, ""),
        false,
    )
    .unwrap();
    map.insert(
        AddressInterval::base_size(0x100, 0x100),
        Segment::new(Buffer::null(0x100).into_ptr(), 0, Protection::RW, "bss"),
        false,
    )
    .unwrap();

    assert_eq!(map.read_vec(0, 6, ANY, ANY), b"static");
    assert_eq!(map.write(b"S", 0, ANY, ANY), 0);
    assert_eq!(map.read_count(0x100, 0x100, ANY, ANY), 0);
    assert_eq!(map.write(b"x", 0x100, ANY, ANY), 0);
    assert!(map.exists(AddressInterval::base_size(0x100, 0x100), Protection::RW, ANY));
}

#[test]
fn anonymous_buffer_reads_zero_until_written() {
    let mut map = MemoryMap::new();
    map.insert(
        AddressInterval::base_size(0x7000, 0x1000),
        Segment::new(Buffer::anonymous(0x1000).into_ptr(), 0, Protection::RW, "stack"),
        false,
    )
    .unwrap();
    assert_eq!(map.read_vec(0x7ff0, 0x10, ANY, ANY), vec![0u8; 0x10]);
    assert_eq!(map.write(&[0xaa; 4], 0x7ffc, ANY, ANY), 4);
    assert_eq!(map.read_vec(0x7ffa, 6, ANY, ANY), [0, 0, 0xaa, 0xaa, 0xaa, 0xaa]);
}

#[test]
fn integer_helpers_use_map_byte_order() {
    let mut map = build_map(&[(0x40, &[0u8; 16], Protection::RW)]);
    map.write_uint(0x40, 0x1122_3344, 4).unwrap();
    assert_eq!(map.read_vec(0x40, 4, ANY, ANY), [0x44, 0x33, 0x22, 0x11]);
    assert_eq!(map.read_uint(0x40, 2).unwrap(), 0x3344);

    map.set_byte_order(Endianness::Big);
    assert_eq!(map.read_uint(0x40, 2).unwrap(), 0x4433);
    map.write_uint(0x48, 0x0102, 2).unwrap();
    assert_eq!(map.read_vec(0x48, 2, ANY, ANY), [1, 2]);

    let err = map.read_uint(0x4e, 4).unwrap_err();
    assert!(matches!(err, MapError::NotMapped { va: 0x50, .. }));
    let err = map.write_uint(0x4f, 0xffff, 2).unwrap_err();
    assert!(matches!(err, MapError::NotMapped { va: 0x50, .. }));
}

#[test]
fn memory_view_reads_whole_ranges() {
    let data = pattern_bytes(64, 9);
    let map = build_map(&[(0x2000, &data, Protection::READ)]);
    let bytes = map.read_bytes(0x2010, 8).unwrap();
    assert_eq!(&bytes[..], &data[0x10..0x18]);
    assert_eq!(
        map.read_u16(0x2000, Endianness::Little).unwrap(),
        u16::from_le_bytes([data[0], data[1]])
    );
    assert_eq!(
        map.read_u32(0x2004, Endianness::Big).unwrap(),
        u32::from_be_bytes([data[4], data[5], data[6], data[7]])
    );
    assert!(map.read_bytes(0x2038, 16).is_err());
}
