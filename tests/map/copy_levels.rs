use crate::common::{build_map, snapshot, ANY};
use vamap::{AddressInterval, Buffer, CopyLevel, MemoryMap, Protection, Segment};

fn two_segment_map() -> MemoryMap {
    build_map(&[
        (0x1000, b"aaaaaaaa", Protection::RW),
        (0x2000, b"bbbbbbbb", Protection::RW),
    ])
}

#[test]
fn shallow_copy_shares_writes() {
    let mut original = two_segment_map();
    let mut copy = original.copy(CopyLevel::Shallow);

    assert_eq!(copy.write(b"XY", 0x1000, ANY, ANY), 2);
    assert_eq!(original.read_vec(0x1000, 2, ANY, ANY), b"XY");

    // Structural changes stay private to each map.
    copy.erase(AddressInterval::base_size(0x2000, 8));
    assert!(original.at(0x2000).is_ok());
}

#[test]
fn deep_copy_is_independent() {
    let mut original = two_segment_map();
    let before = snapshot(&original);
    let mut copy = original.copy(CopyLevel::Deep);
    assert_eq!(snapshot(&copy), before);

    assert_eq!(copy.write(b"XY", 0x1000, ANY, ANY), 2);
    assert_eq!(original.write(b"ZZ", 0x2000, ANY, ANY), 2);
    assert_eq!(original.read_vec(0x1000, 2, ANY, ANY), b"aa");
    assert_eq!(copy.read_vec(0x2000, 2, ANY, ANY), b"bb");
}

#[test]
fn cow_copy_unshares_on_first_write() {
    let mut original = two_segment_map();
    let mut copy = original.copy(CopyLevel::CopyOnWrite);
    assert!(copy.iter().all(|(_, s)| s.is_cow()));
    assert!(original.iter().all(|(_, s)| s.is_cow()));

    assert_eq!(copy.write(b"XY", 0x1000, ANY, ANY), 2);
    assert_eq!(copy.read_vec(0x1000, 4, ANY, ANY), b"XYaa");
    assert_eq!(original.read_vec(0x1000, 4, ANY, ANY), b"aaaa");

    let (_, written) = copy.at(0x1000).unwrap();
    let (_, untouched) = copy.at(0x2000).unwrap();
    assert!(!written.is_cow());
    assert!(untouched.is_cow());
    assert!(!written
        .buffer()
        .ptr_eq(original.at(0x1000).unwrap().1.buffer()));
    assert!(untouched
        .buffer()
        .ptr_eq(original.at(0x2000).unwrap().1.buffer()));
}

#[test]
fn cow_write_through_source_is_hidden_from_copy() {
    let mut original = two_segment_map();
    let copy = original.copy(CopyLevel::CopyOnWrite);

    assert_eq!(original.write(b"ZZZZ", 0x2004, ANY, ANY), 4);
    assert_eq!(original.read_vec(0x2000, 8, ANY, ANY), b"bbbbZZZZ");
    assert_eq!(copy.read_vec(0x2000, 8, ANY, ANY), b"bbbbbbbb");
}

#[test]
fn cow_shared_buffer_is_copied_once() {
    let buffer = Buffer::from_vec(vec![7u8; 32]).into_ptr();
    let mut original = MemoryMap::new();
    original
        .insert(
            AddressInterval::base_size(0, 16),
            Segment::new(buffer.clone(), 0, Protection::RW, "low"),
            false,
        )
        .unwrap();
    original
        .insert(
            AddressInterval::base_size(0x100, 16),
            Segment::new(buffer.clone(), 16, Protection::RW, "high"),
            false,
        )
        .unwrap();
    let mut copy = original.copy(CopyLevel::CopyOnWrite);

    assert_eq!(copy.write(&[1], 0, ANY, ANY), 1);
    let (_, low) = copy.at(0).unwrap();
    let (_, high) = copy.at(0x100).unwrap();
    assert!(low.buffer().ptr_eq(high.buffer()));
    assert!(!low.buffer().ptr_eq(&buffer));
    assert!(!high.is_cow());

    assert_eq!(copy.write(&[2], 0x100, ANY, ANY), 1);
    assert_eq!(copy.read_vec(0x100, 1, ANY, ANY), [2]);
    assert_eq!(buffer.borrow().data().map(|d| d[16]), Some(7));
}

#[test]
fn cow_respects_permissions() {
    let mut original = build_map(&[(0x1000, b"readonly", Protection::READ)]);
    let mut copy = original.copy(CopyLevel::CopyOnWrite);

    assert_eq!(copy.write_count(0x1000, 8, Protection::WRITE, ANY), 0);
    assert_eq!(copy.write(b"x", 0x1000, Protection::WRITE, ANY), 0);
    assert!(copy.at(0x1000).unwrap().1.is_cow());
}

#[test]
fn init_replaces_contents() {
    let mut source = two_segment_map();
    let mut target = build_map(&[(0x9000, b"old", Protection::READ)]);
    target.init(&mut source, CopyLevel::Deep);
    assert!(target.at(0x9000).is_err());
    assert_eq!(snapshot(&target), snapshot(&source));
}
