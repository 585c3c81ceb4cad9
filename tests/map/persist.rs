use std::fs;

use crate::common::file_utils::assert_path_exists;
use crate::common::{map_heap, pattern_bytes, snapshot, ANY};
use tempfile::tempdir;
use vamap::{AddressInterval, MapConfig, MapError, MemoryMap, Protection};

fn sample_map() -> MemoryMap {
    let mut map = MemoryMap::new();
    map_heap(&mut map, 0x40_0000, &pattern_bytes(0x1000, 1), Protection::RX, ".text");
    map_heap(&mut map, 0x40_1000, &pattern_bytes(0x80, 2), Protection::READ, ".rodata");
    map_heap(&mut map, 0x60_0000, &pattern_bytes(0x200, 3), Protection::RW, "heap arena");
    map
}

#[test]
fn dump_then_load_reproduces_map() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("snap");
    let map = sample_map();
    map.dump(&base).unwrap();

    assert_path_exists(dir.path().join("snap.index"), "index file");
    assert_path_exists(dir.path().join("snap-00400000.data"), "text data");
    assert_path_exists(dir.path().join("snap-00600000.data"), "heap data");
    let index = fs::read_to_string(dir.path().join("snap.index")).unwrap();
    assert!(index.starts_with('#'));
    assert!(index.contains("r-x- snap-00400000.data"));

    let mut loaded = MemoryMap::new();
    loaded.load(&base).unwrap();
    assert_eq!(snapshot(&loaded), snapshot(&map));
    let names: Vec<String> = loaded.iter().map(|(_, s)| s.name().to_string()).collect();
    assert_eq!(names, vec![".text", ".rodata", "heap arena"]);
}

#[test]
fn load_replaces_existing_mappings() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("snap");
    sample_map().dump(&base).unwrap();

    let mut map = MemoryMap::new();
    map_heap(&mut map, 0x40_0800, &[0xff; 0x10], Protection::RWX, "stale");
    map_heap(&mut map, 0x10_0000, b"kept", Protection::READ, "kept");
    map.load(&base).unwrap();

    assert_eq!(map.at(0x40_0800).unwrap().1.name(), ".text");
    assert_eq!(map.read_vec(0x10_0000, 4, ANY, ANY), b"kept");
}

#[test]
fn mapped_data_files_stay_unchanged() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("snap");
    sample_map().dump(&base).unwrap();

    let mut config = MapConfig::default();
    config.persist.map_data_files = true;
    let mut map = MemoryMap::with_config(config);
    map.load(&base).unwrap();
    assert_eq!(snapshot(&map), snapshot(&sample_map()));

    assert_eq!(map.write(b"scribble", 0x60_0000, Protection::WRITE, ANY), 8);
    assert_eq!(map.read_vec(0x60_0000, 8, ANY, ANY), b"scribble");
    let on_disk = fs::read(dir.path().join("snap-00600000.data")).unwrap();
    assert_eq!(&on_disk[..8], &pattern_bytes(0x200, 3)[..8]);
}

#[test]
fn short_data_file_is_zero_extended() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("bytes.bin"), b"\x01\x02\x03\x04\x05\x06").unwrap();
    fs::write(
        dir.path().join("manual.index"),
        "# hand written\n\
         0x1000, 0x10, rw-p, bytes.bin, 0x2, scratch\n\
         \n\
         0x2000 0x0 r bytes.bin 0x0 empty\n",
    )
    .unwrap();

    for map_data_files in [false, true] {
        let mut config = MapConfig::default();
        config.persist.map_data_files = map_data_files;
        let mut map = MemoryMap::with_config(config);
        map.load(dir.path().join("manual")).unwrap();

        assert_eq!(map.len(), 1);
        let (range, segment) = map.at(0x1000).unwrap();
        assert_eq!(range, AddressInterval::base_size(0x1000, 0x10));
        assert_eq!(segment.perms(), Protection::RW | Protection::PRIVATE);
        assert_eq!(segment.name(), "scratch");
        let mut expected = vec![3u8, 4, 5, 6];
        expected.resize(0x10, 0);
        assert_eq!(map.read_vec(0x1000, 0x10, ANY, ANY), expected);
    }
}

#[test]
fn absolute_sources_are_used_as_is() {
    let data_dir = tempdir().unwrap();
    let index_dir = tempdir().unwrap();
    let data = data_dir.path().join("blob with spaces.bin");
    fs::write(&data, b"absolute").unwrap();
    fs::write(
        index_dir.path().join("abs.index"),
        format!("0x500 0x8 r-x- {} 0x0\n", data.display()),
    )
    .unwrap();

    let mut map = MemoryMap::new();
    map.load(index_dir.path().join("abs")).unwrap();
    assert_eq!(map.read_vec(0x500, 8, ANY, ANY), b"absolute");
    assert_eq!(map.at(0x500).unwrap().1.name(), "");
}

#[test]
fn syntax_error_reports_line_and_keeps_progress() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("good.bin"), [0xaa; 4]).unwrap();
    fs::write(
        dir.path().join("bad.index"),
        "0x10 0x4 r good.bin 0x0 ok\n# comment\n0x20 0x4 rz good.bin 0x0 broken\n",
    )
    .unwrap();

    let mut map = MemoryMap::new();
    let err = map.load(dir.path().join("bad")).unwrap_err();
    match &err {
        MapError::SyntaxError {
            line, column, file, ..
        } => {
            assert_eq!(*line, 3);
            assert_eq!(*column, Some(10));
            assert!(file.ends_with("bad.index"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("bad.index:3:10"));
    assert_eq!(map.read_vec(0x10, 4, ANY, ANY), [0xaa; 4]);
}

#[test]
fn missing_files_are_io_errors() {
    let dir = tempdir().unwrap();
    let mut map = MemoryMap::new();
    assert!(matches!(
        map.load(dir.path().join("absent")),
        Err(MapError::Io(_))
    ));

    fs::write(dir.path().join("dangling.index"), "0x0 0x4 r nowhere.bin 0x0\n").unwrap();
    assert!(matches!(
        map.load(dir.path().join("dangling")),
        Err(MapError::Io(_))
    ));
    assert!(map.is_empty());
}

#[test]
fn custom_extensions() {
    let dir = tempdir().unwrap();
    let mut config = MapConfig::default();
    config.persist.index_extension = "map".to_string();
    config.persist.data_extension = "bin".to_string();

    let mut map = MemoryMap::with_config(config.clone());
    map_heap(&mut map, 0x8000, b"payload", Protection::READ, "");
    map.dump(dir.path().join("custom")).unwrap();
    assert_path_exists(dir.path().join("custom.map"), "index file");
    assert_path_exists(dir.path().join("custom-00008000.bin"), "data file");

    let mut loaded = MemoryMap::with_config(config);
    loaded.load(dir.path().join("custom")).unwrap();
    assert_eq!(snapshot(&loaded), snapshot(&map));
}
