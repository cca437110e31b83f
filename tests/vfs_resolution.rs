//! End-to-end address resolution over a real evidence file

use flate2::write::GzEncoder;
use flate2::Compression;
use layerfs::{
    Case, Error, Extent, ExtentError, InodeAddress, LayerError, OpenError, UnallocatedRange,
};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use tempfile::TempDir;

const BLOCK: u64 = 512;

/// 64 blocks of 512 bytes, block `b` filled with byte `b`
fn disk_image() -> Vec<u8> {
    (0..64u64)
        .flat_map(|b| std::iter::repeat(b as u8).take(BLOCK as usize))
        .collect()
}

fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, data).unwrap();
    path
}

fn case_with_disk() -> (TempDir, Case) {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(&dir, "disk.dd", &disk_image());
    let case = Case::in_memory();
    let store = case.store();
    store.add_source("disk", &path).unwrap();
    store.set_block_size(BLOCK).unwrap();
    (dir, case)
}

#[test]
fn test_fragmented_file_reads_in_logical_order() {
    let (_dir, case) = case_with_disk();
    // Logical blocks 0..2 on physical 10..12, logical 2..3 on physical 40
    case.store()
        .add_extent_rows(
            7,
            &[Extent::new(40, 1, 2), Extent::new(10, 2, 0)],
        )
        .unwrap();
    case.store().set_inode_size(7, 3 * BLOCK - 100).unwrap();

    let data = case.read_all(&InodeAddress::parse("Idisk|D7").unwrap()).unwrap();
    assert_eq!(data.len(), (3 * BLOCK - 100) as usize);
    assert!(data[..512].iter().all(|&b| b == 10));
    assert!(data[512..1024].iter().all(|&b| b == 11));
    assert!(data[1024..].iter().all(|&b| b == 40));
}

#[test]
fn test_slice_over_physical_file() {
    let (_dir, case) = case_with_disk();
    case.store()
        .add_extent_rows(3, &[Extent::new(5, 2, 0)])
        .unwrap();

    let data = case
        .read_all(&InodeAddress::parse("Idisk|D3|o510:4").unwrap())
        .unwrap();
    assert_eq!(data, vec![5, 5, 6, 6]);
}

#[test]
fn test_seek_within_layer_stack() {
    let (_dir, case) = case_with_disk();
    case.store()
        .add_extent_rows(3, &[Extent::new(20, 4, 0)])
        .unwrap();

    let mut layer = case.open_str("Idisk|D3").unwrap();
    assert_eq!(layer.size(), 4 * BLOCK);
    layer.seek(SeekFrom::Start(3 * BLOCK + 1)).unwrap();
    let mut buf = [0u8; 2];
    layer.read_exact(&mut buf).unwrap();
    assert_eq!(buf, [23, 23]);

    layer.seek(SeekFrom::End(-1)).unwrap();
    assert_eq!(layer.read(&mut buf).unwrap(), 1);
    assert_eq!(layer.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_hole_is_an_error_not_eof() {
    let (_dir, case) = case_with_disk();
    case.store()
        .add_extent_rows(9, &[Extent::new(1, 1, 0), Extent::new(2, 1, 2)])
        .unwrap();

    let err = case
        .read_all(&InodeAddress::parse("Idisk|D9").unwrap())
        .unwrap_err();
    let io = match err {
        Error::Io(io) => io,
        other => panic!("unexpected: {:?}", other),
    };
    assert!(matches!(
        ExtentError::from_io(&io),
        Some(ExtentError::Hole { offset: 512 })
    ));
}

#[test]
fn test_resident_inode() {
    let (_dir, case) = case_with_disk();
    case.store().set_resident(12, b"tiny file").unwrap();
    let data = case
        .read_all(&InodeAddress::parse("Idisk|D12").unwrap())
        .unwrap();
    assert_eq!(data, b"tiny file");
}

#[test]
fn test_unallocated_range() {
    let (_dir, case) = case_with_disk();
    case.store()
        .add_unallocated(
            1,
            UnallocatedRange {
                offset: 63 * BLOCK,
                size: None,
            },
        )
        .unwrap();

    let data = case
        .read_all(&InodeAddress::parse("Idisk|U1").unwrap())
        .unwrap();
    assert_eq!(data.len(), BLOCK as usize);
    assert!(data.iter().all(|&b| b == 63));
}

#[test]
fn test_gzip_member_inside_image() {
    let dir = tempfile::tempdir().unwrap();
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(b"<html>evidence</html>").unwrap();
    let member = enc.finish().unwrap();

    let mut image = vec![0xAAu8; 1000];
    image.extend_from_slice(&member);
    image.extend_from_slice(&[0xBB; 200]);
    let path = write_file(&dir, "blob.bin", &image);

    let case = Case::in_memory();
    case.store().add_source("blob", &path).unwrap();

    let address = format!("Iblob|o1000:{}|G0", member.len());
    let data = case
        .read_all(&InodeAddress::parse(&address).unwrap())
        .unwrap();
    assert_eq!(data, b"<html>evidence</html>");
}

#[test]
fn test_chunked_body_then_gzip() {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(b"compressed and chunked").unwrap();
    let gz = enc.finish().unwrap();

    let split = gz.len() / 2;
    let mut body = Vec::new();
    for part in [&gz[..split], &gz[split..]] {
        body.extend_from_slice(format!("{:x}\r\n", part.len()).as_bytes());
        body.extend_from_slice(part);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(b"0\r\n\r\n");

    let dir = tempfile::tempdir().unwrap();
    let path = write_file(&dir, "body.bin", &body);
    let case = Case::in_memory();
    case.store().add_source("body", &path).unwrap();

    let data = case
        .read_all(&InodeAddress::parse("Ibody|c0|G0").unwrap())
        .unwrap();
    assert_eq!(data, b"compressed and chunked");
}

#[test]
fn test_mounted_file() {
    let dir = tempfile::tempdir().unwrap();
    write_file(&dir, "notes.txt", b"mounted contents");

    let config = layerfs::VfsConfig {
        mount_root: Some(dir.path().to_path_buf()),
        ..layerfs::VfsConfig::default()
    };
    let case = layerfs::CaseBuilder::new().config(config).build().unwrap();
    case.store()
        .add_mounted(4, std::path::Path::new("notes.txt"))
        .unwrap();

    let data = case
        .read_all(&InodeAddress::parse("M4|o8").unwrap())
        .unwrap();
    assert_eq!(data, b"contents");
}

#[test]
fn test_unknown_specifier() {
    let (_dir, case) = case_with_disk();
    let err = case.open_str("Idisk|Q1").unwrap_err();
    assert!(matches!(
        err,
        Error::Open(OpenError::UnknownSpecifier {
            index: 1,
            specifier: 'Q'
        })
    ));
}

#[test]
fn test_unknown_source_names_failing_segment() {
    let case = Case::in_memory();
    match case.open_str("Inope|o1").unwrap_err() {
        Error::Open(OpenError::LayerFailed {
            index,
            segment,
            source,
        }) => {
            assert_eq!(index, 0);
            assert_eq!(segment, "Inope");
            assert!(matches!(source, LayerError::Store(_)));
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn test_transform_without_parent() {
    let case = Case::in_memory();
    let err = case.open_str("o1:2").unwrap_err();
    assert!(matches!(
        err,
        Error::Open(OpenError::LayerFailed {
            index: 0,
            source: LayerError::MissingParent('o'),
            ..
        })
    ));
}

#[test]
fn test_same_address_opens_identical_bytes() {
    let (_dir, case) = case_with_disk();
    case.store()
        .add_extent_rows(2, &[Extent::new(30, 3, 0)])
        .unwrap();
    let address = InodeAddress::parse("Idisk|D2|o100:900").unwrap();

    let first = case.read_all(&address).unwrap();
    let second = case.read_all(&address).unwrap();
    assert_eq!(first, second);
    assert_eq!(case.digest(&address).unwrap(), case.digest(&address).unwrap());
}
