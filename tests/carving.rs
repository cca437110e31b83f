//! Signature carving over layers and images

use layerfs::{
    CancellationToken, CarveConfig, CarveError, CarveHit, Case, CaseBuilder, Error, InodeAddress,
    MemoryLayer, Signature, SignatureCarver, VfsConfig,
};
use std::io::Cursor;

fn png(body_len: usize) -> Vec<u8> {
    let mut data = b"\x89PNG\x0d\x0a\x1a\x0a".to_vec();
    data.extend(std::iter::repeat(0x11).take(body_len));
    data.extend_from_slice(b"\x00\x00\x00\x00IEND\xaeB`\x82");
    data
}

fn image_with_files() -> Vec<u8> {
    let mut image = vec![0u8; 200_000];
    let jpeg = b"\xff\xd8\xff\xe1\x00\x10Exif\x00\x00";
    image[4096..4096 + jpeg.len()].copy_from_slice(jpeg);
    let png = png(300);
    image[70_000..70_000 + png.len()].copy_from_slice(&png);
    image[150_000..150_005].copy_from_slice(b"%PDF-");
    image
}

#[test]
fn test_scan_reports_every_type_with_absolute_offsets() {
    let carver = SignatureCarver::with_defaults(&CarveConfig {
        window_size: 16 * 1024,
        overlap: 100,
    })
    .unwrap();

    let hits: Vec<CarveHit> = carver
        .scan(Cursor::new(image_with_files()), CancellationToken::new())
        .collect::<Result<_, _>>()
        .unwrap();

    let summary: Vec<(u64, &str)> = hits
        .iter()
        .map(|h| (h.offset, h.type_tag.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![(4096, "jpg"), (70_000, "png"), (150_000, "pdf")]
    );
    assert_eq!(hits[1].length, png(300).len() as u64);
    // No %%EOF trailer: falls back to the maximum length
    assert_eq!(hits[2].length, 1_000_000);
}

#[test]
fn test_window_size_does_not_change_results() {
    let image = image_with_files();
    let scan = |window_size: usize| -> Vec<CarveHit> {
        SignatureCarver::with_defaults(&CarveConfig {
            window_size,
            overlap: 100,
        })
        .unwrap()
        .scan(Cursor::new(image.clone()), CancellationToken::new())
        .collect::<Result<_, _>>()
        .unwrap()
    };

    let reference = scan(1 << 20);
    for window_size in [101, 4097, 69_999] {
        assert_eq!(scan(window_size), reference, "window {}", window_size);
    }
}

#[test]
fn test_custom_signature_table() {
    let signatures = vec![Signature::new("mark", r"MARK[0-9]{2}", 32).with_end(r"END")];
    let carver = SignatureCarver::new(signatures, &CarveConfig::default()).unwrap();
    let data = b"....MARK42 payload END....MARK7x".to_vec();

    let hits: Vec<CarveHit> = carver
        .scan(MemoryLayer::new(data), CancellationToken::new())
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].offset, 4);
    assert_eq!(hits[0].length, 18);
}

fn case_with_image(image: &[u8]) -> (tempfile::TempDir, Case) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.dd");
    std::fs::write(&path, image).unwrap();
    let config = VfsConfig {
        carve: CarveConfig {
            window_size: 32 * 1024,
            overlap: 100,
        },
        ..VfsConfig::default()
    };
    let case = CaseBuilder::new().config(config).build().unwrap();
    case.store().add_source("image", &path).unwrap();
    (dir, case)
}

#[test]
fn test_case_carve_registers_readable_nodes() {
    let (_dir, case) = case_with_image(&image_with_files());
    let image = InodeAddress::parse("Iimage").unwrap();
    case.create_node(&image, "/image").unwrap();

    let nodes = case.carve(&image, &CancellationToken::new(), &[]).unwrap();
    let paths: Vec<&str> = nodes.iter().map(|n| n.path.as_str()).collect();
    assert_eq!(
        paths,
        vec!["/image/4096.jpg", "/image/70000.png", "/image/150000.pdf"]
    );

    let png_node = &nodes[1];
    let carved = case.read_all(&png_node.address).unwrap();
    assert_eq!(carved, png(300));

    // Carved nodes plus the image itself
    assert_eq!(case.nodes().unwrap().len(), 4);
}

#[test]
fn test_carve_nested_layer_uses_layer_offsets() {
    let (_dir, case) = case_with_image(&image_with_files());
    let unallocated = InodeAddress::parse("Iimage|o60000:20000").unwrap();

    let nodes = case
        .carve(&unallocated, &CancellationToken::new(), &["png".to_string()])
        .unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(
        nodes[0].address.to_string(),
        format!("Iimage|o60000:20000|o10000:{}", png(300).len())
    );
    assert_eq!(case.read_all(&nodes[0].address).unwrap(), png(300));
}

#[test]
fn test_cancelled_carve_returns_error() {
    let (_dir, case) = case_with_image(&image_with_files());
    let token = CancellationToken::new();
    token.cancel();

    let err = case
        .carve(&InodeAddress::parse("Iimage").unwrap(), &token, &[])
        .unwrap_err();
    assert!(matches!(err, Error::Carve(CarveError::Cancelled { offset: 0 })));
    assert!(case.nodes().unwrap().is_empty());
}
