//! TMAP slides through the full open/read/tile path.

use std::sync::Arc;

use wsi_pyramid::format::AssociatedKind;
use wsi_pyramid::{BackendKind, DeepZoomGenerator, Slide, SlideError};

use super::test_utils::*;

const RED: [u8; 3] = [200, 40, 40];
const GREEN: [u8; 3] = [40, 200, 40];
const BLUE: [u8; 3] = [40, 40, 200];
const GRAY: [u8; 3] = [TMAP_BACKGROUND; 3];

/// Three layers with tile (1, 1) of the base layer never written.
fn tmap(scan_scale: u8) -> Vec<u8> {
    build_tmap(
        scan_scale,
        &[(512, 300, RED), (256, 150, GREEN), (128, 75, BLUE)],
        &[(0, 1, 1)],
    )
}

fn open(dir: &tempfile::TempDir, scan_scale: u8) -> Slide {
    Slide::open(write_slide(dir, "case.tmap", &tmap(scan_scale))).unwrap()
}

#[test]
fn test_geometry_and_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let slide = open(&dir, 40);

    assert_eq!(slide.format(), BackendKind::Tmap);
    assert_eq!(slide.level_count().unwrap(), 3);
    assert_eq!(slide.dimensions().unwrap(), (512, 300));
    assert_eq!(slide.level_downsamples().unwrap(), vec![1.0, 2.0, 4.0]);

    assert_eq!(slide.background(), [230, 230, 230, 255]);
    assert_eq!(slide.property("openslide.background-color").unwrap(), Some("E6E6E6"));
    assert_eq!(slide.vendor().unwrap(), Some("UNIC"));
    assert_eq!(slide.magnification().unwrap(), Some(40.0));
    let mpp = slide.mpp().unwrap().unwrap();
    assert!((mpp - 0.25).abs() < 1e-6, "mpp {mpp}");
}

#[test]
fn test_scan_scale_limits_levels() {
    let dir = tempfile::tempdir().unwrap();
    // 4x scan: 4x and 2x only
    assert_eq!(open(&dir, 4).level_count().unwrap(), 2);
}

#[test]
fn test_detected_by_magic() {
    let dir = tempfile::tempdir().unwrap();
    let slide = Slide::open(write_slide(&dir, "export.dat", &tmap(20))).unwrap();
    assert_eq!(slide.format(), BackendKind::Tmap);
}

#[test]
fn test_pixels_and_missing_tiles() {
    let dir = tempfile::tempdir().unwrap();
    let slide = open(&dir, 40);

    let region = slide.read_region((250, 250), 0, (12, 12)).unwrap();
    assert!(close_to(region.pixel(0, 0), RED, 6));
    // (260, 260) lies in the missing tile
    assert!(close_to(region.pixel(10, 10), GRAY, 0));

    let level1 = slide.read_region((0, 0), 1, (8, 8)).unwrap();
    assert!(close_to(level1.pixel(4, 4), GREEN, 6));

    let level2 = slide.read_region((400, 200), 2, (4, 4)).unwrap();
    assert!(close_to(level2.pixel(1, 1), BLUE, 6));
}

#[test]
fn test_outside_uses_file_background() {
    let dir = tempfile::tempdir().unwrap();
    let slide = open(&dir, 40);

    let region = slide.read_region((508, 250), 0, (8, 8)).unwrap();
    assert_eq!(region.dimensions(), (8, 8));
    assert!(close_to(region.pixel(1, 1), RED, 6));
    // Past the right edge
    assert_eq!(region.pixel(6, 1), [230, 230, 230, 255]);
}

#[test]
fn test_label_and_synthesized_thumbnail() {
    let dir = tempfile::tempdir().unwrap();
    let slide = open(&dir, 40);

    assert_eq!(slide.associated_images().unwrap(), vec![AssociatedKind::Label]);
    let label = slide.associated_image(AssociatedKind::Label).unwrap().unwrap();
    assert_eq!(label.dimensions(), (40, 20));

    let thumb = slide.associated_image(AssociatedKind::Thumbnail).unwrap().unwrap();
    assert_eq!(thumb.dimensions(), (512, 300));
}

#[test]
fn test_deepzoom_reads_native_layers() {
    let dir = tempfile::tempdir().unwrap();
    let dz = DeepZoomGenerator::new(Arc::new(open(&dir, 40)), 254, 1).unwrap();

    assert_eq!(dz.max_level(), 9);
    assert_eq!(dz.level_dimensions(8).unwrap(), (256, 150));

    let tile = dz.get_tile(8, 0, 0).unwrap();
    assert_eq!(tile.dimensions(), (255, 150));
    assert!(close_to(tile.pixel(100, 100), GREEN, 6));

    let tile = dz.get_tile(7, 0, 0).unwrap();
    assert_eq!(tile.dimensions(), (128, 75));
    assert!(close_to(tile.pixel(60, 30), BLUE, 6));
}

#[test]
fn test_unsupported_version() {
    let dir = tempfile::tempdir().unwrap();
    let mut data = tmap(40);
    data[5] = b'5';

    match Slide::open(write_slide(&dir, "old.tmap", &data)) {
        Err(SlideError::OpenFailure { kind, detail }) => {
            assert_eq!(kind, BackendKind::Tmap);
            assert!(detail.contains("version 5"), "{detail}");
        }
        other => panic!("expected OpenFailure, got {other:?}"),
    }
}

// -----------------------------------------------------------------------------
// Version 6
// -----------------------------------------------------------------------------

const YELLOW: [u8; 3] = [200, 200, 40];

fn tmap6(dir: &tempfile::TempDir, with_side_file: bool) -> Slide {
    let (data, side) = build_tmap6([RED, YELLOW], GREEN);
    if with_side_file {
        write_slide(dir, "v6.DT1", &side);
    }
    Slide::open(write_slide(dir, "v6.tmap", &data)).unwrap()
}

#[test]
fn test_version_six_geometry() {
    let dir = tempfile::tempdir().unwrap();
    let slide = tmap6(&dir, true);

    assert_eq!(slide.format(), BackendKind::Tmap);
    assert_eq!(slide.level_count().unwrap(), 3);
    assert_eq!(slide.dimensions().unwrap(), (1024, 512));
    assert_eq!(slide.level_dimensions(2).unwrap(), (256, 128));
    assert_eq!(slide.level_downsamples().unwrap(), vec![1.0, 2.0, 4.0]);
    assert_eq!(slide.property("tmap.version").unwrap(), Some("6"));
    assert_eq!(slide.magnification().unwrap(), Some(4.0));
}

#[test]
fn test_version_six_reads_side_file() {
    let dir = tempfile::tempdir().unwrap();
    let slide = tmap6(&dir, true);

    // Straddles the block seam: main file on the left, DT1 on the right
    let region = slide.read_region((500, 300), 0, (24, 4)).unwrap();
    assert!(close_to(region.pixel(2, 2), RED, 6));
    assert!(close_to(region.pixel(20, 2), YELLOW, 6));

    let level1 = slide.read_region((0, 0), 1, (8, 8)).unwrap();
    assert!(close_to(level1.pixel(4, 4), GREEN, 6));

    // No stored tiles at level 2: scaled down from level 1
    let level2 = slide.read_region((800, 200), 2, (4, 4)).unwrap();
    assert!(close_to(level2.pixel(1, 1), GREEN, 6));
}

#[test]
fn test_version_six_without_side_file() {
    let dir = tempfile::tempdir().unwrap();
    let slide = tmap6(&dir, false);

    let region = slide.read_region((600, 100), 0, (4, 4)).unwrap();
    assert!(close_to(region.pixel(1, 1), GRAY, 0));
    let region = slide.read_region((100, 100), 0, (4, 4)).unwrap();
    assert!(close_to(region.pixel(1, 1), RED, 6));
}
