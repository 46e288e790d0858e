//! DeepZoom tiling over opened slides: grid, seams, edge tiles and the
//! encoded tile service.

use std::sync::Arc;

use wsi_pyramid::tile::parse_tile_path;
use wsi_pyramid::{
    DeepZoomGenerator, Slide, SlideError, TileError, TileFormat, TileRequest, TileService,
};

use super::test_utils::*;

/// 300x200 generic pyramid tiled at 64 px with 1 px overlap.
fn generator(dir: &tempfile::TempDir) -> DeepZoomGenerator {
    let slide = Slide::open(write_slide(dir, "g.tif", &generic_pyramid())).unwrap();
    DeepZoomGenerator::new(Arc::new(slide), 64, 1).unwrap()
}

// =============================================================================
// Grid
// =============================================================================

#[test]
fn test_level_geometry() {
    let dir = tempfile::tempdir().unwrap();
    let dz = generator(&dir);

    // ceil(log2(300)) = 9
    assert_eq!(dz.max_level(), 9);
    assert_eq!(dz.level_count(), 10);
    assert_eq!(dz.level_dimensions(9).unwrap(), (300, 200));
    assert_eq!(dz.level_dimensions(8).unwrap(), (150, 100));
    assert_eq!(dz.level_dimensions(7).unwrap(), (75, 50));
    assert_eq!(dz.level_dimensions(6).unwrap(), (38, 25));
    assert_eq!(dz.level_dimensions(0).unwrap(), (1, 1));

    assert_eq!(dz.level_tiles(9).unwrap(), (5, 4));
    assert_eq!(dz.level_tiles(8).unwrap(), (3, 2));
    assert_eq!(dz.level_tiles(7).unwrap(), (2, 1));

    // 20 + 6 + 2 + one tile for each of levels 0..=6
    assert_eq!(dz.tile_count(), 35);
}

#[test]
fn test_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let dz = generator(&dir);

    let xml = dz.get_dzi(TileFormat::Png);
    assert!(xml.contains(r#"TileSize="64""#));
    assert!(xml.contains(r#"Overlap="1""#));
    assert!(xml.contains(r#"Format="png""#));
    assert!(xml.contains(r#"<Size Width="300" Height="200" />"#));

    let descriptor = dz.get_descriptor(8).unwrap();
    assert_eq!((descriptor.level_width, descriptor.level_height), (150, 100));
    assert_eq!((descriptor.tile_edge, descriptor.overlap), (64, 1));
}

#[test]
fn test_out_of_range_requests() {
    let dir = tempfile::tempdir().unwrap();
    let dz = generator(&dir);

    assert!(matches!(
        dz.get_tile(10, 0, 0),
        Err(SlideError::InvalidLevel { level: 10, count: 10, .. })
    ));
    assert!(matches!(
        dz.get_tile(9, 5, 0),
        Err(SlideError::InvalidArgument { .. })
    ));
    assert!(matches!(
        dz.tile_bounds(9, 0, 4),
        Err(SlideError::InvalidArgument { .. })
    ));
}

// =============================================================================
// Tiles
// =============================================================================

#[test]
fn test_edge_tile_sizes() {
    let dir = tempfile::tempdir().unwrap();
    let dz = generator(&dir);

    let first = dz.get_tile(9, 0, 0).unwrap();
    assert_eq!(first.dimensions(), (65, 65));

    let inner = dz.get_tile(9, 1, 1).unwrap();
    assert_eq!(inner.dimensions(), (66, 66));

    // Last column starts at 255 and ends at the slide edge
    let corner = dz.get_tile(9, 4, 3).unwrap();
    assert_eq!(corner.dimensions(), (45, 9));
    assert_eq!(corner.pixel(44, 8), [299u32 as u8, 199, 0, 255]);

    let root = dz.get_tile(0, 0, 0).unwrap();
    assert_eq!(root.dimensions(), (1, 1));
}

#[test]
fn test_overlap_repeats_neighbour_pixels() {
    let dir = tempfile::tempdir().unwrap();
    let dz = generator(&dir);

    let left = dz.get_tile(9, 0, 0).unwrap();
    let right = dz.get_tile(9, 1, 0).unwrap();

    // Tile 1 starts one pixel early, at x = 63
    assert_eq!(right.pixel(0, 10), [63, 10, 0, 255]);
    assert_eq!(right.pixel(0, 10), left.pixel(63, 10));
    // Tile 0 runs one pixel past its own span, to x = 64
    assert_eq!(left.pixel(64, 10), right.pixel(1, 10));
}

#[test]
fn test_tiles_stitch_without_seams() {
    let dir = tempfile::tempdir().unwrap();
    let dz = generator(&dir);

    // Levels 9 and 8 coincide with native levels 0 and 1
    for (level, native) in [(9u32, 0u8), (8, 1)] {
        let (cols, rows) = dz.level_tiles(level).unwrap();
        let (lw, lh) = dz.level_dimensions(level).unwrap();
        let mut covered = vec![0u8; (lw * lh) as usize];

        for row in 0..rows {
            for col in 0..cols {
                let bounds = dz.tile_bounds(level, col, row).unwrap();
                let tile = dz.get_tile(level, col, row).unwrap();
                assert_eq!(tile.dimensions(), (bounds.width, bounds.height));

                let own_x = col * 64;
                let own_y = row * 64;
                for y in own_y..((row + 1) * 64).min(lh) {
                    for x in own_x..((col + 1) * 64).min(lw) {
                        let px = tile.pixel(x - bounds.x, y - bounds.y);
                        assert_eq!(px, [x as u8, y as u8, native, 255], "level {level} ({x}, {y})");
                        covered[(y * lw + x) as usize] += 1;
                    }
                }
            }
        }
        assert!(covered.iter().all(|&c| c == 1), "level {level}");
    }
}

#[test]
fn test_resampled_levels_have_exact_sizes() {
    let dir = tempfile::tempdir().unwrap();
    let dz = generator(&dir);

    for level in 0..=7 {
        let (cols, rows) = dz.level_tiles(level).unwrap();
        for row in 0..rows {
            for col in 0..cols {
                let bounds = dz.tile_bounds(level, col, row).unwrap();
                let tile = dz.get_tile(level, col, row).unwrap();
                assert_eq!(
                    tile.dimensions(),
                    (bounds.width, bounds.height),
                    "tile {level}/{col}_{row}"
                );
            }
        }
    }
}

// =============================================================================
// Tile Service
// =============================================================================

#[test]
fn test_service_encodes_and_caches() {
    let dir = tempfile::tempdir().unwrap();
    let dz = generator(&dir);
    let service = TileService::new();

    let request = TileRequest::from_path("g_files/9/1_1.jpeg", 85).unwrap();
    let first = service.get_tile(&dz, &request).unwrap();
    assert!(!first.cache_hit);
    assert_eq!(&first.data[..2], &[0xFF, 0xD8]);

    let second = service.get_tile(&dz, &request).unwrap();
    assert!(second.cache_hit);
    assert_eq!(first.data, second.data);
    assert_eq!(service.cache_stats().2, 1);

    let png = TileRequest::new(9, 4, 3).with_format(TileFormat::Png);
    let encoded = service.get_tile(&dz, &png).unwrap();
    let decoded = image::load_from_memory(&encoded.data).unwrap().to_rgba8();
    assert_eq!(decoded.dimensions(), (45, 9));
    assert_eq!(decoded.get_pixel(44, 8).0, [299u32 as u8, 199, 0, 255]);

    assert_eq!(service.invalidate_slide(dz.slide()), 2);
    assert_eq!(service.cache_stats().2, 0);
}

#[test]
fn test_service_rejects_bad_requests() {
    let dir = tempfile::tempdir().unwrap();
    let dz = generator(&dir);
    let service = TileService::new();

    let err = service
        .get_tile(&dz, &TileRequest::new(9, 0, 0).with_quality(0))
        .unwrap_err();
    assert!(matches!(err, TileError::InvalidQuality(0)));

    let err = service.get_tile(&dz, &TileRequest::new(11, 0, 0)).unwrap_err();
    assert!(matches!(err, TileError::Slide(SlideError::InvalidLevel { .. })));

    assert!(parse_tile_path("9/1-1.jpeg").is_err());
    assert!(TileRequest::from_path("9/1_1.gif", 80).is_err());
}

#[test]
fn test_closed_slide_stops_tiling() {
    let dir = tempfile::tempdir().unwrap();
    let dz = generator(&dir);

    dz.get_tile(9, 0, 0).unwrap();
    dz.slide().close();
    assert!(matches!(
        dz.get_tile(9, 0, 0),
        Err(SlideError::HandleClosed { .. })
    ));
}
