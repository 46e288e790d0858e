//! Region and thumbnail reads: exact output sizes, level coordinate
//! mapping and background fill.

use wsi_pyramid::{Region, Slide, SlideError};

use super::test_utils::*;

fn generic_slide(dir: &tempfile::TempDir) -> Slide {
    Slide::open(write_slide(dir, "g.tif", &generic_pyramid())).unwrap()
}

/// 10000x8000 with levels at downsample 1, 4 and 16.
fn geometry_slide() -> (Slide, GeometryBackend) {
    let backend = GeometryBackend::new(&[(10_000, 8_000, 1.0), (2_500, 2_000, 4.0), (625, 500, 16.0)]);
    let recorder = GeometryBackend {
        levels: backend.levels.clone(),
        requests: std::sync::Arc::clone(&backend.requests),
    };
    let slide = Slide::from_backend("synthetic.kfb", Box::new(backend), None).unwrap();
    (slide, recorder)
}

// =============================================================================
// Pixel-exact reads
// =============================================================================

#[test]
fn test_level0_read_across_tiles() {
    let dir = tempfile::tempdir().unwrap();
    let slide = generic_slide(&dir);

    let region = slide.read_region((60, 62), 0, (8, 5)).unwrap();
    assert_eq!(region.dimensions(), (8, 5));
    for y in 0..5 {
        for x in 0..8 {
            assert_eq!(region.pixel(x, y), [60 + x as u8, 62 + y as u8, 0, 255]);
        }
    }
}

#[test]
fn test_location_is_level0_at_any_level() {
    let dir = tempfile::tempdir().unwrap();
    let slide = generic_slide(&dir);

    // (20, 10) at downsample 2 starts at level pixel (10, 5)
    let region = slide.read_region((20, 10), 1, (3, 3)).unwrap();
    assert_eq!(region.pixel(0, 0), [10, 5, 1, 255]);
    assert_eq!(region.pixel(2, 1), [12, 6, 1, 255]);

    // Odd coordinates floor
    let region = slide.read_region((21, 11), 1, (1, 1)).unwrap();
    assert_eq!(region.pixel(0, 0), [10, 5, 1, 255]);
}

#[test]
fn test_level0_region_size_rounding() {
    let dir = tempfile::tempdir().unwrap();
    let slide = generic_slide(&dir);

    let region = Region {
        x0: 21,
        y0: 11,
        width: 5,
        height: 3,
        level: 1,
    };
    // 5 / 2 = 2.5 rounds up to 3; 3 / 2 = 1.5 rounds up to 2
    let pixels = slide.read_level0_region(&region).unwrap();
    assert_eq!(pixels.dimensions(), (3, 2));
    assert_eq!(pixels.pixel(0, 0), [10, 5, 1, 255]);
}

#[test]
fn test_adjacent_regions_stitch_at_level1() {
    let dir = tempfile::tempdir().unwrap();
    let slide = generic_slide(&dir);

    // Odd-sized strips tiling x = 17..128 and y = 3..40 in level 0
    let xs = [17u32, 30, 61, 62, 99, 128];
    let ys = [3u32, 20, 40];
    let mut columns = Vec::new();
    let mut rows = Vec::new();
    for pair in xs.windows(2) {
        for band in ys.windows(2) {
            let region = Region {
                x0: pair[0] as i64,
                y0: band[0] as i64,
                width: pair[1] - pair[0],
                height: band[1] - band[0],
                level: 1,
            };
            let pixels = slide.read_level0_region(&region).unwrap();
            let (w, h) = pixels.dimensions();

            // Coordinate pixels place each tile in the level exactly
            let [x, y, page, _] = pixels.pixel(0, 0);
            assert_eq!((x as u32, y as u32, page), (pair[0] / 2, band[0] / 2, 1));
            let [x, y, _, _] = pixels.pixel(w - 1, h - 1);
            assert_eq!((x as u32 + 1, y as u32 + 1), (pair[1] / 2, band[1] / 2));

            if band[0] == ys[0] {
                columns.push((pair[0] / 2, w));
            }
            if pair[0] == xs[0] {
                rows.push((band[0] / 2, h));
            }
        }
    }

    // No gap and no overlap between neighbours
    for pair in columns.windows(2) {
        assert_eq!(pair[0].0 + pair[0].1, pair[1].0, "columns {pair:?}");
    }
    for pair in rows.windows(2) {
        assert_eq!(pair[0].0 + pair[0].1, pair[1].0, "rows {pair:?}");
    }
    let total: u32 = columns.iter().map(|c| c.1).sum();
    assert_eq!(total, 128 / 2 - 17 / 2);
}

#[test]
fn test_output_size_matches_request_everywhere() {
    let dir = tempfile::tempdir().unwrap();
    let slide = generic_slide(&dir);

    let requests = [
        ((0, 0), 0, (300, 200)),
        ((290, 190), 0, (64, 64)),
        ((-5, 3), 0, (17, 1)),
        ((1000, 1000), 0, (9, 7)),
        ((0, 0), 1, (151, 101)),
        ((299, 199), 1, (2, 2)),
    ];
    for (location, level, size) in requests {
        let pixels = slide.read_region(location, level, size).unwrap();
        assert_eq!(
            pixels.dimensions(),
            (size.0 as u32, size.1 as u32),
            "{location:?} level {level}"
        );
    }
}

#[test]
fn test_out_of_bounds_is_background() {
    let dir = tempfile::tempdir().unwrap();
    let slide = generic_slide(&dir);

    let region = slide.read_region((296, -2), 0, (8, 4)).unwrap();
    // Inside the slide
    assert_eq!(region.pixel(0, 2), [296u32 as u8, 0, 0, 255]);
    assert_eq!(region.pixel(3, 3), [299u32 as u8, 1, 0, 255]);
    // Past the right edge and above the top
    assert_eq!(region.pixel(4, 2), [255, 255, 255, 255]);
    assert_eq!(region.pixel(0, 0), [255, 255, 255, 255]);

    // Padding beyond the content is never returned
    let padded = slide.read_region((300, 0), 0, (20, 1)).unwrap();
    assert!((0..20).all(|x| padded.pixel(x, 0) == [255, 255, 255, 255]));
}

#[test]
fn test_backend_only_sees_the_intersection() {
    let (slide, recorder) = geometry_slide();

    let region = slide.read_region((-50, -40), 0, (100, 100)).unwrap();
    assert_eq!(region.dimensions(), (100, 100));
    assert_eq!(region.pixel(0, 0), [255, 255, 255, 255]);
    assert_eq!(region.pixel(60, 60), GeometryBackend::level_color(0));

    slide.read_region((9_990, 7_995), 0, (20, 20)).unwrap();

    // Entirely outside: no backend call at all
    slide.read_region((20_000, 0), 0, (10, 10)).unwrap();

    let requests = recorder.requests.lock().unwrap().clone();
    assert_eq!(requests, vec![(0, 0, 0, 50, 60), (0, 9_990, 7_995, 10, 5)]);
}

#[test]
fn test_bad_sizes() {
    let dir = tempfile::tempdir().unwrap();
    let slide = generic_slide(&dir);

    assert!(matches!(
        slide.read_region((0, 0), 0, (-1, 4)),
        Err(SlideError::InvalidArgument { .. })
    ));
    assert!(matches!(
        slide.read_region((0, 0), 0, (4, i64::from(u32::MAX) + 1)),
        Err(SlideError::InvalidArgument { .. })
    ));

    let empty = slide.read_region((0, 0), 0, (0, 0)).unwrap();
    assert_eq!(empty.dimensions(), (0, 0));
}

// =============================================================================
// Thumbnails
// =============================================================================

#[test]
fn test_thumbnail_reads_best_level_and_fits_box() {
    let (slide, recorder) = geometry_slide();

    // Fit factor 200 picks the downsample-16 level
    let thumb = slide.get_thumbnail((50, 50)).unwrap();
    assert_eq!(thumb.dimensions(), (50, 40));
    assert!(close_to(thumb.pixel(25, 20), [80, 100, 200], 1));

    let requests = recorder.requests.lock().unwrap().clone();
    assert_eq!(requests, vec![(2, 0, 0, 625, 500)]);
}

#[test]
fn test_thumbnail_of_large_slide() {
    let backend = GeometryBackend::new(&[
        (100_000, 80_000, 1.0),
        (25_000, 20_000, 4.0),
        (6_250, 5_000, 16.0),
    ]);
    let requests = std::sync::Arc::clone(&backend.requests);
    let slide = Slide::from_backend("large.kfb", Box::new(backend), None).unwrap();

    let thumb = slide.get_thumbnail((500, 500)).unwrap();
    assert_eq!(thumb.dimensions(), (500, 400));
    assert_eq!(*requests.lock().unwrap(), vec![(2, 0, 0, 6_250, 5_000)]);
}

#[test]
fn test_thumbnail_aspect_ratio() {
    let dir = tempfile::tempdir().unwrap();
    let slide = generic_slide(&dir);

    assert_eq!(slide.get_thumbnail((60, 60)).unwrap().dimensions(), (60, 40));
    assert_eq!(slide.get_thumbnail((600, 20)).unwrap().dimensions(), (30, 20));
    // A box larger than the slide returns level 0 as is
    let full = slide.get_thumbnail((1000, 1000)).unwrap();
    assert_eq!(full.dimensions(), (300, 200));
    assert_eq!(full.pixel(299, 199), [299u32 as u8, 199, 0, 255]);

    assert!(matches!(
        slide.get_thumbnail((0, 10)),
        Err(SlideError::InvalidArgument { .. })
    ));
}
