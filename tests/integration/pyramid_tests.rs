//! Pyramid geometry, metadata and associated images of opened slides.

use wsi_pyramid::format::AssociatedKind;
use wsi_pyramid::{BackendKind, Slide, SlideError};

use super::test_utils::*;

// =============================================================================
// Geometry
// =============================================================================

#[test]
fn test_generic_tiff_levels() {
    let dir = tempfile::tempdir().unwrap();
    let slide = Slide::open(write_slide(&dir, "g.tif", &generic_pyramid())).unwrap();

    assert_eq!(slide.level_count().unwrap(), 2);
    assert_eq!(slide.dimensions().unwrap(), (300, 200));
    assert_eq!(slide.level_dimensions(1).unwrap(), (150, 100));
    assert_eq!(slide.level_downsamples().unwrap(), vec![1.0, 2.0]);

    // 300x200 on a 64 px grid is stored as 320x256
    assert_eq!(slide.level_padding(0).unwrap(), (20, 56));
    assert_eq!(slide.level_padding(1).unwrap(), (42, 28));
}

#[test]
fn test_levels_are_canonical() {
    let dir = tempfile::tempdir().unwrap();
    // Written smallest first; levels still come out largest first
    let data = build_tiff(&[
        TiffPage::tiled(100, 80, 32),
        TiffPage::tiled(400, 320, 32),
        TiffPage::tiled(200, 160, 32),
    ]);
    let slide = Slide::open(write_slide(&dir, "shuffled.tif", &data)).unwrap();

    let levels = slide.levels().unwrap();
    assert_eq!(levels.len(), 3);
    for (i, level) in levels.iter().enumerate() {
        assert_eq!(level.index, i as u32);
    }
    assert_eq!(levels[0].downsample, 1.0);
    assert!(levels.windows(2).all(|w| w[0].downsample < w[1].downsample));
    assert!(levels.windows(2).all(|w| w[0].width >= w[1].width));
    assert_eq!((levels[2].width, levels[2].height), (100, 80));
}

#[test]
fn test_invalid_level() {
    let dir = tempfile::tempdir().unwrap();
    let slide = Slide::open(write_slide(&dir, "g.tif", &generic_pyramid())).unwrap();

    match slide.level_dimensions(2) {
        Err(SlideError::InvalidLevel { level, count, kind }) => {
            assert_eq!((level, count), (2, 2));
            assert_eq!(kind, BackendKind::GenericTiff);
        }
        other => panic!("expected InvalidLevel, got {other:?}"),
    }
    assert!(slide.read_region((0, 0), 5, (1, 1)).is_err());
}

#[test]
fn test_best_level_for_downsample() {
    let slide = Slide::from_backend(
        "synthetic.kfb",
        Box::new(GeometryBackend::new(&[
            (100_000, 80_000, 1.0),
            (25_000, 20_000, 4.0),
            (6_250, 5_000, 16.0),
        ])),
        None,
    )
    .unwrap();

    let cases = [
        (0.5, 0),
        (1.0, 0),
        (3.99, 0),
        (4.0, 1),
        (15.9, 1),
        (16.0, 2),
        (1000.0, 2),
    ];
    for (ds, expected) in cases {
        assert_eq!(slide.best_level_for_downsample(ds).unwrap(), expected, "ds {ds}");
    }
}

// =============================================================================
// Metadata
// =============================================================================

#[test]
fn test_aperio_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let slide = Slide::open(write_slide(&dir, "a.svs", &aperio_slide())).unwrap();

    assert_eq!(slide.level_count().unwrap(), 2);
    assert_eq!(slide.level_dimensions(1).unwrap(), (128, 96));
    assert_eq!(slide.level_downsamples().unwrap(), vec![1.0, 4.0]);
    assert_eq!(slide.mpp().unwrap(), Some(0.252));
    assert_eq!(slide.magnification().unwrap(), Some(40.0));

    let props = slide.properties().unwrap();
    assert_eq!(props.get("openslide.level-count").map(String::as_str), Some("2"));
    assert_eq!(props.get("openslide.level[1].width").map(String::as_str), Some("128"));
    assert_eq!(props.get("aperio.AppMag").map(String::as_str), Some("40"));
    assert_eq!(slide.property("openslide.background-color").unwrap(), Some("FFFFFF"));
}

#[test]
fn test_info_json() {
    let dir = tempfile::tempdir().unwrap();
    let slide = Slide::open(write_slide(&dir, "a.svs", &aperio_slide())).unwrap();

    let json = serde_json::to_value(slide.info().unwrap()).unwrap();
    assert_eq!(json["format"], "aperio");
    assert_eq!(json["width"], 512);
    assert_eq!(json["levels"][1]["downsample"], 4.0);
    assert_eq!(json["associated_images"][1], "label");
}

#[test]
fn test_background_override() {
    let mut options = wsi_pyramid::OpenOptions::default();
    options.background = Some([0, 0, 0, 255]);
    let registry = wsi_pyramid::BackendRegistry::new(options);

    let dir = tempfile::tempdir().unwrap();
    let slide = Slide::open_with(write_slide(&dir, "g.tif", &generic_pyramid()), &registry).unwrap();

    assert_eq!(slide.background(), [0, 0, 0, 255]);
    let outside = slide.read_region((-10, -10), 0, (4, 4)).unwrap();
    assert_eq!(outside.pixel(0, 0), [0, 0, 0, 255]);
}

// =============================================================================
// Associated Images
// =============================================================================

#[test]
fn test_aperio_associated_images() {
    let dir = tempfile::tempdir().unwrap();
    let slide = Slide::open(write_slide(&dir, "a.svs", &aperio_slide())).unwrap();

    assert_eq!(
        slide.associated_images().unwrap(),
        vec![AssociatedKind::Thumbnail, AssociatedKind::Label]
    );

    let thumb = slide.associated_image(AssociatedKind::Thumbnail).unwrap().unwrap();
    assert_eq!(thumb.dimensions(), (64, 48));
    assert!(close_to(thumb.pixel(10, 10), [20, 20, 20], 6));

    let label = slide.associated_image(AssociatedKind::Label).unwrap().unwrap();
    assert_eq!(label.dimensions(), (40, 30));

    assert!(slide.associated_image(AssociatedKind::Macro).unwrap().is_none());
}

#[test]
fn test_missing_thumbnail_is_synthesized() {
    let dir = tempfile::tempdir().unwrap();
    let slide = Slide::open(write_slide(&dir, "g.tif", &generic_pyramid())).unwrap();

    assert!(slide.associated_images().unwrap().is_empty());

    // The whole slide already fits in the synthesized thumbnail box
    let thumb = slide.associated_image(AssociatedKind::Thumbnail).unwrap().unwrap();
    assert_eq!(thumb.dimensions(), (300, 200));
    assert_eq!(thumb.pixel(7, 9), [7, 9, 0, 255]);
    assert!(slide.associated_image(AssociatedKind::Label).unwrap().is_none());
}
