//! Format detection and backend selection on real files.

use std::path::Path;
use std::sync::Arc;

use wsi_pyramid::backend::{NativeBuffer, NativeDecoder, NativeError, NativePixelFormat};
use wsi_pyramid::{detect_format, BackendKind, BackendRegistry, OpenOptions, Slide, SlideError};

use super::test_utils::*;

// =============================================================================
// Detection
// =============================================================================

#[test]
fn test_vendor_extensions_need_no_file() {
    let cases = [
        ("a.svs", BackendKind::Aperio),
        ("a.SVS", BackendKind::Aperio),
        ("a.bif", BackendKind::Ventana),
        ("a.qptiff", BackendKind::Qptiff),
        ("a.tmap", BackendKind::Tmap),
        ("a.kfb", BackendKind::Kfb),
        ("a.dyqx", BackendKind::Sdpc),
        ("a.mdsx", BackendKind::Mds),
        ("a.isyntax", BackendKind::Isyntax),
        ("a.zyp", BackendKind::Zyp),
    ];
    for (name, kind) in cases {
        assert_eq!(detect_format(Path::new("/nowhere").join(name)).unwrap(), kind, "{name}");
    }
}

#[test]
fn test_tif_is_classified_by_description() {
    let dir = tempfile::tempdir().unwrap();

    let generic = write_slide(&dir, "plain.tif", &generic_pyramid());
    assert_eq!(detect_format(&generic).unwrap(), BackendKind::GenericTiff);

    let aperio = write_slide(&dir, "scanner.tiff", &aperio_slide());
    assert_eq!(detect_format(&aperio).unwrap(), BackendKind::Aperio);

    let ventana = build_tiff(&[TiffPage::tiled(64, 64, 32).described("iScan Coreo")]);
    let ventana = write_slide(&dir, "scan.tif", &ventana);
    assert_eq!(detect_format(&ventana).unwrap(), BackendKind::Ventana);
}

#[test]
fn test_magic_without_extension() {
    let dir = tempfile::tempdir().unwrap();

    let tiff = write_slide(&dir, "slide", &generic_pyramid());
    assert_eq!(detect_format(&tiff).unwrap(), BackendKind::GenericTiff);

    let tmap = write_slide(
        &dir,
        "slide.bin",
        &build_tmap(40, &[(256, 256, [1, 2, 3])], &[]),
    );
    assert_eq!(detect_format(&tmap).unwrap(), BackendKind::Tmap);
}

#[test]
fn test_big_endian_and_bigtiff_headers_are_tiff() {
    let dir = tempfile::tempdir().unwrap();

    let mut be = b"MM\0*\0\0\0\x08".to_vec();
    be.extend([0u8; 16]);
    let be = write_slide(&dir, "be.tif", &be);
    assert_eq!(detect_format(&be).unwrap(), BackendKind::GenericTiff);

    let mut big = b"II+\0\x08\0\0\0".to_vec();
    big.extend([0u8; 16]);
    let big = write_slide(&dir, "big.tiff", &big);
    assert_eq!(detect_format(&big).unwrap(), BackendKind::GenericTiff);
}

#[test]
fn test_unrecognized_files() {
    let dir = tempfile::tempdir().unwrap();

    let text = write_slide(&dir, "notes.txt", b"just some text, no slide here");
    assert!(matches!(
        detect_format(&text),
        Err(SlideError::UnsupportedFormat { .. })
    ));

    let fake = write_slide(&dir, "photo.tif", b"\x89PNG\r\n\x1a\n0000000000");
    let err = detect_format(&fake).unwrap_err();
    assert!(err.to_string().contains("photo.tif"));

    assert!(matches!(
        detect_format(dir.path().join("missing.tif")),
        Err(SlideError::UnsupportedFormat { .. })
    ));
}

// =============================================================================
// Opening
// =============================================================================

#[test]
fn test_open_reports_backend_kind() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_slide(&dir, "case.svs", &aperio_slide());

    let slide = Slide::open(&path).unwrap();
    assert_eq!(slide.format(), BackendKind::Aperio);
    assert_eq!(slide.vendor().unwrap(), Some("aperio"));
    assert_eq!(slide.path(), path.as_path());
}

#[test]
fn test_corrupt_tiff_is_open_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut data = generic_pyramid();
    data.truncate(12);
    let path = write_slide(&dir, "cut.svs", &data);

    match Slide::open(&path) {
        Err(SlideError::OpenFailure { kind, .. }) => assert_eq!(kind, BackendKind::Aperio),
        other => panic!("expected OpenFailure, got {other:?}"),
    }
}

#[test]
fn test_vendor_format_without_decoder() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_slide(&dir, "scan.kfb", b"KFB data");

    let err = Slide::open(&path).unwrap_err();
    assert!(matches!(
        err,
        SlideError::OpenFailure {
            kind: BackendKind::Kfb,
            ..
        }
    ));
    assert!(err.to_string().contains("kfb"));
}

/// 2048x1024 in two LODs, coarsest first, RGB output.
struct VendorDecoder;

impl NativeDecoder for VendorDecoder {
    fn lod_count(&self) -> u32 {
        2
    }

    fn lod_order(&self) -> wsi_pyramid::backend::LodOrder {
        wsi_pyramid::backend::LodOrder::CoarsestFirst
    }

    fn lod_dimensions(&self, lod: u32) -> Result<(u32, u32), NativeError> {
        Ok(if lod == 0 { (512, 256) } else { (2048, 1024) })
    }

    fn lod_scale(&self, lod: u32) -> Result<f64, NativeError> {
        Ok(if lod == 0 { 4.0 } else { 1.0 })
    }

    fn read_region(
        &mut self,
        lod: u32,
        _x: u32,
        _y: u32,
        w: u32,
        h: u32,
    ) -> Result<NativeBuffer, NativeError> {
        let data = [lod as u8 * 100, 50, 25].repeat(w as usize * h as usize);
        Ok(NativeBuffer::new(w, h, NativePixelFormat::Rgb, Box::new(data)))
    }

    fn properties(&self) -> Vec<(String, String)> {
        vec![("openslide.mpp-x".to_string(), "0.5".to_string())]
    }
}

#[test]
fn test_registered_decoder_opens_vendor_slide() {
    let mut options = OpenOptions::default();
    options.sdk_paths.insert(BackendKind::Sdpc, "/opt/sdpc/lib");
    let mut registry = BackendRegistry::new(options);
    registry.register(
        BackendKind::Sdpc,
        Arc::new(|_: &Path, dir: Option<&Path>| match dir {
            Some(_) => Ok(Box::new(VendorDecoder) as Box<dyn NativeDecoder>),
            None => Err(NativeError::new("SDK directory not configured")),
        }),
    );

    let slide = Slide::open_with("/data/case.sdpc", &registry).unwrap();
    assert_eq!(slide.format(), BackendKind::Sdpc);
    assert_eq!(slide.level_count().unwrap(), 2);
    assert_eq!(slide.dimensions().unwrap(), (2048, 1024));
    assert_eq!(slide.level_downsamples().unwrap(), vec![1.0, 4.0]);
    assert_eq!(slide.mpp().unwrap(), Some(0.5));

    // Canonical level 1 is the decoder's LOD 0
    let region = slide.read_region((0, 0), 1, (4, 4)).unwrap();
    assert_eq!(region.pixel(0, 0), [0, 50, 25, 255]);
    let region = slide.read_region((0, 0), 0, (4, 4)).unwrap();
    assert_eq!(region.pixel(3, 3), [100, 50, 25, 255]);
}

// =============================================================================
// Sample layouts
// =============================================================================

#[test]
fn test_sixteen_bit_rgb_fails_to_decode() {
    let dir = tempfile::tempdir().unwrap();
    let data = build_tiff(&[TiffPage::tiled(128, 128, 64).with_layout(16, 1)]);
    let slide = Slide::open(write_slide(&dir, "wide.tif", &data)).unwrap();

    let err = slide.read_region((0, 0), 0, (16, 16)).unwrap_err();
    assert!(matches!(err, SlideError::Decode { .. }), "{err:?}");
    assert!(err.to_string().contains("bits per sample: 16"), "{err}");
}

#[test]
fn test_planar_tiff_fails_to_decode() {
    let dir = tempfile::tempdir().unwrap();
    let data = build_tiff(&[TiffPage::tiled(128, 128, 64).with_layout(8, 2)]);
    let slide = Slide::open(write_slide(&dir, "planar.tif", &data)).unwrap();

    let err = slide.read_region((0, 0), 0, (8, 8)).unwrap_err();
    assert!(matches!(err, SlideError::Decode { .. }), "{err:?}");
    assert!(err.to_string().contains("planar configuration 2"), "{err}");
}

const QPTIFF_PAGE: &str = "<PerkinElmer-QPI-ImageDescription><ImageType>{kind}</ImageType><Name>{name}</Name></PerkinElmer-QPI-ImageDescription>";

fn qptiff_page(width: u32, height: u32, kind: &str, name: &str) -> TiffPage {
    let description = QPTIFF_PAGE.replace("{kind}", kind).replace("{name}", name);
    TiffPage::tiled(width, height, 16)
        .with_data(PageData::Gray16)
        .described(&description)
}

#[test]
fn test_qptiff_biomarker_reads() {
    let dir = tempfile::tempdir().unwrap();
    let data = build_tiff(&[
        qptiff_page(32, 32, "FullResolution", "DAPI"),
        qptiff_page(32, 32, "FullResolution", "CD8"),
        qptiff_page(16, 16, "ReducedResolution", "DAPI"),
        qptiff_page(16, 16, "ReducedResolution", "CD8"),
    ]);
    let slide = Slide::open(write_slide(&dir, "panel.qptiff", &data)).unwrap();

    assert_eq!(slide.format(), BackendKind::Qptiff);
    assert_eq!(slide.level_count().unwrap(), 2);
    assert_eq!(slide.biomarkers().unwrap(), ["DAPI", "CD8"]);

    // CD8 holds (x + y) * 100, stretched over the region: 0..600
    let cd8 = slide.read_region_biomarker((0, 0), 0, (4, 4), "CD8").unwrap();
    assert_eq!(cd8.pixel(0, 0), [0, 0, 0, 255]);
    assert_eq!(cd8.pixel(0, 3), [127, 127, 127, 255]);
    assert_eq!(cd8.pixel(3, 3), [255, 255, 255, 255]);

    // Plain reads show the first biomarker
    let plain = slide.read_region((0, 0), 0, (4, 4)).unwrap();
    let dapi = slide.read_region_biomarker((0, 0), 0, (4, 4), "DAPI").unwrap();
    assert_eq!(plain, dapi);

    match slide.read_region_biomarker((0, 0), 0, (4, 4), "FOXP3") {
        Err(SlideError::InvalidArgument { .. }) => {}
        other => panic!("expected InvalidArgument, got {other:?}"),
    }
}
