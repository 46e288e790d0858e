//! Container parsers for whole slide image files.
//!
//! These modules understand file layouts only; turning them into pixels is
//! the job of the backends in [`crate::backend`].
//!
//! - [`detect`]: extension and magic-byte format detection
//! - [`tiff`]: TIFF/BigTIFF IFD parsing and pyramid identification
//! - [`svs`]: Aperio ImageDescription metadata
//! - [`qptiff`]: QPTIFF page roles and biomarker names
//! - [`tmap`]: UNIC TMAP header and tile tables
//! - [`tmap6`]: UNIC TMAP version 6 image blocks and shrink tiles
//! - [`jpeg`]: abbreviated-stream merging and decoding

use std::fmt;

use serde::Serialize;

pub mod detect;
pub mod jpeg;
pub mod qptiff;
pub mod svs;
pub mod tiff;
pub mod tmap;
pub mod tmap6;

pub use detect::{detect_format, BackendKind};

/// Named non-pyramid images stored alongside a slide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssociatedKind {
    Thumbnail,
    Label,
    Macro,
    /// Low-resolution navigation overview (TMAP)
    Navigate,
}

impl AssociatedKind {
    pub const ALL: [AssociatedKind; 4] = [
        AssociatedKind::Thumbnail,
        AssociatedKind::Label,
        AssociatedKind::Macro,
        AssociatedKind::Navigate,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            AssociatedKind::Thumbnail => "thumbnail",
            AssociatedKind::Label => "label",
            AssociatedKind::Macro => "macro",
            AssociatedKind::Navigate => "navigate",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for AssociatedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
