//! Dispatch from a detected format to a backend variant.
//!
//! The TIFF family and TMAP are read by built-in parsers. Every other kind
//! needs a vendor decoder registered under its [`BackendKind`]; the registry
//! hands the decoder factory the SDK directory configured for that kind.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info};

use crate::config::OpenOptions;
use crate::error::SlideError;
use crate::format::{detect_format, BackendKind};

use super::{DecoderFactory, SdkAdapter, SlideBackend, TiffBackend, TmapBackend};

/// Opens slides with the backend matching their format.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: HashMap<BackendKind, DecoderFactory>,
    options: OpenOptions,
}

impl BackendRegistry {
    pub fn new(options: OpenOptions) -> Self {
        BackendRegistry {
            factories: HashMap::new(),
            options,
        }
    }

    /// Register the decoder used for a vendor format, replacing any earlier
    /// one.
    pub fn register(&mut self, kind: BackendKind, factory: DecoderFactory) -> &mut Self {
        debug!(%kind, "registered native decoder");
        self.factories.insert(kind, factory);
        self
    }

    pub fn options(&self) -> &OpenOptions {
        &self.options
    }

    /// Whether slides of `kind` can be opened.
    pub fn supports(&self, kind: BackendKind) -> bool {
        !kind.requires_sdk() || self.factories.contains_key(&kind)
    }

    /// Detect the format of `path` and open it.
    ///
    /// # Errors
    /// `UnsupportedFormat` when detection fails, `OpenFailure` when the
    /// backend cannot open the file or no decoder is registered for it.
    pub fn open(&self, path: &Path) -> Result<Box<dyn SlideBackend>, SlideError> {
        let kind = detect_format(path)?;
        self.open_as(path, kind)
    }

    /// Open `path` with the backend for `kind`, skipping detection.
    pub fn open_as(&self, path: &Path, kind: BackendKind) -> Result<Box<dyn SlideBackend>, SlideError> {
        info!(path = %path.display(), %kind, "opening slide");

        if kind.is_tiff_family() {
            return Ok(Box::new(TiffBackend::open(path, kind, &self.options)?));
        }
        if kind == BackendKind::Tmap {
            return Ok(Box::new(TmapBackend::open(path, &self.options)?));
        }

        let factory = self.factories.get(&kind).ok_or_else(|| SlideError::OpenFailure {
            kind,
            detail: format!("no native decoder registered for {}", kind.name()),
        })?;
        let sdk_dir = self.options.sdk_paths.get(kind);
        let decoder = factory(path, sdk_dir).map_err(|e| SlideError::OpenFailure {
            kind,
            detail: e.message,
        })?;
        Ok(Box::new(SdkAdapter::new(kind, decoder)?))
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.factories.keys().copied().collect();
        kinds.sort();
        f.debug_struct("BackendRegistry")
            .field("decoders", &kinds)
            .field("options", &self.options)
            .finish()
    }
}
