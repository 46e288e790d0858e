//! Canonical, backend-independent view of a slide's resolution levels.
//!
//! Built once at open from the backend's geometry and immutable afterwards,
//! so it can be read from any thread without the slide lock.

use serde::Serialize;
use tracing::debug;

use crate::backend::SlideBackend;
use crate::error::SlideError;
use crate::format::{AssociatedKind, BackendKind};

// =============================================================================
// PyramidLevel
// =============================================================================

/// One resolution tier. Level 0 is full resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PyramidLevel {
    pub index: u32,
    /// Content width, padding excluded
    pub width: u32,
    /// Content height, padding excluded
    pub height: u32,
    /// Ratio of level-0 resolution to this level's
    pub downsample: f64,
}

// =============================================================================
// PyramidModel
// =============================================================================

#[derive(Debug, Clone)]
pub struct PyramidModel {
    kind: BackendKind,
    levels: Vec<PyramidLevel>,
    /// Right/bottom tile-grid padding per level, as reported by the backend
    padding: Vec<(u32, u32)>,
    associated: Vec<AssociatedKind>,
}

impl PyramidModel {
    /// Query the backend's geometry and validate it.
    ///
    /// # Errors
    /// `BackendIo` when the backend reports no level, a zero-sized level,
    /// a level-0 downsample other than 1.0, downsamples that do not strictly
    /// increase, or dimensions that grow with the level index.
    pub fn build(backend: &dyn SlideBackend) -> Result<Self, SlideError> {
        let kind = backend.kind();
        let count = backend.level_count();

        let mut levels = Vec::with_capacity(count as usize);
        let mut padding = Vec::with_capacity(count as usize);
        for index in 0..count {
            let (width, height) = backend.level_dimensions(index)?;
            let downsample = backend.level_downsample(index)?;
            levels.push(PyramidLevel {
                index,
                width,
                height,
                downsample,
            });
            padding.push(backend.level_padding(index)?);
        }

        let model = Self::from_levels(kind, levels, padding, backend.associated_kinds())?;
        debug!(
            %kind,
            levels = model.levels.len(),
            dimensions = ?model.dimensions(),
            "built pyramid model"
        );
        Ok(model)
    }

    /// Validate an explicit level list.
    pub fn from_levels(
        kind: BackendKind,
        levels: Vec<PyramidLevel>,
        padding: Vec<(u32, u32)>,
        associated: Vec<AssociatedKind>,
    ) -> Result<Self, SlideError> {
        let invalid = |message: String| SlideError::backend_io(kind, message);

        let Some(first) = levels.first() else {
            return Err(invalid("backend reports no levels".to_string()));
        };
        if first.downsample != 1.0 {
            return Err(invalid(format!(
                "level 0 downsample is {}, expected 1.0",
                first.downsample
            )));
        }
        if padding.len() != levels.len() {
            return Err(invalid(format!(
                "{} padding entries for {} levels",
                padding.len(),
                levels.len()
            )));
        }

        for (i, level) in levels.iter().enumerate() {
            if level.index != i as u32 {
                return Err(invalid(format!("level {i} reports index {}", level.index)));
            }
            if level.width == 0 || level.height == 0 {
                return Err(invalid(format!("level {i} is empty")));
            }
            if !level.downsample.is_finite() {
                return Err(invalid(format!("level {i} downsample is {}", level.downsample)));
            }
            if i == 0 {
                continue;
            }
            let prev = &levels[i - 1];
            if level.downsample <= prev.downsample {
                return Err(invalid(format!(
                    "downsample of level {i} ({}) does not exceed level {} ({})",
                    level.downsample,
                    i - 1,
                    prev.downsample
                )));
            }
            if level.width > prev.width || level.height > prev.height {
                return Err(invalid(format!(
                    "level {i} ({}x{}) is larger than level {} ({}x{})",
                    level.width,
                    level.height,
                    i - 1,
                    prev.width,
                    prev.height
                )));
            }
        }

        Ok(PyramidModel {
            kind,
            levels,
            padding,
            associated,
        })
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn levels(&self) -> &[PyramidLevel] {
        &self.levels
    }

    pub fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    /// A level, or `InvalidLevel`.
    pub fn level(&self, index: u32) -> Result<&PyramidLevel, SlideError> {
        self.levels
            .get(index as usize)
            .ok_or(SlideError::InvalidLevel {
                kind: self.kind,
                level: index,
                count: self.level_count(),
            })
    }

    /// Level-0 dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        let base = &self.levels[0];
        (base.width, base.height)
    }

    pub fn level_dimensions(&self, index: u32) -> Result<(u32, u32), SlideError> {
        self.level(index).map(|l| (l.width, l.height))
    }

    pub fn level_downsamples(&self) -> Vec<f64> {
        self.levels.iter().map(|l| l.downsample).collect()
    }

    /// Tile-grid padding the backend adds to a level.
    pub fn padding(&self, index: u32) -> Result<(u32, u32), SlideError> {
        self.level(index)?;
        Ok(self.padding[index as usize])
    }

    pub fn associated_kinds(&self) -> &[AssociatedKind] {
        &self.associated
    }

    /// The most detailed level whose downsample does not exceed `target`.
    ///
    /// Level 0 when `target` is below every downsample. On equal
    /// downsamples the lower index wins.
    pub fn best_level_for_downsample(&self, target: f64) -> u32 {
        let mut best = 0usize;
        for (i, level) in self.levels.iter().enumerate() {
            if level.downsample <= target && level.downsample > self.levels[best].downsample {
                best = i;
            }
        }
        best as u32
    }

    /// `openslide.level-count` and `openslide.level[N].*` entries.
    pub fn properties(&self) -> Vec<(String, String)> {
        let mut props = vec![(
            "openslide.level-count".to_string(),
            self.levels.len().to_string(),
        )];
        for level in &self.levels {
            let n = level.index;
            props.push((format!("openslide.level[{n}].width"), level.width.to_string()));
            props.push((format!("openslide.level[{n}].height"), level.height.to_string()));
            props.push((
                format!("openslide.level[{n}].downsample"),
                level.downsample.to_string(),
            ));
        }
        props
    }
}
