//! Aperio ImageDescription metadata.
//!
//! The first IFD of an SVS file carries a description like:
//!
//! ```text
//! Aperio Image Library v10.0.51
//! 46920x33014 [0,100 46000x32914] (256x256) JPEG/RGB Q=30|AppMag = 20|MPP = 0.4990
//! ```
//!
//! The header line is free text; everything after the first `|` is a list of
//! `key = value` pairs.

use std::collections::BTreeMap;

/// Parsed Aperio metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SvsMetadata {
    /// Microns per pixel
    pub mpp: Option<f64>,
    /// Objective magnification (`AppMag`)
    pub magnification: Option<f64>,
    /// Free-text header before the first `|`
    pub comment: Option<String>,
    /// Every `key = value` pair
    pub fields: BTreeMap<String, String>,
}

impl SvsMetadata {
    pub fn parse(description: &str) -> Self {
        let mut parts = description.split('|');
        let comment = parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let mut metadata = SvsMetadata {
            comment,
            ..Default::default()
        };

        for part in parts {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() {
                continue;
            }

            match key {
                "MPP" => metadata.mpp = value.parse().ok().filter(|v: &f64| *v > 0.0),
                "AppMag" => metadata.magnification = value.parse().ok().filter(|v: &f64| *v > 0.0),
                _ => {}
            }
            metadata.fields.insert(key.to_string(), value.to_string());
        }

        metadata
    }

    /// Properties in the `aperio.*` / `openslide.*` naming convention.
    pub fn properties(&self) -> Vec<(String, String)> {
        let mut props: Vec<(String, String)> = self
            .fields
            .iter()
            .map(|(k, v)| (format!("aperio.{k}"), v.clone()))
            .collect();

        if let Some(comment) = &self.comment {
            props.push(("openslide.comment".to_string(), comment.clone()));
        }
        if let Some(mpp) = self.mpp {
            props.push(("openslide.mpp-x".to_string(), mpp.to_string()));
            props.push(("openslide.mpp-y".to_string(), mpp.to_string()));
        }
        if let Some(mag) = self.magnification {
            props.push(("openslide.objective-power".to_string(), mag.to_string()));
        }
        props
    }
}
