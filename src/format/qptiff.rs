//! PerkinElmer/Akoya QPTIFF page metadata.
//!
//! Every QPTIFF page carries an XML ImageDescription that says what the
//! page is and, for multiplexed scans, which biomarker it holds:
//!
//! ```text
//! <PerkinElmer-QPI-ImageDescription>
//!   <ImageType>FullResolution</ImageType>
//!   <Name>DAPI</Name>
//!   <Biomarker>DAPI</Biomarker>
//!   ...
//! </PerkinElmer-QPI-ImageDescription>
//! ```

use super::AssociatedKind;

/// Role of a page, from its `ImageType` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QptiffImageType {
    FullResolution,
    ReducedResolution,
    Thumbnail,
    Overview,
    Label,
}

impl QptiffImageType {
    fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "FullResolution" => Some(QptiffImageType::FullResolution),
            "ReducedResolution" => Some(QptiffImageType::ReducedResolution),
            "Thumbnail" => Some(QptiffImageType::Thumbnail),
            "Overview" => Some(QptiffImageType::Overview),
            "Label" => Some(QptiffImageType::Label),
            _ => None,
        }
    }

    /// The associated image this page provides, if it is not a level.
    pub fn associated_kind(self) -> Option<AssociatedKind> {
        match self {
            QptiffImageType::Thumbnail => Some(AssociatedKind::Thumbnail),
            QptiffImageType::Overview => Some(AssociatedKind::Macro),
            QptiffImageType::Label => Some(AssociatedKind::Label),
            QptiffImageType::FullResolution | QptiffImageType::ReducedResolution => None,
        }
    }
}

/// Fields of one page's XML description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QptiffPage {
    pub image_type: Option<QptiffImageType>,
    /// `Biomarker`, else `Name`
    pub biomarker: Option<String>,
}

impl QptiffPage {
    /// Parse a page description. `None` when it is not XML.
    pub fn parse(description: &str) -> Option<Self> {
        // The declaration names UTF-16 although TIFF ASCII is single-byte
        let text = description.trim();
        let body = match text.strip_prefix("<?xml") {
            Some(rest) => &rest[rest.find("?>")? + 2..],
            None => text,
        };
        let doc = roxmltree::Document::parse(body.trim()).ok()?;

        let mut page = QptiffPage::default();
        let mut name = None;
        for node in doc.descendants().filter(|n| n.is_element()) {
            let text = node.text().map(str::trim).filter(|t| !t.is_empty());
            match node.tag_name().name() {
                "ImageType" if page.image_type.is_none() => {
                    page.image_type = text.and_then(QptiffImageType::from_name);
                }
                "Biomarker" if page.biomarker.is_none() => {
                    page.biomarker = text.map(str::to_string);
                }
                "Name" if name.is_none() => name = text.map(str::to_string),
                _ => {}
            }
        }
        if page.biomarker.is_none() {
            page.biomarker = name;
        }
        Some(page)
    }
}
