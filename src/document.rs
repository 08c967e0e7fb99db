//! Document model shared by every pipeline stage.
//!
//! ```text
//! archive ──▶ ManifestElement[] + FigureAsset[] + TableAsset[]
//!                 │ normalize
//!                 ▼
//!            ContentElement[]  (sorted by position)
//! ```
//!
//! Binary assets serialise their bytes as base64 so the same structs can be
//! used on the wire (`{ name, data }`) and in memory.

use serde::{Deserialize, Serialize};

/// Raw element kind as read from the extraction manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ManifestKind {
    /// A text block with its raw content.
    Text { content: String },
    /// A reference to a figure rendition.
    ///
    /// `ordinal` is the 1-based discovery index; `label` is the pre-rendered
    /// `[Figure N]` placeholder.
    FigureReference { ordinal: usize, label: String },
}

/// One unsorted unit read from the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestElement {
    #[serde(flatten)]
    pub kind: ManifestKind,
    /// Vertical-position hint; only meaningful relative to other elements.
    pub position: f64,
}

impl ManifestElement {
    pub fn text(content: impl Into<String>, position: f64) -> Self {
        Self {
            kind: ManifestKind::Text {
                content: content.into(),
            },
            position,
        }
    }

    pub fn figure(ordinal: usize, position: f64) -> Self {
        Self {
            kind: ManifestKind::FigureReference {
                ordinal,
                label: figure_label(ordinal),
            },
            position,
        }
    }
}

/// The placeholder used for figure `n` (1-based discovery index).
pub fn figure_label(n: usize) -> String {
    format!("[Figure {n}]")
}

/// Normalized element kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Text,
    Figure,
}

/// A normalized, order-stable content element.
///
/// Figure elements carry two indices: `figure_index` is the discovery index
/// used in `[Figure N]` labels, prompts, and the figure asset list;
/// `reading_rank` is the 1-based rank among figures after sorting by
/// position. The two differ whenever the manifest lists figures out of
/// reading order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentElement {
    #[serde(alias = "type")]
    pub kind: ElementKind,
    pub content: String,
    pub position: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub figure_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reading_rank: Option<usize>,
}

impl ContentElement {
    pub fn text(content: impl Into<String>, position: f64) -> Self {
        Self {
            kind: ElementKind::Text,
            content: content.into(),
            position,
            figure_index: None,
            reading_rank: None,
        }
    }

    pub fn is_text(&self) -> bool {
        self.kind == ElementKind::Text
    }
}

/// A figure rendition exactly as it appeared in the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FigureAsset {
    /// Entry basename.
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// A table rendition exactly as it appeared in the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableAsset {
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Everything the notes generator consumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub elements: Vec<ContentElement>,
    #[serde(default)]
    pub figures: Vec<FigureAsset>,
    #[serde(default)]
    pub tables: Vec<TableAsset>,
}

impl ExtractedDocument {
    /// Text elements joined with `\n`, in element order.
    pub fn text_content(&self) -> String {
        self.elements
            .iter()
            .filter(|el| el.is_text())
            .map(|el| el.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Serde adapter: `Vec<u8>` ⇄ standard base64 string.
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn figure_asset_wire_shape_is_base64() {
        let fig = FigureAsset {
            name: "fig1.png".into(),
            data: vec![0xde, 0xad, 0xbe, 0xef],
        };
        let json = serde_json::to_value(&fig).unwrap();
        assert_eq!(json["name"], "fig1.png");
        assert_eq!(json["data"], "3q2+7w==");
    }

    #[test]
    fn content_element_accepts_legacy_type_field() {
        let el: ContentElement =
            serde_json::from_str(r#"{"type":"text","content":"Intro","position":10}"#).unwrap();
        assert_eq!(el.kind, ElementKind::Text);
        assert_eq!(el.figure_index, None);
    }

    #[test]
    fn content_element_rejects_unknown_kind() {
        let res: Result<ContentElement, _> =
            serde_json::from_str(r#"{"kind":"chart","content":"x","position":1}"#);
        assert!(res.is_err());
    }

    #[test]
    fn text_content_skips_figures() {
        let doc = ExtractedDocument {
            elements: vec![
                ContentElement::text("a", 1.0),
                ContentElement {
                    kind: ElementKind::Figure,
                    content: figure_label(1),
                    position: 2.0,
                    figure_index: Some(1),
                    reading_rank: Some(1),
                },
                ContentElement::text("b", 3.0),
            ],
            ..Default::default()
        };
        assert_eq!(doc.text_content(), "a\nb");
    }

    #[test]
    fn manifest_element_tags_kind() {
        let el = ManifestElement::figure(2, 4.0);
        let json = serde_json::to_value(&el).unwrap();
        assert_eq!(json["kind"], "figure-reference");
        assert_eq!(json["label"], "[Figure 2]");
    }
}
