//! Archive decoding: extraction-result ZIP → manifest elements + raw assets.
//!
//! The extraction service returns one ZIP holding a JSON manifest and the
//! figure/table renditions:
//!
//! ```text
//! structuredData.json      { "elements": [ { "Text", "Path", "Bounds" }, … ] }
//! figures/fileoutpart0.png
//! tables/fileoutpart1.png
//! ```
//!
//! The manifest is found by extension, not by name. Elements come out in
//! manifest order, unsorted; figure references are numbered as they are
//! discovered. Assets are kept verbatim in archive order.

use crate::document::{FigureAsset, ManifestElement, TableAsset};
use crate::error::NotesError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::io::{Cursor, Read};
use tracing::{debug, warn};
use zip::ZipArchive;

/// Structure-tree paths that denote a figure node, e.g. `//Document/Figure`,
/// `//Document/Figure[3]`, `//Document/Sect[2]/Figure/fig1`.
static RE_FIGURE_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^//Document(?:/[A-Za-z0-9_]+(?:\[\d+\])?)*?/Figure(?:\[\d+\])?(?:/|$)").unwrap()
});

const FIGURES_SEGMENT: &str = "figures/";
const TABLES_SEGMENT: &str = "tables/";

/// Everything read out of one extraction archive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedArchive {
    /// Manifest elements in manifest order.
    pub elements: Vec<ManifestElement>,
    pub figures: Vec<FigureAsset>,
    pub tables: Vec<TableAsset>,
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    elements: Vec<RawElement>,
}

#[derive(Debug, Deserialize)]
struct RawElement {
    #[serde(rename = "Text", default)]
    text: Option<serde_json::Value>,
    #[serde(rename = "Path", default)]
    path: Option<String>,
    #[serde(rename = "Bounds", default)]
    bounds: Option<Vec<f64>>,
}

/// Decode an extraction archive held in memory.
///
/// # Errors
/// * [`NotesError::Archive`] — the bytes are not a readable ZIP or an entry
///   cannot be decompressed.
/// * [`NotesError::Parse`] — no `*.json` entry, invalid JSON, or a manifest
///   without an `elements` list.
pub fn decode(archive_bytes: &[u8]) -> Result<DecodedArchive, NotesError> {
    let mut zip = ZipArchive::new(Cursor::new(archive_bytes)).map_err(|e| NotesError::Archive {
        detail: e.to_string(),
    })?;

    let mut decoded = DecodedArchive::default();
    let mut manifest_seen = false;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| NotesError::Archive {
            detail: format!("entry #{i}: {e}"),
        })?;
        if entry.is_dir() {
            continue;
        }
        let entry_name = entry.name().to_string();

        // The header size is untrusted; never reserve more than the archive holds.
        let mut data = Vec::with_capacity(entry.size().min(archive_bytes.len() as u64) as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|e| NotesError::Archive {
                detail: format!("'{entry_name}': {e}"),
            })?;

        if entry_name.ends_with(".json") {
            if manifest_seen {
                warn!("Ignoring additional manifest entry '{}'", entry_name);
                continue;
            }
            manifest_seen = true;
            decoded.elements = parse_manifest(&data)?;
            debug!(
                "Manifest '{}': {} elements",
                entry_name,
                decoded.elements.len()
            );
        } else if entry_name.contains(FIGURES_SEGMENT) {
            decoded.figures.push(FigureAsset {
                name: basename(&entry_name).to_string(),
                data,
            });
        } else if entry_name.contains(TABLES_SEGMENT) {
            decoded.tables.push(TableAsset {
                name: basename(&entry_name).to_string(),
                data,
            });
        }
    }

    if !manifest_seen {
        return Err(NotesError::Parse {
            detail: "archive contains no *.json manifest entry".to_string(),
        });
    }

    debug!(
        "Decoded archive: {} elements, {} figures, {} tables",
        decoded.elements.len(),
        decoded.figures.len(),
        decoded.tables.len()
    );
    Ok(decoded)
}

/// Convert manifest JSON into elements, numbering figures by discovery.
pub fn parse_manifest(json: &[u8]) -> Result<Vec<ManifestElement>, NotesError> {
    let manifest: RawManifest = serde_json::from_slice(json).map_err(|e| NotesError::Parse {
        detail: e.to_string(),
    })?;

    let mut elements = Vec::with_capacity(manifest.elements.len());
    let mut figures_seen = 0usize;

    for raw in manifest.elements {
        let position = vertical_hint(raw.bounds.as_deref());
        match raw.text.as_ref().and_then(|v| v.as_str()) {
            Some(text) if !text.is_empty() => {
                elements.push(ManifestElement::text(text, position));
            }
            _ => {
                if raw.path.as_deref().is_some_and(is_figure_path) {
                    figures_seen += 1;
                    elements.push(ManifestElement::figure(figures_seen, position));
                }
            }
        }
    }

    Ok(elements)
}

/// Whether a structure-tree path names a figure node.
pub fn is_figure_path(path: &str) -> bool {
    RE_FIGURE_PATH.is_match(path)
}

/// `Bounds` is `[x0, y0, x1, y1]`; the vertical hint is `y0`. A single-value
/// array is taken as the hint itself. Absent or empty → 0.
fn vertical_hint(bounds: Option<&[f64]>) -> f64 {
    match bounds {
        Some([_, y, ..]) => *y,
        Some([only]) => *only,
        _ => 0.0,
    }
}

fn basename(entry_name: &str) -> &str {
    entry_name.rsplit('/').next().unwrap_or(entry_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ManifestKind;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let opts = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, data) in entries {
            zip.start_file(*name, opts).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    /// Overwrite the uncompressed-size fields of the first local header and
    /// the first central-directory record.
    fn patch_uncompressed_size(bytes: &mut [u8], size: u32) {
        let cd = bytes
            .windows(4)
            .position(|w| w == b"PK\x01\x02")
            .expect("central directory");
        bytes[22..26].copy_from_slice(&size.to_le_bytes());
        bytes[cd + 24..cd + 28].copy_from_slice(&size.to_le_bytes());
    }

    #[test]
    fn oversized_entry_header_does_not_abort() {
        let mut bytes = build_zip(&[("structuredData.json", br#"{"elements":[]}"#)]);
        patch_uncompressed_size(&mut bytes, 0xFFFF_FFF0);

        match decode(&bytes) {
            Ok(decoded) => assert!(decoded.elements.is_empty()),
            Err(NotesError::Archive { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn decodes_example_archive() {
        let manifest = br#"{"elements":[{"Text":"Intro","Bounds":[10]},{"Path":"//Document/Figure/fig1","Bounds":[5]}]}"#;
        let bytes = build_zip(&[("structuredData.json", manifest), ("figures/fig1", b"\x89PNG")]);

        let decoded = decode(&bytes).expect("decodes");
        assert_eq!(
            decoded.elements,
            vec![
                ManifestElement::text("Intro", 10.0),
                ManifestElement::figure(1, 5.0),
            ]
        );
        assert_eq!(decoded.figures.len(), 1);
        assert_eq!(decoded.figures[0].name, "fig1");
        assert_eq!(decoded.figures[0].data, b"\x89PNG");
    }

    #[test]
    fn figure_labels_follow_discovery_order() {
        let manifest = br#"{"elements":[
            {"Path":"//Document/Figure","Bounds":[0,700,10,720]},
            {"Text":"Body","Bounds":[0,100,10,120]},
            {"Path":"//Document/Figure[2]","Bounds":[0,50,10,60]},
            {"Path":"//Document/Sect/Figure","Bounds":[0,300,10,320]}
        ]}"#;
        let elements = parse_manifest(manifest).unwrap();
        let labels: Vec<&str> = elements
            .iter()
            .filter_map(|e| match &e.kind {
                ManifestKind::FigureReference { label, .. } => Some(label.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(labels, vec!["[Figure 1]", "[Figure 2]", "[Figure 3]"]);
        assert_eq!(elements[0].position, 700.0);
    }

    #[test]
    fn manifest_entry_found_by_extension_after_figures() {
        let bytes = build_zip(&[
            ("figures/a.png", b"A"),
            ("figures/b.png", b"B"),
            ("out/anything.json", br#"{"elements":[{"Path":"//Document/Figure"},{"Path":"//Document/Figure"}]}"#),
        ]);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.figures.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(), vec!["a.png", "b.png"]);
        assert_eq!(decoded.elements[1], ManifestElement::figure(2, 0.0));
    }

    #[test]
    fn figure_entries_round_trip_byte_identical() {
        let payloads: Vec<Vec<u8>> = (0..4u8).map(|i| vec![i; 64 + i as usize]).collect();
        let names: Vec<String> = (0..4).map(|i| format!("figures/fileoutpart{i}.png")).collect();
        let mut entries: Vec<(&str, &[u8])> = vec![("m.json", br#"{"elements":[]}"#)];
        for (n, p) in names.iter().zip(&payloads) {
            entries.push((n.as_str(), p.as_slice()));
        }
        let decoded = decode(&build_zip(&entries)).unwrap();
        assert_eq!(decoded.figures.len(), 4);
        for (i, fig) in decoded.figures.iter().enumerate() {
            assert_eq!(fig.name, format!("fileoutpart{i}.png"));
            assert_eq!(fig.data, payloads[i]);
        }
    }

    #[test]
    fn duplicate_figure_names_are_kept() {
        let bytes = build_zip(&[
            ("m.json", br#"{"elements":[]}"#),
            ("figures/x.png", b"1"),
            ("a/figures/x.png", b"2"),
        ]);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.figures.len(), 2);
    }

    #[test]
    fn tables_are_collected_separately() {
        let bytes = build_zip(&[
            ("m.json", br#"{"elements":[]}"#),
            ("tables/fileoutpart0.png", b"T"),
        ]);
        let decoded = decode(&bytes).unwrap();
        assert!(decoded.figures.is_empty());
        assert_eq!(decoded.tables.len(), 1);
    }

    #[test]
    fn empty_or_non_string_text_is_not_a_text_element() {
        let elements = parse_manifest(
            br#"{"elements":[{"Text":""},{"Text":42},{"Path":"//Document/P"},{"Text":"ok"}]}"#,
        )
        .unwrap();
        assert_eq!(elements, vec![ManifestElement::text("ok", 0.0)]);
    }

    #[test]
    fn missing_manifest_is_parse_error() {
        let bytes = build_zip(&[("figures/a.png", b"A")]);
        assert!(matches!(decode(&bytes), Err(NotesError::Parse { .. })));
    }

    #[test]
    fn malformed_manifest_is_parse_error() {
        let bytes = build_zip(&[("m.json", b"{not json")]);
        assert!(matches!(decode(&bytes), Err(NotesError::Parse { .. })));
        let bytes = build_zip(&[("m.json", br#"{"pages":[]}"#)]);
        assert!(matches!(decode(&bytes), Err(NotesError::Parse { .. })));
    }

    #[test]
    fn corrupt_archive_is_archive_error() {
        assert!(matches!(decode(b"PK\x03\x04garbage"), Err(NotesError::Archive { .. })));
        assert!(matches!(decode(b""), Err(NotesError::Archive { .. })));
    }

    #[test]
    fn figure_path_pattern() {
        assert!(is_figure_path("//Document/Figure"));
        assert!(is_figure_path("//Document/Figure[4]"));
        assert!(is_figure_path("//Document/Figure/fig1"));
        assert!(is_figure_path("//Document/Sect[2]/Figure"));
        assert!(!is_figure_path("//Document/P"));
        assert!(!is_figure_path("//Document/FigureCaption"));
        assert!(!is_figure_path("/Document/Figure"));
    }
}
