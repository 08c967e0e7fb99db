//! Normalisation: manifest elements → position-ordered [`ContentElement`]s.
//!
//! Pure and synchronous. The sort is stable, so elements that share a
//! position (typically 0 when the manifest has no bounds) keep their manifest
//! order. Figure labels are *not* renumbered: `[Figure N]` keeps its
//! discovery index, and each figure additionally gets its `reading_rank`
//! after the sort.

use crate::document::{ContentElement, ElementKind, ManifestElement, ManifestKind};
use crate::error::NotesError;

/// Sort manifest elements by position and convert them to content elements.
///
/// # Errors
/// [`NotesError::Validation`] when a position is not finite or a figure
/// reference carries ordinal 0.
pub fn normalize(elements: Vec<ManifestElement>) -> Result<Vec<ContentElement>, NotesError> {
    let mut out = elements
        .into_iter()
        .enumerate()
        .map(|(i, el)| convert(i, el))
        .collect::<Result<Vec<_>, _>>()?;

    out.sort_by(|a, b| a.position.total_cmp(&b.position));
    assign_reading_ranks(&mut out);
    Ok(out)
}

fn convert(i: usize, el: ManifestElement) -> Result<ContentElement, NotesError> {
    if !el.position.is_finite() {
        return Err(NotesError::Validation {
            detail: format!("element #{i} has non-finite position {}", el.position),
        });
    }
    match el.kind {
        ManifestKind::Text { content } => Ok(ContentElement::text(content, el.position)),
        ManifestKind::FigureReference { ordinal, label } => {
            if ordinal == 0 {
                return Err(NotesError::Validation {
                    detail: format!("element #{i}: figure ordinals are 1-based"),
                });
            }
            Ok(ContentElement {
                kind: ElementKind::Figure,
                content: label,
                position: el.position,
                figure_index: Some(ordinal),
                reading_rank: None,
            })
        }
    }
}

/// Re-establish the normalized invariants on elements received from outside
/// the pipeline (e.g. the notes endpoint): finite positions, 1-based figure
/// indices, stable position order, fresh reading ranks.
pub fn renormalize(mut elements: Vec<ContentElement>) -> Result<Vec<ContentElement>, NotesError> {
    for (i, el) in elements.iter().enumerate() {
        if !el.position.is_finite() {
            return Err(NotesError::Validation {
                detail: format!("element #{i} has non-finite position"),
            });
        }
        if el.kind == ElementKind::Figure && el.figure_index == Some(0) {
            return Err(NotesError::Validation {
                detail: format!("element #{i}: figure_index is 1-based"),
            });
        }
    }

    elements.sort_by(|a, b| a.position.total_cmp(&b.position));
    assign_reading_ranks(&mut elements);
    Ok(elements)
}

fn assign_reading_ranks(elements: &mut [ContentElement]) {
    let mut rank = 0;
    for el in elements.iter_mut().filter(|el| el.kind == ElementKind::Figure) {
        rank += 1;
        el.reading_rank = Some(rank);
    }
}
