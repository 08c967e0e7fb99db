//! Figure image store: `{root}/jpg_output/{filename}`.
//!
//! Filenames come straight from request paths, so [`ImageStore::resolve`]
//! only accepts a single plain path component.

use crate::document::FigureAsset;
use crate::error::NotesError;
use crate::pipeline::encode::encode_jpeg;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

const IMAGE_DIR: &str = "jpg_output";
const PUBLISH_QUALITY: u8 = 90;

/// A figure written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedImage {
    /// Position of the figure in the published slice.
    pub index: usize,
    /// Original figure name.
    pub name: String,
    /// Stored filename, servable via [`ImageStore::read`].
    pub filename: String,
}

#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            dir: root.as_ref().join(IMAGE_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Map a request filename to a path inside the store.
    ///
    /// # Errors
    /// [`NotesError::Validation`] for empty names, separators, `..`, and
    /// absolute paths.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf, NotesError> {
        let invalid = || NotesError::Validation {
            detail: format!("invalid image name '{filename}'"),
        };
        if filename.is_empty() || filename.contains(['/', '\\']) || filename.contains("..") {
            return Err(invalid());
        }
        let mut components = Path::new(filename).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.dir.join(filename)),
            _ => Err(invalid()),
        }
    }

    /// Read a stored image. `Ok(None)` when it does not exist.
    pub async fn read(&self, filename: &str) -> Result<Option<Vec<u8>>, NotesError> {
        let path = self.resolve(filename)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(NotesError::io(format!("Failed to read {}", path.display()), e)),
        }
    }

    /// Write every decodable figure as JPEG under an invocation-unique name.
    ///
    /// Figures that cannot be decoded are skipped with a warning; the result
    /// holds one entry per stored figure, in input order.
    pub async fn publish(&self, figures: &[FigureAsset]) -> Result<Vec<PublishedImage>, NotesError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| NotesError::io(format!("Failed to create {}", self.dir.display()), e))?;

        let batch = Uuid::new_v4().simple().to_string();
        let mut published = Vec::with_capacity(figures.len());
        for (i, fig) in figures.iter().enumerate() {
            let data = fig.data.clone();
            let jpeg = match tokio::task::spawn_blocking(move || encode_jpeg(&data, PUBLISH_QUALITY)).await {
                Ok(Ok(jpeg)) => jpeg,
                Ok(Err(e)) => {
                    warn!("Not publishing figure '{}': {}", fig.name, e);
                    continue;
                }
                Err(e) => return Err(NotesError::Internal(format!("encode task failed: {e}"))),
            };

            let filename = format!("{}-{}.jpg", batch, i + 1);
            let path = self.dir.join(&filename);
            tokio::fs::write(&path, &jpeg)
                .await
                .map_err(|e| NotesError::io(format!("Failed to write {}", path.display()), e))?;
            published.push(PublishedImage {
                index: i,
                name: fig.name.clone(),
                filename,
            });
        }
        debug!("Published {}/{} figures to {}", published.len(), figures.len(), self.dir.display());
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::analyze::tests::png_bytes;

    #[test]
    fn resolve_rejects_traversal() {
        let store = ImageStore::new("/srv");
        assert_eq!(store.resolve("a.jpg").unwrap(), PathBuf::from("/srv/jpg_output/a.jpg"));
        for bad in ["", "..", "../x.jpg", "a/b.jpg", "a\\b.jpg", "/etc/passwd", ".", "x..jpg"] {
            assert!(store.resolve(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[tokio::test]
    async fn missing_image_reads_as_none() {
        let root = tempfile::tempdir().unwrap();
        let store = ImageStore::new(root.path());
        assert_eq!(store.read("nope.jpg").await.unwrap(), None);
    }

    #[tokio::test]
    async fn publish_then_read_back() {
        let root = tempfile::tempdir().unwrap();
        let store = ImageStore::new(root.path());
        let figures = vec![
            FigureAsset {
                name: "fig1.png".into(),
                data: png_bytes(),
            },
            FigureAsset {
                name: "broken.png".into(),
                data: b"junk".to_vec(),
            },
        ];

        let published = store.publish(&figures).await.unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].name, "fig1.png");
        assert_eq!(published[0].index, 0);

        let bytes = store.read(&published[0].filename).await.unwrap().unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Jpeg);
    }
}
