//! Read-only artifact store behind `GET /artifacts/{name}`.
//!
//! Artifacts are files the producer writes next to itself (spill
//! visualizations). Only bare file names are accepted; anything that could
//! address a different directory is rejected before touching the filesystem.

use std::io;
use std::path::{Path, PathBuf};

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

/// Errors returned by [`ArtifactStore::read`].
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// The name is not a bare file name.
    #[error("invalid artifact name {0:?}")]
    InvalidName(String),

    /// No such artifact.
    #[error("artifact not found: {0}")]
    NotFound(String),

    /// The artifact exists but could not be read.
    #[error("failed to read artifact {name}: {source}")]
    Io {
        /// Requested name.
        name: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl IntoResponse for ArtifactError {
    fn into_response(self) -> Response {
        match self {
            Self::InvalidName(_) => (StatusCode::BAD_REQUEST, "Invalid image name").into_response(),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "Image not found").into_response(),
            Self::Io { .. } => {
                log::warn!("[Server] {self}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read image").into_response()
            }
        }
    }
}

/// An artifact's bytes and content type.
#[derive(Debug)]
pub struct Artifact {
    /// File contents.
    pub bytes: Vec<u8>,
    /// MIME type derived from the extension.
    pub content_type: &'static str,
}

impl IntoResponse for Artifact {
    fn into_response(self) -> Response {
        ([(header::CONTENT_TYPE, self.content_type)], self.bytes).into_response()
    }
}

/// Directory of artifacts served by name.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Serve files from `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory artifacts are served from.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the artifact called `name`.
    pub async fn read(&self, name: &str) -> Result<Artifact, ArtifactError> {
        let name = validate_name(name)?;
        let path = self.root.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Artifact {
                bytes,
                content_type: content_type_for(name),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ArtifactError::NotFound(name.to_string())),
            Err(source) => Err(ArtifactError::Io {
                name: name.to_string(),
                source,
            }),
        }
    }
}

/// Accept only bare file names.
pub fn validate_name(name: &str) -> Result<&str, ArtifactError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(ArtifactError::InvalidName(name.to_string()));
    }
    Ok(name)
}

/// MIME type for a file name, by extension.
#[must_use]
pub fn content_type_for(name: &str) -> &'static str {
    let extension = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name_accepts_bare_names() {
        for name in ["oil_spill_7.png", "a", ".hidden", "name with spaces.jpg", "..png"] {
            assert!(validate_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_validate_name_rejects_traversal() {
        for name in ["", ".", "..", "../secret", "a/b.png", "..\\x", "a\\b", "nul\0byte"] {
            assert!(
                matches!(validate_name(name), Err(ArtifactError::InvalidName(_))),
                "{name:?}"
            );
        }
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type_for("x.png"), "image/png");
        assert_eq!(content_type_for("x.JPG"), "image/jpeg");
        assert_eq!(content_type_for("x.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_read_existing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("spill.png"), b"\x89PNG").unwrap();
        let store = ArtifactStore::new(dir.path());

        let artifact = store.read("spill.png").await.unwrap();
        assert_eq!(artifact.bytes, b"\x89PNG");
        assert_eq!(artifact.content_type, "image/png");
    }

    #[tokio::test]
    async fn test_read_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(matches!(
            store.read("absent.png").await,
            Err(ArtifactError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_read_never_leaves_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("images");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(dir.path().join("secret.txt"), b"secret").unwrap();
        let store = ArtifactStore::new(&root);

        assert!(matches!(
            store.read("../secret.txt").await,
            Err(ArtifactError::InvalidName(_))
        ));
    }

    #[test]
    fn test_error_status_codes() {
        let response = ArtifactError::NotFound("x".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = ArtifactError::InvalidName("..".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
