/// Artifact persistence.
///
/// Every successful capture hands its artifact to exactly one [`ArtifactSink`]
/// call.  The default sink writes each artifact into a directory as
/// `<YYYY-MM-DD_HH-MM-SS-mmm>_<id8>.<ext>`.  Failures are reported to the
/// caller and never retried.
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::info;

use crate::request::{Artifact, RequestId};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error writing {path}: {message}")]
    Io { path: String, message: String },

    #[error("artifact rejected: {0}")]
    Rejected(String),
}

pub trait ArtifactSink: Send + Sync {
    fn store(&self, id: RequestId, artifact: &Artifact) -> Result<(), SinkError>;
}

pub struct DirectorySink {
    dir: RwLock<PathBuf>,
}

impl DirectorySink {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir: RwLock::new(dir) }
    }

    /// Redirects subsequent artifacts to `dir`.
    pub fn set_dir(&self, dir: PathBuf) {
        *self.dir.write() = dir;
    }

    pub fn dir(&self) -> PathBuf {
        self.dir.read().clone()
    }
}

impl ArtifactSink for DirectorySink {
    fn store(&self, id: RequestId, artifact: &Artifact) -> Result<(), SinkError> {
        if artifact.data.is_empty() {
            return Err(SinkError::Rejected("artifact is empty".into()));
        }
        let path = build_output_path(&self.dir(), id, artifact.extension)?;
        std::fs::write(&path, &artifact.data).map_err(|e| io_error(&path, e))?;
        info!(request = %id, path = %path.display(), bytes = artifact.data.len(), "artifact stored");
        Ok(())
    }
}

/// Returns the current local time formatted as `YYYY-MM-DD_HH-MM-SS-mmm`.
fn local_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d_%H-%M-%S-%3f").to_string()
}

/// Replaces anything but ASCII alphanumerics in an extension with `_`.
fn sanitize_extension(ext: &str) -> String {
    let cleaned: String = ext
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "bin".to_string()
    } else {
        cleaned
    }
}

/// Builds the output path for one artifact and creates `dir` if needed.
pub fn build_output_path(dir: &Path, id: RequestId, extension: &str) -> Result<PathBuf, SinkError> {
    std::fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
    Ok(dir.join(format!(
        "{}_{}.{}",
        local_timestamp(),
        id.short(),
        sanitize_extension(extension)
    )))
}

fn io_error(path: &Path, e: std::io::Error) -> SinkError {
    SinkError::Io { path: path.display().to_string(), message: e.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(data: &[u8]) -> Artifact {
        Artifact { data: data.to_vec(), extension: "ppm" }
    }

    // ── path helpers ──────────────────────────────────────────────────────────

    #[test]
    fn sanitize_extension_replaces_separators() {
        assert_eq!(sanitize_extension("ppm"), "ppm");
        assert_eq!(sanitize_extension("../x"), "___x");
        assert_eq!(sanitize_extension(""), "bin");
    }

    #[test]
    fn build_output_path_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let id = RequestId::new();
        let path = build_output_path(&nested, id, "ppm").unwrap();
        assert!(nested.is_dir());
        assert_eq!(path.parent().unwrap(), nested);
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with(&format!("_{}.ppm", id.short())), "{name}");
    }

    // ── DirectorySink ─────────────────────────────────────────────────────────

    #[test]
    fn store_writes_artifact_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path().to_path_buf());
        sink.store(RequestId::new(), &artifact(b"P6 1 1 255 abc")).unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let written = std::fs::read(files[0].as_ref().unwrap().path()).unwrap();
        assert_eq!(written, b"P6 1 1 255 abc");
    }

    #[test]
    fn store_rejects_empty_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path().to_path_buf());
        let err = sink.store(RequestId::new(), &artifact(b"")).unwrap_err();
        assert!(matches!(err, SinkError::Rejected(_)));
    }

    #[test]
    fn store_reports_io_error_when_dir_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let sink = DirectorySink::new(blocker);
        let err = sink.store(RequestId::new(), &artifact(b"data")).unwrap_err();
        assert!(matches!(err, SinkError::Io { .. }));
    }

    #[test]
    fn set_dir_redirects_later_artifacts() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(first.path().to_path_buf());
        sink.set_dir(second.path().to_path_buf());
        sink.store(RequestId::new(), &artifact(b"data")).unwrap();

        assert_eq!(std::fs::read_dir(first.path()).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(second.path()).unwrap().count(), 1);
    }
}
