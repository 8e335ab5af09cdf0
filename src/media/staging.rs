//! Local directory where downloads wait for upload.

use super::hash::short_id;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StagingDir {
    root: PathBuf,
}

impl StagingDir {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File stem (no extension) used for a video's download.
    pub fn stem_for(&self, video_id: &str) -> String {
        short_id(video_id)
    }

    /// First staged file belonging to `stem`, whatever extension yt-dlp chose.
    pub fn find(&self, stem: &str) -> io::Result<Option<PathBuf>> {
        let preferred = self.root.join(format!("{}.mp4", stem));
        if preferred.is_file() {
            return Ok(Some(preferred));
        }
        let prefix = format!("{}.", stem);
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(&prefix) && !name.ends_with(".part") && entry.path().is_file() {
                return Ok(Some(entry.path()));
            }
        }
        Ok(None)
    }

    /// Remove every staged file. Returns how many were deleted.
    pub fn purge(&self) -> io::Result<usize> {
        if !self.root.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_file() {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to delete staged file"),
                }
            }
        }
        Ok(removed)
    }
}
