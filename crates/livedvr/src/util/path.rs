use std::path::{Path, PathBuf};

use crate::{DvrError, DvrResult};

/// Containers the muxer can write, chosen by output file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Mp4,
    Mkv,
}

impl OutputFormat {
    pub fn from_path(path: impl AsRef<Path>) -> DvrResult<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match extension.as_deref() {
            Some("mp4") => Ok(Self::Mp4),
            Some("mkv") => Ok(Self::Mkv),
            _ => Err(DvrError::UnsupportedOutput(path.to_path_buf())),
        }
    }
}

/// Validated output location.
#[derive(Debug, Clone)]
pub struct OutputPath {
    path: PathBuf,
    format: OutputFormat,
}

impl OutputPath {
    pub fn new(path: impl Into<PathBuf>) -> DvrResult<Self> {
        let path = path.into();
        let format = OutputFormat::from_path(&path)?;
        Ok(Self { path, format })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}
