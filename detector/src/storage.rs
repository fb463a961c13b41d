use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use radiograph_common::frame::LumaFrame;
use tracing::{debug, info};

/// Where evidence frames go. Called from the worker thread only after the
/// capture gate asked for a save.
pub trait ImageStore: Send {
    /// Persist `frame` and return the name it was stored under.
    fn save(&self, frame: &LumaFrame, suggested_name: &str) -> Result<String, PersistError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Writes grayscale JPEGs below a root directory, optionally with the raw
/// luminance record alongside.
pub struct DiskStore {
    root: PathBuf,
    jpeg_quality: u8,
    write_raw: bool,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>, jpeg_quality: u8, write_raw: bool) -> Self {
        Self {
            root: root.into(),
            jpeg_quality: jpeg_quality.clamp(1, 100),
            write_raw,
        }
    }

    pub fn ensure_root(&self) -> Result<(), PersistError> {
        fs::create_dir_all(&self.root).map_err(|e| PersistError::io(&self.root, e))?;
        info!(root = %self.root.display(), "capture directory ready");
        Ok(())
    }

    fn write_jpeg(&self, path: &Path, frame: &LumaFrame) -> Result<(), PersistError> {
        let width = frame.width;
        let height = frame.height();
        if width == 0 || height == 0 {
            return Err(PersistError::Shape {
                width,
                len: frame.samples.len(),
            });
        }
        let plane = &frame.samples[..(width as usize * height as usize)];

        let file = File::create(path).map_err(|e| PersistError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, self.jpeg_quality).write_image(
            plane,
            width,
            height,
            ExtendedColorType::L8,
        )?;
        writer.flush().map_err(|e| PersistError::io(path, e))
    }
}

impl ImageStore for DiskStore {
    fn save(&self, frame: &LumaFrame, suggested_name: &str) -> Result<String, PersistError> {
        let path = self.root.join(suggested_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PersistError::io(parent, e))?;
        }

        self.write_jpeg(&path, frame)?;

        if self.write_raw {
            let raw_path = path.with_extension("luma");
            fs::write(&raw_path, frame.serialize()).map_err(|e| PersistError::io(&raw_path, e))?;
        }

        debug!(path = %path.display(), seq = frame.seq, "frame written");
        Ok(suggested_name.to_string())
    }

    fn name(&self) -> &str {
        "disk"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("cannot store a {width}-wide plane of {len} samples")]
    Shape { width: u32, len: usize },
}

impl PersistError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
