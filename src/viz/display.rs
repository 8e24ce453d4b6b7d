use anyhow::{Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Key that ends the render loop.
pub const QUIT_KEY: char = 'q';

/// Where rendered overlays go.
pub trait OverlayDisplay: Send {
    fn name(&self) -> &str;

    /// Present one rendered frame.
    fn show(&mut self, frame: &RgbImage) -> Result<()>;

    /// Key pressed since the last poll, if the display has an input channel.
    fn poll_key(&mut self) -> Option<char> {
        None
    }

    fn close(&mut self) {}
}

/// Headless display: writes the latest overlay to an image file.
///
/// Frames arriving faster than `min_interval` are skipped. The file is
/// written to a temporary sibling and renamed, so readers never see a
/// partial image.
pub struct FileDisplay {
    path: PathBuf,
    tmp_path: PathBuf,
    min_interval: Duration,
    last_write: Option<Instant>,
    frames_written: u64,
}

impl FileDisplay {
    pub fn new(path: impl AsRef<Path>, min_interval: Duration) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);
        Self {
            path,
            tmp_path,
            min_interval,
            last_write: None,
            frames_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl OverlayDisplay for FileDisplay {
    fn name(&self) -> &str {
        "file"
    }

    fn show(&mut self, frame: &RgbImage) -> Result<()> {
        let now = Instant::now();
        if self
            .last_write
            .is_some_and(|last| now.duration_since(last) < self.min_interval)
        {
            return Ok(());
        }
        let format = image::ImageFormat::from_path(&self.path)
            .with_context(|| format!("overlay format for {}", self.path.display()))?;
        frame
            .save_with_format(&self.tmp_path, format)
            .with_context(|| format!("write overlay {}", self.tmp_path.display()))?;
        std::fs::rename(&self.tmp_path, &self.path)
            .with_context(|| format!("replace overlay {}", self.path.display()))?;
        self.last_write = Some(now);
        self.frames_written += 1;
        Ok(())
    }

    fn close(&mut self) {
        log::info!(
            "FileDisplay: {} overlays written to {}",
            self.frames_written,
            self.path.display()
        );
    }
}
