use std::{
    io,
    path::{Path, PathBuf},
};

use mime::Mime;

use crate::error::Error;

/// The only media type accepted for video uploads.
pub const VIDEO_MIME: &str = "video/mp4";

/// Resolves the file extension for an uploaded video. Only mp4 is accepted.
pub fn media_type_to_ext(media_type: &Mime) -> Result<&'static str, Error> {
    if media_type.essence_str() == VIDEO_MIME {
        Ok(".mp4")
    } else {
        Err(Error::UnsupportedMediaTypeError(media_type.to_string()))
    }
}

pub fn thumbnail_media_type_to_ext(media_type: &Mime) -> Result<&'static str, Error> {
    match media_type.essence_str() {
        "image/jpeg" => Ok(".jpg"),
        "image/png" => Ok(".png"),
        _ => Err(Error::UnsupportedMediaTypeError(media_type.to_string())),
    }
}

#[inline]
pub fn asset_disk_path(base_dir: &Path, filename: &str) -> PathBuf {
    base_dir.join(filename)
}

/// Guard owning a temporary file on the local disk, the file is deleted when the guard is dropped
/// unless it has been handed over with [`TempAsset::keep`].
///
/// The guard may be created before the file exists, dropping it then is a no-op.
#[derive(Debug)]
pub struct TempAsset {
    path: PathBuf,
    armed: bool,
}

impl TempAsset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the file from this guard without deleting it, the caller becomes responsible for it.
    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for TempAsset {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Deleted temporary file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::error!(
                "Failed to delete temporary file {}: {e}",
                self.path.display()
            ),
        }
    }
}
