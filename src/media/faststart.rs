use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;

use crate::{error::Error, media::run_media_tool, video::assets::TempAsset};

#[async_trait]
pub trait VideoTransformer: Send + Sync {
    /// Remuxes the video so that the moov atom precedes the media data, enabling playback before the
    /// file is fully downloaded. The result is written to a new file next to the input, the returned
    /// path is owned by the caller. The input is never modified.
    async fn remux_fast_start(&self, input: &Path) -> Result<PathBuf, Error>;
}

/// Returns the sibling path the fast start output of `input` is written to,
/// e.g. `/tmp/abc-video.mp4` -> `/tmp/abc-video.processed.mp4`.
pub fn processed_path_for(input: &Path) -> PathBuf {
    let mut file_name = input
        .file_stem()
        .map(OsStr::to_os_string)
        .unwrap_or_else(|| OsString::from("video"));
    file_name.push(".processed");
    if let Some(extension) = input.extension() {
        file_name.push(".");
        file_name.push(extension);
    }
    input.with_file_name(file_name)
}

pub struct FfmpegFastStart {
    ffmpeg_path: OsString,
    time_limit: Duration,
}

impl FfmpegFastStart {
    pub fn new(ffmpeg_path: impl Into<OsString>, time_limit: Duration) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            time_limit,
        }
    }
}

#[async_trait]
impl VideoTransformer for FfmpegFastStart {
    async fn remux_fast_start(&self, input: &Path) -> Result<PathBuf, Error> {
        let metadata = tokio::fs::metadata(input).await.map_err(|e| {
            Error::TranscodeError(format!("Cannot read input {}: {e}", input.display()))
        })?;
        if !metadata.is_file() {
            return Err(Error::TranscodeError(format!(
                "Input {} is not a file",
                input.display()
            )));
        }

        // removes partial output if ffmpeg fails
        let output = TempAsset::new(processed_path_for(input));
        let args: [&OsStr; 14] = [
            OsStr::new("-v"),
            OsStr::new("error"),
            OsStr::new("-y"),
            OsStr::new("-i"),
            input.as_os_str(),
            OsStr::new("-map"),
            OsStr::new("0"),
            OsStr::new("-c"),
            OsStr::new("copy"),
            OsStr::new("-movflags"),
            OsStr::new("+faststart"),
            OsStr::new("-f"),
            OsStr::new("mp4"),
            output.path().as_os_str(),
        ];

        run_media_tool(&self.ffmpeg_path, args, self.time_limit)
            .await
            .map_err(|e| {
                Error::TranscodeError(format!("ffmpeg fast start for {}: {e}", input.display()))
            })?;

        if !tokio::fs::try_exists(output.path()).await.unwrap_or(false) {
            return Err(Error::TranscodeError(format!(
                "ffmpeg did not produce output {}",
                output.path().display()
            )));
        }

        Ok(output.keep())
    }
}
