use std::{
    ffi::{OsStr, OsString},
    fmt,
    path::Path,
    time::Duration,
};

use async_trait::async_trait;
use serde::Deserialize;

use crate::{error::Error, media::run_media_tool};

/// Coarse orientation bucket of a video, used as the partition prefix of its storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectRatio {
    /// 16:9
    Landscape,
    /// 9:16
    Portrait,
    Other,
}

impl AspectRatio {
    /// Classifies the given dimensions, a ratio within 1% of 16:9 or 9:16 matches.
    pub fn classify(width: u32, height: u32) -> Self {
        if matches_ratio(width, height, 16, 9) {
            AspectRatio::Landscape
        } else if matches_ratio(width, height, 9, 16) {
            AspectRatio::Portrait
        } else {
            AspectRatio::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Other => "other",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// compares width / height with ratio_w / ratio_h without leaving integer arithmetic
fn matches_ratio(width: u32, height: u32, ratio_w: u64, ratio_h: u64) -> bool {
    let scaled_width = u64::from(width) * ratio_h;
    let scaled_height = u64::from(height) * ratio_w;
    scaled_width.abs_diff(scaled_height) * 100 <= scaled_height
}

#[async_trait]
pub trait VideoProber: Send + Sync {
    /// Inspects the first video stream of the local file. Never modifies the file.
    async fn probe_aspect_ratio(&self, path: &Path) -> Result<AspectRatio, Error>;
}

pub struct FfprobeProber {
    ffprobe_path: OsString,
    time_limit: Duration,
}

impl FfprobeProber {
    pub fn new(ffprobe_path: impl Into<OsString>, time_limit: Duration) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
            time_limit,
        }
    }
}

#[derive(Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Deserialize)]
struct FfprobeStream {
    width: Option<u32>,
    height: Option<u32>,
}

fn parse_dimensions(ffprobe_output: &[u8]) -> Result<(u32, u32), Error> {
    let output = serde_json::from_slice::<FfprobeOutput>(ffprobe_output)
        .map_err(|e| Error::ProbeError(format!("Failed to deserialize ffprobe output: {e}")))?;

    let stream = output
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| Error::ProbeError(String::from("No video stream found")))?;

    match (stream.width, stream.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => Ok((width, height)),
        (width, height) => Err(Error::ProbeError(format!(
            "Invalid video dimensions {width:?}x{height:?}"
        ))),
    }
}

#[async_trait]
impl VideoProber for FfprobeProber {
    async fn probe_aspect_ratio(&self, path: &Path) -> Result<AspectRatio, Error> {
        let args: [&OsStr; 9] = [
            OsStr::new("-v"),
            OsStr::new("error"),
            OsStr::new("-select_streams"),
            OsStr::new("v:0"),
            OsStr::new("-show_entries"),
            OsStr::new("stream=width,height"),
            OsStr::new("-of"),
            OsStr::new("json"),
            path.as_os_str(),
        ];

        let output = run_media_tool(&self.ffprobe_path, args, self.time_limit)
            .await
            .map_err(|e| Error::ProbeError(format!("ffprobe for {}: {e}", path.display())))?;

        let (width, height) = parse_dimensions(&output.stdout)?;
        let aspect_ratio = AspectRatio::classify(width, height);
        log::debug!(
            "Probed {} as {width}x{height} ({aspect_ratio})",
            path.display()
        );

        Ok(aspect_ratio)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{AspectRatio, FfprobeProber, VideoProber, parse_dimensions};
    use crate::error::Error;

    #[test]
    fn test_classify() {
        assert_eq!(AspectRatio::classify(1920, 1080), AspectRatio::Landscape);
        assert_eq!(AspectRatio::classify(1280, 720), AspectRatio::Landscape);
        assert_eq!(AspectRatio::classify(1080, 1920), AspectRatio::Portrait);
        // common vertical export that is not exactly 9:16
        assert_eq!(AspectRatio::classify(608, 1080), AspectRatio::Portrait);
        assert_eq!(AspectRatio::classify(1000, 1000), AspectRatio::Other);
        assert_eq!(AspectRatio::classify(640, 480), AspectRatio::Other);
        assert_eq!(AspectRatio::classify(0, 1080), AspectRatio::Other);
    }

    #[test]
    fn test_display() {
        assert_eq!(AspectRatio::Landscape.to_string(), "16:9");
        assert_eq!(AspectRatio::Portrait.to_string(), "9:16");
        assert_eq!(AspectRatio::Other.to_string(), "other");
    }

    #[test]
    fn test_parse_dimensions() {
        let output = br#"{"programs": [], "streams": [{"width": 1920, "height": 1080}]}"#;
        assert_eq!(parse_dimensions(output).unwrap(), (1920, 1080));
    }

    #[test]
    fn test_parse_no_video_stream() {
        assert!(matches!(
            parse_dimensions(br#"{"programs": [], "streams": []}"#),
            Err(Error::ProbeError(_))
        ));
        assert!(matches!(
            parse_dimensions(br#"{}"#),
            Err(Error::ProbeError(_))
        ));
        assert!(matches!(
            parse_dimensions(br#"{"streams": [{"width": 0, "height": 1080}]}"#),
            Err(Error::ProbeError(_))
        ));
        assert!(matches!(
            parse_dimensions(b"not json"),
            Err(Error::ProbeError(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_ffprobe_binary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.mp4");
        std::fs::write(&path, b"not really a video").unwrap();

        let prober = FfprobeProber::new("videobroker-no-such-ffprobe", Duration::from_secs(5));
        assert!(matches!(
            prober.probe_aspect_ratio(&path).await,
            Err(Error::ProbeError(_))
        ));
        assert!(path.exists());
    }
}
