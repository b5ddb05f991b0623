use std::{fmt, time::Duration};

use url::Url;

use crate::error::Error;

#[derive(Debug, Clone)]
pub struct FormattedDuration(Duration);

/// Formats a duration as a short human readable string for log messages, e.g. `2m 5s` or `340ms`.
pub fn format_duration(val: Duration) -> FormattedDuration {
    FormattedDuration(val)
}

impl fmt::Display for FormattedDuration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let secs = self.0.as_secs();
        if secs == 0 {
            let micros = self.0.subsec_micros();
            return if micros >= 1000 {
                write!(f, "{}ms", micros / 1000)
            } else {
                write!(f, "{micros}us")
            };
        }

        let hours = secs / 3600;
        let minutes = secs % 3600 / 60;
        let seconds = secs % 60;

        let mut parts = Vec::with_capacity(3);
        if hours > 0 {
            parts.push(format!("{hours}h"));
        }
        if minutes > 0 {
            parts.push(format!("{minutes}m"));
        }
        if seconds > 0 || parts.is_empty() {
            parts.push(format!("{seconds}s"));
        }
        f.write_str(&parts.join(" "))
    }
}

pub struct OptFmt<T>(pub Option<T>);

impl<T: fmt::Display> fmt::Display for OptFmt<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref t) = self.0 {
            fmt::Display::fmt(t, f)
        } else {
            f.write_str("-")
        }
    }
}

pub fn join_url<'a>(
    url: &mut Url,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<(), Error> {
    let mut path_segments = url
        .path_segments_mut()
        .map_err(|_| Error::StorageError(String::from("URL cannot be a base")))?;
    path_segments.pop_if_empty();
    for segment in segments {
        path_segments.push(segment);
    }
    Ok(())
}
