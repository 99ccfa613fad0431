use crate::error::ToolError;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// Up-front lookup of a media file's total length.
pub trait DurationSource: Send {
    /// Seconds, or `0.0` when unknown. Never fails.
    fn duration_of(&self, path: &Path) -> f64;
}

/// A fixed, already known duration.
impl DurationSource for f64 {
    fn duration_of(&self, _path: &Path) -> f64 {
        *self
    }
}

#[derive(Debug, Clone)]
pub struct FfprobeDuration {
    ffprobe: PathBuf,
}

impl FfprobeDuration {
    pub fn new(ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
        }
    }

    pub fn probe(&self, input: &Path) -> Result<f64, ToolError> {
        let out = Command::new(&self.ffprobe)
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(input)
            .output()
            .map_err(|e| ToolError::Probe(format!("failed to run ffprobe: {e}")))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(ToolError::Probe(format!(
                "ffprobe error (status {}): {}",
                out.status,
                stderr.trim()
            )));
        }
        parse_duration_output(&String::from_utf8_lossy(&out.stdout))
    }
}

impl DurationSource for FfprobeDuration {
    fn duration_of(&self, path: &Path) -> f64 {
        match self.probe(path) {
            Ok(seconds) => {
                debug!(path = %path.display(), seconds, "probed duration");
                seconds
            }
            Err(err) => {
                warn!(path = %path.display(), "{err}; progress will be indeterminate");
                0.0
            }
        }
    }
}

pub fn parse_duration_output(raw: &str) -> Result<f64, ToolError> {
    let s = raw.trim();
    let seconds: f64 = s
        .parse()
        .map_err(|_| ToolError::parse(s, "not a decimal number"))?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(ToolError::parse(s, "duration out of range"));
    }
    Ok(seconds)
}
