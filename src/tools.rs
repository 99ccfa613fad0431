use crate::config::ToolPaths;
use std::path::PathBuf;
use tracing::debug;
use which::which;

/// Executables the toolbox drives.
#[derive(Debug, Clone)]
pub struct Tools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub yt_dlp: PathBuf,
    pub whisper: PathBuf,
}

impl Tools {
    pub fn resolve(paths: &ToolPaths) -> Self {
        Self {
            ffmpeg: resolve_bin(paths.ffmpeg.clone(), "ffmpeg"),
            ffprobe: resolve_bin(paths.ffprobe.clone(), "ffprobe"),
            yt_dlp: resolve_bin(paths.yt_dlp.clone(), "yt-dlp"),
            whisper: resolve_bin(paths.whisper.clone(), "whisper"),
        }
    }
}

/// Explicit path, else PATH lookup, else the bare name. A tool that is
/// missing only fails when a job actually tries to start it.
pub fn resolve_bin(bin_opt: Option<PathBuf>, default: &str) -> PathBuf {
    if let Some(path) = bin_opt {
        return path;
    }

    which(default)
        .or_else(|_| {
            if cfg!(windows) {
                which(format!("{default}.exe"))
            } else {
                Err(which::Error::CannotFindBinaryPath)
            }
        })
        .unwrap_or_else(|_| {
            debug!("`{default}` not found in PATH");
            PathBuf::from(default)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins() {
        let p = resolve_bin(Some(PathBuf::from("/opt/ff/ffmpeg")), "ffmpeg");
        assert_eq!(p, PathBuf::from("/opt/ff/ffmpeg"));
    }

    #[test]
    fn missing_tool_falls_back_to_name() {
        let p = resolve_bin(None, "surely-not-installed-tool-42");
        assert_eq!(p, PathBuf::from("surely-not-installed-tool-42"));
    }

    #[cfg(unix)]
    #[test]
    fn finds_tool_on_path() {
        let p = resolve_bin(None, "sh");
        assert!(p.is_absolute(), "{}", p.display());
    }
}
