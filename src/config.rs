use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const AUDIO_FORMATS: &[&str] = &["mp3", "wav", "flac", "aac", "m4a"];
pub const SUGGESTED_BITRATES: &[&str] = &["128k", "192k", "256k", "320k"];
pub const WHISPER_MODELS: &[&str] = &["tiny", "base", "small", "medium", "large"];
pub const TRANSCRIPT_FORMATS: &[&str] = &["txt", "srt", "vtt"];

const CONFIG_DIR: &str = "media-toolbox";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub log_file: Option<PathBuf>,
    pub tools: ToolPaths,
    pub convert: ConvertSettings,
    pub download: DownloadSettings,
    pub transcribe: TranscribeSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolPaths {
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
    pub yt_dlp: Option<PathBuf>,
    pub whisper: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConvertSettings {
    pub default_format: String,
    pub default_bitrate: String,
}

impl Default for ConvertSettings {
    fn default() -> Self {
        Self {
            default_format: "mp3".into(),
            default_bitrate: "192k".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloadSettings {
    pub output_dir: PathBuf,
    pub merge_format: String,
    pub cookie_file: Option<PathBuf>,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            output_dir: dirs::download_dir()
                .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
                .unwrap_or_else(|| PathBuf::from(".")),
            merge_format: "mp4".into(),
            cookie_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TranscribeSettings {
    pub default_model: String,
    pub default_format: String,
    pub use_gpu: bool,
}

impl Default for TranscribeSettings {
    fn default() -> Self {
        Self {
            default_model: "base".into(),
            default_format: "txt".into(),
            use_gpu: true,
        }
    }
}

impl Settings {
    /// Explicit file (must exist), else the per-user file if present,
    /// else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.is_file() {
                    bail!("Config file not found: {}", path.display());
                }
                path.to_path_buf()
            }
            None => match default_config_path().filter(|p| p.is_file()) {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };
        debug!(path = %path.display(), "loading config");
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if !AUDIO_FORMATS.contains(&self.convert.default_format.as_str()) {
            bail!(
                "convert.default_format `{}` is not one of {}",
                self.convert.default_format,
                AUDIO_FORMATS.join(", ")
            );
        }
        validate_bitrate(&self.convert.default_bitrate).map_err(anyhow::Error::msg)?;
        if !WHISPER_MODELS.contains(&self.transcribe.default_model.as_str()) {
            bail!(
                "transcribe.default_model `{}` is not one of {}",
                self.transcribe.default_model,
                WHISPER_MODELS.join(", ")
            );
        }
        if !TRANSCRIPT_FORMATS.contains(&self.transcribe.default_format.as_str()) {
            bail!(
                "transcribe.default_format `{}` is not one of {}",
                self.transcribe.default_format,
                TRANSCRIPT_FORMATS.join(", ")
            );
        }
        Ok(())
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Audio bitrate such as `192k`.
pub fn validate_bitrate(raw: &str) -> Result<String, String> {
    let digits = raw
        .strip_suffix('k')
        .ok_or_else(|| format!("`{raw}` must look like 192k"))?;
    let value: u32 = digits
        .parse()
        .map_err(|_| format!("`{raw}` must look like 192k"))?;
    if value == 0 || value > 1024 {
        return Err("bitrate must be between 1k and 1024k".into());
    }
    Ok(raw.to_string())
}

pub fn validate_model(raw: &str) -> Result<String, String> {
    if WHISPER_MODELS.contains(&raw) {
        Ok(raw.to_string())
    } else {
        Err(format!(
            "`{raw}` is not a known model ({})",
            WHISPER_MODELS.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let s = Settings::from_toml("").unwrap();
        assert_eq!(s.convert.default_format, "mp3");
        assert_eq!(s.convert.default_bitrate, "192k");
        assert_eq!(s.download.merge_format, "mp4");
        assert_eq!(s.transcribe.default_model, "base");
        assert!(s.transcribe.use_gpu);
        assert!(s.tools.ffmpeg.is_none());
    }

    #[test]
    fn sections_override_defaults() {
        let s = Settings::from_toml(
            r#"
log_file = "/tmp/toolbox.log"

[tools]
ffmpeg = "/opt/ffmpeg/bin/ffmpeg"

[convert]
default_format = "flac"

[transcribe]
default_model = "small"
use_gpu = false
"#,
        )
        .unwrap();
        assert_eq!(s.log_file, Some(PathBuf::from("/tmp/toolbox.log")));
        assert_eq!(s.tools.ffmpeg, Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg")));
        assert_eq!(s.convert.default_format, "flac");
        assert_eq!(s.convert.default_bitrate, "192k");
        assert_eq!(s.transcribe.default_model, "small");
        assert!(!s.transcribe.use_gpu);
    }

    #[test]
    fn rejects_unknown_values() {
        assert!(Settings::from_toml("[convert]\ndefault_format = \"ogg\"").is_err());
        assert!(Settings::from_toml("[transcribe]\ndefault_model = \"huge\"").is_err());
        assert!(Settings::from_toml("[convert]\nspeed = 2").is_err());
    }

    #[test]
    fn missing_explicit_config_is_error() {
        assert!(Settings::load(Some(Path::new("/no/such/config.toml"))).is_err());
    }

    #[test]
    fn bitrate_validation() {
        assert_eq!(validate_bitrate("320k").unwrap(), "320k");
        assert!(validate_bitrate("320").is_err());
        assert!(validate_bitrate("0k").is_err());
        assert!(validate_bitrate("fastk").is_err());
    }

    #[test]
    fn model_validation() {
        assert!(validate_model("medium").is_ok());
        assert!(validate_model("gigantic").is_err());
    }
}
