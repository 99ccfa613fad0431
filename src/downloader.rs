//! yt-dlp front end: format listing and downloads.

use crate::controller::{JobController, JobHandle};
use crate::job::{Job, JobInput, JobResult, ToolKind};
use crate::parser::{OUTPUT_TAG, PROGRESS_TAG};
use crate::process::ToolCommand;
use crate::tools::Tools;
use anyhow::{Context, Result, bail};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub output_dir: PathBuf,
    /// Explicit format selector, e.g. `137+bestaudio`.
    pub format: Option<String>,
    pub cookie_file: Option<PathBuf>,
    pub merge_format: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quality {
    pub id: String,
    pub container: String,
    pub quality: String,
    pub size: u64,
    pub size_str: String,
    pub display: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub title: String,
    pub qualities: Vec<Quality>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
}

/// Cookie file only counts when it actually exists.
fn usable_cookie(cookie_file: Option<&Path>) -> Option<&Path> {
    cookie_file.filter(|p| {
        let exists = p.is_file();
        if !exists {
            warn!(path = %p.display(), "cookie file not found, ignoring");
        }
        exists
    })
}

pub fn build_command(yt_dlp: &Path, request: &DownloadRequest) -> ToolCommand {
    let template = request.output_dir.join("%(title)s.%(ext)s");
    let mut cmd = ToolCommand::new(yt_dlp)
        .args(["--newline", "--progress", "--no-simulate", "--color", "never"])
        .arg("--progress-template")
        .arg(format!(
            "download:{PROGRESS_TAG}|%(progress.status)s|%(progress._percent_str)s|%(progress._speed_str)s"
        ))
        .arg("--print")
        .arg(format!("after_move:{OUTPUT_TAG}|%(filepath)s"))
        .arg("-o")
        .arg(template)
        .args(["--merge-output-format", request.merge_format.as_str()]);
    if let Some(format) = &request.format {
        cmd = cmd.args(["-f", format.as_str()]);
    }
    if let Some(cookies) = usable_cookie(request.cookie_file.as_deref()) {
        cmd = cmd.arg("--cookies").arg(cookies);
    }
    cmd.arg("--").arg(&request.url)
}

pub fn prepare(tools: &Tools, request: &DownloadRequest) -> Result<JobController, JobResult> {
    if let Err(err) = fs::create_dir_all(&request.output_dir) {
        return Err(JobResult::failed(format!(
            "cannot create {}: {err}",
            request.output_dir.display()
        )));
    }
    info!(url = %request.url, dir = %request.output_dir.display(), "download requested");
    let mut job = Job::new(JobInput::Url(request.url.clone()), ToolKind::Download)
        .option("merge_format", &request.merge_format);
    if let Some(format) = &request.format {
        job = job.option("format", format);
    }
    Ok(JobController::new(job, build_command(&tools.yt_dlp, request)))
}

pub fn start(tools: &Tools, request: &DownloadRequest) -> JobHandle {
    match prepare(tools, request) {
        Ok(controller) => controller.spawn(),
        Err(result) => JobHandle::finished(result),
    }
}

/// Ask yt-dlp for metadata without downloading anything.
pub fn fetch_info(yt_dlp: &Path, url: &str, cookie_file: Option<&Path>) -> Result<VideoInfo> {
    info!(url, "fetching video info");
    let mut cmd = Command::new(yt_dlp);
    cmd.args(["-J", "--flat-playlist", "--no-warnings"]);
    if let Some(cookies) = usable_cookie(cookie_file) {
        cmd.arg("--cookies").arg(cookies);
    }
    let out = cmd
        .arg("--")
        .arg(url)
        .output()
        .with_context(|| format!("failed to run {}", yt_dlp.display()))?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        let message = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("no diagnostic output");
        bail!("yt-dlp failed ({}): {}", out.status, message.trim());
    }
    let info: Value = serde_json::from_slice(&out.stdout).context("cannot decode yt-dlp JSON")?;
    Ok(parse_info(&info))
}

pub fn parse_info(info: &Value) -> VideoInfo {
    let formats = info.get("formats").and_then(Value::as_array);
    let is_playlist = info.get("_type").and_then(Value::as_str) == Some("playlist")
        || (info.get("entries").is_some() && formats.is_none_or(|f| f.is_empty()));

    if is_playlist {
        let title = str_field(info, "title").unwrap_or("Untitled playlist");
        let count = info
            .get("entries")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        return VideoInfo {
            title: format!("[playlist] {title} ({count} videos)"),
            qualities: vec![
                playlist_quality("bestvideo+bestaudio/best", "Best quality - whole playlist"),
                playlist_quality("bestaudio/best", "Audio only - whole playlist"),
            ],
            thumbnail: None,
            duration: None,
        };
    }

    let single = [info.clone()];
    let formats: &[Value] = match formats {
        Some(list) if !list.is_empty() => list.as_slice(),
        _ => &single[..],
    };

    let mut qualities: Vec<Quality> = formats.iter().filter_map(quality_of).collect();
    qualities.sort_by(|a, b| b.size.cmp(&a.size));

    VideoInfo {
        title: str_field(info, "title").unwrap_or("Untitled").to_string(),
        qualities,
        thumbnail: str_field(info, "thumbnail").map(str::to_string),
        duration: info.get("duration").and_then(Value::as_f64),
    }
}

fn quality_of(format: &Value) -> Option<Quality> {
    let format_id = str_field(format, "format_id")?;
    let ext = str_field(format, "ext").unwrap_or("");
    let resolution = str_field(format, "resolution")
        .map(str::to_string)
        .or_else(|| {
            let height = format.get("height").and_then(Value::as_u64)?;
            let width = format
                .get("width")
                .and_then(Value::as_u64)
                .map_or("?".to_string(), |w| w.to_string());
            Some(format!("{width}x{height}"))
        });
    let size = format
        .get("filesize")
        .and_then(Value::as_u64)
        .or_else(|| format.get("filesize_approx").and_then(Value::as_u64))
        .unwrap_or(0);
    let note = str_field(format, "format_note").unwrap_or("");
    let vcodec = str_field(format, "vcodec").unwrap_or("none");
    let acodec = str_field(format, "acodec").unwrap_or("none");

    let size_str = if size > 0 {
        format!("{:.2} MB", size as f64 / (1024.0 * 1024.0))
    } else {
        "Unknown".to_string()
    };

    let mut parts: Vec<String> = Vec::new();
    if let Some(res) = &resolution {
        parts.push(res.clone());
    }
    if !note.is_empty() {
        parts.push(note.to_string());
    }
    if !ext.is_empty() {
        parts.push(ext.to_string());
    }
    if vcodec != "none" {
        parts.push(format!("v:{vcodec}"));
    }
    if acodec != "none" {
        parts.push(format!("a:{acodec}"));
    }
    parts.push(size_str.clone());

    // Video-only streams get the best audio merged in.
    let id = if vcodec != "none" && acodec == "none" {
        format!("{format_id}+bestaudio")
    } else {
        format_id.to_string()
    };

    let quality = resolution
        .clone()
        .or_else(|| (!note.is_empty()).then(|| note.to_string()))
        .unwrap_or_else(|| "Unknown".to_string());

    Some(Quality {
        id,
        container: ext.to_string(),
        quality,
        size,
        size_str,
        display: parts.join(" - "),
    })
}

fn playlist_quality(id: &str, display: &str) -> Quality {
    Quality {
        id: id.to_string(),
        container: String::new(),
        quality: String::new(),
        size: 0,
        size_str: "Unknown".to_string(),
        display: display.to_string(),
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}
