//! Per-tool output dialects. Each parser looks at one line plus the job's
//! static context and either recognizes it or ignores it; unrecognized
//! lines are ordinary log chatter, never errors.

use crate::job::{JobResult, ProgressEvent, ToolKind};
use crate::sentinel::{self, DURATION_PREFIX, RESULT_PREFIX};
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::{trace, warn};

/// Marker the downloader's progress template starts every hook line with.
pub const PROGRESS_TAG: &str = "__progress__";
/// Marker for the final file path the downloader prints after moving it.
pub const OUTPUT_TAG: &str = "__output__";

static TRANSCODE_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").unwrap());
static SEGMENT_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-->\s*(?:(\d{1,2}):)?(\d{2}):(\d{2})[.,](\d{3})").unwrap()
});
static ANSI: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    Progress(ProgressEvent),
    /// Total length announced by the tool itself.
    Duration(f64),
    /// Where the tool put its artifact.
    Output(PathBuf),
    /// The tool's own terminal verdict.
    Finished(JobResult),
}

#[derive(Debug, Clone, Default)]
pub struct ParseContext {
    /// Seconds; `0.0` means unknown.
    pub total_duration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Transcode,
    Download,
    Transcription,
}

impl Dialect {
    pub fn for_kind(kind: ToolKind) -> Self {
        match kind {
            ToolKind::Transcode => Dialect::Transcode,
            ToolKind::Download => Dialect::Download,
            ToolKind::Transcribe => Dialect::Transcription,
        }
    }

    pub fn parse_line(self, line: &str, ctx: &ParseContext) -> Option<LineEvent> {
        let event = match self {
            Dialect::Transcode => parse_transcode_line(line, ctx),
            Dialect::Download => parse_download_line(line),
            Dialect::Transcription => parse_transcription_line(line, ctx),
        };
        if event.is_none() {
            trace!(dialect = ?self, line, "no progress in line");
        }
        event
    }

    /// Whether success needs an explicit result record besides exit code 0.
    pub fn needs_result(self) -> bool {
        matches!(self, Dialect::Transcription)
    }
}

pub fn parse_transcode_line(line: &str, ctx: &ParseContext) -> Option<LineEvent> {
    let caps = TRANSCODE_TIME.captures(line)?;
    let elapsed = clock_seconds(Some(&caps[1]), &caps[2], &caps[3])?;
    let event = if ctx.total_duration > 0.0 {
        ProgressEvent::percent("converting", percent_of(elapsed, ctx.total_duration, 100.0))
    } else {
        ProgressEvent::indeterminate("converting")
    };
    Some(LineEvent::Progress(event))
}

pub fn parse_download_line(line: &str) -> Option<LineEvent> {
    if let Some(idx) = line.find(OUTPUT_TAG) {
        let path = line[idx + OUTPUT_TAG.len()..].trim_start_matches('|').trim();
        if path.is_empty() {
            return None;
        }
        return Some(LineEvent::Output(PathBuf::from(path)));
    }

    let idx = line.find(PROGRESS_TAG)?;
    let mut fields = line[idx + PROGRESS_TAG.len()..]
        .trim_start_matches('|')
        .split('|')
        .map(|f| ANSI.replace_all(f, "").trim().to_string());
    let status = fields.next()?;
    let percent_str = fields.next().unwrap_or_default();
    let speed = fields.next().unwrap_or_default();

    match status.as_str() {
        "downloading" => {
            let percent = parse_percent(&percent_str);
            let mut event = ProgressEvent::percent("downloading", percent);
            if !speed.is_empty() && speed != "NA" {
                event = event.with_detail(speed);
            }
            Some(LineEvent::Progress(event))
        }
        "finished" => Some(LineEvent::Progress(ProgressEvent::percent("finished", 100.0))),
        _ => None,
    }
}

/// Sentinels are checked before timestamps so a timestamp-looking
/// fragment inside a result record is never read as progress.
pub fn parse_transcription_line(line: &str, ctx: &ParseContext) -> Option<LineEvent> {
    let trimmed = line.trim();

    if let Some(payload) = trimmed.strip_prefix(DURATION_PREFIX) {
        if ctx.total_duration > 0.0 {
            return None;
        }
        return match sentinel::decode_duration(payload) {
            Ok(seconds) => Some(LineEvent::Duration(seconds)),
            Err(err) => {
                warn!("ignoring duration sentinel: {err}");
                None
            }
        };
    }

    if let Some(payload) = trimmed.strip_prefix(RESULT_PREFIX) {
        return match sentinel::decode_result(payload) {
            Ok(result) => Some(LineEvent::Finished(result)),
            Err(err) => {
                warn!("ignoring malformed result record: {err}");
                None
            }
        };
    }

    let caps = SEGMENT_END.captures(trimmed)?;
    let seconds = clock_seconds(caps.get(1).map(|m| m.as_str()), &caps[2], &caps[3])?
        + caps[4].parse::<f64>().ok()? / 1000.0;
    let event = if ctx.total_duration > 0.0 {
        ProgressEvent::percent("transcribing", percent_of(seconds, ctx.total_duration, 99.0))
    } else {
        ProgressEvent::indeterminate("transcribing")
    };
    Some(LineEvent::Progress(event))
}

/// `h*3600 + m*60 + s`; an absent hours field counts as zero.
pub fn clock_seconds(hours: Option<&str>, minutes: &str, seconds: &str) -> Option<f64> {
    let h: f64 = match hours {
        Some(h) => h.parse().ok()?,
        None => 0.0,
    };
    let m: f64 = minutes.parse().ok()?;
    let s: f64 = seconds.parse().ok()?;
    Some(h * 3600.0 + m * 60.0 + s)
}

fn percent_of(elapsed: f64, total: f64, cap: f64) -> f64 {
    (100.0 * elapsed / total).clamp(0.0, cap)
}

fn parse_percent(raw: &str) -> f64 {
    raw.trim()
        .trim_end_matches('%')
        .trim()
        .parse::<f64>()
        .map(|p| p.clamp(0.0, 100.0))
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(total: f64) -> ParseContext {
        ParseContext {
            total_duration: total,
        }
    }

    fn percent(event: Option<LineEvent>) -> Option<f64> {
        match event {
            Some(LineEvent::Progress(ev)) => ev.percent,
            other => panic!("expected progress, got {other:?}"),
        }
    }

    #[test]
    fn transcode_time_maps_to_percent() {
        let line = "size=     512kB time=00:00:26.56 bitrate= 157.9kbits/s speed=53.1x";
        let p = percent(parse_transcode_line(line, &ctx(100.0))).unwrap();
        assert!((p - 26.56).abs() < 1e-9);
    }

    #[test]
    fn transcode_percent_is_capped_and_monotonic() {
        let total = 90.0;
        let mut last = -1.0;
        for secs in [0, 1, 30, 45, 89, 90, 91, 200] {
            let line = format!(
                "time={:02}:{:02}:{:02}.00",
                secs / 3600,
                (secs / 60) % 60,
                secs % 60
            );
            let p = percent(parse_transcode_line(&line, &ctx(total))).unwrap();
            let expected = (100.0 * secs as f64 / total).min(100.0);
            assert!((p - expected).abs() < 1e-9, "{line}: {p} != {expected}");
            assert!(p >= last);
            last = p;
        }
    }

    #[test]
    fn transcode_without_duration_is_indeterminate() {
        let event = parse_transcode_line("time=01:02:03.45", &ctx(0.0));
        assert_eq!(percent(event), None);
    }

    #[test]
    fn transcode_chatter_is_ignored() {
        assert_eq!(parse_transcode_line("Stream #0:0: Audio: aac", &ctx(10.0)), None);
        assert_eq!(parse_transcode_line("time=N/A bitrate=N/A", &ctx(10.0)), None);
    }

    #[test]
    fn download_hook_line() {
        let event = parse_download_line("__progress__|downloading| 42.0%|1.21MiB/s");
        match event {
            Some(LineEvent::Progress(ev)) => {
                assert_eq!(ev.stage, "downloading");
                assert_eq!(ev.percent, Some(42.0));
                assert_eq!(ev.detail.as_deref(), Some("1.21MiB/s"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn download_bad_percent_defaults_to_zero() {
        let p = percent(parse_download_line("__progress__|downloading|Unknown%|NA"));
        assert_eq!(p, Some(0.0));
    }

    #[test]
    fn download_strips_color_codes() {
        let p = percent(parse_download_line(
            "__progress__|downloading|\x1b[0;94m 12.5%\x1b[0m|\x1b[0;32m2MiB/s\x1b[0m",
        ));
        assert_eq!(p, Some(12.5));
    }

    #[test]
    fn download_finished_is_exactly_hundred() {
        let p = percent(parse_download_line("__progress__|finished|37.0%|"));
        assert_eq!(p, Some(100.0));
    }

    #[test]
    fn download_output_path() {
        assert_eq!(
            parse_download_line("__output__|/home/u/Downloads/Clip.mp4"),
            Some(LineEvent::Output(PathBuf::from("/home/u/Downloads/Clip.mp4")))
        );
        assert_eq!(parse_download_line("[youtube] abc: Downloading webpage"), None);
    }

    #[test]
    fn transcription_duration_then_segment() {
        assert_eq!(
            parse_transcription_line("DURATION: 120.0", &ctx(0.0)),
            Some(LineEvent::Duration(120.0))
        );
        let p = percent(parse_transcription_line(
            "[00:00:30.000 --> 00:01:00.000]  hello there",
            &ctx(120.0),
        ));
        assert_eq!(p, Some(50.0));
    }

    #[test]
    fn transcription_duration_consumed_once() {
        assert_eq!(parse_transcription_line("DURATION: 60", &ctx(120.0)), None);
    }

    #[test]
    fn transcription_hours_optional_and_capped() {
        let p = percent(parse_transcription_line(
            "[00:10.000 --> 00:30.500] short form",
            &ctx(61.0),
        ));
        assert_eq!(p, Some(50.0));

        let p = percent(parse_transcription_line(
            "[01:00.000 --> 01:30.000] past the end",
            &ctx(60.0),
        ));
        assert_eq!(p, Some(99.0));
    }

    #[test]
    fn result_takes_priority_over_timestamps() {
        let line = r#"RESULT: {"success":true,"message":"[00:00.000 --> 00:59.000]","output_path":"a.srt"}"#;
        match parse_transcription_line(line, &ctx(60.0)) {
            Some(LineEvent::Finished(result)) => {
                assert!(result.success);
                assert_eq!(result.output_path, Some(PathBuf::from("a.srt")));
            }
            other => panic!("expected terminal result, got {other:?}"),
        }
    }

    #[test]
    fn malformed_result_is_dropped() {
        let line = "RESULT: {'success': True, 'message': '--> 00:59.000'}";
        assert_eq!(parse_transcription_line(line, &ctx(60.0)), None);
    }

    #[test]
    fn dialect_for_kind() {
        assert_eq!(Dialect::for_kind(ToolKind::Download), Dialect::Download);
        assert!(Dialect::Transcription.needs_result());
        assert!(!Dialect::Transcode.needs_result());
    }
}
