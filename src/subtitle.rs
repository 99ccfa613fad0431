//! Transcript files. Subtitle timings are truncated to whole seconds.

use crate::parser::clock_seconds;
use clap::ValueEnum;
use regex::Regex;
use std::fmt::Write as _;
use std::sync::LazyLock;

static SEGMENT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[(?:(\d{1,2}):)?(\d{2}):(\d{2}[.,]\d{3})\s*-->\s*(?:(\d{1,2}):)?(\d{2}):(\d{2}[.,]\d{3})\]\s*(.*)$",
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TranscriptFormat {
    Txt,
    Srt,
    Vtt,
}

impl TranscriptFormat {
    pub fn extension(self) -> &'static str {
        match self {
            TranscriptFormat::Txt => "txt",
            TranscriptFormat::Srt => "srt",
            TranscriptFormat::Vtt => "vtt",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "txt" => Some(TranscriptFormat::Txt),
            "srt" => Some(TranscriptFormat::Srt),
            "vtt" => Some(TranscriptFormat::Vtt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Parse a verbose engine line such as `[00:01.000 --> 00:04.500]  Hello`.
pub fn parse_segment_line(line: &str) -> Option<Segment> {
    let caps = SEGMENT_LINE.captures(line.trim())?;
    let start = clock_seconds(
        caps.get(1).map(|m| m.as_str()),
        &caps[2],
        &caps[3].replace(',', "."),
    )?;
    let end = clock_seconds(
        caps.get(4).map(|m| m.as_str()),
        &caps[5],
        &caps[6].replace(',', "."),
    )?;
    Some(Segment {
        start,
        end,
        text: caps[7].trim().to_string(),
    })
}

pub fn render(format: TranscriptFormat, segments: &[Segment]) -> String {
    match format {
        TranscriptFormat::Txt => render_txt(segments),
        TranscriptFormat::Srt => render_srt(segments),
        TranscriptFormat::Vtt => render_vtt(segments),
    }
}

pub fn render_txt(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| s.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn render_srt(segments: &[Segment]) -> String {
    let mut out = String::new();
    for (i, seg) in segments.iter().enumerate() {
        let _ = write!(
            out,
            "{}\n{},000 --> {},000\n{}\n\n",
            i + 1,
            whole_seconds(seg.start),
            whole_seconds(seg.end),
            seg.text.trim()
        );
    }
    out
}

pub fn render_vtt(segments: &[Segment]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for seg in segments {
        let _ = write!(
            out,
            "{}.000 --> {}.000\n{}\n\n",
            whole_seconds(seg.start),
            whole_seconds(seg.end),
            seg.text.trim()
        );
    }
    out
}

/// `HH:MM:SS` with the fraction dropped.
fn whole_seconds(seconds: f64) -> String {
    let total = seconds.max(0.0).trunc() as u64;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total / 60) % 60,
        total % 60
    )
}
