//! Child side of a transcription job. Everything written to stdout here is
//! read back by the transcription dialect in the parent.

use crate::controller::diagnostic;
use crate::error::ToolError;
use crate::job::{JobResult, ToolKind};
use crate::probe::FfprobeDuration;
use crate::process::{ProcessHandle, ToolCommand};
use crate::sentinel::{encode_duration, encode_result};
use crate::subtitle::{self, TranscriptFormat};
use crate::transcriber::Device;
use std::collections::VecDeque;
use std::ffi::OsStr;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
#[cfg(unix)]
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

const TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub input: PathBuf,
    pub model: String,
    pub device: Device,
    pub format: TranscriptFormat,
    pub engine: PathBuf,
    pub ffprobe: PathBuf,
}

/// Run one transcription and report it on stdout. Returns the process exit
/// code: 0 only when the transcript was written.
pub fn run(options: &WorkerOptions) -> i32 {
    defer_termination();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let result = match transcribe(options, &mut out) {
        Ok(path) => JobResult::succeeded(ToolKind::Transcribe.success_message(), Some(path)),
        Err(err) => {
            warn!("transcription failed: {err}");
            JobResult::failed(err.to_string())
        }
    };
    let code = if result.success { 0 } else { 1 };

    match encode_result(&result) {
        Ok(line) => {
            if writeln!(out, "{line}").and_then(|_| out.flush()).is_err() {
                return 1;
            }
            code
        }
        Err(err) => {
            warn!("cannot encode result: {err}");
            1
        }
    }
}

#[cfg(unix)]
static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_terminate(_signal: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}

/// A stop from the parent hits the whole group. The engine dies from it, and
/// the worker lives on just long enough to reap it and drop its scratch dir.
#[cfg(unix)]
fn defer_termination() {
    let handler = on_terminate as extern "C" fn(libc::c_int);
    // SAFETY: the handler only stores to an atomic, which is signal safe.
    unsafe {
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }
}

#[cfg(not(unix))]
fn defer_termination() {}

fn stop_requested() -> bool {
    #[cfg(unix)]
    {
        STOP_REQUESTED.load(Ordering::SeqCst)
    }
    #[cfg(not(unix))]
    {
        false
    }
}

pub fn transcript_path(input: &Path, format: TranscriptFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or("transcript");
    input
        .parent()
        .unwrap_or(Path::new("."))
        .join(format!("{stem}.{}", format.extension()))
}

pub fn engine_command(options: &WorkerOptions, output_dir: &Path) -> ToolCommand {
    let cmd = ToolCommand::new(&options.engine)
        .arg(&options.input)
        .args(["--model", options.model.as_str()])
        .args(["--device", options.device.as_str()])
        .args(["--verbose", "True"])
        .arg("--output_dir")
        .arg(output_dir)
        .args(["--output_format", "txt"])
        .env("PYTHONUNBUFFERED", "1")
        .in_caller_group();
    match options.device {
        Device::Cpu => cmd.args(["--fp16", "False"]),
        Device::Cuda => cmd,
    }
}

fn transcribe(options: &WorkerOptions, out: &mut impl Write) -> Result<PathBuf, ToolError> {
    if !options.input.exists() {
        return Err(ToolError::ToolExit {
            code: None,
            message: "input file does not exist".into(),
        });
    }

    match FfprobeDuration::new(&options.ffprobe).probe(&options.input) {
        Ok(seconds) if seconds > 0.0 => {
            writeln!(out, "{}", encode_duration(seconds))?;
            out.flush()?;
        }
        Ok(_) => debug!("duration unknown, progress will be indeterminate"),
        Err(err) => warn!("{err}"),
    }

    if stop_requested() {
        return Err(ToolError::Cancelled);
    }
    let scratch = tempfile::tempdir()?;
    let command = engine_command(options, scratch.path());
    let mut engine = ProcessHandle::start(&command)?;
    let lines = engine.take_lines();

    let mut segments = Vec::new();
    let mut tail = VecDeque::with_capacity(TAIL_LINES);
    for line in lines.into_iter().flatten() {
        let line = line?;
        writeln!(out, "{line}")?;
        out.flush()?;
        if let Some(segment) = subtitle::parse_segment_line(&line) {
            segments.push(segment);
        }
        if tail.len() == TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    match engine.wait()? {
        Some(0) => {}
        code => {
            let failed = ToolKind::Transcribe.failure_message();
            let message = diagnostic(&tail).unwrap_or_else(|| match code {
                Some(code) => format!("{failed} (exit code {code})"),
                None => format!("{failed} (terminated by signal)"),
            });
            return Err(ToolError::ToolExit { code, message });
        }
    }

    let target = transcript_path(&options.input, options.format);
    let body = match options.format {
        TranscriptFormat::Txt => engine_text(scratch.path(), &options.input)
            .unwrap_or_else(|| subtitle::render_txt(&segments)),
        format => subtitle::render(format, &segments),
    };
    fs::write(&target, body)?;
    debug!(path = %target.display(), segments = segments.len(), "transcript written");
    Ok(target)
}

/// Plain text the engine wrote itself, if any.
fn engine_text(dir: &Path, input: &Path) -> Option<String> {
    let stem = input.file_stem()?;
    let mut name = stem.to_os_string();
    name.push(".txt");
    fs::read_to_string(dir.join(name)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(input: PathBuf, engine: PathBuf, format: TranscriptFormat) -> WorkerOptions {
        WorkerOptions {
            input,
            model: "tiny".into(),
            device: Device::Cpu,
            format,
            engine,
            ffprobe: PathBuf::from("/no/such/ffprobe"),
        }
    }

    #[test]
    fn transcript_sits_next_to_input() {
        assert_eq!(
            transcript_path(Path::new("/rec/standup.m4a"), TranscriptFormat::Vtt),
            PathBuf::from("/rec/standup.vtt")
        );
    }

    #[test]
    fn cpu_runs_disable_fp16() {
        let opts = options("a.wav".into(), "whisper".into(), TranscriptFormat::Txt);
        let cmd = engine_command(&opts, Path::new("/tmp/out"));
        assert_eq!(
            cmd.to_string(),
            "whisper a.wav --model tiny --device cpu --verbose True --output_dir /tmp/out \
             --output_format txt --fp16 False"
        );
        let gpu = WorkerOptions {
            device: Device::Cuda,
            ..opts
        };
        assert!(!engine_command(&gpu, Path::new("/tmp/out")).to_string().contains("fp16"));
    }

    /// The "media" file is a shell script and `sh` plays the engine, so it
    /// runs with the usual engine arguments appended.
    #[cfg(unix)]
    fn scripted_input(dir: &Path, script: &str) -> PathBuf {
        let path = dir.join("talk.wav");
        fs::write(&path, format!("{script}\n")).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn writes_srt_from_relayed_segments() {
        let dir = tempfile::tempdir().unwrap();
        let input = scripted_input(
            dir.path(),
            "echo 'Detecting language: English'\n\
             echo '[00:00.000 --> 00:02.500]  Good morning.'\n\
             echo '[00:02.500 --> 00:05.000]  Let us begin.'",
        );
        let opts = options(input, "sh".into(), TranscriptFormat::Srt);

        let mut out = Vec::new();
        let path = transcribe(&opts, &mut out).unwrap();
        assert_eq!(path, dir.path().join("talk.srt"));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "1\n00:00:00,000 --> 00:00:02,000\nGood morning.\n\n\
             2\n00:00:02,000 --> 00:00:05,000\nLet us begin.\n\n"
        );
        let relayed = String::from_utf8(out).unwrap();
        assert!(relayed.contains("Detecting language: English"));
        assert!(!relayed.contains("DURATION:"));
    }

    #[cfg(unix)]
    #[test]
    fn engine_failure_uses_its_error_line() {
        let dir = tempfile::tempdir().unwrap();
        let input = scripted_input(dir.path(), "echo 'RuntimeError: CUDA out of memory' >&2\nexit 1");
        let opts = options(input, "sh".into(), TranscriptFormat::Txt);

        let err = transcribe(&opts, &mut Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), "RuntimeError: CUDA out of memory");
        assert!(!dir.path().join("talk.txt").exists());
    }

    #[test]
    fn missing_input_fails_before_engine() {
        let opts = options(
            "/no/such/file.wav".into(),
            "/no/such/engine".into(),
            TranscriptFormat::Txt,
        );
        let err = transcribe(&opts, &mut Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), "input file does not exist");
    }
}
