use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Transcode,
    Download,
    Transcribe,
}

impl ToolKind {
    pub fn label(self) -> &'static str {
        match self {
            ToolKind::Transcode => "conversion",
            ToolKind::Download => "download",
            ToolKind::Transcribe => "transcription",
        }
    }

    pub fn success_message(self) -> String {
        format!("{} finished", self.label())
    }

    pub fn failure_message(self) -> String {
        format!("{} failed", self.label())
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a job reads from: a local media file or a remote page.
#[derive(Debug, Clone, PartialEq)]
pub enum JobInput {
    File(PathBuf),
    Url(String),
}

impl fmt::Display for JobInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobInput::File(path) => write!(f, "{}", path.display()),
            JobInput::Url(url) => f.write_str(url),
        }
    }
}

/// One execution request. Immutable once handed to a controller.
#[derive(Debug, Clone)]
pub struct Job {
    pub input: JobInput,
    pub kind: ToolKind,
    pub options: BTreeMap<String, String>,
    /// Zero or `None` means unknown; the controller may probe for it.
    pub total_duration_seconds: Option<f64>,
    /// Output location when it is known before the tool runs.
    pub output_path: Option<PathBuf>,
}

impl Job {
    pub fn new(input: JobInput, kind: ToolKind) -> Self {
        Self {
            input,
            kind,
            options: BTreeMap::new(),
            total_duration_seconds: None,
            output_path: None,
        }
    }

    pub fn option(mut self, key: &str, value: impl Into<String>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    pub fn with_output(mut self, path: PathBuf) -> Self {
        self.output_path = Some(path);
        self
    }
}

/// Shared stop flag. Once set it stays set; make a fresh one per job.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only for the call that actually flipped the flag.
    pub fn cancel(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub stage: String,
    /// `None` is indeterminate progress.
    pub percent: Option<f64>,
    /// Free-form detail such as transfer speed.
    pub detail: Option<String>,
}

impl ProgressEvent {
    pub fn percent(stage: impl Into<String>, percent: f64) -> Self {
        Self {
            stage: stage.into(),
            percent: Some(percent),
            detail: None,
        }
    }

    pub fn indeterminate(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            percent: None,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Terminal outcome of a job. Also the wire shape of the `RESULT:` sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

impl JobResult {
    pub fn succeeded(message: impl Into<String>, output_path: Option<PathBuf>) -> Self {
        Self {
            success: true,
            message: message.into(),
            output_path,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            output_path: None,
        }
    }

    pub fn cancelled() -> Self {
        Self::failed("cancelled")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Probing,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

/// What the worker pushes to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    Progress(ProgressEvent),
    Finished { state: JobState, result: JobResult },
}
