//! Drives one tool run: probe, spawn, feed lines to the dialect, report.
//!
//! `Idle -> Probing -> Running -> {Completed, Failed, Cancelled}`. Exactly
//! one `JobUpdate::Finished` is produced per job.

use crate::error::ToolError;
use crate::job::{
    CancellationToken, Job, JobInput, JobResult, JobState, JobUpdate, ProgressEvent,
};
use crate::parser::{Dialect, LineEvent, ParseContext};
use crate::probe::DurationSource;
use crate::process::{ProcessHandle, ToolCommand};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use tracing::{debug, info, warn};

/// Output lines kept for building a failure message.
const TAIL_LINES: usize = 20;

pub struct JobController {
    job: Job,
    command: ToolCommand,
    dialect: Dialect,
    probe: Option<Box<dyn DurationSource>>,
    token: CancellationToken,
    state: JobState,
    last_percent: Option<f64>,
}

impl JobController {
    pub fn new(job: Job, command: ToolCommand) -> Self {
        let dialect = Dialect::for_kind(job.kind);
        Self {
            job,
            command,
            dialect,
            probe: None,
            token: CancellationToken::new(),
            state: JobState::Idle,
            last_percent: None,
        }
    }

    pub fn with_probe(mut self, probe: impl DurationSource + 'static) -> Self {
        self.probe = Some(Box::new(probe));
        self
    }

    /// The caller's handle for requesting a stop.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Run to completion on the current thread, reporting through `on_update`
    /// in the order lines were read.
    pub fn run(mut self, mut on_update: impl FnMut(JobUpdate)) -> JobResult {
        let (state, result) = self.drive(&mut on_update);
        self.transition(state);
        info!(kind = %self.job.kind, ?state, message = %result.message, "job finished");
        on_update(JobUpdate::Finished {
            state,
            result: result.clone(),
        });
        result
    }

    /// Run on a background worker; updates arrive on the returned handle.
    pub fn spawn(self) -> JobHandle {
        let token = self.token();
        let (tx, rx) = mpsc::channel();
        let fallback = tx.clone();
        let worker = thread::Builder::new()
            .name(format!("{}-job", self.job.kind.label()))
            .spawn(move || {
                self.run(|update| {
                    let _ = tx.send(update);
                });
            });
        if let Err(err) = worker {
            let _ = fallback.send(JobUpdate::Finished {
                state: JobState::Failed,
                result: JobResult::failed(format!("operation failed: {err}")),
            });
        }
        JobHandle { token, updates: rx }
    }

    fn drive(&mut self, on_update: &mut impl FnMut(JobUpdate)) -> (JobState, JobResult) {
        let mut ctx = ParseContext {
            total_duration: self.baseline_duration(),
        };
        self.transition(JobState::Running);

        if self.token.is_cancelled() {
            return (JobState::Cancelled, JobResult::cancelled());
        }

        info!(
            kind = %self.job.kind,
            input = %self.job.input,
            options = ?self.job.options,
            command = %self.command,
            "starting job"
        );
        let mut process = match ProcessHandle::start(&self.command) {
            Ok(process) => process,
            Err(err) => {
                warn!("{err}");
                return (
                    JobState::Failed,
                    JobResult::failed(format!("operation failed: {err}")),
                );
            }
        };
        let Some(lines) = process.take_lines() else {
            return (JobState::Failed, JobResult::failed("operation failed: no output stream"));
        };

        let mut tail: VecDeque<String> = VecDeque::with_capacity(TAIL_LINES);
        let mut verdict: Option<JobResult> = None;
        let mut output: Option<PathBuf> = self.job.output_path.clone();
        let mut read_error: Option<ToolError> = None;

        for line in lines {
            // Once the terminal record is in, a late cancel no longer wins.
            if verdict.is_none() && self.token.is_cancelled() {
                return self.stop(&mut process);
            }
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    read_error = Some(err.into());
                    break;
                }
            };
            if tail.len() == TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.clone());

            // Nothing after the terminal record counts as progress.
            if verdict.is_some() {
                continue;
            }

            match self.dialect.parse_line(&line, &ctx) {
                Some(LineEvent::Progress(event)) => {
                    if self.token.is_cancelled() {
                        return self.stop(&mut process);
                    }
                    on_update(JobUpdate::Progress(self.clamp(event)));
                }
                Some(LineEvent::Duration(seconds)) => {
                    debug!(seconds, "tool announced duration");
                    ctx.total_duration = seconds;
                    on_update(JobUpdate::Progress(
                        self.clamp(ProgressEvent::indeterminate(self.job.kind.label())),
                    ));
                }
                Some(LineEvent::Output(path)) => output = Some(path),
                Some(LineEvent::Finished(result)) => verdict = Some(result),
                None => {}
            }
        }

        if verdict.is_none() && self.token.is_cancelled() {
            return self.stop(&mut process);
        }
        if let Some(err) = read_error {
            process.terminate();
            let _ = process.wait();
            return (
                JobState::Failed,
                JobResult::failed(format!("operation failed: {err}")),
            );
        }

        let code = match process.wait() {
            Ok(code) => code,
            Err(err) => {
                return (
                    JobState::Failed,
                    JobResult::failed(format!("operation failed: {err}")),
                );
            }
        };
        self.settle(code, verdict, output, &tail)
    }

    fn settle(
        &self,
        code: Option<i32>,
        verdict: Option<JobResult>,
        output: Option<PathBuf>,
        tail: &VecDeque<String>,
    ) -> (JobState, JobResult) {
        let kind = self.job.kind;
        match (code, verdict) {
            (Some(0), Some(result)) if result.success => (JobState::Completed, result),
            (Some(0), None) if !self.dialect.needs_result() => (
                JobState::Completed,
                JobResult::succeeded(kind.success_message(), output),
            ),
            (_, Some(result)) if !result.success => (JobState::Failed, result),
            (Some(0), _) => (
                JobState::Failed,
                JobResult::failed(format!("{}: no result reported", kind.failure_message())),
            ),
            (code, _) => {
                let message = diagnostic(tail).unwrap_or_else(|| match code {
                    Some(code) => format!("{} (exit code {code})", kind.failure_message()),
                    None => format!("{} (terminated by signal)", kind.failure_message()),
                });
                (
                    JobState::Failed,
                    JobResult::from(ToolError::ToolExit { code, message }),
                )
            }
        }
    }

    fn stop(&mut self, process: &mut ProcessHandle) -> (JobState, JobResult) {
        info!(pid = process.id(), "cancellation requested, stopping tool");
        process.terminate();
        if let Err(err) = process.wait() {
            warn!("failed to reap cancelled process: {err}");
        }
        (JobState::Cancelled, JobResult::from(ToolError::Cancelled))
    }

    fn baseline_duration(&mut self) -> f64 {
        if let Some(seconds) = self.job.total_duration_seconds.filter(|s| *s > 0.0) {
            return seconds;
        }
        let path = match &self.job.input {
            JobInput::File(path) => path.clone(),
            JobInput::Url(_) => return 0.0,
        };
        let Some(probe) = self.probe.take() else {
            return 0.0;
        };
        self.transition(JobState::Probing);
        probe.duration_of(&path).max(0.0)
    }

    /// Never report a lower percent than already shown.
    fn clamp(&mut self, mut event: ProgressEvent) -> ProgressEvent {
        event.percent = match (event.percent, self.last_percent) {
            (Some(new), Some(last)) => Some(new.clamp(0.0, 100.0).max(last)),
            (Some(new), None) => Some(new.clamp(0.0, 100.0)),
            (None, last) => last,
        };
        if event.percent.is_some() {
            self.last_percent = event.percent;
        }
        event
    }

    fn transition(&mut self, next: JobState) {
        debug_assert!(
            !self.state.is_terminal(),
            "job left terminal state {:?}",
            self.state
        );
        debug!(from = ?self.state, to = ?next, "job state");
        self.state = next;
    }
}

impl From<ToolError> for JobResult {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::Cancelled => JobResult::cancelled(),
            ToolError::ToolExit { message, .. } => JobResult::failed(message),
            other => JobResult::failed(format!("operation failed: {other}")),
        }
    }
}

/// Best line to show when a tool fails: the last one that mentions an
/// error, otherwise the last one.
pub fn diagnostic(tail: &VecDeque<String>) -> Option<String> {
    tail.iter()
        .rev()
        .find(|line| line.to_ascii_lowercase().contains("error"))
        .or_else(|| tail.back())
        .map(|line| line.trim().to_string())
}

/// Caller side of a spawned job.
pub struct JobHandle {
    token: CancellationToken,
    updates: Receiver<JobUpdate>,
}

impl JobHandle {
    /// A job that never started; its only update is the given failure.
    pub fn finished(result: JobResult) -> Self {
        let (tx, rx) = mpsc::channel();
        let _ = tx.send(JobUpdate::Finished {
            state: JobState::Failed,
            result,
        });
        Self {
            token: CancellationToken::new(),
            updates: rx,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Drain updates until the terminal one, handing progress to `on_progress`.
    pub fn wait(self, mut on_progress: impl FnMut(&ProgressEvent)) -> (JobState, JobResult) {
        for update in self.updates.iter() {
            match update {
                JobUpdate::Progress(event) => on_progress(&event),
                JobUpdate::Finished { state, result } => return (state, result),
            }
        }
        (
            JobState::Failed,
            JobResult::failed("operation failed: worker exited without a result"),
        )
    }
}
