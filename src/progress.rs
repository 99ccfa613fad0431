use crate::controller::JobHandle;
use crate::job::{CancellationToken, JobResult, JobState, ProgressEvent, ToolKind};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, BufRead, IsTerminal};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

const BAR_TEMPLATE: &str =
    "[{elapsed_precise}]  [{bar:50.cyan/bright-black}] {percent:>3}%  ETA:{eta_precise}\n{wide_msg}";

/// Spinner plus bar. Determinate events move the bar; indeterminate ones
/// only update the spinner text.
pub struct ProgressUi {
    _multi: MultiProgress,
    spinner: ProgressBar,
    bar: ProgressBar,
}

impl ProgressUi {
    pub fn new(kind: ToolKind) -> Self {
        Self::with_target(kind, ProgressDrawTarget::stderr())
    }

    #[cfg(test)]
    fn hidden(kind: ToolKind) -> Self {
        Self::with_target(kind, ProgressDrawTarget::hidden())
    }

    fn with_target(kind: ToolKind, target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(target);

        let spinner = multi.add(ProgressBar::new_spinner());
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["-", "\\", "|", "/", "-"]),
        );
        spinner.set_message(format!("Starting {}...", kind.label()));

        let bar = multi.add(ProgressBar::new(100));
        bar.set_style(
            ProgressStyle::with_template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        if io::stdin().is_terminal() {
            bar.set_message("type q + Enter to cancel");
        }

        Self {
            _multi: multi,
            spinner,
            bar,
        }
    }

    pub fn update(&self, event: &ProgressEvent) {
        let text = match &event.detail {
            Some(detail) => format!("{} ({detail})", event.stage),
            None => event.stage.clone(),
        };
        if let Some(pct) = event.percent {
            self.bar.set_position(pct.clamp(0.0, 100.0).round() as u64);
        }
        self.spinner.set_message(text);
    }

    pub fn finish(&self, state: JobState, result: &JobResult) {
        match state {
            JobState::Completed => {
                self.bar.set_position(100);
                self.bar.finish_with_message("Done");
                self.spinner.finish_with_message(result.message.clone());
            }
            _ => {
                self.bar.abandon();
                self.spinner.abandon_with_message(result.message.clone());
            }
        }
    }

    #[cfg(test)]
    fn position(&self) -> u64 {
        self.bar.position()
    }
}

/// Drain a job's updates into a progress display on this thread and return
/// its final state. A `q` typed on an interactive stdin cancels the job.
pub fn render_job(handle: JobHandle, kind: ToolKind) -> (JobState, JobResult) {
    if io::stdin().is_terminal() {
        watch_for_quit(handle.token());
    }
    let ui = ProgressUi::new(kind);
    let (state, result) = handle.wait(|event| ui.update(event));
    ui.finish(state, &result);
    info!(?state, message = %result.message, "{kind} ended");
    (state, result)
}

fn watch_for_quit(token: CancellationToken) {
    let spawned = thread::Builder::new()
        .name("quit-watcher".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if token.is_cancelled() {
                    break;
                }
                if line.trim().eq_ignore_ascii_case("q") {
                    token.cancel();
                    break;
                }
            }
        });
    if let Err(err) = spawned {
        debug!("no quit watcher: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn determinate_events_move_the_bar() {
        let ui = ProgressUi::hidden(ToolKind::Transcode);
        ui.update(&ProgressEvent::percent("converting", 42.4));
        assert_eq!(ui.position(), 42);
        ui.update(&ProgressEvent::indeterminate("converting"));
        assert_eq!(ui.position(), 42);
        ui.update(&ProgressEvent::percent("downloading", 180.0).with_detail("2MiB/s"));
        assert_eq!(ui.position(), 100);
    }

    #[test]
    fn completion_fills_the_bar() {
        let ui = ProgressUi::hidden(ToolKind::Download);
        ui.update(&ProgressEvent::percent("downloading", 12.0));
        ui.finish(
            JobState::Completed,
            &JobResult::succeeded("download finished", None),
        );
        assert_eq!(ui.position(), 100);
    }
}
