use crate::config::Settings;
use crate::converter::{self, ConvertRequest};
use crate::downloader::{self, DownloadRequest};
use crate::job::{JobResult, JobState, ToolKind};
use crate::progress::render_job;
use crate::tools::Tools;
use crate::transcriber::{self, Models, TranscribeRequest};

/// One job the user asked for.
#[derive(Debug, Clone)]
pub enum Action {
    Convert(ConvertRequest),
    Download(DownloadRequest),
    Transcribe(TranscribeRequest),
}

impl Action {
    pub fn kind(&self) -> ToolKind {
        match self {
            Action::Convert(_) => ToolKind::Transcode,
            Action::Download(_) => ToolKind::Download,
            Action::Transcribe(_) => ToolKind::Transcribe,
        }
    }
}

/// Application root: settings, resolved tool paths and the loaded-model
/// cache, which lives as long as the toolbox does.
pub struct Toolbox {
    pub settings: Settings,
    pub tools: Tools,
    models: Models,
}

impl Toolbox {
    pub fn new(settings: Settings, tools: Tools) -> Self {
        Self {
            settings,
            tools,
            models: Models::new(),
        }
    }

    pub fn models(&self) -> &Models {
        &self.models
    }

    /// Start the job and render it until it ends.
    pub fn run(&self, action: Action) -> (JobState, JobResult) {
        let kind = action.kind();
        let handle = match &action {
            Action::Convert(req) => converter::start(&self.tools, req),
            Action::Download(req) => downloader::start(&self.tools, req),
            Action::Transcribe(req) => transcriber::start(&self.tools, self.models(), req),
        };
        render_job(handle, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolPaths;
    use crate::subtitle::TranscriptFormat;
    use std::path::PathBuf;

    #[test]
    fn rejected_requests_end_failed() {
        let toolbox = Toolbox::new(Settings::default(), Tools::resolve(&ToolPaths::default()));
        let (state, result) = toolbox.run(Action::Transcribe(TranscribeRequest {
            input: PathBuf::from("/no/such/meeting.mp3"),
            model: "base".into(),
            format: TranscriptFormat::Srt,
            use_gpu: false,
        }));
        assert_eq!(state, JobState::Failed);
        assert_eq!(result.message, "input file does not exist");
        assert_eq!(toolbox.models().len(), 0);
    }

    #[test]
    fn action_kinds() {
        let convert = Action::Convert(ConvertRequest {
            input: PathBuf::from("a.mp4"),
            format: "mp3".into(),
            bitrate: "192k".into(),
        });
        assert_eq!(convert.kind(), ToolKind::Transcode);
    }
}
