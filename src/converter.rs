use crate::controller::{JobController, JobHandle};
use crate::job::{Job, JobInput, JobResult, ToolKind};
use crate::probe::FfprobeDuration;
use crate::process::ToolCommand;
use crate::tools::Tools;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ConvertRequest {
    pub input: PathBuf,
    pub format: String,
    pub bitrate: String,
}

/// `<dir>/<stem>.<format>` next to the input.
pub fn output_path_for(input: &Path, format: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or("output");
    let parent = input.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}.{format}"))
}

/// Audio-only extraction at a fixed bitrate, overwriting the target.
pub fn build_command(ffmpeg: &Path, input: &Path, output: &Path, bitrate: &str) -> ToolCommand {
    ToolCommand::new(ffmpeg)
        .arg("-hide_banner")
        .arg("-i")
        .arg(input)
        .arg("-vn")
        .arg("-y")
        .args(["-b:a", bitrate])
        .arg(output)
}

/// Controller for a conversion, or the immediate failure if the request
/// cannot start.
pub fn prepare(tools: &Tools, request: &ConvertRequest) -> Result<JobController, JobResult> {
    if !request.input.exists() {
        return Err(JobResult::failed("input file does not exist"));
    }
    let output = output_path_for(&request.input, &request.format);
    let command = build_command(&tools.ffmpeg, &request.input, &output, &request.bitrate);
    let job = Job::new(JobInput::File(request.input.clone()), ToolKind::Transcode)
        .option("format", &request.format)
        .option("bitrate", &request.bitrate)
        .with_output(output);
    Ok(JobController::new(job, command).with_probe(FfprobeDuration::new(&tools.ffprobe)))
}

pub fn start(tools: &Tools, request: &ConvertRequest) -> JobHandle {
    match prepare(tools, request) {
        Ok(controller) => controller.spawn(),
        Err(result) => JobHandle::finished(result),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobState;

    fn tools() -> Tools {
        Tools {
            ffmpeg: PathBuf::from("/no/such/ffmpeg"),
            ffprobe: PathBuf::from("/no/such/ffprobe"),
            yt_dlp: PathBuf::from("yt-dlp"),
            whisper: PathBuf::from("whisper"),
        }
    }

    #[test]
    fn output_lands_next_to_input() {
        let out = output_path_for(Path::new("/media/clips/talk.final.mkv"), "mp3");
        assert_eq!(out, PathBuf::from("/media/clips/talk.final.mp3"));
    }

    #[test]
    fn command_extracts_audio_and_overwrites() {
        let cmd = build_command(
            Path::new("ffmpeg"),
            Path::new("in.mp4"),
            Path::new("in.mp3"),
            "192k",
        );
        assert_eq!(cmd.to_string(), "ffmpeg -hide_banner -i in.mp4 -vn -y -b:a 192k in.mp3");
    }

    #[test]
    fn missing_input_fails_without_spawning() {
        let request = ConvertRequest {
            input: PathBuf::from("/definitely/missing/input.mp4"),
            format: "mp3".into(),
            bitrate: "192k".into(),
        };
        let (state, result) = start(&tools(), &request).wait(|_| panic!("no progress expected"));
        assert_eq!(state, JobState::Failed);
        assert_eq!(result, JobResult::failed("input file does not exist"));
    }

    #[test]
    fn existing_input_with_missing_ffmpeg_is_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"not really a video").unwrap();
        let request = ConvertRequest {
            input,
            format: "wav".into(),
            bitrate: "128k".into(),
        };
        let (state, result) = start(&tools(), &request).wait(|_| {});
        assert_eq!(state, JobState::Failed);
        assert!(result.message.contains("/no/such/ffmpeg"), "{}", result.message);
    }
}
