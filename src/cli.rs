use crate::config::{AUDIO_FORMATS, validate_bitrate, validate_model};
use crate::subtitle::TranscriptFormat;
use crate::transcriber::Device;
use crate::worker::WorkerOptions;
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint, builder::PossibleValuesParser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "media-toolbox",
    version,
    about = "Convert audio, download videos and transcribe speech with live progress"
)]
pub struct Cli {
    /// Settings file (default: <config dir>/media-toolbox/config.toml)
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,

    /// Also append logs to this file
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    pub log_file: Option<PathBuf>,

    /// Path to ffmpeg binary (overrides config and PATH lookup)
    #[arg(long, global = true, value_hint = ValueHint::ExecutablePath)]
    pub ffmpeg: Option<PathBuf>,

    /// Path to ffprobe binary (overrides config and PATH lookup)
    #[arg(long, global = true, value_hint = ValueHint::ExecutablePath)]
    pub ffprobe: Option<PathBuf>,

    /// Path to yt-dlp binary (overrides config and PATH lookup)
    #[arg(long = "yt-dlp", global = true, value_hint = ValueHint::ExecutablePath)]
    pub yt_dlp: Option<PathBuf>,

    /// Path to the whisper CLI (overrides config and PATH lookup)
    #[arg(long, global = true, value_hint = ValueHint::ExecutablePath)]
    pub whisper: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract the audio track of a media file
    Convert(ConvertArgs),
    /// List the title and downloadable qualities of a URL
    Info(InfoArgs),
    /// Download a video or playlist
    Download(DownloadArgs),
    /// Transcribe speech to a text or subtitle file
    Transcribe(TranscribeArgs),
    /// Choose a tool and its options with prompts
    Interactive,
    #[command(name = "transcribe-worker", hide = true)]
    TranscribeWorker(WorkerArgs),
}

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Input media file
    #[arg(value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    /// Target audio format (default from config, else mp3)
    #[arg(short, long, value_parser = PossibleValuesParser::new(AUDIO_FORMATS.iter().copied()))]
    pub format: Option<String>,

    /// Audio bitrate such as 192k (default from config)
    #[arg(short, long, value_parser = validate_bitrate)]
    pub bitrate: Option<String>,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    pub url: String,

    /// Netscape cookie file passed to yt-dlp when it exists
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub cookies: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    pub url: String,

    /// Destination directory (default from config, else ~/Downloads)
    #[arg(short, long, value_hint = ValueHint::DirPath)]
    pub output_dir: Option<PathBuf>,

    /// yt-dlp format selector, e.g. an id listed by `info`
    #[arg(short, long)]
    pub format: Option<String>,

    /// Netscape cookie file passed to yt-dlp when it exists
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub cookies: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct TranscribeArgs {
    /// Input audio or video file
    #[arg(value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    /// Whisper model (default from config, else base)
    #[arg(short, long, value_parser = validate_model)]
    pub model: Option<String>,

    /// Transcript format (default from config, else txt)
    #[arg(short, long, value_enum)]
    pub format: Option<TranscriptFormat>,

    /// Never use the GPU even if one is available
    #[arg(long, action = ArgAction::SetTrue)]
    pub cpu: bool,
}

#[derive(Args, Debug)]
pub struct WorkerArgs {
    #[arg(long)]
    pub input: PathBuf,
    #[arg(long)]
    pub model: String,
    #[arg(long, value_enum)]
    pub device: Device,
    #[arg(long, value_enum)]
    pub format: TranscriptFormat,
    #[arg(long)]
    pub engine: PathBuf,
}

impl WorkerArgs {
    /// The probe path travels in the global `--ffprobe` flag.
    pub fn into_options(self, ffprobe: PathBuf) -> WorkerOptions {
        WorkerOptions {
            input: self.input,
            model: self.model,
            device: self.device,
            format: self.format,
            engine: self.engine,
            ffprobe,
        }
    }
}
