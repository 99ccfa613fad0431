mod app;
mod cli;
mod config;
mod controller;
mod converter;
mod downloader;
mod error;
mod job;
mod logging;
mod model_cache;
mod parser;
mod probe;
mod process;
mod progress;
mod sentinel;
mod subtitle;
mod tools;
mod transcriber;
mod tui;
mod worker;

use crate::app::{Action, Toolbox};
use crate::cli::{Cli, Command};
use crate::config::{Settings, ToolPaths};
use crate::converter::ConvertRequest;
use crate::downloader::{DownloadRequest, fetch_info};
use crate::job::{JobResult, JobState};
use crate::subtitle::TranscriptFormat;
use crate::tools::{Tools, resolve_bin};
use crate::transcriber::TranscribeRequest;
use anyhow::{Result, bail};
use clap::Parser;
use std::process::exit;
use tracing::debug;

/// Conventional exit status for a run stopped by the user.
const EXIT_CANCELLED: i32 = 130;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Command::TranscribeWorker(args) => {
            logging::init_worker();
            let ffprobe = resolve_bin(cli.ffprobe, "ffprobe");
            exit(worker::run(&args.into_options(ffprobe)));
        }
        command => command,
    };

    let settings = Settings::load(cli.config.as_deref())?;
    let log_file = cli.log_file.clone().or_else(|| settings.log_file.clone());
    logging::init(cli.verbose, log_file.as_deref())?;

    let paths = ToolPaths {
        ffmpeg: cli.ffmpeg.or_else(|| settings.tools.ffmpeg.clone()),
        ffprobe: cli.ffprobe.or_else(|| settings.tools.ffprobe.clone()),
        yt_dlp: cli.yt_dlp.or_else(|| settings.tools.yt_dlp.clone()),
        whisper: cli.whisper.or_else(|| settings.tools.whisper.clone()),
    };
    let tools = Tools::resolve(&paths);
    debug!(?tools, "tools resolved");
    let toolbox = Toolbox::new(settings, tools);

    let action = match command {
        Command::Convert(args) => {
            let defaults = &toolbox.settings.convert;
            Action::Convert(ConvertRequest {
                input: args.input,
                format: args.format.unwrap_or_else(|| defaults.default_format.clone()),
                bitrate: args.bitrate.unwrap_or_else(|| defaults.default_bitrate.clone()),
            })
        }
        Command::Info(args) => {
            let cookies = args
                .cookies
                .or_else(|| toolbox.settings.download.cookie_file.clone());
            return print_info(&toolbox, &args.url, cookies.as_deref());
        }
        Command::Download(args) => {
            let defaults = &toolbox.settings.download;
            Action::Download(DownloadRequest {
                url: args.url,
                output_dir: args.output_dir.unwrap_or_else(|| defaults.output_dir.clone()),
                format: args.format,
                cookie_file: args.cookies.or_else(|| defaults.cookie_file.clone()),
                merge_format: defaults.merge_format.clone(),
            })
        }
        Command::Transcribe(args) => {
            let defaults = &toolbox.settings.transcribe;
            Action::Transcribe(TranscribeRequest {
                input: args.input,
                model: args.model.unwrap_or_else(|| defaults.default_model.clone()),
                format: args
                    .format
                    .or_else(|| TranscriptFormat::from_extension(&defaults.default_format))
                    .unwrap_or(TranscriptFormat::Txt),
                use_gpu: defaults.use_gpu && !args.cpu,
            })
        }
        Command::Interactive => tui::interactive_action(&toolbox)?,
        Command::TranscribeWorker(_) => bail!("transcribe-worker is started by the toolbox itself"),
    };

    let (state, result) = toolbox.run(action);
    report(state, &result)
}

fn print_info(toolbox: &Toolbox, url: &str, cookies: Option<&std::path::Path>) -> Result<()> {
    let info = fetch_info(&toolbox.tools.yt_dlp, url, cookies)?;
    println!("{}", info.title);
    if let Some(duration) = info.duration {
        println!("duration: {duration:.0}s");
    }
    if let Some(thumbnail) = &info.thumbnail {
        println!("thumbnail: {thumbnail}");
    }
    for quality in &info.qualities {
        println!("  {:<28} {}", quality.id, quality.display);
    }
    Ok(())
}

fn report(state: JobState, result: &JobResult) -> Result<()> {
    match exit_code(state) {
        0 => {
            println!("{}", result.message);
            if let Some(path) = &result.output_path {
                println!("{}", path.display());
            }
            Ok(())
        }
        EXIT_CANCELLED => {
            println!("{}", result.message);
            exit(EXIT_CANCELLED);
        }
        _ => bail!("{}", result.message),
    }
}

fn exit_code(state: JobState) -> i32 {
    match state {
        JobState::Completed => 0,
        JobState::Cancelled => EXIT_CANCELLED,
        _ => 1,
    }
}
