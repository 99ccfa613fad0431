use crate::app::{Action, Toolbox};
use crate::config::{
    AUDIO_FORMATS, SUGGESTED_BITRATES, TRANSCRIPT_FORMATS, WHISPER_MODELS, validate_bitrate,
};
use crate::converter::ConvertRequest;
use crate::downloader::{DownloadRequest, fetch_info};
use crate::subtitle::TranscriptFormat;
use crate::transcriber::TranscribeRequest;
use anyhow::Result;
use dialoguer::{Confirm, Input, Select, theme::ColorfulTheme};
use std::path::PathBuf;

const TOOLS: &[&str] = &["Convert audio", "Download video", "Transcribe speech"];

pub fn interactive_action(toolbox: &Toolbox) -> Result<Action> {
    println!("Media Toolbox");
    println!("Press Enter to accept defaults.\n");

    let theme = ColorfulTheme::default();
    let tool = Select::with_theme(&theme)
        .with_prompt("What do you want to do?")
        .items(TOOLS)
        .default(0)
        .interact()?;

    match tool {
        0 => prompt_convert(&theme, toolbox),
        1 => prompt_download(&theme, toolbox),
        _ => prompt_transcribe(&theme, toolbox),
    }
}

fn prompt_convert(theme: &ColorfulTheme, toolbox: &Toolbox) -> Result<Action> {
    let defaults = &toolbox.settings.convert;
    let input = prompt_existing_file(theme, "Input media file")?;
    let format = select_from(theme, "Audio format", AUDIO_FORMATS, &defaults.default_format)?;

    let bitrate = loop {
        let raw: String = Input::with_theme(theme)
            .with_prompt(format!("Bitrate ({})", SUGGESTED_BITRATES.join(", ")))
            .default(defaults.default_bitrate.clone())
            .interact_text()?;
        match validate_bitrate(raw.trim()) {
            Ok(bitrate) => break bitrate,
            Err(err) => println!("Invalid value: {err}."),
        }
    };

    Ok(Action::Convert(ConvertRequest {
        input,
        format,
        bitrate,
    }))
}

fn prompt_download(theme: &ColorfulTheme, toolbox: &Toolbox) -> Result<Action> {
    let defaults = &toolbox.settings.download;
    let url: String = Input::with_theme(theme)
        .with_prompt("Video or playlist URL")
        .interact_text()?;
    let url = url.trim().to_string();

    let format = if Confirm::with_theme(theme)
        .with_prompt("Fetch available qualities first?")
        .default(true)
        .interact()?
    {
        choose_quality(theme, toolbox, &url)?
    } else {
        None
    };

    let raw_dir: String = Input::with_theme(theme)
        .with_prompt("Save to")
        .default(defaults.output_dir.display().to_string())
        .interact_text()?;

    Ok(Action::Download(DownloadRequest {
        url,
        output_dir: PathBuf::from(raw_dir.trim()),
        format,
        cookie_file: defaults.cookie_file.clone(),
        merge_format: defaults.merge_format.clone(),
    }))
}

/// `None` leaves the choice to yt-dlp, also when the listing fails.
fn choose_quality(theme: &ColorfulTheme, toolbox: &Toolbox, url: &str) -> Result<Option<String>> {
    let cookies = toolbox.settings.download.cookie_file.as_deref();
    let info = match fetch_info(&toolbox.tools.yt_dlp, url, cookies) {
        Ok(info) => info,
        Err(err) => {
            println!("Could not list qualities: {err:#}");
            return Ok(None);
        }
    };
    println!("{}", info.title);
    if info.qualities.is_empty() {
        return Ok(None);
    }

    let mut items: Vec<&str> = info.qualities.iter().map(|q| q.display.as_str()).collect();
    items.push("Let yt-dlp decide");
    let picked = Select::with_theme(theme)
        .with_prompt("Quality")
        .items(&items[..])
        .default(0)
        .interact()?;
    Ok(info.qualities.get(picked).map(|q| q.id.clone()))
}

fn prompt_transcribe(theme: &ColorfulTheme, toolbox: &Toolbox) -> Result<Action> {
    let defaults = &toolbox.settings.transcribe;
    let input = prompt_existing_file(theme, "Input audio or video file")?;
    let model = select_from(theme, "Model", WHISPER_MODELS, &defaults.default_model)?;
    let format = select_from(
        theme,
        "Transcript format",
        TRANSCRIPT_FORMATS,
        &defaults.default_format,
    )?;
    let use_gpu = Confirm::with_theme(theme)
        .with_prompt("Use the GPU when available?")
        .default(defaults.use_gpu)
        .interact()?;

    Ok(Action::Transcribe(TranscribeRequest {
        input,
        model,
        format: TranscriptFormat::from_extension(&format).unwrap_or(TranscriptFormat::Txt),
        use_gpu,
    }))
}

fn prompt_existing_file(theme: &ColorfulTheme, prompt: &str) -> Result<PathBuf> {
    loop {
        let raw: String = Input::with_theme(theme)
            .with_prompt(prompt)
            .interact_text()?;
        let path = PathBuf::from(raw.trim());
        if path.is_file() {
            return Ok(path);
        }
        println!("Path not found, please try again.");
    }
}

fn select_from(theme: &ColorfulTheme, prompt: &str, items: &[&str], current: &str) -> Result<String> {
    let picked = Select::with_theme(theme)
        .with_prompt(prompt)
        .items(items)
        .default(default_index(items, current))
        .interact()?;
    Ok(items[picked].to_string())
}

fn default_index(items: &[&str], current: &str) -> usize {
    items.iter().position(|i| *i == current).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_selection_follows_settings() {
        assert_eq!(default_index(AUDIO_FORMATS, "flac"), 2);
        assert_eq!(default_index(WHISPER_MODELS, "base"), 1);
        assert_eq!(default_index(AUDIO_FORMATS, "ogg"), 0);
    }
}
