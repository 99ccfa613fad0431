use crate::config::validate_model;
use crate::controller::{JobController, JobHandle};
use crate::error::ToolError;
use crate::job::{Job, JobInput, JobResult, ToolKind};
use crate::model_cache::ModelCache;
use crate::process::ToolCommand;
use crate::subtitle::TranscriptFormat;
use crate::tools::Tools;
use clap::ValueEnum;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

/// Hidden subcommand the transcription job runs in a child copy of this
/// binary.
pub const WORKER_SUBCOMMAND: &str = "transcribe-worker";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Device {
    Cpu,
    Cuda,
}

impl Device {
    pub fn as_str(self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub name: String,
    pub device: Device,
}

/// A speech model ready to run: validated name, chosen device and the
/// engine executable that will load it.
#[derive(Debug, Clone, PartialEq)]
pub struct WhisperModel {
    pub name: String,
    pub device: Device,
    pub engine: PathBuf,
}

pub type Models = ModelCache<ModelKey, WhisperModel>;

#[derive(Debug, Clone)]
pub struct TranscribeRequest {
    pub input: PathBuf,
    pub model: String,
    pub format: TranscriptFormat,
    pub use_gpu: bool,
}

/// True when `nvidia-smi -L` runs and lists at least one GPU.
pub fn cuda_available() -> bool {
    let out = Command::new("nvidia-smi")
        .arg("-L")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output();
    match out {
        Ok(out) => out.status.success() && String::from_utf8_lossy(&out.stdout).contains("GPU"),
        Err(err) => {
            debug!("nvidia-smi unavailable: {err}");
            false
        }
    }
}

pub fn preferred_device(use_gpu: bool, gpu_present: impl FnOnce() -> bool) -> Device {
    if use_gpu && gpu_present() {
        Device::Cuda
    } else {
        Device::Cpu
    }
}

/// Validate the model and check the engine can run on the requested device.
pub fn load_model(key: &ModelKey, engine: &Path) -> Result<WhisperModel, ToolError> {
    let name = validate_model(&key.name).map_err(ToolError::Model)?;
    if key.device == Device::Cuda && !cuda_available() {
        return Err(ToolError::Model("no CUDA device available".into()));
    }
    info!(model = %name, device = %key.device, "loading speech model");
    Ok(WhisperModel {
        name,
        device: key.device,
        engine: engine.to_path_buf(),
    })
}

/// Fetch a model from the cache, loading it on first use. A failed CUDA
/// load retries on the CPU.
pub fn resolve_model(
    cache: &Models,
    key: ModelKey,
    load: impl Fn(&ModelKey) -> Result<WhisperModel, ToolError>,
) -> Result<WhisperModel, ToolError> {
    debug!(model = %key.name, device = %key.device, cached = cache.contains(&key), loaded = cache.len(), "resolving model");
    match cache.get_or_load(&key, &load) {
        Ok(model) => Ok((*model).clone()),
        Err(err) if key.device == Device::Cuda => {
            warn!("GPU model load failed, falling back to CPU: {err}");
            let cpu = ModelKey {
                device: Device::Cpu,
                ..key
            };
            cache.get_or_load(&cpu, &load).map(|m| (*m).clone())
        }
        Err(err) => Err(err),
    }
}

pub fn build_command(
    worker_exe: &Path,
    input: &Path,
    model: &WhisperModel,
    format: TranscriptFormat,
    ffprobe: &Path,
) -> ToolCommand {
    ToolCommand::new(worker_exe)
        .arg(WORKER_SUBCOMMAND)
        .arg("--input")
        .arg(input)
        .args(["--model", model.name.as_str()])
        .args(["--device", model.device.as_str()])
        .args(["--format", format.extension()])
        .arg("--engine")
        .arg(&model.engine)
        .arg("--ffprobe")
        .arg(ffprobe)
}

pub fn prepare(
    tools: &Tools,
    models: &Models,
    request: &TranscribeRequest,
) -> Result<JobController, JobResult> {
    if !request.input.exists() {
        return Err(JobResult::failed("input file does not exist"));
    }
    let device = preferred_device(request.use_gpu, cuda_available);
    let key = ModelKey {
        name: request.model.clone(),
        device,
    };
    let model =
        resolve_model(models, key, |k| load_model(k, &tools.whisper)).map_err(JobResult::from)?;
    let worker = std::env::current_exe()
        .map_err(|err| JobResult::failed(format!("cannot locate worker executable: {err}")))?;

    let command = build_command(&worker, &request.input, &model, request.format, &tools.ffprobe);
    let job = Job::new(JobInput::File(request.input.clone()), ToolKind::Transcribe)
        .option("model", &model.name)
        .option("device", model.device.as_str())
        .option("format", request.format.extension());
    Ok(JobController::new(job, command))
}

pub fn start(tools: &Tools, models: &Models, request: &TranscribeRequest) -> JobHandle {
    match prepare(tools, models, request) {
        Ok(controller) => controller.spawn(),
        Err(result) => JobHandle::finished(result),
    }
}
