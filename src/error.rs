use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the external-tool layer. All of them are folded into a
/// `JobResult` at the controller boundary.
#[derive(Error, Debug)]
pub enum ToolError {
    /// The executable could not be started at all.
    #[error("failed to spawn `{}`: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Duration metadata was unavailable.
    #[error("duration probe failed: {0}")]
    Probe(String),

    #[error("model unavailable: {0}")]
    Model(String),

    /// A line did not have the expected shape.
    #[error("cannot parse `{line}`: {reason}")]
    Parse { line: String, reason: String },

    #[error("cancelled")]
    Cancelled,

    /// The tool ran but reported failure.
    #[error("{message}")]
    ToolExit { code: Option<i32>, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ToolError {
    pub fn parse(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            line: line.into(),
            reason: reason.into(),
        }
    }
}
