use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A host tool (ufw, tcpdump, ip) exited non-zero or could not be run.
    #[error("{tool} failed: {stderr}")]
    ExternalTool { tool: String, stderr: String },

    /// The capture tool is missing and could not be installed.
    #[error("packet capture unavailable: {0}")]
    CaptureUnavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn external_tool(tool: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::ExternalTool {
            tool: tool.into(),
            stderr: stderr.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
