/// Failures of the MCP session itself. Tool failures never surface here: they
/// are rendered into the tool result.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("MCP initialization failed: {message}")]
    Initialize { message: String },

    #[error("MCP session task failed: {0}")]
    Session(#[from] tokio::task::JoinError),
}
