//! MCP server for the command gateway: tool routing, progress and
//! cancellation bridging over the stdio transport.

pub mod error;
pub mod progress;
pub mod server;

use std::future::Future;

use rmcp::ServiceExt;

pub use error::ServeError;
pub use progress::{ProgressForwarder, ProgressNotifier, ProgressSettings};
pub use server::CmdgateServer;

/// Serve `server` on stdin/stdout until the client disconnects or `shutdown` resolves.
///
/// # Errors
///
/// Returns `ServeError` if the MCP handshake fails or the session task panics.
pub async fn serve_stdio(
    server: CmdgateServer,
    shutdown: impl Future<Output = ()>,
) -> Result<(), ServeError> {
    let service = server
        .serve(rmcp::transport::stdio())
        .await
        .map_err(|e| ServeError::Initialize {
            message: e.to_string(),
        })?;
    tracing::info!("MCP session started on stdio");

    tokio::select! {
        quit = service.waiting() => {
            let reason = quit?;
            tracing::info!("MCP session ended: {reason:?}");
        }
        () = shutdown => {
            tracing::info!("shutdown requested, closing MCP session");
        }
    }
    Ok(())
}
