use std::sync::Arc;

use cmdgate_tools::{
    BazelRequest, CatRequest, Gateway, GitRequest, LsRequest, ToolInvocation, ToolRequest,
    ToolResponse, ToolsConfig,
};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo};
use rmcp::service::RequestContext;
use rmcp::{ErrorData, RoleServer, ServerHandler, tool, tool_handler, tool_router};

use crate::progress::{ProgressForwarder, ProgressSettings};

const SERVER_INSTRUCTIONS: &str = r#"Runs a fixed set of commands (cat, ls, bazel, git) with validated arguments.

Every tool accepts these optional parameters:
- grep_pattern: regex to filter lines (invert_grep: true to drop matches instead)
- head / tail: keep the first / last N lines
- sort: sort lines; unique: collapse adjacent duplicates
- transform_order: e.g. ["grep", "sort", "unique", "head", "tail"] (the default); only listed steps run
- timeout_ms: command timeout in milliseconds (default 180000)
- working_dir: absolute directory to run in
- env: extra environment variables as {"KEY": "value"}

Results start with "Lines: <n>" and "Exit code: <code>". Output lines are included when a transformation is requested.
Shell metacharacters are rejected in arguments; use the transformation parameters instead of pipes."#;

/// MCP server exposing the gateway tools.
#[derive(Clone)]
pub struct CmdgateServer {
    gateway: Arc<Gateway>,
    progress: ProgressSettings,
    tool_router: ToolRouter<Self>,
}

impl std::fmt::Debug for CmdgateServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CmdgateServer")
            .field("gateway", &self.gateway)
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

impl CmdgateServer {
    #[must_use]
    pub fn new(gateway: Arc<Gateway>, progress: ProgressSettings) -> Self {
        Self {
            gateway,
            progress,
            tool_router: Self::tool_router(),
        }
    }

    #[must_use]
    pub fn from_config(config: &ToolsConfig) -> Self {
        let progress = ProgressSettings {
            buffer: config.shell.progress_buffer,
            notify_timeout: std::time::Duration::from_millis(config.shell.progress_timeout_ms),
        };
        Self::new(Arc::new(Gateway::from_config(config)), progress)
    }

    async fn run<T>(&self, request: &ToolRequest<T>, ctx: RequestContext<RoleServer>) -> CallToolResult
    where
        T: ToolInvocation + Sync,
    {
        let forwarder = ctx
            .meta
            .get_progress_token()
            .map(|token| ProgressForwarder::spawn(ctx.peer.clone(), token, self.progress));
        let sink = forwarder.as_ref().map(ProgressForwarder::sink);

        let response = self.gateway.call(request, sink, &ctx.ct).await;

        if let Some(forwarder) = forwarder {
            forwarder.finish().await;
        }
        into_call_result(response)
    }
}

fn into_call_result(response: ToolResponse) -> CallToolResult {
    let content = vec![Content::text(response.text)];
    if response.is_error {
        CallToolResult::error(content)
    } else {
        CallToolResult::success(content)
    }
}

#[tool_router]
impl CmdgateServer {
    #[tool(
        description = "Print a file (cat <path>). The path must not be inside a blocked directory and must not contain '..'. Supports grep_pattern, invert_grep, head, tail, sort, unique and transform_order to filter the output."
    )]
    async fn cat(
        &self,
        Parameters(request): Parameters<ToolRequest<CatRequest>>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(self.run(&request, ctx).await)
    }

    #[tool(
        description = "List a directory (ls -la <path>, path defaults to \".\"). Example, only .rs files sorted: {\"path\": \"src\", \"grep_pattern\": \"\\\\.rs$\", \"sort\": true}"
    )]
    async fn ls(
        &self,
        Parameters(request): Parameters<ToolRequest<LsRequest>>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(self.run(&request, ctx).await)
    }

    #[tool(
        description = "Run bazel build or bazel test on one target, e.g. {\"subcommand\": \"test\", \"target\": \"//foo:bar\"}. Progress is streamed line by line when a progress token is supplied."
    )]
    async fn bazel(
        &self,
        Parameters(request): Parameters<ToolRequest<BazelRequest>>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(self.run(&request, ctx).await)
    }

    #[tool(
        description = "Run git status, add, commit or checkout. Options are limited to common switches (-a, -A, -u, -b, -B, -s, --short, --porcelain, --amend, --no-edit, --detach, -f, -q, -v, -n) plus -m/--message; every other argument is a path or ref and must stay out of blocked directories. Example, modified files only: {\"subcommand\": \"status\", \"grep_pattern\": \"modified:\"}"
    )]
    async fn git(
        &self,
        Parameters(request): Parameters<ToolRequest<GitRequest>>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(self.run(&request, ctx).await)
    }
}

#[tool_handler]
impl ServerHandler for CmdgateServer {
    fn get_info(&self) -> ServerInfo {
        let mut server_info = Implementation::from_build_env();
        server_info.name = env!("CARGO_PKG_NAME").to_owned();
        server_info.version = env!("CARGO_PKG_VERSION").to_owned();
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info,
            instructions: Some(SERVER_INSTRUCTIONS.to_owned()),
            ..Default::default()
        }
    }
}
