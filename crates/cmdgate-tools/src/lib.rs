//! Validated command execution: path guard, argument sanitizer, process
//! supervisor and output transformations behind a single [`Gateway`].

pub mod config;
pub mod error;
pub mod executor;
pub mod filter;
pub mod gateway;
pub mod path_guard;
pub mod permissions;
pub mod policy;
pub mod request;
pub mod sanitize;
pub mod supervisor;

pub use config::{ResponseConfig, SecurityConfig, ShellConfig, ToolsConfig};
pub use error::{ToolError, ValidationError};
pub use executor::{
    CommandResult, DEFAULT_TIMEOUT_MS, ExecutionRequest, MAX_TOOL_OUTPUT_CHARS, ProgressEvent,
    ProgressSink, Termination, ToolKind, truncate_tool_output,
};
pub use filter::{TransformStep, TransformationPipeline, TransformationSpec};
pub use gateway::{Gateway, ToolResponse};
pub use path_guard::AuthorizedPath;
pub use permissions::CommandPolicy;
pub use policy::SecurityPolicy;
pub use request::{BazelRequest, CatRequest, GitRequest, LsRequest, ToolInvocation, ToolRequest};
pub use supervisor::ProcessSupervisor;
