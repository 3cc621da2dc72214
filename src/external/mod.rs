//! External collaborator seams: `LLMClient` and `ToolProvider`.
//!
//! Mirrors `ConfirmationCallback`/`ProgressCallback`
//! trait-object-injection idiom (`execution_engine/executor.rs`), but these
//! seams are async since the collaborators they stand in for are network
//! calls.

pub mod llm_client;
pub mod tool_provider;

pub use llm_client::{
    LLMClient, LLMClientError, LLMMessage, LLMRequest, LLMResponse, LLMUsage, StopReason,
    StreamEvent,
};
pub use tool_provider::{FsToolProvider, StaticToolProvider, ToolExecutionResult, ToolProvider};
