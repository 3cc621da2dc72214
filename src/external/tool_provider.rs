//! `ToolProvider` trait: the tool-execution seam consumed by
//! `AgenticLoop`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct ToolExecutionResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl ToolExecutionResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }
}

/// `executeTool(name, input) -> {success, output, error?}`.
/// A panic inside an implementation is the caller's concern; `AgenticLoop`
/// only guards against an `Err` return, matching the "a thrown
/// exception is recorded as `{success:false, output:\"\"}`".
#[async_trait]
pub trait ToolProvider: Send + Sync {
    async fn execute_tool(&self, name: &str, input: serde_json::Value) -> ToolExecutionResult;
}

/// [AMBIENT] Fixed canned responses keyed by tool name, for deterministic
/// unit tests exercising `AgenticLoop` without a real host editor.
#[derive(Default)]
pub struct StaticToolProvider {
    responses: Mutex<HashMap<String, ToolExecutionResult>>,
}

impl StaticToolProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, name: impl Into<String>, result: ToolExecutionResult) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(name.into(), result);
        self
    }
}

#[async_trait]
impl ToolProvider for StaticToolProvider {
    async fn execute_tool(&self, name: &str, _input: serde_json::Value) -> ToolExecutionResult {
        self.responses
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(|| ToolExecutionResult::failed(format!("no canned response for tool '{name}'")))
    }
}

/// [AMBIENT] `read_file`/`write_file` over a root directory, generalizing
/// `file_edit_tools` line-based primitives to the two
/// whole-file operations `AgenticLoop` demo/test scenarios need. Paths
/// escaping `root` are rejected rather than silently clamped.
pub struct FsToolProvider {
    root: PathBuf,
}

impl FsToolProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, String> {
        if Path::new(relative).is_absolute() || relative.split('/').any(|seg| seg == "..") {
            return Err(format!("path '{relative}' escapes the tool root"));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ToolProvider for FsToolProvider {
    async fn execute_tool(&self, name: &str, input: serde_json::Value) -> ToolExecutionResult {
        match name {
            "read_file" => {
                let path = match input.get("path").and_then(|v| v.as_str()) {
                    Some(p) => p,
                    None => return ToolExecutionResult::failed("missing 'path' argument"),
                };
                match self.resolve(path) {
                    Ok(full) => match std::fs::read_to_string(&full) {
                        Ok(contents) => ToolExecutionResult::ok(contents),
                        Err(e) => ToolExecutionResult::failed(e.to_string()),
                    },
                    Err(e) => ToolExecutionResult::failed(e),
                }
            }
            "write_file" => {
                let path = match input.get("path").and_then(|v| v.as_str()) {
                    Some(p) => p,
                    None => return ToolExecutionResult::failed("missing 'path' argument"),
                };
                let content = input.get("content").and_then(|v| v.as_str()).unwrap_or("");
                match self.resolve(path) {
                    Ok(full) => {
                        if let Some(parent) = full.parent() {
                            if let Err(e) = std::fs::create_dir_all(parent) {
                                return ToolExecutionResult::failed(e.to_string());
                            }
                        }
                        match std::fs::write(&full, content) {
                            Ok(()) => ToolExecutionResult::ok(""),
                            Err(e) => ToolExecutionResult::failed(e.to_string()),
                        }
                    }
                    Err(e) => ToolExecutionResult::failed(e),
                }
            }
            other => ToolExecutionResult::failed(format!("unsupported tool '{other}'")),
        }
    }
}
