use std::sync::Arc;

use prose_core::{ToolDispatcher, ToolInvocation, ToolName};
use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler,
    model::{
        CallToolRequestParams, CallToolResult, Content, Implementation, JsonObject,
        ListToolsResult, PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool,
    },
    service::RequestContext,
};
use serde::Deserialize;

/// MCP server exposing the OpenProse tools to an agent host.
///
/// Every tool call completes with text content. Only protocol faults (an
/// unknown tool name, a missing `filePath`) are reported as MCP errors.
#[derive(Clone)]
pub struct ProseServer {
    dispatcher: Arc<ToolDispatcher>,
}

impl ProseServer {
    pub fn new(dispatcher: Arc<ToolDispatcher>) -> Self {
        Self { dispatcher }
    }

    async fn invoke(
        &self,
        name: &str,
        arguments: Option<&JsonObject>,
    ) -> Result<String, McpError> {
        let invocation = parse_invocation(name, arguments)?;
        Ok(self.dispatcher.dispatch(&invocation).await)
    }
}

#[derive(Deserialize)]
struct FileArgs {
    #[serde(rename = "filePath")]
    file_path: String,
}

fn parse_invocation(
    name: &str,
    arguments: Option<&JsonObject>,
) -> Result<ToolInvocation, McpError> {
    let tool = ToolName::from_tool_name(name)
        .ok_or_else(|| McpError::invalid_params(format!("Unknown tool: {name}"), None))?;

    Ok(match tool {
        ToolName::Boot => ToolInvocation::Boot,
        ToolName::Run => ToolInvocation::Run {
            file_path: file_path_arg(tool, arguments)?,
        },
        ToolName::Compile => ToolInvocation::Compile {
            file_path: file_path_arg(tool, arguments)?,
        },
    })
}

fn file_path_arg(tool: ToolName, arguments: Option<&JsonObject>) -> Result<String, McpError> {
    let value = arguments
        .cloned()
        .map(serde_json::Value::Object)
        .unwrap_or(serde_json::Value::Null);
    let args: FileArgs = serde_json::from_value(value)
        .map_err(|e| McpError::invalid_params(format!("Invalid arguments for {tool}: {e}"), None))?;
    Ok(args.file_path)
}

fn prose_info() -> ServerInfo {
    ServerInfo {
        protocol_version: Default::default(),
        capabilities: ServerCapabilities::builder().enable_tools().build(),
        server_info: Implementation::from_build_env(),
        instructions: Some(
            "OpenProse -- call prose_boot once to become the OpenProse VM, \
             then prose_run to execute a .prose program or prose_compile to validate one."
                .into(),
        ),
    }
}

fn tool_description(tool: ToolName) -> &'static str {
    match tool {
        ToolName::Boot => {
            "Initialize the OpenProse VM. Returns the VM semantics, the skill guide \
             and the narration protocol to follow for the rest of the session."
        }
        ToolName::Run => {
            "Execute an OpenProse program. Returns the program source and the \
             steps to follow while executing it."
        }
        ToolName::Compile => {
            "Validate an OpenProse program against the language specification \
             and report errors and warnings without running it."
        }
    }
}

/// Build the MCP tool definition, including its JSON input schema.
fn tool_definition(tool: ToolName) -> Tool {
    let schema = if tool.takes_file() {
        serde_json::json!({
            "type": "object",
            "properties": {
                "filePath": {
                    "type": "string",
                    "description": "Path to the .prose file, absolute or relative to the project root"
                }
            },
            "required": ["filePath"]
        })
    } else {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    };

    Tool {
        name: tool.tool_name().into(),
        title: None,
        description: Some(tool_description(tool).into()),
        input_schema: schema.as_object().cloned().unwrap_or_default().into(),
        output_schema: None,
        annotations: None,
        execution: None,
        icons: None,
        meta: None,
    }
}

pub fn tool_definitions() -> Vec<Tool> {
    ToolName::ALL.into_iter().map(tool_definition).collect()
}

impl ServerHandler for ProseServer {
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        tracing::debug!("Listing tools");
        Ok(ListToolsResult::with_all_items(tool_definitions()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let text = self
            .invoke(&request.name, request.arguments.as_ref())
            .await?;
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    fn get_info(&self) -> ServerInfo {
        prose_info()
    }
}
