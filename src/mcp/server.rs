//! `McpServer`: the `rmcp` `ServerHandler` implementation that exposes tools,
//! resources, and prompts over stdio and streamable HTTP.
//!
//! Built on `rmcp`'s `ServerHandler` trait (`Tool::new`, `Content::text`,
//! `CallToolResult::success`/`::error`, the `StreamableHttpService` +
//! `LocalSessionManager` wiring, `serve_stdio` via
//! `rmcp::transport::io::stdio()`). Every call bottoms out in
//! [`ExecutionEngine::execute`] — this module only translates wire shapes,
//! the same pipeline runs regardless of which transport carried the call.
//!
//! Bearer extraction for the HTTP transport follows the pattern the `rmcp`
//! streamable-http transport itself uses: it stores the inbound
//! `http::request::Parts` in `RequestContext::extensions`, and a handler
//! reads the `Authorization` header back out of them per call (there is no
//! separate auth middleware layer here — `ExecutionEngine::execute` step 1
//! already calls `AuthService::verify_token` itself, so the transport layer
//! just has to carry the bearer string through).

use crate::engine::{ExecutionEngine, ExecutionRequest};
use crate::model::{EndpointKind, Transport};
use crate::registry::{EndpointDefinition, ParamType, ParameterDef};
use crate::reload::ReloadCoordinator;
use rmcp::{
    ErrorData as McpError,
    handler::server::ServerHandler,
    model::{
        CallToolRequestParam, CallToolResult, Content, GetPromptRequestParam, GetPromptResult,
        ListPromptsResult, ListResourcesResult, ListToolsResult, PaginatedRequestParam, Prompt,
        PromptArgument, PromptMessage, PromptMessageContent, PromptMessageRole, PromptsCapability,
        RawResource, ReadResourceRequestParam, ReadResourceResult, Resource, ResourceContents,
        ResourcesCapability, ServerCapabilities, ServerInfo, Tool, ToolsCapability,
    },
    service::{RequestContext, RoleServer, ServiceExt},
    transport::streamable_http_server::{
        session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
    },
};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Inbound HTTP request parts, as `rmcp`'s streamable-http transport stores
/// them in `RequestContext::extensions` for each call.
type HttpParts = http::request::Parts;

#[derive(Clone)]
pub struct McpServer {
    engine: Arc<ExecutionEngine>,
    reload: Arc<ReloadCoordinator>,
    /// Static bearer applied to every request on the stdio transport, where
    /// there is no per-call Authorization header to extract. `None` runs
    /// stdio requests as the anonymous user.
    stdio_bearer: Option<String>,
}

impl McpServer {
    pub fn new(engine: Arc<ExecutionEngine>, reload: Arc<ReloadCoordinator>, stdio_bearer: Option<String>) -> Self {
        Self { engine, reload, stdio_bearer }
    }

    /// Serves over stdio (line-delimited JSON) until the peer closes the
    /// connection.
    pub async fn serve_stdio(self) -> crate::error::Result<()> {
        tracing::info!("starting MCP server on stdio");
        let service = self
            .serve(rmcp::transport::io::stdio())
            .await
            .map_err(|e| crate::error::GatewayError::internal(format!("failed to start MCP stdio server: {e}")))?;

        service
            .waiting()
            .await
            .map_err(|e| crate::error::GatewayError::internal(format!("MCP server error: {e}")))?;

        tracing::info!("MCP stdio server shut down");
        Ok(())
    }

    /// Builds the Streamable HTTP service, mounted by [`crate::http`] at the
    /// gateway's single `/mcp` endpoint.
    pub fn streamable_http_service(self) -> StreamableHttpService<McpServer, LocalSessionManager> {
        let config = StreamableHttpServerConfig {
            sse_keep_alive: Some(Duration::from_secs(15)),
            stateful_mode: true,
        };
        StreamableHttpService::new(move || Ok(self.clone()), Arc::new(LocalSessionManager::default()), config)
    }

    fn bearer_from_context(&self, context: &RequestContext<RoleServer>) -> Option<String> {
        if let Some(parts) = context.extensions.get::<HttpParts>() {
            return parts
                .headers
                .get(http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
                .map(|s| s.to_string());
        }
        self.stdio_bearer.clone()
    }

    fn transport_from_context(context: &RequestContext<RoleServer>) -> Transport {
        if context.extensions.get::<HttpParts>().is_some() {
            Transport::Http
        } else {
            Transport::Stdio
        }
    }

    async fn list_endpoints(&self, kind: EndpointKind) -> Vec<EndpointDefinition> {
        let generation = self.reload.admit().await;
        generation.registry.list(kind).into_iter().cloned().collect()
    }

    async fn execute(
        &self,
        kind: EndpointKind,
        name: String,
        params: Map<String, Value>,
        context: &RequestContext<RoleServer>,
    ) -> Result<Value, McpError> {
        let req = ExecutionRequest {
            transport: Self::transport_from_context(context),
            kind,
            name,
            params,
            bearer: self.bearer_from_context(context),
            trace_id: None,
        };
        self.engine
            .execute(req)
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))
    }
}

impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability::default()),
                resources: Some(ResourcesCapability::default()),
                prompts: Some(PromptsCapability::default()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListToolsResult, McpError> {
        let mut tools: Vec<Tool> = self
            .list_endpoints(EndpointKind::Tool)
            .await
            .iter()
            .map(endpoint_to_tool)
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(ListToolsResult { tools, next_cursor: None })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        let name = request.name.to_string();
        let params = request.arguments.unwrap_or_default();

        match self.execute(EndpointKind::Tool, name, params, &context).await {
            Ok(value) => {
                let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| "null".to_string());
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListResourcesResult, McpError> {
        let mut resources: Vec<Resource> = self
            .list_endpoints(EndpointKind::Resource)
            .await
            .iter()
            .map(endpoint_to_resource)
            .collect();
        resources.sort_by(|a, b| a.uri.cmp(&b.uri));

        Ok(ListResourcesResult { resources, next_cursor: None })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<ReadResourceResult, McpError> {
        let uri = request.uri.clone();
        let value = self
            .execute(EndpointKind::Resource, uri.clone(), Map::new(), &context)
            .await?;

        let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| "null".to_string());
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::TextResourceContents {
                uri,
                mime_type: Some("application/json".to_string()),
                text,
            }],
        })
    }

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListPromptsResult, McpError> {
        let mut prompts: Vec<Prompt> = self
            .list_endpoints(EndpointKind::Prompt)
            .await
            .iter()
            .map(endpoint_to_prompt)
            .collect();
        prompts.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(ListPromptsResult { prompts, next_cursor: None })
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParam,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<GetPromptResult, McpError> {
        let name = request.name.clone();
        let params = request.arguments.unwrap_or_default();
        let value = self.execute(EndpointKind::Prompt, name, params, &context).await?;

        let text = match &value {
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| "null".to_string()),
        };

        Ok(GetPromptResult {
            description: None,
            messages: vec![PromptMessage {
                role: PromptMessageRole::User,
                content: PromptMessageContent::text(text),
            }],
        })
    }
}

/// Build the JSON Schema `Tool::new` expects from an endpoint's declared
/// parameters. Loose by design: MCP clients only need enough shape to
/// prompt the model, the engine re-validates on every call.
fn parameters_to_schema(parameters: &[ParameterDef]) -> Map<String, Value> {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for param in parameters {
        properties.insert(param.name.clone(), parameter_schema(param));
        if param.required {
            required.push(Value::String(param.name.clone()));
        }
    }

    let mut schema = Map::new();
    schema.insert("type".to_string(), Value::String("object".to_string()));
    schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".to_string(), Value::Array(required));
    }
    schema
}

fn parameter_schema(param: &ParameterDef) -> Value {
    let mut schema = Map::new();
    schema.insert("type".to_string(), Value::String(json_schema_type(param.param_type).to_string()));
    if let Some(description) = &param.description {
        schema.insert("description".to_string(), Value::String(description.clone()));
    }
    if let Some(enum_values) = &param.constraints.enum_values {
        schema.insert("enum".to_string(), Value::Array(enum_values.clone()));
    }
    Value::Object(schema)
}

fn json_schema_type(param_type: ParamType) -> &'static str {
    match param_type {
        ParamType::String | ParamType::Date | ParamType::DateTime | ParamType::Duration | ParamType::Email | ParamType::Uri => {
            "string"
        }
        ParamType::Number => "number",
        ParamType::Integer => "integer",
        ParamType::Boolean => "boolean",
        ParamType::Array => "array",
        ParamType::Object => "object",
    }
}

fn endpoint_to_tool(def: &EndpointDefinition) -> Tool {
    let schema = parameters_to_schema(&def.parameters);
    Tool::new(
        std::borrow::Cow::Owned(def.name.clone()),
        std::borrow::Cow::Owned(def.description.clone().unwrap_or_default()),
        Arc::new(schema),
    )
}

fn endpoint_to_resource(def: &EndpointDefinition) -> Resource {
    let raw = RawResource {
        uri: def.name.clone(),
        name: def.name.clone(),
        description: def.description.clone(),
        mime_type: Some("application/json".to_string()),
        size: None,
    };
    Resource::new(raw, None)
}

fn endpoint_to_prompt(def: &EndpointDefinition) -> Prompt {
    let arguments = if def.parameters.is_empty() {
        None
    } else {
        Some(
            def.parameters
                .iter()
                .map(|p| PromptArgument {
                    name: p.name.clone(),
                    description: p.description.clone(),
                    required: Some(p.required),
                })
                .collect(),
        )
    };

    Prompt {
        name: def.name.clone(),
        description: def.description.clone(),
        arguments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ParamConstraints;

    fn param(name: &str, param_type: ParamType, required: bool) -> ParameterDef {
        ParameterDef {
            name: name.to_string(),
            param_type,
            description: Some(format!("{name} parameter")),
            required,
            default: None,
            constraints: ParamConstraints::default(),
            sensitive: false,
        }
    }

    #[test]
    fn parameters_to_schema_marks_required_fields() {
        let params = vec![param("customer_id", ParamType::String, true), param("limit", ParamType::Integer, false)];
        let schema = parameters_to_schema(&params);
        assert_eq!(schema["type"], Value::String("object".to_string()));
        assert_eq!(schema["required"], Value::Array(vec![Value::String("customer_id".to_string())]));
        assert_eq!(schema["properties"]["limit"]["type"], Value::String("integer".to_string()));
    }

    #[test]
    fn json_schema_type_maps_semantic_types() {
        assert_eq!(json_schema_type(ParamType::DateTime), "string");
        assert_eq!(json_schema_type(ParamType::Number), "number");
        assert_eq!(json_schema_type(ParamType::Object), "object");
    }
}
