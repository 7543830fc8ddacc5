//! The central Model Context Protocol dispatcher
//!
//! Routes a parsed request by method name to the capability handlers, turns
//! their results into JSON-RPC envelopes and delivers exactly one envelope
//! through the sender supplied by the transport. No I/O happens here.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::errors::{DispatchError, HandlerError};
use crate::logging::audit_params;
use crate::mcp::rpc::{ErrorCode, ErrorObject, Request, Response};
use crate::mcp::sender::ResponseSender;
use crate::mcp::types::{
    InitializeResponse, PromptHandler, PromptParams, ResourceHandler, ResourceParams, ServerInfo,
    ToolCallParams, ToolHandler, PROTOCOL_VERSION,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamsError {
    #[error("params are required")]
    Missing,
    #[error("params must be an object")]
    NotAnObject,
    #[error("{0} parameter is required and must be a string")]
    RequiredString(&'static str),
}

pub struct McpServer {
    server_info: ServerInfo,
    tools: Arc<dyn ToolHandler>,
    resources: Arc<dyn ResourceHandler>,
    prompts: Arc<dyn PromptHandler>,
}

impl McpServer {
    pub fn new(
        server_info: ServerInfo,
        tools: Arc<dyn ToolHandler>,
        resources: Arc<dyn ResourceHandler>,
        prompts: Arc<dyn PromptHandler>,
    ) -> Self {
        Self {
            server_info,
            tools,
            resources,
            prompts,
        }
    }

    pub fn initialize(&self) -> InitializeResponse {
        InitializeResponse {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: json!({
                "tools": { "listChanged": true },
                "resources": { "listChanged": true },
                "prompts": { "listChanged": true }
            }),
            server_info: self.server_info.clone(),
        }
    }

    /// Dispatches one request and delivers its outcome through `sender`.
    ///
    /// Notifications are accepted and produce nothing. Delivery failures are
    /// returned to the transport and never retried.
    pub async fn handle_request(
        &self,
        request: Request,
        sender: &dyn ResponseSender,
    ) -> Result<(), DispatchError> {
        let Some(id) = request.id.clone() else {
            debug!(method = %request.method, "notification accepted without response");
            return Ok(());
        };

        let audited = audit_params(request.params.as_ref());
        let outcome = self.route(&request).await;

        info!(
            method = %request.method,
            id = %id,
            params = %audited,
            outcome = if outcome.is_ok() { "success" } else { "failure" },
            "mcp action audited"
        );

        let response = match outcome {
            Ok(result) => Response::success(Some(id), result),
            Err(error) => Response::failure(Some(id), error),
        };

        sender.send_response(response).await?;
        Ok(())
    }

    async fn route(&self, request: &Request) -> Result<Value, ErrorObject> {
        let params = request.params.as_ref();

        match request.method.as_str() {
            "initialize" => to_result(&self.initialize(), "Failed to initialize"),
            "ping" => Ok(json!({})),
            "tools/list" => {
                let tools = self
                    .tools
                    .list_tools()
                    .await
                    .map_err(|err| listing_failed("Failed to list tools", err))?;
                Ok(json!({ "tools": tools }))
            }
            "tools/call" => {
                let params = parse_tool_call_params(params)
                    .map_err(|err| invalid_params("Invalid tool call parameters", err))?;
                let response = self
                    .tools
                    .call_tool(params)
                    .await
                    .map_err(|err| domain_failed("Tool call failed", err))?;
                to_result(&response, "Failed to encode tool response")
            }
            "resources/list" => {
                let resources = self
                    .resources
                    .list_resources()
                    .await
                    .map_err(|err| listing_failed("Failed to list resources", err))?;
                Ok(json!({ "resources": resources }))
            }
            "resources/read" => {
                let params = parse_resource_params(params)
                    .map_err(|err| invalid_params("Invalid resource read parameters", err))?;
                let response = self
                    .resources
                    .read_resource(params)
                    .await
                    .map_err(|err| domain_failed("Resource read failed", err))?;
                to_result(&response, "Failed to encode resource response")
            }
            "prompts/list" => {
                let prompts = self
                    .prompts
                    .list_prompts()
                    .await
                    .map_err(|err| listing_failed("Failed to list prompts", err))?;
                Ok(json!({ "prompts": prompts }))
            }
            "prompts/get" => {
                let params = parse_prompt_params(params)
                    .map_err(|err| invalid_params("Invalid prompt parameters", err))?;
                let response = self
                    .prompts
                    .get_prompt(params)
                    .await
                    .map_err(|err| domain_failed("Prompt call failed", err))?;
                to_result(&response, "Failed to encode prompt response")
            }
            method => Err(ErrorObject::new(
                ErrorCode::MethodNotFound,
                format!("Method {method} not found"),
            )),
        }
    }
}

fn to_result<T: Serialize>(value: &T, context: &str) -> Result<Value, ErrorObject> {
    serde_json::to_value(value).map_err(|err| {
        ErrorObject::new(ErrorCode::InternalError, context).with_data(err.to_string())
    })
}

fn listing_failed(context: &str, err: HandlerError) -> ErrorObject {
    ErrorObject::new(ErrorCode::InternalError, context).with_data(err.to_string())
}

fn domain_failed(context: &str, err: HandlerError) -> ErrorObject {
    ErrorObject::new(ErrorCode::InvalidParams, format!("{context}: {err}"))
}

fn invalid_params(context: &str, err: ParamsError) -> ErrorObject {
    ErrorObject::new(ErrorCode::InvalidParams, context).with_data(err.to_string())
}

fn params_object(params: Option<&Value>) -> Result<&Map<String, Value>, ParamsError> {
    match params {
        None | Some(Value::Null) => Err(ParamsError::Missing),
        Some(value) => value.as_object().ok_or(ParamsError::NotAnObject),
    }
}

fn required_string(object: &Map<String, Value>, key: &'static str) -> Result<String, ParamsError> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(ParamsError::RequiredString(key))
}

fn optional_arguments(object: &Map<String, Value>) -> Map<String, Value> {
    object
        .get("arguments")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

pub fn parse_tool_call_params(params: Option<&Value>) -> Result<ToolCallParams, ParamsError> {
    let object = params_object(params)?;
    Ok(ToolCallParams {
        name: required_string(object, "name")?,
        arguments: optional_arguments(object),
    })
}

pub fn parse_resource_params(params: Option<&Value>) -> Result<ResourceParams, ParamsError> {
    let object = params_object(params)?;
    Ok(ResourceParams {
        uri: required_string(object, "uri")?,
    })
}

pub fn parse_prompt_params(params: Option<&Value>) -> Result<PromptParams, ParamsError> {
    let object = params_object(params)?;
    Ok(PromptParams {
        name: required_string(object, "name")?,
        arguments: optional_arguments(object),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::domain::coffee::CoffeeShop;
    use crate::errors::SendError;
    use crate::mcp::rpc::RequestId;
    use crate::mcp::sender::SendOnce;
    use crate::mcp::types::{Prompt, PromptResponse, Resource, ResourceResponse, Tool, ToolResponse};

    #[derive(Default)]
    struct RecordingSender {
        once: SendOnce,
        sent: Mutex<Vec<Response>>,
    }

    impl RecordingSender {
        fn responses(&self) -> Vec<Response> {
            self.sent.lock().expect("sender lock").clone()
        }

        fn only_response(&self) -> Response {
            let responses = self.responses();
            assert_eq!(responses.len(), 1, "expected exactly one response");
            responses.into_iter().next().expect("one response")
        }
    }

    #[async_trait]
    impl ResponseSender for RecordingSender {
        async fn send_response(&self, response: Response) -> Result<(), SendError> {
            self.once.claim()?;
            self.sent.lock().expect("sender lock").push(response);
            Ok(())
        }

        fn is_sent(&self) -> bool {
            self.once.is_claimed()
        }
    }

    struct BrokenCatalog;

    #[async_trait]
    impl ToolHandler for BrokenCatalog {
        async fn list_tools(&self) -> Result<Vec<Tool>, HandlerError> {
            Err(HandlerError::internal("catalog unavailable"))
        }

        async fn call_tool(&self, _params: ToolCallParams) -> Result<ToolResponse, HandlerError> {
            Err(HandlerError::internal("catalog unavailable"))
        }
    }

    #[async_trait]
    impl ResourceHandler for BrokenCatalog {
        async fn list_resources(&self) -> Result<Vec<Resource>, HandlerError> {
            Err(HandlerError::internal("catalog unavailable"))
        }

        async fn read_resource(
            &self,
            _params: ResourceParams,
        ) -> Result<ResourceResponse, HandlerError> {
            Err(HandlerError::internal("catalog unavailable"))
        }
    }

    #[async_trait]
    impl PromptHandler for BrokenCatalog {
        async fn list_prompts(&self) -> Result<Vec<Prompt>, HandlerError> {
            Err(HandlerError::internal("catalog unavailable"))
        }

        async fn get_prompt(&self, _params: PromptParams) -> Result<PromptResponse, HandlerError> {
            Err(HandlerError::internal("catalog unavailable"))
        }
    }

    fn server_info() -> ServerInfo {
        ServerInfo {
            name: "Coffee Shop Server".to_string(),
            version: "1.0.0".to_string(),
        }
    }

    fn coffee_server() -> McpServer {
        let shop = Arc::new(CoffeeShop::new());
        McpServer::new(server_info(), shop.clone(), shop.clone(), shop)
    }

    fn broken_server() -> McpServer {
        let broken = Arc::new(BrokenCatalog);
        McpServer::new(server_info(), broken.clone(), broken.clone(), broken)
    }

    async fn dispatch(server: &McpServer, method: &str, params: Option<Value>) -> Response {
        let sender = RecordingSender::default();
        let request = Request::new(method, Some(RequestId::from(1)), params);
        server
            .handle_request(request, &sender)
            .await
            .expect("dispatch succeeds");
        sender.only_response()
    }

    #[tokio::test]
    async fn ping_returns_empty_result() {
        let response = dispatch(&coffee_server(), "ping", None).await;

        assert_eq!(response.id, Some(RequestId::from(1)));
        assert_eq!(response.result(), Some(&json!({})));
    }

    #[tokio::test]
    async fn initialize_reports_identity_and_capabilities() {
        let response = dispatch(&coffee_server(), "initialize", Some(json!({}))).await;
        let result = response.result().expect("initialize result");

        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "Coffee Shop Server");
        assert_eq!(result["serverInfo"]["version"], "1.0.0");
        assert_eq!(result["capabilities"]["tools"]["listChanged"], true);
        assert!(result["capabilities"]["resources"].is_object());
        assert!(result["capabilities"]["prompts"].is_object());
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let response = dispatch(&coffee_server(), "tools/delete", None).await;
        let error = response.error().expect("error response");

        assert_eq!(error.code, ErrorCode::MethodNotFound.code());
        assert_eq!(error.message, "Method tools/delete not found");
    }

    #[tokio::test]
    async fn request_id_is_echoed_verbatim() {
        let sender = RecordingSender::default();
        let id = RequestId::String("req-9".to_string());
        coffee_server()
            .handle_request(Request::new("ping", Some(id.clone()), None), &sender)
            .await
            .expect("dispatch succeeds");

        assert_eq!(sender.only_response().id, Some(id));
    }

    #[tokio::test]
    async fn notification_produces_no_response() {
        let sender = RecordingSender::default();
        coffee_server()
            .handle_request(Request::new("tools/list", None, None), &sender)
            .await
            .expect("notification accepted");

        assert!(sender.responses().is_empty());
        assert!(!sender.is_sent());
    }

    #[tokio::test]
    async fn drink_info_returns_one_text_item() {
        let response = dispatch(
            &coffee_server(),
            "tools/call",
            Some(json!({"name": "getDrinkInfo", "arguments": {"name": "Latte"}})),
        )
        .await;
        let content = &response.result().expect("tool result")["content"];

        assert_eq!(content.as_array().map(Vec::len), Some(1));
        assert_eq!(content[0]["type"], "text");
        let drink: Value = serde_json::from_str(content[0]["text"].as_str().expect("text"))
            .expect("drink json");
        assert_eq!(drink["name"], "Latte");
        assert_eq!(drink["price"], 5);
        assert!(drink["description"].is_string());
    }

    #[tokio::test]
    async fn unknown_drink_is_invalid_params_with_handler_message() {
        let response = dispatch(
            &coffee_server(),
            "tools/call",
            Some(json!({"name": "getDrinkInfo", "arguments": {"name": "Cortado"}})),
        )
        .await;
        let error = response.error().expect("error response");

        assert_eq!(error.code, ErrorCode::InvalidParams.code());
        assert!(error.message.contains("drink Cortado not found"));
    }

    #[tokio::test]
    async fn missing_tool_name_is_invalid_params() {
        let response =
            dispatch(&coffee_server(), "tools/call", Some(json!({"arguments": {}}))).await;
        let error = response.error().expect("error response");

        assert_eq!(error.code, ErrorCode::InvalidParams.code());
        assert_eq!(
            error.data,
            Some(json!("name parameter is required and must be a string"))
        );
    }

    #[tokio::test]
    async fn ill_typed_uri_is_invalid_params() {
        let response = dispatch(&coffee_server(), "resources/read", Some(json!({"uri": 7}))).await;

        assert_eq!(
            response.error().map(|error| error.code),
            Some(ErrorCode::InvalidParams.code())
        );
    }

    #[tokio::test]
    async fn menu_resource_contains_every_drink() {
        let response = dispatch(
            &coffee_server(),
            "resources/read",
            Some(json!({"uri": "menu://app"})),
        )
        .await;
        let contents = &response.result().expect("resource result")["contents"];
        let drinks: Vec<Value> = serde_json::from_str(contents[0]["text"].as_str().expect("text"))
            .expect("menu json");

        assert_eq!(contents[0]["uri"], "menu://app");
        assert_eq!(drinks.len(), 3);
    }

    #[tokio::test]
    async fn unknown_resource_is_invalid_params() {
        let response = dispatch(
            &coffee_server(),
            "resources/read",
            Some(json!({"uri": "menu://secret"})),
        )
        .await;

        assert_eq!(
            response.error().map(|error| error.code),
            Some(ErrorCode::InvalidParams.code())
        );
    }

    #[tokio::test]
    async fn prompt_arguments_default_to_empty() {
        let response = dispatch(
            &coffee_server(),
            "prompts/get",
            Some(json!({"name": "drinkDescription"})),
        )
        .await;
        let messages = &response.result().expect("prompt result")["messages"];

        assert_eq!(messages.as_array().map(Vec::len), Some(1));
        assert!(messages[0]["content"]["text"]
            .as_str()
            .expect("prompt text")
            .contains("description of a coffee"));
    }

    #[tokio::test]
    async fn tool_catalog_is_stable_across_calls() {
        let server = coffee_server();
        let first = dispatch(&server, "tools/list", None).await;
        let second = dispatch(&server, "tools/list", None).await;

        assert_eq!(first.result(), second.result());
    }

    #[tokio::test]
    async fn listing_failure_is_internal_error() {
        let server = broken_server();
        for method in ["tools/list", "resources/list", "prompts/list"] {
            let response = dispatch(&server, method, None).await;
            assert_eq!(
                response.error().map(|error| error.code),
                Some(ErrorCode::InternalError.code()),
                "{method}"
            );
        }
    }

    #[tokio::test]
    async fn handler_failure_is_invalid_params() {
        let response = dispatch(
            &broken_server(),
            "prompts/get",
            Some(json!({"name": "drinkRecommendation"})),
        )
        .await;
        let error = response.error().expect("error response");

        assert_eq!(error.code, ErrorCode::InvalidParams.code());
        assert!(error.message.contains("catalog unavailable"));
    }

    #[tokio::test]
    async fn reused_sender_reports_delivery_failure() {
        let server = coffee_server();
        let sender = RecordingSender::default();
        server
            .handle_request(Request::new("ping", Some(RequestId::from(1)), None), &sender)
            .await
            .expect("first dispatch");

        let second = server
            .handle_request(Request::new("ping", Some(RequestId::from(2)), None), &sender)
            .await;

        assert!(matches!(
            second,
            Err(DispatchError::Send(SendError::AlreadySent))
        ));
        assert_eq!(sender.responses().len(), 1);
    }

    #[test]
    fn params_must_be_an_object() {
        assert_eq!(
            parse_tool_call_params(None).expect_err("missing"),
            ParamsError::Missing
        );
        assert_eq!(
            parse_resource_params(Some(&json!(["menu://app"]))).expect_err("array"),
            ParamsError::NotAnObject
        );
    }

    #[test]
    fn non_object_arguments_default_to_empty() {
        let params = parse_prompt_params(Some(&json!({"name": "x", "arguments": "oops"})))
            .expect("params parse");
        assert!(params.arguments.is_empty());
    }
}
