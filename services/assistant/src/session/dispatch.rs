//! Routes tool calls from the engine to host handlers.
//!
//! Every call yields exactly one [`ToolResponse`] with the call's `id`, even
//! when the tool is unknown, the handler fails, or the handler panics.

use futures::FutureExt;
use jarvis_core::tools::{ToolCall, ToolName, ToolResponse};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{info, warn};

/// A host action behind one tool name.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    /// Runs the action. `Null` means "done, nothing to report".
    async fn call(&self, args: Value) -> anyhow::Result<Value>;
}

#[derive(Clone, Default)]
pub struct ToolDispatcher {
    handlers: HashMap<ToolName, Arc<dyn ToolHandler>>,
}

impl ToolDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, tool: ToolName, handler: impl ToolHandler + 'static) -> Self {
        self.handlers.insert(tool, Arc::new(handler));
        self
    }

    pub fn is_registered(&self, tool: ToolName) -> bool {
        self.handlers.contains_key(&tool)
    }

    pub async fn dispatch(&self, call: ToolCall) -> ToolResponse {
        let tool = match call.name.parse::<ToolName>() {
            Ok(tool) => tool,
            Err(unknown) => {
                warn!(id = %call.id, "{unknown}");
                return ToolResponse::error(&call, unknown.to_string());
            }
        };

        let Some(handler) = self.handlers.get(&tool).cloned() else {
            info!(id = %call.id, %tool, "No handler registered; acknowledging.");
            return ToolResponse::result(&call, json!({ "result": "ok" }));
        };

        info!(id = %call.id, %tool, args = %call.args, "Running tool.");
        let outcome = AssertUnwindSafe(handler.call(call.args.clone()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => ToolResponse::result(&call, wrap_result(value)),
            Ok(Err(e)) => {
                warn!(id = %call.id, %tool, "Tool failed: {e:#}");
                ToolResponse::error(&call, format!("Tool execution failed: {e}"))
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!(id = %call.id, %tool, "Tool panicked: {reason}");
                ToolResponse::error(&call, format!("Tool execution failed: {reason}"))
            }
        }
    }
}

fn wrap_result(value: Value) -> Value {
    match value {
        Value::Null => json!({ "result": "ok" }),
        Value::Object(_) => value,
        other => json!({ "result": other }),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: format!("id-{name}"),
            name: name.to_string(),
            args,
        }
    }

    struct Panicking;

    #[async_trait::async_trait]
    impl ToolHandler for Panicking {
        async fn call(&self, _args: Value) -> anyhow::Result<Value> {
            panic!("camera driver crashed");
        }
    }

    #[tokio::test]
    async fn test_handler_result_is_wrapped() {
        let mut handler = MockToolHandler::new();
        handler
            .expect_call()
            .withf(|args| args["query"] == "lofi beats")
            .times(1)
            .returning(|_| Ok(json!("Opened YouTube")));
        let dispatcher = ToolDispatcher::new().register(ToolName::PlayYoutube, handler);

        let response = dispatcher
            .dispatch(call("play_youtube", json!({ "query": "lofi beats" })))
            .await;
        assert_eq!(response.id, "id-play_youtube");
        assert_eq!(response.name, "play_youtube");
        assert_eq!(response.response, json!({ "result": "Opened YouTube" }));
    }

    #[tokio::test]
    async fn test_object_results_pass_through_and_null_means_ok() {
        let mut object = MockToolHandler::new();
        object.expect_call().returning(|_| Ok(json!({ "camera": "back" })));
        let mut null = MockToolHandler::new();
        null.expect_call().returning(|_| Ok(Value::Null));
        let dispatcher = ToolDispatcher::new()
            .register(ToolName::SwitchCamera, object)
            .register(ToolName::ResetMirror, null);

        let switched = dispatcher.dispatch(call("switch_camera", json!({}))).await;
        assert_eq!(switched.response, json!({ "camera": "back" }));
        let reset = dispatcher.dispatch(call("reset_mirror", json!({}))).await;
        assert_eq!(reset.response, json!({ "result": "ok" }));
    }

    #[tokio::test]
    async fn test_failing_handler_yields_error_response() {
        let mut handler = MockToolHandler::new();
        handler
            .expect_call()
            .times(1)
            .returning(|_| Err(anyhow!("no second camera")));
        let dispatcher = ToolDispatcher::new().register(ToolName::SwitchCamera, handler);

        let response = dispatcher.dispatch(call("switch_camera", json!({}))).await;
        assert!(response.is_error());
        assert_eq!(
            response.response,
            json!({ "error": "Tool execution failed: no second camera" })
        );
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let dispatcher = ToolDispatcher::new().register(ToolName::SwitchCamera, Panicking);
        let response = dispatcher.dispatch(call("switch_camera", json!({}))).await;
        assert_eq!(response.id, "id-switch_camera");
        assert_eq!(
            response.response,
            json!({ "error": "Tool execution failed: camera driver crashed" })
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_yields_error_response() {
        let dispatcher = ToolDispatcher::new();
        let response = dispatcher.dispatch(call("launch_rocket", json!({}))).await;
        assert_eq!(response.id, "id-launch_rocket");
        assert_eq!(response.response, json!({ "error": "Unknown tool: launch_rocket" }));
    }

    #[tokio::test]
    async fn test_unregistered_tool_is_acknowledged() {
        let dispatcher = ToolDispatcher::new();
        assert!(!dispatcher.is_registered(ToolName::ResetMirror));
        let response = dispatcher.dispatch(call("reset_mirror", json!({}))).await;
        assert_eq!(response.response, json!({ "result": "ok" }));
    }
}
