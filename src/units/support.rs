use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::llm::{
    ChatMessage, GatewayError, GatewayErrorKind, StructuredCall, StructuredGateway,
};

/// Test gateway that replays a scripted sequence of responses.
///
/// Each call pops the next scripted entry; once the script runs dry it keeps
/// returning the configured repeat entry, or a transport error if none is set.
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<StructuredCall, GatewayError>>>,
    repeat: Option<Result<StructuredCall, GatewayError>>,
    calls: AtomicU32,
}

impl ScriptedGateway {
    pub fn new(script: Vec<Result<StructuredCall, GatewayError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Gateway that answers every call with the same response.
    pub fn repeating(response: Result<StructuredCall, GatewayError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            repeat: Some(response),
            calls: AtomicU32::new(0),
        }
    }

    pub fn ok(content: &str) -> Result<StructuredCall, GatewayError> {
        Ok(StructuredCall {
            request_json: r#"{"stub":"request"}"#.to_string(),
            http_status: 200,
            response_json: r#"{"stub":"response"}"#.to_string(),
            extracted_content: content.to_string(),
        })
    }

    pub fn transport_error(message: &str) -> Result<StructuredCall, GatewayError> {
        Err(GatewayError {
            kind: GatewayErrorKind::Transport,
            message: message.to_string(),
            request_json: r#"{"stub":"request"}"#.to_string(),
            http_status: None,
            response_json: "{}".to_string(),
        })
    }

    pub fn http_error(status: u16) -> Result<StructuredCall, GatewayError> {
        Err(GatewayError {
            kind: GatewayErrorKind::Http,
            message: format!("provider status={status}"),
            request_json: r#"{"stub":"request"}"#.to_string(),
            http_status: Some(status),
            response_json: r#"{"error":"stub"}"#.to_string(),
        })
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StructuredGateway for ScriptedGateway {
    async fn call_structured(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _schema_name: &str,
        _schema: serde_json::Value,
    ) -> Result<StructuredCall, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        match &self.repeat {
            Some(response) => response.clone(),
            None => Self::transport_error("scripted gateway exhausted"),
        }
    }
}
