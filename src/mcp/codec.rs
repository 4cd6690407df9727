//! JSON-RPC 2.0 codec for the MCP wire protocol (C1).
//!
//! Pure frame/parse: no I/O lives here. Transports (`transports::stdio`,
//! `transports::sse`) feed bytes in and pull frames out; the Tool Client
//! (`client`) drives requests/responses through this codec.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::CodecError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC error codes used when this side originates an error
/// frame (e.g. in response to a malformed inbound request).
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// A request id. MCP ids are numbers in this implementation; string ids
/// from a peer are accepted and preserved for round-tripping but this side
/// only ever generates numeric ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

/// Monotonic per-connection id generator.
#[derive(Debug, Default)]
pub struct IdGenerator {
    next: AtomicI64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
        }
    }

    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// An outbound or inbound JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC notification: a request with no `id`, no reply expected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }

    /// The `$/cancelRequest` notification used to cancel an in-flight call.
    pub fn cancel_request(id: &RequestId) -> Self {
        Self::new(
            "$/cancelRequest",
            Some(serde_json::json!({ "id": id })),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RequestId, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcErrorObject {
                code,
                message: message.into(),
                data,
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A decoded inbound frame: either a response/error keyed by id, or a
/// notification pushed by the server with no id (e.g. progress events).
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

/// Parse one line/body of text into a single JSON-RPC frame.
///
/// Malformed JSON surfaces `CodecError::ProtocolFraming`. Valid JSON that
/// lacks `jsonrpc`/id-or-method in the right shape surfaces
/// `CodecError::ProtocolShape`. Neither is fatal to the connection; the
/// caller may continue with the next frame.
pub fn decode_frame(raw: &str) -> Result<InboundFrame, CodecError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CodecError::ProtocolShape {
            message: "empty frame".to_string(),
        });
    }

    let value: Value = serde_json::from_str(trimmed).map_err(|e| CodecError::ProtocolFraming {
        message: e.to_string(),
    })?;

    let obj = value.as_object().ok_or_else(|| CodecError::ProtocolShape {
        message: "frame is not a JSON object".to_string(),
    })?;

    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(CodecError::ProtocolShape {
            message: "missing or wrong jsonrpc version".to_string(),
        });
    }

    if obj.contains_key("id") {
        let response: JsonRpcResponse =
            serde_json::from_value(value).map_err(|e| CodecError::ProtocolShape {
                message: e.to_string(),
            })?;
        Ok(InboundFrame::Response(response))
    } else if obj.contains_key("method") {
        let notification: JsonRpcNotification =
            serde_json::from_value(value).map_err(|e| CodecError::ProtocolShape {
                message: e.to_string(),
            })?;
        Ok(InboundFrame::Notification(notification))
    } else {
        Err(CodecError::ProtocolShape {
            message: "frame has neither id nor method".to_string(),
        })
    }
}

/// Serialize a request to its single-line wire form (no trailing newline;
/// transports append their own frame delimiter).
pub fn encode_request(req: &JsonRpcRequest) -> Result<String, CodecError> {
    serde_json::to_string(req).map_err(|e| CodecError::ProtocolFraming {
        message: e.to_string(),
    })
}

pub fn encode_notification(note: &JsonRpcNotification) -> Result<String, CodecError> {
    serde_json::to_string(note).map_err(|e| CodecError::ProtocolFraming {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_generator_is_monotonic() {
        let gen = IdGenerator::new();
        let a = gen.next_id();
        let b = gen.next_id();
        assert_eq!(a, RequestId::Number(1));
        assert_eq!(b, RequestId::Number(2));
    }

    #[test]
    fn decode_malformed_json_is_protocol_framing() {
        let err = decode_frame("{not json").unwrap_err();
        assert!(matches!(err, CodecError::ProtocolFraming { .. }));
    }

    #[test]
    fn decode_missing_jsonrpc_is_protocol_shape() {
        let err = decode_frame(r#"{"id":1,"result":{}}"#).unwrap_err();
        assert!(matches!(err, CodecError::ProtocolShape { .. }));
    }

    #[test]
    fn decode_response_with_id() {
        let frame = decode_frame(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#).unwrap();
        match frame {
            InboundFrame::Response(r) => {
                assert_eq!(r.id, RequestId::Number(1));
                assert!(!r.is_error());
            }
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn decode_error_response() {
        let frame = decode_frame(
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"no such method"}}"#,
        )
        .unwrap();
        match frame {
            InboundFrame::Response(r) => {
                assert!(r.is_error());
                assert_eq!(r.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
            }
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn decode_notification_without_id() {
        let frame =
            decode_frame(r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{}}"#)
                .unwrap();
        match frame {
            InboundFrame::Notification(n) => assert_eq!(n.method, "notifications/progress"),
            _ => panic!("expected notification"),
        }
    }

    #[test]
    fn decode_neither_id_nor_method_is_shape_error() {
        let err = decode_frame(r#"{"jsonrpc":"2.0","foo":"bar"}"#).unwrap_err();
        assert!(matches!(err, CodecError::ProtocolShape { .. }));
    }

    #[test]
    fn cancel_notification_carries_target_id() {
        let note = JsonRpcNotification::cancel_request(&RequestId::Number(7));
        assert_eq!(note.method, "$/cancelRequest");
        assert_eq!(note.params.unwrap()["id"], serde_json::json!(7));
    }

    #[test]
    fn encode_then_decode_request_round_trip_kind() {
        let gen = IdGenerator::new();
        let req = JsonRpcRequest::new(gen.next_id(), "tools/list", None);
        let encoded = encode_request(&req).unwrap();
        assert!(encoded.contains("\"method\":\"tools/list\""));
    }
}
