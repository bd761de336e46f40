//! JSON-RPC 2.0 envelope used by the WebSocket transport.

use serde::{Deserialize, Serialize};

pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const CONFLICT: i64 = -32000;
pub const NOT_FOUND: i64 = -32001;
pub const SLOW_CONSUMER: i64 = -32002;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: JsonRpcVersion,
    pub id: serde_json::Value,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A server-initiated message carrying no `id` and expecting no response:
/// the event stream rides on these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcNotification {
    pub jsonrpc: JsonRpcVersion,
    pub method: String,
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: JsonRpcVersion,
    pub id: serde_json::Value,
    #[serde(flatten)]
    pub outcome: RpcOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcOutcome {
    Ok { result: serde_json::Value },
    Err { error: RpcError },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Marker type that only (de)serializes the literal string `"2.0"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == "2.0" {
            Ok(JsonRpcVersion)
        } else {
            Err(serde::de::Error::custom(format!("unsupported jsonrpc version {s}")))
        }
    }
}

impl RpcResponse {
    pub fn ok(id: serde_json::Value, result: serde_json::Value) -> Self {
        RpcResponse {
            jsonrpc: JsonRpcVersion,
            id,
            outcome: RpcOutcome::Ok { result },
        }
    }

    pub fn err(id: serde_json::Value, error: RpcError) -> Self {
        RpcResponse {
            jsonrpc: JsonRpcVersion,
            id,
            outcome: RpcOutcome::Err { error },
        }
    }
}

/// Map the orchestrator's error taxonomy onto the wire error codes in §6.1.
impl From<&conclave_domain::Error> for RpcError {
    fn from(e: &conclave_domain::Error) -> Self {
        use conclave_domain::Error::*;
        let code = match e {
            Conflict(_) => CONFLICT,
            NotFound(_) => NOT_FOUND,
            InvalidArgument(_) => INVALID_PARAMS,
            SlowConsumer => SLOW_CONSUMER,
            Transient(_) | Fatal(_) | Io(_) | Json(_) | Config(_) => INTERNAL_ERROR,
        };
        RpcError {
            code,
            message: e.to_string(),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_domain::Error;

    #[test]
    fn conflict_maps_to_dash_32000() {
        let e = Error::Conflict("turn owned by other".into());
        let rpc: RpcError = (&e).into();
        assert_eq!(rpc.code, CONFLICT);
    }

    #[test]
    fn not_found_maps_to_dash_32001() {
        let e = Error::NotFound("conversation".into());
        let rpc: RpcError = (&e).into();
        assert_eq!(rpc.code, NOT_FOUND);
    }

    #[test]
    fn slow_consumer_maps_to_dash_32002() {
        let rpc: RpcError = (&Error::SlowConsumer).into();
        assert_eq!(rpc.code, SLOW_CONSUMER);
    }

    #[test]
    fn version_must_be_2_0() {
        let bad: Result<RpcRequest, _> = serde_json::from_str(
            r#"{"jsonrpc":"1.0","id":1,"method":"getConversation","params":{}}"#,
        );
        assert!(bad.is_err());
    }
}
