//! Wire framing for the signed RPC protocol.
//!
//! Every message is a JSON object with a payload array and a list of hex
//! signatures over the compact JSON encoding of that array:
//!
//! ```text
//! {"req":[<id>,"<method>",<params>,<ts_ms>],"sig":["0x...", ...]}
//! {"res":[<id>,"<method>"|"error",<result>,<ts_ms>],"sig":["0x..."]}
//! ```
//!
//! Server-initiated notifications reuse the `res` shape with `id = 0`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use crate::{crypto::RpcSignature, time::TimestampMillis};

/// Request id reserved for server-initiated notifications.
pub const NOTIFICATION_REQUEST_ID: u64 = 0;

/// Method name used for error responses.
pub const ERROR_METHOD: &str = "error";

/// The signed payload array: `[request_id, method, params, timestamp_ms]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcPayload {
    pub request_id: u64,
    pub method: String,
    pub params: Value,
    pub timestamp: TimestampMillis,
}

impl RpcPayload {
    pub fn new(request_id: u64, method: &str, params: Value, timestamp: TimestampMillis) -> Self {
        Self {
            request_id,
            method: method.to_string(),
            params,
            timestamp,
        }
    }

    /// The canonical bytes signatures are computed over: the compact JSON
    /// encoding of the payload array.
    pub fn to_sign_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl Serialize for RpcPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (
            self.request_id,
            &self.method,
            &self.params,
            self.timestamp,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RpcPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (request_id, method, params, timestamp) =
            <(u64, String, Value, TimestampMillis)>::deserialize(deserializer)?;
        Ok(Self {
            request_id,
            method,
            params,
            timestamp,
        })
    }
}

/// Inbound client frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub req: RpcPayload,
    #[serde(default)]
    pub sig: Vec<RpcSignature>,
}

/// Outbound server frame: response or notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub res: RpcPayload,
    #[serde(default)]
    pub sig: Vec<RpcSignature>,
}

impl RpcResponse {
    pub fn result(
        request_id: u64,
        method: &str,
        params: Value,
        timestamp: TimestampMillis,
    ) -> RpcPayload {
        RpcPayload::new(request_id, method, params, timestamp)
    }

    pub fn error(request_id: u64, message: &str, timestamp: TimestampMillis) -> RpcPayload {
        RpcPayload::new(
            request_id,
            ERROR_METHOD,
            json!({ "error": message }),
            timestamp,
        )
    }

    pub fn notification(method: &str, params: Value, timestamp: TimestampMillis) -> RpcPayload {
        RpcPayload::new(NOTIFICATION_REQUEST_ID, method, params, timestamp)
    }
}
