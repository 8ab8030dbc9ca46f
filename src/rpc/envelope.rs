use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};

use crate::rpc::call_id::CallId;
use crate::rpc::config::RpcConfig;
use crate::rpc::error::RpcError;

/// The configuration object that travels with a call. The recipient is a local routing
///  instruction and is never transmitted.
///
/// The object is kept as it was received, so a response echoes it unmodified, including keys
///  added by other implementations. `debug` and `timeout` are read from it leniently: a peer
///  sending values of unexpected types still gets an answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WireConfig(Map<String, Value>);

impl WireConfig {
    /// any truthy value counts
    pub fn debug(&self) -> bool {
        self.0.get("debug")
            .map(is_truthy)
            .unwrap_or(false)
    }

    /// in seconds, `0` if it is missing or not a finite number
    pub fn timeout(&self) -> f64 {
        self.0.get("timeout")
            .and_then(Value::as_f64)
            .filter(|t| t.is_finite())
            .unwrap_or(0.0)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for WireConfig {
    fn from(map: Map<String, Value>) -> Self {
        WireConfig(map)
    }
}

impl From<&RpcConfig> for WireConfig {
    fn from(config: &RpcConfig) -> Self {
        // JSON has no representation for non-finite numbers
        let timeout = Number::from_f64(config.timeout)
            .unwrap_or_else(|| Number::from(0u64));

        let mut map = Map::new();
        map.insert("debug".to_string(), Value::Bool(config.debug));
        map.insert("timeout".to_string(), Value::Number(timeout));
        WireConfig(map)
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallEnvelope {
    pub id: CallId,
    pub name: String,
    pub args: Vec<Value>,
    pub config: WireConfig,
}

impl CallEnvelope {
    pub fn new(id: CallId, name: impl Into<String>, args: Vec<Value>, config: &RpcConfig) -> CallEnvelope {
        CallEnvelope {
            id,
            name: name.into(),
            args,
            config: config.into(),
        }
    }

    pub fn encode(&self) -> Result<String, RpcError> {
        encode(&WireCall {
            id: &self.id,
            name: &self.name,
            args: &self.args,
            config: &self.config,
        })
    }
}

/// `outcome` is `Err` with the failure reason for a rejected call.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub id: CallId,
    pub name: String,
    pub config: WireConfig,
    pub outcome: Result<Value, Value>,
}

impl ResponseEnvelope {
    /// a response to the given call, echoing its id, name and configuration
    pub fn answering(call: &CallEnvelope, outcome: Result<Value, Value>) -> ResponseEnvelope {
        ResponseEnvelope {
            id: call.id.clone(),
            name: call.name.clone(),
            config: call.config.clone(),
            outcome,
        }
    }

    pub fn encode(&self) -> Result<String, RpcError> {
        let (result, reason) = match &self.outcome {
            Ok(result) => (Some(result), None),
            Err(reason) => (None, Some(reason)),
        };

        encode(&WireResponse {
            id: &self.id,
            name: &self.name,
            config: &self.config,
            is_response: true,
            result,
            reason,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Call(CallEnvelope),
    Response(ResponseEnvelope),
}

impl Envelope {
    /// Decodes a signal's payload. A payload that is not a valid envelope is an error in its
    ///  own right - it is never treated as a failed call.
    pub fn decode(data: &str) -> Result<Envelope, RpcError> {
        let wire: WireSignal = serde_json::from_str(data)
            .map_err(|e| RpcError::MalformedSignal(e.to_string()))?;

        if wire.is_response {
            // the presence of a reason means failure, even if it is null
            let outcome = match wire.reason {
                Some(reason) => Err(reason),
                None => Ok(wire.result.unwrap_or(Value::Null)),
            };
            Ok(Envelope::Response(ResponseEnvelope {
                id: wire.id,
                name: wire.name,
                config: wire.config,
                outcome,
            }))
        }
        else {
            Ok(Envelope::Call(CallEnvelope {
                id: wire.id,
                name: wire.name,
                args: wire.args,
                config: wire.config,
            }))
        }
    }

    pub fn id(&self) -> &CallId {
        match self {
            Envelope::Call(c) => &c.id,
            Envelope::Response(r) => &r.id,
        }
    }

    pub fn config(&self) -> &WireConfig {
        match self {
            Envelope::Call(c) => &c.config,
            Envelope::Response(r) => &r.config,
        }
    }
}

fn encode(wire: &impl Serialize) -> Result<String, RpcError> {
    serde_json::to_string(wire)
        .map_err(|e| RpcError::MalformedSignal(format!("error encoding envelope: {}", e)))
}

#[derive(Serialize)]
struct WireCall<'a> {
    id: &'a CallId,
    name: &'a str,
    args: &'a [Value],
    config: &'a WireConfig,
}

#[derive(Serialize)]
struct WireResponse<'a> {
    id: &'a CallId,
    name: &'a str,
    config: &'a WireConfig,
    #[serde(rename = "isResponse")]
    is_response: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a Value>,
}

#[derive(Deserialize)]
struct WireSignal {
    id: CallId,
    name: String,
    #[serde(default)]
    args: Vec<Value>,
    #[serde(default, deserialize_with = "config_or_null")]
    config: WireConfig,
    #[serde(default, rename = "isResponse")]
    is_response: bool,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    reason: Option<Value>,
}

/// a `null` configuration is treated like a missing one
fn config_or_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<WireConfig, D::Error> {
    Option::<Map<String, Value>>::deserialize(deserializer)
        .map(|map| WireConfig(map.unwrap_or_default()))
}

/// distinguishes a key that is present with a `null` value from an absent key
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}
