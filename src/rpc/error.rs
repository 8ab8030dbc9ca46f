use serde_json::Value;

use crate::rpc::call_id::CallId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcError {
    #[error("expose() must be passed a resolver function, a resolver, or a map of procedures: {0}")]
    InvalidExposeTarget(String),
    #[error("call() must be passed the name of the remote procedure: {0}")]
    InvalidCallArguments(String),
    #[error("No implementation for `{0}`")]
    NoImplementation(String),
    /// the local implementation of an inbound call failed, carrying the failure value that is
    ///  sent back to the caller
    #[error("execution failed: {0}")]
    RemoteExecutionFailure(Value),
    /// the remote peer rejected a call, carrying the reason it reported
    #[error("remote call failed: {0}")]
    Remote(Value),
    #[error("error sending signal: {0}")]
    TransportSendFailure(String),
    #[error("timeout")]
    Timeout,
    #[error("invalid RPC record for {id:?}: {reason}")]
    InvalidRecord { id: CallId, reason: String },
    #[error("malformed signal: {0}")]
    MalformedSignal(String),
    #[error("endpoint was dropped before the call was resolved")]
    EndpointClosed,
}

impl RpcError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout)
    }

    /// The value that is sent back in a response envelope's `reason` field when an inbound
    ///  call fails with this error.
    pub fn to_reason(&self) -> Value {
        match self {
            RpcError::RemoteExecutionFailure(reason) | RpcError::Remote(reason) => reason.clone(),
            other => Value::String(other.to_string()),
        }
    }
}
