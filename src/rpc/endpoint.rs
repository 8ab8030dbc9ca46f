use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

use crate::rpc::call_id::{CallId, CallIdGenerator};
use crate::rpc::config::{PartialRpcConfig, RpcConfig, RpcEndpointConfig};
use crate::rpc::envelope::{CallEnvelope, Envelope, ResponseEnvelope};
use crate::rpc::error::RpcError;
use crate::rpc::pending_calls::{PendingCall, PendingCalls};
use crate::rpc::resolver::{ExposeTarget, ImplementationResolver, Outcome};
use crate::signaling::peer_id::{PeerId, Recipient};
use crate::signaling::transport::{Signal, SignalEvent, SignalHandler, SignalTransport};

/// An error that has no caller to report it to: a failure sending a response, a signal that
///  could not be decoded, or a response that does not match its call's record.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointFault {
    pub call_id: Option<CallId>,
    pub error: RpcError,
}

/// One side of the RPC relationship, bound to a single peer identity on a signaling channel.
///  Every endpoint can both call remote procedures and serve calls from other peers.
///
/// Calls return immediately, so they must be made from within a tokio runtime: sending and
///  timeouts run as tasks of their own. Inbound signals are handled while [RpcEndpoint::recv] is
///  running, or when the host passes them to [RpcEndpoint::handle_signal].
///
/// Resolved calls are remembered to recognize late or duplicate responses, up to
///  [RpcEndpointConfig::done_call_retention] of them; memory use is bounded by that plus the
///  calls that are still pending.
///
/// Cloning is cheap, clones share the same endpoint.
#[derive(Clone)]
pub struct RpcEndpoint {
    inner: Arc<EndpointInner>,
}

struct EndpointInner {
    myself: PeerId,
    transport: Arc<dyn SignalTransport>,
    config: RpcEndpointConfig,
    call_config: RwLock<PartialRpcConfig>,
    resolver: RwLock<Option<Arc<dyn ImplementationResolver>>>,
    pending_calls: Arc<PendingCalls>,
    call_ids: CallIdGenerator,
    faults: broadcast::Sender<EndpointFault>,
}

impl Debug for RpcEndpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RpcEndpoint{{myself:{:?}}}", &self.inner.myself)
    }
}

impl RpcEndpoint {
    pub fn new(transport: Arc<dyn SignalTransport>) -> RpcEndpoint {
        Self::with_config(transport, RpcEndpointConfig::new())
    }

    pub fn with_config(transport: Arc<dyn SignalTransport>, config: RpcEndpointConfig) -> RpcEndpoint {
        let myself = transport.self_id();
        let (faults, _) = broadcast::channel(config.fault_channel_capacity.max(1));
        let pending_calls = Arc::new(PendingCalls::with_done_retention(config.done_call_retention));

        RpcEndpoint {
            inner: Arc::new(EndpointInner {
                call_ids: CallIdGenerator::new(myself.clone()),
                myself,
                transport,
                call_config: RwLock::new(config.call_defaults.clone()),
                config,
                resolver: Default::default(),
                pending_calls,
                faults,
            }),
        }
    }

    pub fn self_id(&self) -> &PeerId {
        &self.inner.myself
    }

    /// Makes procedures available to other peers, replacing whatever was exposed before.
    pub fn expose(&self, target: impl Into<ExposeTarget>) -> Result<(), RpcError> {
        let target = target.into();
        debug!("exposing {:?}", target);
        let resolver = target.into_resolver()?;
        *self.inner.resolver.write() = Some(resolver);
        Ok(())
    }

    /// Merges the given options into the endpoint-level configuration, which applies to all
    ///  subsequent calls that do not override them.
    pub fn configure(&self, config: PartialRpcConfig) {
        let mut call_config = self.inner.call_config.write();
        *call_config = call_config.overlay(&config);
    }

    pub fn call(&self, name: &str, params: Vec<Value>) -> Result<PendingCall, RpcError> {
        self.call_with(PartialRpcConfig::default(), name, params)
    }

    /// Calls a remote procedure with per-call options that take precedence over the
    ///  endpoint-level configuration.
    pub fn call_with(&self, config: PartialRpcConfig, name: &str, params: Vec<Value>) -> Result<PendingCall, RpcError> {
        if name.is_empty() {
            return Err(RpcError::InvalidCallArguments("the procedure name is empty".to_string()));
        }

        let config = RpcConfig::merged([&*self.inner.call_config.read(), &config]);
        Ok(self.inner.start_call(config, name, params))
    }

    /// Calls a remote procedure based on a positional argument list, either
    ///  `[name, params...]` or `[config, name, params...]`, the config being a JSON object.
    pub fn call_dynamic(&self, args: Vec<Value>) -> Result<PendingCall, RpcError> {
        let mut args = args.into_iter();
        match args.next() {
            Some(Value::String(name)) => {
                self.call_with(PartialRpcConfig::default(), &name, args.collect())
            }
            Some(config @ Value::Object(_)) => {
                match args.next() {
                    Some(Value::String(name)) => {
                        let config = PartialRpcConfig::from_json(&config)?;
                        self.call_with(config, &name, args.collect())
                    }
                    other => Err(RpcError::InvalidCallArguments(format!("expected the procedure name after the configuration, was {:?}", other))),
                }
            }
            other => Err(RpcError::InvalidCallArguments(format!("expected a procedure name or a configuration object, was {:?}", other))),
        }
    }

    /// Runs the transport's receive loop, handling inbound signals until [RpcEndpoint::stop] is
    ///  called.
    #[tracing::instrument]
    pub async fn recv(&self) -> anyhow::Result<()> {
        let handler = ReceivedSignalHandler {
            inner: self.inner.clone(),
        };

        match self.inner.transport.recv_loop(Arc::new(handler)).await {
            Ok(()) => {
                info!("shutting down receiver");
                Ok(())
            }
            Err(e) => {
                error!("error: {}", e);
                Err(e)
            }
        }
    }

    pub fn stop(&self) {
        self.inner.transport.cancel_recv_loop();
    }

    /// Handles a single inbound signal, for hosts that receive signals themselves rather than
    ///  running [RpcEndpoint::recv].
    pub async fn handle_signal(&self, event: SignalEvent) {
        self.inner.on_signal(event).await
    }

    pub fn subscribe_faults(&self) -> broadcast::Receiver<EndpointFault> {
        self.inner.faults.subscribe()
    }

    pub fn num_pending(&self) -> usize {
        self.inner.pending_calls.num_pending()
    }
}

impl EndpointInner {
    fn start_call(&self, config: RpcConfig, name: &str, params: Vec<Value>) -> PendingCall {
        let id = self.call_ids.next_id(name);
        rpc_log!(config.debug, info, call_id = ?id, "calling `{}` with {:?}", name, params);

        let envelope = CallEnvelope::new(id.clone(), name, params, &config);
        let pending = self.pending_calls.register(id.clone(), name, config.debug);

        let data = match envelope.encode() {
            Ok(data) => data,
            Err(e) => {
                error!(call_id = ?id, "{}", e);
                self.pending_calls.settle(&id, Err(e));
                return pending;
            }
        };
        if data.len() > self.config.max_signal_size {
            let msg = format!("signal of {} bytes exceeds the maximum size of {} bytes", data.len(), self.config.max_signal_size);
            rpc_log!(config.debug, error, call_id = ?id, "error sending `{}`: {}", name, msg);
            self.pending_calls.settle(&id, Err(RpcError::TransportSendFailure(msg)));
            return pending;
        }

        if let Some(timeout) = config.timeout_duration() {
            let pending_calls = self.pending_calls.clone();
            let timer_id = id.clone();
            let timer = tokio::spawn(async move {
                sleep(timeout).await;
                pending_calls.settle(&timer_id, Err(RpcError::Timeout));
            });
            self.pending_calls.arm_timer(&id, timer.abort_handle());
        }

        let signal = Signal {
            to: config.to,
            signal_type: self.config.signal_type.clone(),
            data,
        };
        let transport = self.transport.clone();
        let pending_calls = self.pending_calls.clone();
        let name = name.to_string();
        let debug = config.debug;
        tokio::spawn(async move {
            // a send failure may race with a response - whichever comes first wins
            if let Err(e) = transport.send(signal).await {
                rpc_log!(debug, error, call_id = ?id, "error sending `{}`: {}", name, e);
                pending_calls.settle(&id, Err(RpcError::TransportSendFailure(e.to_string())));
            }
        });

        pending
    }

    async fn on_signal(self: &Arc<Self>, event: SignalEvent) {
        if event.from == self.myself {
            trace!("ignoring signal sent by myself");
            return;
        }
        if event.signal_type != self.config.signal_type {
            trace!("ignoring signal of type {:?}", event.signal_type);
            return;
        }

        match Envelope::decode(&event.data) {
            Ok(Envelope::Response(response)) => {
                rpc_log!(response.config.debug(), info, call_id = ?response.id, "receiving `{}` response", response.name);
                if let Err(e) = self.pending_calls.resolve(&response) {
                    error!(call_id = ?response.id, "{}", e);
                    self.report_fault(Some(response.id.clone()), e);
                }
            }
            Ok(Envelope::Call(call)) => {
                rpc_log!(call.config.debug(), info, call_id = ?call.id, "receiving `{}` call", call.name);
                // calls are executed in the background so a slow procedure does not hold up the receive loop
                let inner = self.clone();
                tokio::spawn(async move {
                    inner.on_call(event.from, call).await
                });
            }
            Err(e) => {
                warn!(from = ?event.from, "received a signal without a valid envelope - discarding: {}", e);
                self.report_fault(None, e);
            }
        }
    }

    async fn on_call(&self, from: PeerId, call: CallEnvelope) {
        let debug = call.config.debug();
        let response = match self.execute(&call).await {
            Ok(result) => {
                rpc_log!(debug, info, call_id = ?call.id, "sending response: {}", result);
                ResponseEnvelope::answering(&call, Ok(result))
            }
            Err(e) => {
                rpc_log!(debug, warn, call_id = ?call.id, "sending error: {}", e);
                ResponseEnvelope::answering(&call, Err(e.to_reason()))
            }
        };
        self.send_response(from, response).await;
    }

    async fn execute(&self, call: &CallEnvelope) -> Result<Value, RpcError> {
        let debug = call.config.debug();
        let resolver = self.resolver.read().clone();

        let procedure = panic::catch_unwind(AssertUnwindSafe(|| {
            resolver.and_then(|r| r.get_implementation(&call.name, &call.args))
        })).map_err(|p| RpcError::RemoteExecutionFailure(Value::String(panic_message(p.as_ref()))))?;

        let Some(procedure) = procedure else {
            let e = RpcError::NoImplementation(call.name.clone());
            rpc_log!(debug, error, call_id = ?call.id, "{}", e);
            return Err(e);
        };

        rpc_log!(debug, info, call_id = ?call.id, "executing `{}`", call.name);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| procedure.invoke(call.args.clone())))
            .map_err(|p| RpcError::RemoteExecutionFailure(Value::String(panic_message(p.as_ref()))))?;

        let result = match outcome {
            Outcome::Ready(result) => result,
            Outcome::Deferred(f) => {
                match tokio::spawn(f).await {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => {
                        let msg = panic_message(e.into_panic().as_ref());
                        return Err(RpcError::RemoteExecutionFailure(Value::String(msg)));
                    }
                    Err(e) => {
                        return Err(RpcError::RemoteExecutionFailure(Value::String(e.to_string())));
                    }
                }
            }
        };
        result.map_err(RpcError::RemoteExecutionFailure)
    }

    async fn send_response(&self, to: PeerId, response: ResponseEnvelope) {
        let id = response.id.clone();

        let data = match self.encode_response(response) {
            Ok(data) => data,
            Err(e) => {
                error!(call_id = ?id, "{}", e);
                self.report_fault(Some(id), e);
                return;
            }
        };

        let signal = Signal {
            to: Recipient::Peer(to),
            signal_type: self.config.signal_type.clone(),
            data,
        };
        if let Err(e) = self.transport.send(signal).await {
            error!(call_id = ?id, "error sending response: {}", e);
            self.report_fault(Some(id), RpcError::TransportSendFailure(e.to_string()));
        }
    }

    /// A response that is too big to be sent is replaced by an error response, so the caller
    ///  does not wait in vain.
    fn encode_response(&self, response: ResponseEnvelope) -> Result<String, RpcError> {
        let data = response.encode()?;
        if data.len() <= self.config.max_signal_size {
            return Ok(data);
        }

        warn!(call_id = ?response.id, "response of {} bytes exceeds the maximum signal size - sending an error instead", data.len());
        let reason = format!("response exceeds the maximum signal size of {} bytes", self.config.max_signal_size);
        let response = ResponseEnvelope {
            outcome: Err(Value::String(reason)),
            ..response
        };
        let data = response.encode()?;
        if data.len() > self.config.max_signal_size {
            return Err(RpcError::TransportSendFailure("error response exceeds the maximum signal size".to_string()));
        }
        Ok(data)
    }

    fn report_fault(&self, call_id: Option<CallId>, error: RpcError) {
        // no subscribers is fine, faults are logged where they occur
        let _ = self.faults.send(EndpointFault {
            call_id,
            error,
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    }
    else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    }
    else {
        "procedure panicked".to_string()
    }
}

struct ReceivedSignalHandler {
    inner: Arc<EndpointInner>,
}

#[async_trait::async_trait]
impl SignalHandler for ReceivedSignalHandler {
    async fn handle_signal(&self, event: SignalEvent) {
        self.inner.on_signal(event).await
    }
}
