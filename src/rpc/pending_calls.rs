use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, error, trace};

use crate::rpc::call_id::CallId;
use crate::rpc::envelope::ResponseEnvelope;
use crate::rpc::error::RpcError;

pub type CallResult = Result<Value, RpcError>;

/// The caller's side of an outstanding call: a future that resolves exactly once, with the
///  remote result or with the first failure that occurred.
///
/// Dropping it does not cancel the call, the outcome is just discarded.
#[derive(Debug)]
pub struct PendingCall {
    id: CallId,
    receiver: oneshot::Receiver<CallResult>,
}

impl PendingCall {
    pub fn id(&self) -> &CallId {
        &self.id
    }
}

impl Future for PendingCall {
    type Output = CallResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(RpcError::EndpointClosed)))
    }
}

struct PendingEntry {
    name: String,
    debug: bool,
    reply: oneshot::Sender<CallResult>,
    timer: Option<AbortHandle>,
}

enum CallRecord {
    Pending(PendingEntry),
    Done,
}

/// What happened to an attempt at resolving a call.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Resolution {
    /// this attempt resolved the call
    Settled,
    /// the call was resolved before, the attempt had no effect
    AlreadyResolved,
    /// no call with this id was registered here, or its record was evicted; the attempt had no
    ///  effect
    UnknownCall,
}

/// Bookkeeping for calls awaiting a response. Every record goes from `Pending` to `Done` exactly
///  once, and the transition happens under the lock: concurrent attempts at resolving the same
///  call (a response, a send failure, a timer) race safely, and only the first one has an effect.
///
/// `Done` records are kept so that late or duplicate responses can be told apart from
///  responses to calls that never existed. Only the most recent `done_retention` of them are
///  kept, older ones are evicted, and a late response to an evicted call is treated like one
///  for an unknown call: it has no effect either way.
pub struct PendingCalls {
    records: Mutex<Records>,
    done_retention: usize,
}

#[derive(Default)]
struct Records {
    calls: FxHashMap<CallId, CallRecord>,
    done_order: VecDeque<CallId>,
}

impl Default for PendingCalls {
    fn default() -> Self {
        PendingCalls::new()
    }
}

impl PendingCalls {
    pub const DEFAULT_DONE_RETENTION: usize = 4096;

    pub fn new() -> PendingCalls {
        Self::with_done_retention(Self::DEFAULT_DONE_RETENTION)
    }

    pub fn with_done_retention(done_retention: usize) -> PendingCalls {
        PendingCalls {
            records: Default::default(),
            done_retention,
        }
    }

    pub fn register(&self, id: CallId, name: &str, debug: bool) -> PendingCall {
        let (reply, receiver) = oneshot::channel();

        let prev = self.records.lock().calls.insert(id.clone(), CallRecord::Pending(PendingEntry {
            name: name.to_string(),
            debug,
            reply,
            timer: None,
        }));
        if prev.is_some() {
            error!(call_id = ?id, "registered a call id that was used before - this is a bug");
        }

        PendingCall {
            id,
            receiver,
        }
    }

    /// Attaches a timeout timer to a pending call. It is aborted when the call is resolved, or
    ///  right away if the call is not pending anymore.
    pub fn arm_timer(&self, id: &CallId, timer: AbortHandle) {
        if let Some(CallRecord::Pending(entry)) = self.records.lock().calls.get_mut(id) {
            entry.timer = Some(timer);
            return;
        }
        timer.abort();
    }

    /// Resolves a pending call with the given outcome - a no-op if there is no such call or it
    ///  was resolved before.
    pub fn settle(&self, id: &CallId, outcome: CallResult) -> Resolution {
        if let Ok(Some(entry)) = self.take_pending(id, None) {
            if let Err(e) = &outcome {
                rpc_log!(entry.debug, warn, call_id = ?id, "rejecting RPC with {}", e);
            }
            Self::deliver(id, entry, outcome);
            return Resolution::Settled;
        }

        if self.records.lock().calls.contains_key(id) {
            trace!(call_id = ?id, "RPC already resolved - ignoring {:?}", outcome);
            Resolution::AlreadyResolved
        }
        else {
            trace!(call_id = ?id, "no RPC with such id - ignoring {:?}", outcome);
            Resolution::UnknownCall
        }
    }

    /// Resolves a pending call based on a response from the remote peer: with the response's
    ///  reason if there is one, with its result otherwise.
    ///
    /// A response that does not fit the record it claims to resolve means that the two sides are
    ///  out of sync. That is reported as an error, and the pending call is left untouched.
    pub fn resolve(&self, response: &ResponseEnvelope) -> Result<Resolution, RpcError> {
        let id = &response.id;
        let debug = response.config.debug();

        let resolution = match self.take_pending(id, Some(&response.name))? {
            Some(entry) => {
                match &response.outcome {
                    Ok(result) => rpc_log!(entry.debug || debug, info, call_id = ?id, "resolving RPC with {}", result),
                    Err(reason) => rpc_log!(entry.debug || debug, error, call_id = ?id, "rejecting RPC with {}", reason),
                }
                let outcome = response.outcome.clone().map_err(RpcError::Remote);
                Self::deliver(id, entry, outcome);
                Resolution::Settled
            }
            None => {
                if self.records.lock().calls.contains_key(id) {
                    rpc_log!(debug, warn, call_id = ?id, "RPC already resolved - ignoring");
                    Resolution::AlreadyResolved
                }
                else {
                    rpc_log!(debug, warn, call_id = ?id, "no RPC with such id");
                    Resolution::UnknownCall
                }
            }
        };
        Ok(resolution)
    }

    pub fn num_pending(&self) -> usize {
        self.records.lock()
            .calls
            .values()
            .filter(|r| matches!(r, CallRecord::Pending(_)))
            .count()
    }

    pub fn is_pending(&self, id: &CallId) -> bool {
        matches!(self.records.lock().calls.get(id), Some(CallRecord::Pending(_)))
    }

    /// the transition `Pending -> Done`, returning the entry if this was the call that made it
    fn take_pending(&self, id: &CallId, expected_name: Option<&str>) -> Result<Option<PendingEntry>, RpcError> {
        let mut records = self.records.lock();
        let Some(record) = records.calls.get_mut(id) else {
            return Ok(None);
        };

        if let (CallRecord::Pending(entry), Some(expected_name)) = (&*record, expected_name) {
            if entry.name != expected_name {
                return Err(RpcError::InvalidRecord {
                    id: id.clone(),
                    reason: format!("record is for `{}`, response is for `{}`", entry.name, expected_name),
                });
            }
        }

        match std::mem::replace(record, CallRecord::Done) {
            CallRecord::Pending(entry) => {
                records.mark_done(id, self.done_retention);
                Ok(Some(entry))
            }
            CallRecord::Done => Ok(None),
        }
    }

    fn deliver(id: &CallId, entry: PendingEntry, outcome: CallResult) {
        if let Some(timer) = entry.timer {
            timer.abort();
        }
        if entry.reply.send(outcome).is_err() {
            debug!(call_id = ?id, "caller is not waiting for the outcome anymore - discarding it");
        }
    }
}

impl Records {
    fn mark_done(&mut self, id: &CallId, done_retention: usize) {
        self.done_order.push_back(id.clone());
        while self.done_order.len() > done_retention {
            if let Some(evicted) = self.done_order.pop_front() {
                self.calls.remove(&evicted);
            }
        }
    }
}
