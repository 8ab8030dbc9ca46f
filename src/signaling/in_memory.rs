use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tokio::select;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, trace, warn};

use crate::signaling::peer_id::{PeerId, Recipient};
use crate::signaling::transport::{Signal, SignalEvent, SignalHandler, SignalTransport};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct RoutedSignal {
    from: PeerId,
    signal: Signal,
}
impl RoutedSignal {
    fn is_for(&self, peer: &PeerId) -> bool {
        match &self.signal.to {
            Recipient::All => true,
            Recipient::Peer(to) => to == peer,
        }
    }
}

struct ChannelState {
    sender: broadcast::Sender<RoutedSignal>,
    members: Mutex<FxHashSet<PeerId>>,
}

/// An in-process peer group with the delivery semantics of a real signaling session: broadcasts
///  reach every member *including the sender*, unicasts reach only their target. Signals are
///  dropped for members that fall too far behind.
///
/// This is useful for embedding several endpoints in one process, and for tests.
#[derive(Clone)]
pub struct InMemorySignalChannel {
    state: Arc<ChannelState>,
}

impl Default for InMemorySignalChannel {
    fn default() -> Self {
        InMemorySignalChannel::new()
    }
}

impl InMemorySignalChannel {
    pub fn new() -> InMemorySignalChannel {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> InMemorySignalChannel {
        let (sender, _) = broadcast::channel(capacity);
        InMemorySignalChannel {
            state: Arc::new(ChannelState {
                sender,
                members: Default::default(),
            }),
        }
    }

    /// join the group with a fresh random identity
    pub fn join(&self) -> InMemoryTransport {
        loop {
            if let Ok(transport) = self.join_as(PeerId::random()) {
                return transport;
            }
        }
    }

    pub fn join_as(&self, id: PeerId) -> anyhow::Result<InMemoryTransport> {
        if !self.state.members.lock().insert(id.clone()) {
            return Err(anyhow!("peer {:?} is already a member of the channel", id));
        }
        debug!("peer {:?} joined the channel", id);

        // subscribe on join rather than in the receive loop so no signal sent after joining is missed
        let receiver = self.state.sender.subscribe();
        let (cancel, _) = watch::channel(false);

        Ok(InMemoryTransport {
            myself: id,
            state: self.state.clone(),
            receiver: tokio::sync::Mutex::new(receiver),
            cancel,
        })
    }

    pub fn members(&self) -> Vec<PeerId> {
        let mut result = self.state.members.lock()
            .iter()
            .cloned()
            .collect::<Vec<_>>();
        result.sort();
        result
    }
}

pub struct InMemoryTransport {
    myself: PeerId,
    state: Arc<ChannelState>,
    receiver: tokio::sync::Mutex<broadcast::Receiver<RoutedSignal>>,
    cancel: watch::Sender<bool>,
}

impl Debug for InMemoryTransport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "InMemoryTransport{{myself:{:?}}}", &self.myself)
    }
}

impl Drop for InMemoryTransport {
    fn drop(&mut self) {
        self.state.members.lock().remove(&self.myself);
        debug!("peer {:?} left the channel", self.myself);
    }
}

#[async_trait::async_trait]
impl SignalTransport for InMemoryTransport {
    fn self_id(&self) -> PeerId {
        self.myself.clone()
    }

    async fn send(&self, signal: Signal) -> anyhow::Result<()> {
        if let Recipient::Peer(to) = &signal.to {
            if !self.state.members.lock().contains(to) {
                return Err(anyhow!("peer {:?} is not connected to the channel", to));
            }
        }

        trace!(from = ?self.myself, to = ?signal.to, "sending signal");
        self.state.sender.send(RoutedSignal {
            from: self.myself.clone(),
            signal,
        }).map_err(|_| anyhow!("signaling channel has no members"))?;
        Ok(())
    }

    #[tracing::instrument(skip(handler))]
    async fn recv_loop(&self, handler: Arc<dyn SignalHandler>) -> anyhow::Result<()> {
        let mut receiver = self.receiver.lock().await;
        let mut cancel_receiver = self.cancel.subscribe();
        if *cancel_receiver.borrow_and_update() {
            debug!("receive loop was canceled before it started");
            return Ok(());
        }

        trace!("starting receive loop");

        loop {
            select! {
                r = receiver.recv() => {
                    match r {
                        Ok(routed) => {
                            if routed.is_for(&self.myself) {
                                handler.handle_signal(SignalEvent {
                                    from: routed.from,
                                    signal_type: routed.signal.signal_type,
                                    data: routed.signal.data,
                                }).await;
                            }
                        }
                        Err(RecvError::Lagged(num_skipped)) => {
                            warn!("receive loop lagged behind - {} signals were dropped", num_skipped);
                        }
                        Err(RecvError::Closed) => {
                            return Err(anyhow!("signaling channel was closed"));
                        }
                    }
                }
                _ = cancel_receiver.changed() => break,
            }
        }

        info!("shutting down receive loop");
        Ok(())
    }

    fn cancel_recv_loop(&self) {
        self.cancel.send_replace(true);
    }
}
