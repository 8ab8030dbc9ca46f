use std::sync::Arc;

#[cfg(test)] use mockall::automock;

use crate::signaling::peer_id::{PeerId, Recipient};

/// An outbound signal. The payload is opaque to the transport.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Signal {
    pub to: Recipient,
    pub signal_type: String,
    pub data: String,
}

/// An inbound signal as delivered by the transport, tagged with the sender's identity.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SignalEvent {
    pub from: PeerId,
    pub signal_type: String,
    pub data: String,
}

/// The signaling channel shared by a group of peers. Implementations provide best-effort
///  delivery only: no acknowledgement, no ordering across signals, no retries.
///
/// NB: A broadcast signal is delivered to *every* peer on the channel, including the sender.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait SignalTransport: Sync + Send + 'static {
    fn self_id(&self) -> PeerId;

    /// Hands the signal to the channel. The returned result is the channel's completion
    ///  report, it does not mean the signal was received by anyone.
    async fn send(&self, signal: Signal) -> anyhow::Result<()>;

    async fn recv_loop(&self, handler: Arc<dyn SignalHandler>) -> anyhow::Result<()>;

    fn cancel_recv_loop(&self);
}


/// This trait decouples the transport from what happens to a signal once it is received.
///
/// It is passed around as an `Arc<dyn ...>` to minimize dependencies of [SignalTransport]
///  implementations.
#[async_trait::async_trait]
pub trait SignalHandler: Sync + Send {
    async fn handle_signal(&self, event: SignalEvent);
}
