use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::{watch, RwLock};

use crate::rpc::envelope::Envelope;
use crate::signaling::peer_id::{PeerId, Recipient};
use crate::signaling::transport::{Signal, SignalHandler, SignalTransport};

/// A [SignalTransport] that does not deliver anything: it records sent signals for inspection,
///  and it can be told to fail sending. Inbound signals are fed to the endpoint under test
///  directly.
#[derive(Debug)]
pub struct TrackingSignalTransport {
    myself: PeerId,
    tracker: RwLock<Vec<Signal>>,
    send_failure: RwLock<Option<String>>,
    cancel: watch::Sender<bool>,
}

impl TrackingSignalTransport {
    pub fn new(myself: impl Into<PeerId>) -> Arc<TrackingSignalTransport> {
        let (cancel, _) = watch::channel(false);
        Arc::new(TrackingSignalTransport {
            myself: myself.into(),
            tracker: Default::default(),
            send_failure: Default::default(),
            cancel,
        })
    }

    /// makes all subsequent sends fail with the given message, or succeed for `None`
    pub async fn fail_sends_with(&self, failure: Option<&str>) {
        *self.send_failure.write().await = failure.map(|s| s.to_string());
    }

    /// returns sent signals, clearing the internal buffer
    pub async fn sent_signals(&self) -> Vec<Signal> {
        let mut lock = self.tracker.write().await;
        std::mem::take(&mut *lock)
    }

    /// returns sent signals' recipients and decoded payloads, clearing the internal buffer
    pub async fn sent_envelopes(&self) -> Vec<(Recipient, Envelope)> {
        self.sent_signals().await
            .into_iter()
            .map(|s| match Envelope::decode(&s.data) {
                Ok(envelope) => (s.to, envelope),
                Err(e) => panic!("sent signal is not a valid envelope: {} - {:?}", e, s.data),
            })
            .collect()
    }
}

#[async_trait]
impl SignalTransport for TrackingSignalTransport {
    fn self_id(&self) -> PeerId {
        self.myself.clone()
    }

    async fn send(&self, signal: Signal) -> anyhow::Result<()> {
        if let Some(failure) = self.send_failure.read().await.as_ref() {
            return Err(anyhow!("{}", failure));
        }
        self.tracker.write().await.push(signal);
        Ok(())
    }

    async fn recv_loop(&self, _handler: Arc<dyn SignalHandler>) -> anyhow::Result<()> {
        let mut cancel_receiver = self.cancel.subscribe();
        let _ = cancel_receiver.wait_for(|canceled| *canceled).await;
        Ok(())
    }

    fn cancel_recv_loop(&self) {
        self.cancel.send_replace(true);
    }
}
