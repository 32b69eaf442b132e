//! The seam between the session manager and a bidirectional streaming channel.
//!
//! A provider crate implements [`RealtimeTransport`]; the session manager only
//! ever sees [`TransportEvent`]s coming in and [`OutboundMessage`]s going out.

use crate::generic_types::{LiveSessionConfig, OutboundMessage, TransportEvent};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Opens realtime channels.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Performs the connection handshake and sends the session setup.
    ///
    /// Resolves once the channel can accept outbound operations. The provider
    /// reports readiness for realtime input with [`TransportEvent::Opened`].
    async fn connect(&self, config: &LiveSessionConfig) -> Result<RealtimeConnection>;
}

/// The outbound half of an open channel.
#[async_trait]
pub trait RealtimeSink: Send {
    async fn send(&mut self, message: OutboundMessage) -> Result<()>;

    /// Closes the channel. Calling it on a closed channel is not an error.
    async fn close(&mut self) -> Result<()>;
}

/// Both halves of a freshly opened channel.
pub struct RealtimeConnection {
    pub sink: Box<dyn RealtimeSink>,
    /// Inbound events, in arrival order. Ends after `Closed` or `Errored`.
    pub events: mpsc::Receiver<TransportEvent>,
}
