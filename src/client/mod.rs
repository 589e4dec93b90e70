//! Reconnecting probe client
//!
//! Connects, sends one probe, waits for one reply, and starts over after the
//! retry policy's delay. Every failure is handled the same way: report it,
//! wait, try again. Only cancellation ends the loop.

mod retry;

pub use retry::{FixedInterval, RetryPolicy};

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::config::{ProbeConfig, ProbeMode, Settings};
use crate::error::{AppError, ProtocolError, TransportError};
use crate::protocol::{Envelope, SessionStart};
use crate::session::Handshake;
use crate::websocket::{ConnectionEvent, ConnectionManager, LossReason};
use crate::Result;

pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// The single message sent right after connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Envelope(Envelope),
    /// Legacy plain-text probe.
    Text(String),
}

impl Probe {
    pub fn from_config(config: &ProbeConfig) -> Self {
        match config.mode {
            ProbeMode::Binary => Probe::Envelope(
                SessionStart::new(config.session_id.clone(), config.api_version.clone()).into(),
            ),
            ProbeMode::Text => Probe::Text(config.text.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeReply {
    Envelope(Envelope),
    Text(String),
}

/// Result of one probe cycle, as seen by an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Answered { attempt: u64, reply: ProbeReply },
    Failed { attempt: u64, error: String },
}

pub struct ProbeClient {
    target: Url,
    probe: Probe,
    receive_timeout: Duration,
    retry: Box<dyn RetryPolicy>,
    handshake: Arc<Handshake>,
    observer: Option<mpsc::UnboundedSender<ProbeOutcome>>,
}

impl ProbeClient {
    pub fn new(target: Url, probe: Probe, retry_interval: Duration) -> Self {
        Self {
            target,
            probe,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            retry: Box::new(FixedInterval(retry_interval)),
            // the probing side hosts no sessions of its own
            handshake: Arc::new(Handshake::new(Vec::<String>::new(), 0)),
            observer: None,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let target = Url::parse(&settings.client.url)?;
        Ok(Self::new(
            target,
            Probe::from_config(&settings.probe),
            settings.client.retry_interval(),
        )
        .with_receive_timeout(settings.client.receive_timeout()))
    }

    pub fn with_receive_timeout(mut self, receive_timeout: Duration) -> Self {
        self.receive_timeout = receive_timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry = Box::new(policy);
        self
    }

    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<ProbeOutcome>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Probe forever. Returns only with [`AppError::Cancelled`].
    pub async fn run(&self, cancel: CancellationToken) -> Result<Infallible> {
        let mut attempt: u64 = 0;
        let mut consecutive_failures: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            attempt += 1;

            match self.probe_once(&cancel).await {
                Ok(reply) => {
                    consecutive_failures = 0;
                    info!(attempt, "Probe to {} answered: {:?}", self.target, reply);
                    self.report(ProbeOutcome::Answered { attempt, reply });
                }
                Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                Err(e) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    warn!(attempt, "Probe to {} failed: {}", self.target, e);
                    self.report(ProbeOutcome::Failed {
                        attempt,
                        error: e.to_string(),
                    });
                }
            }

            let delay = self.retry.delay(consecutive_failures);
            tokio::select! {
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn probe_once(&self, cancel: &CancellationToken) -> Result<ProbeReply> {
        let connection = ConnectionManager::new(self.handshake.clone());
        let mut events = tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            events = connection.connect(&self.target) => events?,
        };

        let result = self.exchange(&connection, &mut events, cancel).await;
        connection.close().await;
        result
    }

    async fn exchange(
        &self,
        connection: &ConnectionManager,
        events: &mut mpsc::UnboundedReceiver<ConnectionEvent>,
        cancel: &CancellationToken,
    ) -> Result<ProbeReply> {
        match &self.probe {
            Probe::Envelope(envelope) => connection.send(envelope).await?,
            Probe::Text(text) => connection.send_text(text).await?,
        }

        let event = tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            event = tokio::time::timeout(self.receive_timeout, events.recv()) => {
                event.map_err(|_| TransportError::ReceiveTimeout(self.receive_timeout))?
            }
        };

        match event {
            Some(ConnectionEvent::Envelope(Envelope::SessionReject(reject))) => {
                Err(ProtocolError::SessionRejected {
                    reason: reject.reason,
                    detail: reject.detail,
                }
                .into())
            }
            Some(ConnectionEvent::Envelope(envelope)) => Ok(ProbeReply::Envelope(envelope)),
            Some(ConnectionEvent::Text(text)) => Ok(ProbeReply::Text(text)),
            Some(ConnectionEvent::ConnectionLost(LossReason::Decode(e))) => Err(e.into()),
            Some(ConnectionEvent::ConnectionLost(reason)) => {
                Err(TransportError::ConnectionLost(reason.to_string()).into())
            }
            None => Err(TransportError::ConnectionLost("event stream ended".to_string()).into()),
        }
    }

    fn report(&self, outcome: ProbeOutcome) {
        if let Some(observer) = &self.observer {
            let _ = observer.send(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::net::TcpListener;

    fn probe() -> Probe {
        Probe::Envelope(SessionStart::new("mysession", "1.0").into())
    }

    #[test]
    fn test_probe_from_config() {
        let mut config = ProbeConfig {
            mode: ProbeMode::Binary,
            session_id: "s1".to_string(),
            api_version: "1.0".to_string(),
            text: "Hello world!".to_string(),
        };
        assert_eq!(
            Probe::from_config(&config),
            Probe::Envelope(SessionStart::new("s1", "1.0").into())
        );

        config.mode = ProbeMode::Text;
        assert_eq!(Probe::from_config(&config), Probe::Text("Hello world!".to_string()));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    // read and never answer
                    while let Some(Ok(_)) = ws.next().await {}
                });
            }
        });

        let (tx, mut outcomes) = mpsc::unbounded_channel();
        let client = ProbeClient::new(
            Url::parse(&format!("ws://{}", addr)).unwrap(),
            probe(),
            Duration::from_millis(20),
        )
        .with_receive_timeout(Duration::from_millis(100))
        .with_observer(tx);

        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { client.run(cancel).await }
        });

        let outcome = tokio::time::timeout(Duration::from_secs(5), outcomes.recv())
            .await
            .unwrap()
            .unwrap();
        match outcome {
            ProbeOutcome::Failed { attempt, error } => {
                assert_eq!(attempt, 1);
                assert!(error.contains("No reply"), "unexpected error: {}", error);
            }
            other => panic!("expected a failure, got {:?}", other),
        }

        cancel.cancel();
        let result = run.await.unwrap();
        assert!(matches!(result, Err(AppError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_during_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            // hold the socket open but never answer the upgrade request
            let (stream, _) = listener.accept().await.unwrap();
            let _ = accepted_tx.send(());
            tokio::time::sleep(Duration::from_secs(3600)).await;
            drop(stream);
        });

        let (tx, mut outcomes) = mpsc::unbounded_channel();
        let client = ProbeClient::new(
            Url::parse(&format!("ws://{}", addr)).unwrap(),
            probe(),
            Duration::from_millis(20),
        )
        .with_observer(tx);

        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { client.run(cancel).await }
        });

        tokio::time::timeout(Duration::from_secs(5), accepted_rx.recv())
            .await
            .unwrap()
            .unwrap();
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("connect did not observe cancellation")
            .unwrap();
        assert!(matches!(result, Err(AppError::Cancelled)));
        assert!(outcomes.try_recv().is_err(), "cancellation is not a probe outcome");
    }

    #[tokio::test]
    async fn test_cancel_while_awaiting_reply_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (probed_tx, mut probed_rx) = mpsc::unbounded_channel();
        let peer = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut saw_close = false;
            while let Some(Ok(message)) = ws.next().await {
                if message.is_close() {
                    saw_close = true;
                    break;
                }
                // never reply
                let _ = probed_tx.send(());
            }
            saw_close
        });

        let client = ProbeClient::new(
            Url::parse(&format!("ws://{}", addr)).unwrap(),
            probe(),
            Duration::from_millis(20),
        )
        .with_receive_timeout(Duration::from_secs(3600));

        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { client.run(cancel).await }
        });

        tokio::time::timeout(Duration::from_secs(5), probed_rx.recv())
            .await
            .unwrap()
            .unwrap();
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("receive did not observe cancellation")
            .unwrap();
        assert!(matches!(result, Err(AppError::Cancelled)));

        let saw_close = tokio::time::timeout(Duration::from_secs(5), peer)
            .await
            .unwrap()
            .unwrap();
        assert!(saw_close, "connection was not closed on cancellation");
    }

    #[tokio::test]
    async fn test_cancel_during_retry_wait() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut outcomes) = mpsc::unbounded_channel();
        let client = ProbeClient::new(
            Url::parse(&format!("ws://{}", addr)).unwrap(),
            probe(),
            Duration::from_secs(3600),
        )
        .with_observer(tx);

        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { client.run(cancel).await }
        });

        // first attempt fails, then the loop sits in its hour-long wait
        let outcome = tokio::time::timeout(Duration::from_secs(5), outcomes.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, ProbeOutcome::Failed { attempt: 1, .. }));

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("loop did not observe cancellation")
            .unwrap();
        assert!(matches!(result, Err(AppError::Cancelled)));
    }
}
