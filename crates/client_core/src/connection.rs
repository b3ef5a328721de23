//! The single logical control channel to the device.
//!
//! A supervisor task owns the websocket. It forwards queued outbound frames, decodes inbound
//! text frames in arrival order into one consumer queue, and reconnects forever according to
//! the [`RetryPolicy`]. Callers never see transport errors; they only observe [`LinkState`].

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use shared::protocol::{Command, Frame};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub type InboundFrames = mpsc::UnboundedReceiver<Frame>;

/// Delay before reconnect attempt `n` is `initial_delay * multiplier^(n-1)`, capped at
/// `max_delay`. Attempts never stop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::immediate()
    }
}

impl RetryPolicy {
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    pub fn exponential(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier: 2.0,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = secs.min(self.max_delay.max(self.initial_delay).as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting { attempt: u32 },
    Connected,
    Closed,
}

/// Cheap handle for queueing commands from anywhere.
#[derive(Debug, Clone)]
pub struct CommandSender {
    outbound: mpsc::UnboundedSender<Frame>,
}

impl CommandSender {
    /// A sender detached from any socket, paired with the receiving end of its queue.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (Self { outbound }, rx)
    }

    /// Queues the command; never blocks and never fails loudly.
    pub fn send(&self, command: Command) {
        let name = command.name.clone();
        if self.outbound.send(Frame::Command(command)).is_err() {
            warn!(command = %name, "control channel is shut down; command dropped");
        } else {
            debug!(command = %name, "queued command");
        }
    }
}

pub struct ConnectionManager {
    ws_url: String,
    policy: RetryPolicy,
    outbound_tx: mpsc::UnboundedSender<Frame>,
    outbound_rx: Option<mpsc::UnboundedReceiver<Frame>>,
    inbound_tx: mpsc::UnboundedSender<Frame>,
    inbound_rx: Option<InboundFrames>,
    link: watch::Sender<LinkState>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn new(ws_url: impl Into<String>, policy: RetryPolicy) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (link, _) = watch::channel(LinkState::Idle);
        let (shutdown, _) = watch::channel(false);
        Self {
            ws_url: ws_url.into(),
            policy,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            inbound_tx,
            inbound_rx: Some(inbound_rx),
            link,
            shutdown,
            task: None,
        }
    }

    /// Registers the single consumer of inbound frames.
    pub fn take_inbound(&mut self) -> ClientResult<InboundFrames> {
        self.inbound_rx.take().ok_or(ClientError::ReceiverTaken)
    }

    /// Starts the supervisor. Calling it again while running is a no-op.
    pub fn connect(&mut self) -> ClientResult<()> {
        if self.task.is_some() {
            return Ok(());
        }
        let outbound = self.outbound_rx.take().ok_or(ClientError::NotRunning)?;
        let supervisor = Supervisor {
            ws_url: self.ws_url.clone(),
            policy: self.policy,
            outbound,
            inbound: self.inbound_tx.clone(),
            link: self.link.clone(),
            shutdown: self.shutdown.subscribe(),
        };
        self.task = Some(tokio::spawn(supervisor.run()));
        Ok(())
    }

    pub fn send(&self, command: Command) {
        self.sender().send(command);
    }

    pub fn sender(&self) -> CommandSender {
        CommandSender {
            outbound: self.outbound_tx.clone(),
        }
    }

    pub fn link_state(&self) -> watch::Receiver<LinkState> {
        self.link.subscribe()
    }

    /// Closes the channel and waits for the supervisor to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.link.send_replace(LinkState::Closed);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum PumpExit {
    Shutdown,
    Disconnected(String),
}

struct Supervisor {
    ws_url: String,
    policy: RetryPolicy,
    outbound: mpsc::UnboundedReceiver<Frame>,
    inbound: mpsc::UnboundedSender<Frame>,
    link: watch::Sender<LinkState>,
    shutdown: watch::Receiver<bool>,
}

impl Supervisor {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            self.link.send_replace(LinkState::Connecting { attempt });
            info!(url = %self.ws_url, attempt, "connecting control channel");

            let connected = tokio::select! {
                _ = self.shutdown.changed() => break,
                result = connect_async(self.ws_url.as_str()) => result,
            };
            match connected {
                Ok((stream, _)) => {
                    attempt = 0;
                    self.link.send_replace(LinkState::Connected);
                    info!(url = %self.ws_url, "control channel connected");
                    match self.pump(stream).await {
                        PumpExit::Shutdown => break,
                        PumpExit::Disconnected(reason) => {
                            self.link.send_replace(LinkState::Connecting { attempt: 1 });
                            warn!(url = %self.ws_url, %reason, "control channel lost; retrying");
                        }
                    }
                }
                Err(err) => {
                    warn!(url = %self.ws_url, attempt, error = %err, "control channel connect failed; retrying");
                }
            }

            let delay = self.policy.delay_for(attempt.max(1));
            if delay.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }
            tokio::select! {
                _ = self.shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.link.send_replace(LinkState::Closed);
        info!(url = %self.ws_url, "control channel closed");
    }

    async fn pump(&mut self, stream: WsStream) -> PumpExit {
        let (mut writer, mut reader) = stream.split();
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    let _ = writer.send(Message::Close(None)).await;
                    return PumpExit::Shutdown;
                }
                frame = self.outbound.recv() => {
                    let Some(frame) = frame else {
                        return PumpExit::Shutdown;
                    };
                    match frame.encode() {
                        Ok(text) => {
                            if let Err(err) = writer.send(Message::Text(text)).await {
                                return PumpExit::Disconnected(err.to_string());
                            }
                        }
                        Err(err) => warn!(error = %err, "failed to encode outbound frame"),
                    }
                }
                message = reader.next() => match message {
                    Some(Ok(Message::Text(text))) => match Frame::decode(&text) {
                        Ok(frame) => {
                            if self.inbound.send(frame).is_err() {
                                debug!("inbound consumer dropped; discarding frame");
                            }
                        }
                        Err(err) => warn!(error = %err, "discarding inbound frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        return PumpExit::Disconnected("closed by peer".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return PumpExit::Disconnected(err.to_string()),
                },
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
