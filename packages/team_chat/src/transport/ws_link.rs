use std::collections::VecDeque;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Link, LinkEvent, LinkEventKind, LinkFrame};
use crate::error::TransportError;

/// Bounded exponential backoff between connection attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let factor = 1u32 << failures.saturating_sub(1).min(16);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// A [`Link`] over tokio-tungstenite. Each `open` spawns one task that owns
/// the socket, reconnects per [`ReconnectPolicy`], and reports on `events`.
/// Frames queued while the socket is down are held and sent after the next
/// open; when the task gives up they are handed back in the `GaveUp` event.
///
/// Must be used from inside a tokio runtime.
pub struct WsLink {
    policy: ReconnectPolicy,
    events: mpsc::UnboundedSender<LinkEvent>,
    active: Option<ActiveLink>,
}

struct ActiveLink {
    outbound: mpsc::UnboundedSender<LinkFrame>,
    cancel: CancellationToken,
}

impl WsLink {
    pub fn new(policy: ReconnectPolicy, events: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self {
            policy,
            events,
            active: None,
        }
    }

    /// A link together with the receiving end of its event channel.
    pub fn channel(policy: ReconnectPolicy) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(policy, tx), rx)
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }
}

impl Link for WsLink {
    fn open(&mut self, url: &str, generation: u64) {
        self.close();

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = LinkTask {
            url: url.to_string(),
            generation,
            policy: self.policy.clone(),
            events: self.events.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(task.run(outbound_rx));

        self.active = Some(ActiveLink {
            outbound: outbound_tx,
            cancel,
        });
    }

    fn send(&mut self, frame: LinkFrame) -> Result<(), TransportError> {
        let active = self.active.as_ref().ok_or(TransportError::NotConnected)?;
        active
            .outbound
            .send(frame)
            .map_err(|_| TransportError::LinkClosed)
    }

    fn close(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        self.close();
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum SessionEnd {
    Cancelled,
    Dropped(String),
}

struct LinkTask {
    url: String,
    generation: u64,
    policy: ReconnectPolicy,
    events: mpsc::UnboundedSender<LinkEvent>,
    cancel: CancellationToken,
}

impl LinkTask {
    /// Returns false once nobody is listening any more.
    fn emit(&self, kind: LinkEventKind) -> bool {
        self.events
            .send(LinkEvent::new(self.generation, kind))
            .is_ok()
    }

    async fn run(self, mut outbound: mpsc::UnboundedReceiver<LinkFrame>) {
        // Frames taken off `outbound` whose write failed; resent first.
        let mut unsent = VecDeque::new();
        let mut failures = 0u32;
        loop {
            if !self.emit(LinkEventKind::Connecting {
                attempt: failures + 1,
            }) {
                return;
            }

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = tokio_tungstenite::connect_async(self.url.as_str()) => result,
            };

            let error = match connected {
                Ok((socket, _)) => {
                    info!(generation = self.generation, "websocket open");
                    failures = 0;
                    if !self.emit(LinkEventKind::Opened) {
                        return;
                    }
                    match self.pump(socket, &mut outbound, &mut unsent).await {
                        SessionEnd::Cancelled => return,
                        SessionEnd::Dropped(error) => error,
                    }
                }
                Err(e) => {
                    let e = TransportError::from(e);
                    if !e.is_retryable() {
                        self.give_up(e.to_string(), unsent, outbound);
                        return;
                    }
                    e.to_string()
                }
            };

            failures += 1;
            if failures >= self.policy.max_attempts {
                self.give_up(error, unsent, outbound);
                return;
            }

            let delay = self.policy.delay_for(failures);
            warn!(
                generation = self.generation,
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "websocket closed, reconnecting"
            );
            if !self.emit(LinkEventKind::Closed { error }) {
                return;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Report the final failure along with everything never written.
    fn give_up(
        &self,
        error: String,
        mut unsent: VecDeque<LinkFrame>,
        mut outbound: mpsc::UnboundedReceiver<LinkFrame>,
    ) {
        outbound.close();
        while let Ok(frame) = outbound.try_recv() {
            unsent.push_back(frame);
        }
        if !unsent.is_empty() {
            warn!(
                generation = self.generation,
                undelivered = unsent.len(),
                "giving up with frames still queued"
            );
        }
        self.emit(LinkEventKind::GaveUp {
            error,
            undelivered: unsent.into(),
        });
    }

    /// Shuttle frames until the socket drops or the link is cancelled.
    async fn pump(
        &self,
        socket: Socket,
        outbound: &mut mpsc::UnboundedReceiver<LinkFrame>,
        unsent: &mut VecDeque<LinkFrame>,
    ) -> SessionEnd {
        let (mut write, mut read) = socket.split();

        while let Some(frame) = unsent.front() {
            if let Err(e) = write.send(Message::Text(frame.text.clone().into())).await {
                return SessionEnd::Dropped(e.to_string());
            }
            unsent.pop_front();
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Cancelled;
                }

                frame = outbound.recv() => {
                    let Some(frame) = frame else {
                        let _ = write.send(Message::Close(None)).await;
                        return SessionEnd::Cancelled;
                    };
                    if let Err(e) = write.send(Message::Text(frame.text.clone().into())).await {
                        unsent.push_back(frame);
                        return SessionEnd::Dropped(e.to_string());
                    }
                }

                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !self.emit(LinkEventKind::Frame(text.to_string())) {
                            return SessionEnd::Cancelled;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("closed by server ({}): {}", u16::from(f.code), f.reason))
                            .unwrap_or_else(|| "closed by server".to_string());
                        return SessionEnd::Dropped(reason);
                    }
                    // tungstenite answers pings itself
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                    None => return SessionEnd::Dropped("connection closed".to_string()),
                },
            }
        }
    }
}
