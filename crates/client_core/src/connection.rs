//! Push channel lifecycle.
//!
//! `Disconnected -> Connecting -> Connected -> Reconnecting -> Connecting ...`
//! Every link is stamped with an epoch; events from an older epoch are stale
//! and ignored. A pending retry is a cancellable timer that is invalidated
//! whenever the manager leaves `Reconnecting`.

use std::{sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    engine::EngineEvent,
    error::{ConnectionError, TransportError},
    frame::{decode_frame, split_frames, DecodedFrame, ServerFrame},
    transport::{Transport, TransportLink, TransportSink},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Constant,
    Exponential,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(3_000),
            max_delay: Duration::from_secs(30),
            backoff: Backoff::Constant,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Constant => self.base_delay,
            Backoff::Exponential => {
                let shift = attempt.saturating_sub(1).min(16);
                self.base_delay
                    .saturating_mul(1 << shift)
                    .min(self.max_delay.max(self.base_delay))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Stale or already disconnected.
    Ignored,
    RetryScheduled { attempt: u32, delay: Duration },
    /// No credential held; stays `Disconnected`.
    Stopped,
}

struct RetryTimer {
    ticket: u64,
    handle: JoinHandle<()>,
}

impl RetryTimer {
    fn cancel(self) {
        self.handle.abort();
    }
}

pub(crate) struct ConnectionManager {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    events: mpsc::UnboundedSender<EngineEvent>,
    state: ConnectionState,
    attempts: u32,
    epoch: u64,
    link: Option<Box<dyn TransportLink>>,
    retry: Option<RetryTimer>,
    next_ticket: u64,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        Self {
            transport,
            policy,
            events,
            state: ConnectionState::Disconnected,
            attempts: 0,
            epoch: 0,
            link: None,
            retry: None,
            next_ticket: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn has_pending_retry(&self) -> bool {
        self.retry.is_some()
    }

    /// Opens a new link for `credential`. Valid from `Disconnected` or
    /// `Reconnecting`.
    pub fn connect(&mut self, credential: &str) -> Result<(), ConnectionError> {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Reconnecting => {}
            state => return Err(ConnectionError::InvalidState(state)),
        }

        self.cancel_retry();
        self.close_link();
        self.epoch += 1;
        self.state = ConnectionState::Connecting;
        debug!(
            epoch = self.epoch,
            attempt = self.attempts,
            "connection: connecting"
        );
        let sink = TransportSink::new(self.epoch, self.events.clone());
        self.link = Some(self.transport.connect(credential, sink));
        Ok(())
    }

    /// Returns true when the open belongs to the live link. The caller must
    /// then refresh presence, since the channel has no replay.
    pub fn on_opened(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch || self.state != ConnectionState::Connecting {
            debug!(epoch, current = self.epoch, "connection: ignoring stale open");
            return false;
        }
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        info!(epoch, "connection: connected");
        true
    }

    pub fn on_closed(
        &mut self,
        epoch: u64,
        reason: Option<&TransportError>,
        credential_held: bool,
    ) -> CloseOutcome {
        if epoch != self.epoch || self.state == ConnectionState::Disconnected {
            debug!(epoch, current = self.epoch, "connection: ignoring stale close");
            return CloseOutcome::Ignored;
        }
        self.link = None;

        if !credential_held {
            self.state = ConnectionState::Disconnected;
            self.attempts = 0;
            info!(epoch, "connection: closed without credential, not retrying");
            return CloseOutcome::Stopped;
        }

        self.attempts += 1;
        let delay = self.policy.delay_for(self.attempts);
        self.state = ConnectionState::Reconnecting;
        match reason {
            Some(err) => warn!(
                epoch,
                attempt = self.attempts,
                delay_ms = delay.as_millis() as u64,
                "connection: lost ({err}), scheduling reconnect"
            ),
            None => info!(
                epoch,
                attempt = self.attempts,
                delay_ms = delay.as_millis() as u64,
                "connection: closed, scheduling reconnect"
            ),
        }
        self.schedule_retry(delay);
        CloseOutcome::RetryScheduled {
            attempt: self.attempts,
            delay,
        }
    }

    /// Fires a due retry. Stale tickets, and tickets that arrive after the
    /// manager left `Reconnecting`, are ignored. Returns true when a new
    /// connect was started.
    pub fn on_retry_due(&mut self, ticket: u64, credential: Option<&str>) -> bool {
        let current = self.retry.as_ref().map(|timer| timer.ticket);
        if self.state != ConnectionState::Reconnecting || current != Some(ticket) {
            debug!(ticket, "connection: ignoring stale retry");
            return false;
        }
        self.retry = None;

        let Some(credential) = credential else {
            self.disconnect();
            return false;
        };
        self.connect(credential).is_ok()
    }

    /// Decodes one transport text message into typed frames. Malformed and
    /// unknown frames are logged and dropped without touching the link.
    pub fn on_frame(&self, epoch: u64, text: &str) -> Vec<ServerFrame> {
        if epoch != self.epoch || self.state != ConnectionState::Connected {
            debug!(epoch, current = self.epoch, "connection: ignoring stale frame");
            return Vec::new();
        }

        let mut frames = Vec::new();
        for line in split_frames(text) {
            match decode_frame(line) {
                Ok(DecodedFrame::Known(frame)) => frames.push(frame),
                Ok(DecodedFrame::Unknown(kind)) => {
                    debug!(kind = %kind, "connection: ignoring unknown frame kind")
                }
                Err(err) => warn!("connection: dropping undecodable frame: {err}"),
            }
        }
        frames
    }

    /// Explicit teardown (logout). Cancels any pending retry so nothing
    /// reconnects afterwards.
    pub fn disconnect(&mut self) {
        self.cancel_retry();
        self.close_link();
        if self.state != ConnectionState::Disconnected {
            info!(epoch = self.epoch, "connection: disconnected");
        }
        self.epoch += 1;
        self.attempts = 0;
        self.state = ConnectionState::Disconnected;
    }

    fn schedule_retry(&mut self, delay: Duration) {
        self.cancel_retry();
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(EngineEvent::RetryDue { ticket });
        });
        self.retry = Some(RetryTimer { ticket, handle });
    }

    fn cancel_retry(&mut self) {
        if let Some(timer) = self.retry.take() {
            timer.cancel();
        }
    }

    fn close_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel_retry();
        self.close_link();
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
