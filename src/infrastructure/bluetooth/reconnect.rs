//! Reconnection Policy
//!
//! One delayed retry per unexpected disconnect, against the same device. The
//! timer itself is never cancelled, so every firing is checked against the
//! most recent ticket before it may turn into a connect request.

use crate::domain::models::DeviceHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Identifies one scheduled retry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectTicket {
    pub id: u64,
    pub device: DeviceHandle,
}

/// Timer primitive used to deliver a ticket back to the link after `delay`
pub trait ReconnectScheduler {
    fn schedule(&mut self, delay: Duration, ticket: ReconnectTicket);
}

#[derive(Debug)]
pub struct ReconnectPolicy {
    delay: Duration,
    max_attempts: Option<u32>,
    attempts: u32,
    next_id: u64,
    pending: Option<u64>,
}

impl ReconnectPolicy {
    pub fn new(delay: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            delay,
            max_attempts,
            attempts: 0,
            next_id: 0,
            pending: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Decide what to do after the link dropped.
    ///
    /// Returns the ticket to schedule, or `None` for a clean disconnect or once
    /// the optional attempt cap is reached.
    pub fn on_disconnect(
        &mut self,
        device: &DeviceHandle,
        error: Option<&str>,
    ) -> Option<ReconnectTicket> {
        let reason = error?;

        if let Some(max) = self.max_attempts {
            if self.attempts >= max {
                warn!(
                    "Not reconnecting to {} after {} attempts ({})",
                    device, self.attempts, reason
                );
                self.pending = None;
                return None;
            }
        }

        self.attempts += 1;
        self.next_id += 1;
        self.pending = Some(self.next_id);
        info!(
            "Scheduling reconnect #{} to {} in {:?}",
            self.attempts, device, self.delay
        );

        Some(ReconnectTicket {
            id: self.next_id,
            device: device.clone(),
        })
    }

    /// Consume a fired ticket. True only for the latest, still-pending ticket.
    pub fn take_due(&mut self, ticket: &ReconnectTicket) -> bool {
        if self.pending == Some(ticket.id) {
            self.pending = None;
            true
        } else {
            debug!("Ignoring stale reconnect ticket #{}", ticket.id);
            false
        }
    }

    /// A manual connect or disconnect supersedes any scheduled retry
    pub fn invalidate(&mut self) {
        self.pending = None;
    }

    pub fn on_connected(&mut self) {
        self.attempts = 0;
        self.pending = None;
    }
}
