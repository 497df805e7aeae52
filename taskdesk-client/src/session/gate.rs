use std::collections::VecDeque;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::ClientError;

pub(crate) type RefreshOutcome = Result<(), ClientError>;

/// A request parked behind an in-flight refresh, waiting to be re-issued.
pub(crate) struct PendingRequest {
    label: String,
    respond_to: oneshot::Sender<RefreshOutcome>,
}

pub(crate) enum Admission {
    /// Caller must run the refresh and then call [`RefreshGate::finish`].
    Leader { generation: u64 },
    /// Another caller is refreshing; wait for its outcome.
    Queued(oneshot::Receiver<RefreshOutcome>),
}

/// Single-flight bookkeeping for session refreshes.
///
/// The generation moves on every time the session is ended. A leader whose
/// generation is no longer current still owns the in-flight slot until it
/// finishes, but its outcome no longer speaks for the session.
#[derive(Default)]
pub(crate) struct RefreshGate {
    in_flight: bool,
    generation: u64,
    pending: VecDeque<PendingRequest>,
}

impl RefreshGate {
    pub fn admit(&mut self, label: String) -> Admission {
        if !self.in_flight {
            self.in_flight = true;
            return Admission::Leader {
                generation: self.generation,
            };
        }

        let (respond_to, outcome) = oneshot::channel();
        self.pending.push_back(PendingRequest { label, respond_to });
        Admission::Queued(outcome)
    }

    /// Clears the in-flight flag and hands back everything queued, oldest first.
    pub fn finish(&mut self) -> VecDeque<PendingRequest> {
        self.in_flight = false;
        std::mem::take(&mut self.pending)
    }

    /// Start a new generation and hand back everything queued. A running
    /// refresh keeps the in-flight slot until its leader calls `finish`.
    pub fn end_session(&mut self) -> VecDeque<PendingRequest> {
        self.generation += 1;
        std::mem::take(&mut self.pending)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn queued(&self) -> usize {
        self.pending.len()
    }
}

/// Deliver `outcome` to every pending request in order. Callers that stopped
/// waiting are skipped. Returns how many were actually delivered.
pub(crate) fn release(pending: VecDeque<PendingRequest>, outcome: &RefreshOutcome) -> usize {
    let mut delivered = 0;
    for request in pending {
        if request.respond_to.send(outcome.clone()).is_ok() {
            delivered += 1;
        } else {
            debug!(call = %request.label, "Queued caller gone before refresh resolved");
        }
    }
    delivered
}
