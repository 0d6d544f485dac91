use crate::error::Result;
use crate::peer::connection::PeerConnection;
use crate::peer::types::IceCandidate;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Remote candidates received before the remote description was applied.
///
/// Arrival order is preserved and every queued candidate is applied exactly once.
#[derive(Debug, Default)]
pub struct CandidateQueue {
    pending: VecDeque<IceCandidate>,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: IceCandidate) {
        debug!("Remote description not set yet, queuing candidate");
        self.pending.push_back(candidate);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Applies every queued candidate in arrival order.
    ///
    /// Stops at the first rejection; the rejected candidate and the ones after it stay queued.
    pub async fn flush(&mut self, pc: &dyn PeerConnection) -> Result<usize> {
        let mut applied = 0;
        while let Some(candidate) = self.pending.pop_front() {
            debug!("Applying pending candidate: {}", candidate.candidate);
            if let Err(e) = pc.add_ice_candidate(candidate.clone()).await {
                self.pending.push_front(candidate);
                return Err(e);
            }
            applied += 1;
        }
        Ok(applied)
    }
}

/// Counts of gathered candidates by type
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            summary.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            summary.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            summary.relay += 1;
        }
    }

    debug!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        summary.host, summary.srflx, summary.relay
    );

    if summary.relay == 0 {
        warn!("No TURN relay candidates found, connection through NAT may fail");
    }
    summary
}
