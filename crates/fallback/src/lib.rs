//! Protocol Fallback Sequencer
//!
//! Walks the candidate bus protocols in order when automatic negotiation
//! fails. A candidate that fails is excluded for the rest of the
//! negotiation and only [`ProtocolFallbackSequencer::reset`] brings it back.

use obd_protocol::{scale_timeout, ProtocolCandidate};
use std::time::Duration;
use tracing::{debug, info};

/// Timeout multiplier per retry
pub const BACKOFF_FACTOR: f64 = 1.5;

/// Ceiling for the multiplier, relative to the base timeout
pub const MAX_BACKOFF_FACTOR: f64 = 3.0;

/// Ordered candidate list with exclusion tracking
#[derive(Debug, Clone)]
pub struct ProtocolFallbackSequencer {
    candidates: Vec<ProtocolCandidate>,
    excluded: Vec<bool>,
    current: Option<usize>,
}

impl ProtocolFallbackSequencer {
    /// Build from an ordered list, dropping later duplicates of a protocol
    pub fn new(candidates: impl IntoIterator<Item = ProtocolCandidate>) -> Self {
        let mut unique: Vec<ProtocolCandidate> = Vec::new();
        for candidate in candidates {
            if unique.iter().all(|c| c.protocol != candidate.protocol) {
                unique.push(candidate);
            }
        }
        let excluded = vec![false; unique.len()];
        Self {
            candidates: unique,
            excluded,
            current: None,
        }
    }

    /// Sequencer over the standard candidate order
    pub fn standard() -> Self {
        Self::new(ProtocolCandidate::standard_sequence())
    }

    /// First candidate that has not failed yet, which becomes current
    pub fn next_protocol(&mut self) -> Option<ProtocolCandidate> {
        let index = self.excluded.iter().position(|excluded| !excluded);
        self.current = index;
        let candidate = index.map(|i| self.candidates[i].clone());
        match &candidate {
            Some(c) => debug!("Next protocol candidate: {}", c.name()),
            None => debug!("Protocol candidates exhausted"),
        }
        candidate
    }

    /// Candidate most recently handed out
    pub fn current(&self) -> Option<&ProtocolCandidate> {
        self.current.map(|i| &self.candidates[i])
    }

    /// Exclude the current candidate for the rest of this negotiation
    pub fn mark_current_failed(&mut self) {
        if let Some(i) = self.current.take() {
            debug!("Excluding {}", self.candidates[i].name());
            self.excluded[i] = true;
        }
    }

    pub fn mark_current_succeeded(&mut self) {
        if let Some(candidate) = self.current() {
            info!("Negotiated {}", candidate.name());
        }
    }

    /// Clear every exclusion
    pub fn reset(&mut self) {
        self.excluded.iter_mut().for_each(|e| *e = false);
        self.current = None;
    }

    /// Timeout for the zero-based `attempt` on `candidate`
    pub fn retry_timeout(candidate: &ProtocolCandidate, attempt: u32) -> Duration {
        let mut factor = 1.0;
        for _ in 0..attempt {
            factor *= BACKOFF_FACTOR;
            if factor >= MAX_BACKOFF_FACTOR {
                factor = MAX_BACKOFF_FACTOR;
                break;
            }
        }
        scale_timeout(candidate.base_timeout, factor)
    }

    /// Candidates still eligible
    pub fn remaining(&self) -> usize {
        self.excluded.iter().filter(|e| !**e).count()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

impl Default for ProtocolFallbackSequencer {
    fn default() -> Self {
        Self::standard()
    }
}
