// src/daemon/repair.rs

//! Interactive repair queue
//!
//! A title that exhausts its retry budget parks here instead of blocking
//! the poll loop on a prompt. Decisions arrive out of band over a channel
//! (the binary feeds it from stdin); the daemon drains them once per cycle,
//! so every other title keeps scanning and installing while one awaits its
//! user.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use tracing::{info, warn};

/// User verdict for a parked title
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairDecision {
    /// Reset the retry count and try again
    Retry,
    /// Forget the title's record and suppress it for the rest of this run
    Skip,
}

impl RepairDecision {
    pub fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "retry" => Some(Self::Retry),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Skip => "skip",
        }
    }
}

/// A parked title awaiting its decision
#[derive(Debug, Clone)]
pub struct RepairRequest {
    pub title_id: String,
    pub title_name: String,
    pub retry_count: u32,
}

/// Sending half handed to whatever collects user decisions
pub type DecisionSender = Sender<(String, RepairDecision)>;

/// Parked titles plus the channel their decisions arrive on
pub struct RepairQueue {
    parked: HashMap<String, RepairRequest>,
    dismissed: HashSet<String>,
    decisions: Receiver<(String, RepairDecision)>,
}

impl RepairQueue {
    pub fn new() -> (Self, DecisionSender) {
        let (tx, rx) = channel();
        (
            Self {
                parked: HashMap::new(),
                dismissed: HashSet::new(),
                decisions: rx,
            },
            tx,
        )
    }

    /// Park a title pending a decision. Idempotent; re-parking an already
    /// parked title keeps the original request.
    pub fn park(&mut self, request: RepairRequest) {
        if !self.parked.contains_key(&request.title_id) {
            info!(
                title_id = %request.title_id,
                name = %request.title_name,
                "title parked for repair (reply: retry or skip)"
            );
            self.parked.insert(request.title_id.clone(), request);
        }
    }

    pub fn is_parked(&self, title_id: &str) -> bool {
        self.parked.contains_key(title_id)
    }

    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }

    /// Suppress a skipped title until the daemon restarts, so the loop does
    /// not rediscover its still-present bundle next cycle
    pub fn dismiss(&mut self, title_id: &str) {
        self.dismissed.insert(title_id.to_string());
    }

    pub fn is_dismissed(&self, title_id: &str) -> bool {
        self.dismissed.contains(title_id)
    }

    /// Drain every decision that has arrived, unparking the titles they
    /// resolve. Decisions for titles that are not parked are dropped with a
    /// warning. Never blocks.
    pub fn drain_decisions(&mut self) -> Vec<(RepairRequest, RepairDecision)> {
        let mut resolved = Vec::new();
        loop {
            match self.decisions.try_recv() {
                Ok((title_id, decision)) => match self.parked.remove(&title_id) {
                    Some(request) => resolved.push((request, decision)),
                    None => {
                        warn!(title_id, "decision for a title that is not parked, ignoring");
                    }
                },
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        resolved
    }
}
