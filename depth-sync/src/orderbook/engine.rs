//! Depth reconciliation state machine
//!
//! Turns a bootstrap snapshot plus a stream of depth updates into consistent
//! book snapshots. The engine itself is single-threaded; `DepthFeed` wraps it
//! in a mutex and drives bootstrap requests.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use super::{BootstrapSnapshot, DepthSnapshot, DepthUpdate, PriceLevels, Side, UpdateKind};

/// Default cap on updates buffered during a bootstrap
pub(crate) const DEFAULT_MAX_PENDING: usize = 10_000;

/// Lifecycle of one engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum SyncState {
    /// No usable book; waiting for a bootstrap or a full-replacement update
    Uninitialized,
    /// A REST snapshot is outstanding; updates are buffered
    Bootstrapping,
    /// Snapshot applied; waiting for the first update that continues it
    AwaitingFirstValidDiff,
    /// Steady state; every continuous update produces a snapshot
    Synced,
}

/// Where the initial book image comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapMode {
    /// Out-of-band REST snapshot
    Rest,
    /// Full-replacement frames pushed on the stream itself
    InBand,
}

/// Why an update was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No consistent book to apply it to
    NotSynced,
    /// Older than the bootstrap snapshot
    Stale,
    /// Already applied
    Duplicate,
    /// Pending buffer overflowed and the oldest update was evicted
    BufferOverflow,
}

/// Result of feeding one update
#[derive(Debug, Clone, PartialEq)]
pub enum FeedOutcome {
    Emitted(DepthSnapshot),
    Buffered,
    Dropped(DropReason),
    /// Continuity broke; the book was discarded. `generation` is set when a
    /// new REST bootstrap must be started for it.
    Resync {
        expected: u64,
        got: u64,
        generation: Option<u64>,
    },
}

/// Result of completing a bootstrap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Applied { replayed: usize, discarded: usize },
    /// The request was superseded by a newer generation or a reset
    Stale,
    /// Buffered updates did not continue the snapshot; a new generation began
    Resync {
        expected: u64,
        got: u64,
        generation: u64,
    },
}

/// Incremental depth engine for a single instrument
#[derive(Debug)]
pub struct DepthEngine {
    symbol: String,
    mode: BootstrapMode,
    book: PriceLevels,
    state: SyncState,
    /// Final update ID of the last applied event (or the snapshot marker)
    last_applied: Option<u64>,
    pending: VecDeque<DepthUpdate>,
    max_pending: usize,
    generation: u64,
    last_event_time: u64,
    depth_limit: Option<usize>,
    needs_resubscribe: bool,
}

impl DepthEngine {
    pub fn new(symbol: &str, mode: BootstrapMode) -> Self {
        Self {
            symbol: symbol.to_string(),
            mode,
            book: PriceLevels::new(),
            state: SyncState::Uninitialized,
            last_applied: None,
            pending: VecDeque::new(),
            max_pending: DEFAULT_MAX_PENDING,
            generation: 0,
            last_event_time: 0,
            depth_limit: None,
            needs_resubscribe: false,
        }
    }

    /// Cap the number of updates buffered while bootstrapping
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending.max(1);
        self
    }

    /// Limit the levels per side in emitted snapshots
    pub fn with_depth_limit(mut self, depth_limit: Option<usize>) -> Self {
        self.depth_limit = depth_limit;
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn mode(&self) -> BootstrapMode {
        self.mode
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_applied(&self) -> Option<u64> {
        self.last_applied
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn book(&self) -> &PriceLevels {
        &self.book
    }

    /// Set when an in-band venue lost continuity and must resend its snapshot
    pub fn needs_resubscribe(&self) -> bool {
        self.needs_resubscribe
    }

    /// Discard the book and start a new bootstrap generation
    pub fn begin_bootstrap(&mut self) -> u64 {
        self.invalidate();
        self.state = SyncState::Bootstrapping;
        debug!(symbol = %self.symbol, generation = self.generation, "Bootstrap started");
        self.generation
    }

    /// Apply a REST snapshot fetched for `generation` and replay buffered updates
    pub fn complete_bootstrap(
        &mut self,
        generation: u64,
        snapshot: &BootstrapSnapshot,
    ) -> BootstrapOutcome {
        if generation != self.generation || self.state != SyncState::Bootstrapping {
            debug!(
                symbol = %self.symbol,
                generation,
                current = self.generation,
                "Ignoring superseded bootstrap snapshot"
            );
            return BootstrapOutcome::Stale;
        }

        self.book.replace(&snapshot.bids, &snapshot.asks);
        self.last_applied = Some(snapshot.sequence);
        self.last_event_time = snapshot.timestamp;

        let anchor = snapshot.sequence;
        let pending = std::mem::take(&mut self.pending);
        let mut replayed = 0;
        let mut discarded = 0;
        let mut bridged = false;
        let mut pending = pending.into_iter();

        while let Some(update) = pending.next() {
            let Some(seq) = update.sequence else {
                self.apply(&update);
                replayed += 1;
                continue;
            };

            if seq.last < anchor || (bridged && Some(seq.last) <= self.last_applied) {
                discarded += 1;
                continue;
            }

            let expected = self.last_applied.unwrap_or(anchor);
            // only the first sequenced update may straddle the snapshot
            let linked = if bridged {
                seq.expected_previous() == expected
            } else {
                seq.expected_previous() <= expected
            };

            if !linked {
                warn!(
                    symbol = %self.symbol,
                    expected,
                    got = seq.expected_previous(),
                    "Buffered updates do not continue the snapshot, restarting bootstrap"
                );
                let got = seq.expected_previous();
                let generation = self.begin_bootstrap();
                self.pending.push_back(update);
                self.pending.extend(pending);
                return BootstrapOutcome::Resync {
                    expected,
                    got,
                    generation,
                };
            }

            self.apply(&update);
            replayed += 1;
            bridged = true;
        }

        self.state = SyncState::AwaitingFirstValidDiff;
        info!(
            symbol = %self.symbol,
            sequence = snapshot.sequence,
            replayed,
            discarded,
            "Order book bootstrapped"
        );
        BootstrapOutcome::Applied {
            replayed,
            discarded,
        }
    }

    /// Give up on `generation` after its retries were exhausted
    pub fn fail_bootstrap(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.state != SyncState::Bootstrapping {
            return false;
        }
        self.invalidate();
        true
    }

    /// Feed one decoded update
    pub fn feed(&mut self, update: DepthUpdate) -> FeedOutcome {
        if update.kind == UpdateKind::Snapshot {
            return self.replace_from_update(update);
        }

        match self.state {
            SyncState::Uninitialized => FeedOutcome::Dropped(DropReason::NotSynced),
            SyncState::Bootstrapping => self.buffer(update),
            SyncState::AwaitingFirstValidDiff => {
                let Some(seq) = update.sequence else {
                    self.state = SyncState::Synced;
                    return self.apply_and_emit(&update);
                };
                let anchor = self.last_applied.unwrap_or(0);
                if seq.last < anchor {
                    return FeedOutcome::Dropped(DropReason::Stale);
                }
                if seq.expected_previous() > anchor {
                    return self.resync(anchor, seq.expected_previous(), update);
                }
                self.state = SyncState::Synced;
                self.apply_and_emit(&update)
            }
            SyncState::Synced => {
                let (Some(seq), Some(last)) = (update.sequence, self.last_applied) else {
                    return self.apply_and_emit(&update);
                };
                if seq.last <= last {
                    return FeedOutcome::Dropped(DropReason::Duplicate);
                }
                if seq.expected_previous() != last {
                    return self.resync(last, seq.expected_previous(), update);
                }
                self.apply_and_emit(&update)
            }
        }
    }

    /// Current book, only when it is known to be consistent
    pub fn materialize(&self) -> Option<DepthSnapshot> {
        if self.state != SyncState::Synced {
            return None;
        }
        let (bids, asks) = self.book.materialize(self.depth_limit);
        Some(DepthSnapshot {
            symbol: self.symbol.clone(),
            timestamp: self.last_event_time,
            sequence: self.last_applied,
            bids,
            asks,
        })
    }

    /// Drop all state, e.g. on reconnect or unsubscribe
    pub fn reset(&mut self) {
        self.invalidate();
        self.needs_resubscribe = false;
    }

    fn invalidate(&mut self) {
        self.book.clear();
        self.pending.clear();
        self.last_applied = None;
        self.state = SyncState::Uninitialized;
        self.generation += 1;
    }

    fn buffer(&mut self, update: DepthUpdate) -> FeedOutcome {
        let mut outcome = FeedOutcome::Buffered;
        if self.pending.len() >= self.max_pending {
            self.pending.pop_front();
            outcome = FeedOutcome::Dropped(DropReason::BufferOverflow);
        }
        self.pending.push_back(update);
        outcome
    }

    fn resync(&mut self, expected: u64, got: u64, update: DepthUpdate) -> FeedOutcome {
        warn!(
            symbol = %self.symbol,
            expected,
            got,
            "Depth sequence gap detected, resyncing"
        );
        match self.mode {
            BootstrapMode::Rest => {
                let generation = self.begin_bootstrap();
                self.pending.push_back(update);
                FeedOutcome::Resync {
                    expected,
                    got,
                    generation: Some(generation),
                }
            }
            BootstrapMode::InBand => {
                self.invalidate();
                self.needs_resubscribe = true;
                FeedOutcome::Resync {
                    expected,
                    got,
                    generation: None,
                }
            }
        }
    }

    fn replace_from_update(&mut self, update: DepthUpdate) -> FeedOutcome {
        if self.state == SyncState::Bootstrapping {
            // supersedes the outstanding REST request
            self.generation += 1;
            self.pending.clear();
        }
        self.book.replace(&update.bids, &update.asks);
        self.last_applied = update.sequence.map(|s| s.last);
        self.last_event_time = update.event_time;
        self.state = SyncState::Synced;
        self.needs_resubscribe = false;
        self.emit()
    }

    fn apply(&mut self, update: &DepthUpdate) {
        self.book.apply_batch(Side::Bid, &update.bids);
        self.book.apply_batch(Side::Ask, &update.asks);
        if let Some(seq) = update.sequence {
            self.last_applied = Some(seq.last);
        }
        self.last_event_time = update.event_time;
    }

    fn apply_and_emit(&mut self, update: &DepthUpdate) -> FeedOutcome {
        self.apply(update);
        self.emit()
    }

    fn emit(&self) -> FeedOutcome {
        match self.materialize() {
            Some(snapshot) => FeedOutcome::Emitted(snapshot),
            None => FeedOutcome::Dropped(DropReason::NotSynced),
        }
    }
}
