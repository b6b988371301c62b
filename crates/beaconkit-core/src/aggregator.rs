//! Merging of per-constraint ranging batches into one bucketed view.
//!
//! Each ranged constraint contributes its latest batch only; a new batch
//! replaces the previous one wholesale. After every change the view is
//! rebuilt from scratch so constraints that stopped ranging leave nothing
//! behind.
//!
//! A transmitter that satisfies two constraints appears once in each batch
//! and therefore twice in the view. That duplication is kept.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, trace};

use crate::types::{IdentityConstraint, Observation, ProximityBucket};
use crate::watcher::RangingActiveChanged;

/// Observations grouped by bucket. Empty buckets are never present.
pub type ProximityView = BTreeMap<ProximityBucket, Vec<Observation>>;

/// Owner of the latest batch per constraint and the derived view.
#[derive(Debug, Default)]
pub struct ProximityAggregator {
    active: HashSet<IdentityConstraint>,
    batches: HashMap<IdentityConstraint, Vec<Observation>>,
    view: ProximityView,
}

impl ProximityAggregator {
    /// Empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow a ranging transition reported by the watcher.
    ///
    /// Returns `true` if the view changed.
    pub fn on_ranging_active_changed(&mut self, change: RangingActiveChanged) -> bool {
        if change.active {
            self.active.insert(change.constraint);
            false
        } else {
            self.on_ranging_stopped(&change.constraint)
        }
    }

    /// Replace the stored batch for a ranged constraint.
    ///
    /// An empty batch is kept: the region is occupied but nothing is in range
    /// this cycle. Batches for constraints that are not ranging are dropped.
    /// Returns `true` if the batch was accepted.
    pub fn on_range_update(
        &mut self,
        constraint: IdentityConstraint,
        observations: Vec<Observation>,
    ) -> bool {
        if !self.active.contains(&constraint) {
            debug!(constraint = %constraint, "Dropping range update for inactive constraint");
            return false;
        }
        trace!(constraint = %constraint, count = observations.len(), "Range update");
        self.batches.insert(constraint, observations);
        self.recompute();
        true
    }

    /// Forget a constraint's batch entirely.
    ///
    /// Returns `true` if a batch was removed.
    pub fn on_ranging_stopped(&mut self, constraint: &IdentityConstraint) -> bool {
        self.active.remove(constraint);
        if self.batches.remove(constraint).is_some() {
            self.recompute();
            true
        } else {
            false
        }
    }

    /// Drop every batch and the view.
    pub fn clear(&mut self) {
        self.active.clear();
        self.batches.clear();
        self.view.clear();
    }

    /// The last computed view.
    #[must_use]
    pub const fn current_view(&self) -> &ProximityView {
        &self.view
    }

    /// Whether ranging is active for a constraint.
    #[must_use]
    pub fn is_active(&self, constraint: &IdentityConstraint) -> bool {
        self.active.contains(constraint)
    }

    /// Number of constraints with a stored batch.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.batches.len()
    }

    fn recompute(&mut self) {
        let pool: Vec<&Observation> = self.batches.values().flatten().collect();

        let mut view = ProximityView::new();
        for bucket in ProximityBucket::ALL {
            let members: Vec<Observation> = pool
                .iter()
                .filter(|o| o.proximity == bucket)
                .map(|o| (*o).clone())
                .collect();
            if !members.is_empty() {
                view.insert(bucket, members);
            }
        }
        self.view = view;
    }
}
