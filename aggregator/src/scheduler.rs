//! Staleness-driven refresh scheduling.
//!
//! The scheduler keeps no state of its own: whether an institution is due
//! is recomputed from the snapshot on every tick, so a restart needs no
//! recovery.

use std::collections::HashSet;

use chrono::Duration;
use ratewatch_common::{is_older_than, InstitutionSlug, Snapshot, Timestamp};
use ratewatch_fx::InstitutionDescriptor;
use tracing::warn;

use crate::config::SchedulerConfig;

/// An institution selected for refresh in this tick.
#[derive(Debug, Clone)]
pub struct DueInstitution<'a> {
    /// Caller-supplied descriptor.
    pub descriptor: &'a InstitutionDescriptor,
    /// Last successful refresh, `None` if never refreshed.
    pub last_updated: Option<Timestamp>,
}

impl DueInstitution<'_> {
    /// Get the institution slug.
    pub fn slug(&self) -> &InstitutionSlug {
        self.descriptor.slug()
    }
}

/// Picks institutions whose data is older than the staleness threshold.
#[derive(Debug, Clone)]
pub struct StalenessScheduler {
    threshold: Duration,
}

impl StalenessScheduler {
    /// Create a scheduler with the given threshold.
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    /// Create from configuration, `None` if the threshold is out of range.
    pub fn from_config(config: &SchedulerConfig) -> Option<Self> {
        config.threshold().map(Self::new)
    }

    /// Institutions due at `now`, least recently refreshed first.
    ///
    /// Never-refreshed institutions come first; ties keep the order of
    /// `institutions`. A slug listed twice is scheduled once.
    pub fn due<'a>(
        &self,
        snapshot: &Snapshot,
        institutions: &'a [InstitutionDescriptor],
        now: Timestamp,
    ) -> Vec<DueInstitution<'a>> {
        let mut seen = HashSet::new();
        let mut due: Vec<DueInstitution<'a>> = Vec::new();

        for descriptor in institutions {
            if !seen.insert(descriptor.slug()) {
                warn!(institution = %descriptor.slug(), "Duplicate institution ignored");
                continue;
            }

            let last_updated = snapshot.updated_at_of(descriptor.slug());
            if is_older_than(last_updated, self.threshold, now) {
                due.push(DueInstitution {
                    descriptor,
                    last_updated,
                });
            }
        }

        // Stable: equal timestamps keep catalogue order.
        due.sort_by_key(|entry| entry.last_updated);
        due
    }
}
