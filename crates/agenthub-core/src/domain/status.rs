//! Board totals by effective status.

use serde::{Deserialize, Serialize};

use super::{EffectiveStatus, TaskSnapshot};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub claimed: usize,
    pub reclaimable: usize,
    pub done: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn from_snapshots(snapshots: &[TaskSnapshot]) -> Self {
        let mut counts = Self::default();
        for snapshot in snapshots {
            match snapshot.effective {
                EffectiveStatus::Pending => counts.pending += 1,
                EffectiveStatus::Claimed => counts.claimed += 1,
                EffectiveStatus::Reclaimable => counts.reclaimable += 1,
                EffectiveStatus::Done => counts.done += 1,
                EffectiveStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pending + self.claimed + self.reclaimable + self.done + self.failed
    }

    /// Every task reached done or failed.
    pub fn all_terminal(&self) -> bool {
        self.done + self.failed == self.total()
    }
}
