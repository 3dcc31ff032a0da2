use std::collections::VecDeque;

use crate::Occupancy;

/// Default number of raw labels kept per spot.
pub const DEFAULT_HISTORY_SIZE: usize = 5;

/// Bounded history of raw classifier labels for one spot.
///
/// Only genuine classifier outputs are pushed; gated (forced) labels never enter.
#[derive(Clone, Debug)]
pub struct SlotHistory {
    labels: VecDeque<Occupancy>,
    capacity: usize,
}

impl SlotHistory {
    /// Create an empty history. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            labels: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a raw label, evicting the oldest once at capacity.
    pub fn push(&mut self, label: Occupancy) {
        if self.labels.len() == self.capacity {
            self.labels.pop_front();
        }
        self.labels.push_back(label);
    }

    /// Majority vote over a full history; `None` while warming up.
    ///
    /// Empty wins only with strictly more votes, so a tie (possible only with an
    /// even capacity) resolves to occupied.
    pub fn vote(&self) -> Option<Occupancy> {
        if !self.is_warm() {
            return None;
        }
        let empty_votes = self.labels.iter().filter(|l| l.is_empty()).count();
        let occupied_votes = self.labels.len() - empty_votes;
        if empty_votes > occupied_votes {
            Some(Occupancy::Empty)
        } else {
            Some(Occupancy::Occupied)
        }
    }

    pub fn is_warm(&self) -> bool {
        self.labels.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn labels(&self) -> impl Iterator<Item = Occupancy> + '_ {
        self.labels.iter().copied()
    }
}

impl Default for SlotHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}
