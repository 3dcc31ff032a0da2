use anyhow::Result;

use crate::classify::backend::SpotClassifier;
use crate::Occupancy;

/// Stub classifier for dry runs and tests.
///
/// Labels a crop empty when its mean feature value is below `empty_below`, occupied
/// otherwise. `StubClassifier::constant` always answers the same label.
#[derive(Clone, Debug)]
pub struct StubClassifier {
    empty_below: f32,
    calls: u64,
}

impl StubClassifier {
    pub fn new(empty_below: f32) -> Self {
        Self {
            empty_below,
            calls: 0,
        }
    }

    pub fn constant(label: Occupancy) -> Self {
        match label {
            // every mean is >= 0.0, so nothing is empty
            Occupancy::Occupied => Self::new(0.0),
            // every mean is <= 1.0, so everything is empty
            Occupancy::Empty => Self::new(f32::INFINITY),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for StubClassifier {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl SpotClassifier for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_len(&self) -> Option<usize> {
        None
    }

    fn predict(&mut self, features: &[f32]) -> Result<Occupancy> {
        self.calls += 1;
        let mean = if features.is_empty() {
            0.0
        } else {
            features.iter().sum::<f32>() / features.len() as f32
        };
        if mean < self.empty_below {
            Ok(Occupancy::Empty)
        } else {
            Ok(Occupancy::Occupied)
        }
    }
}
