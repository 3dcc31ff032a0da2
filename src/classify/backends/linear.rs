use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::classify::backend::SpotClassifier;
use crate::Occupancy;

/// Linear decision function loaded from a JSON artifact.
///
/// Artifact format:
///
/// ```json
/// { "input_len": 675, "weights": [0.01, ...], "bias": -0.3 }
/// ```
///
/// A crop is occupied when `weights . features + bias > 0`.
#[derive(Clone, Debug)]
pub struct LinearClassifier {
    weights: Vec<f32>,
    bias: f32,
}

#[derive(Debug, Deserialize)]
struct LinearArtifact {
    input_len: usize,
    weights: Vec<f32>,
    bias: f32,
}

impl LinearClassifier {
    pub fn new(weights: Vec<f32>, bias: f32) -> Result<Self> {
        if weights.is_empty() {
            return Err(anyhow!("linear classifier needs at least one weight"));
        }
        if !bias.is_finite() || weights.iter().any(|w| !w.is_finite()) {
            return Err(anyhow!("linear classifier weights must be finite"));
        }
        Ok(Self { weights, bias })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read classifier artifact {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("invalid classifier artifact {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let artifact: LinearArtifact = serde_json::from_str(raw)?;
        if artifact.weights.len() != artifact.input_len {
            return Err(anyhow!(
                "artifact declares input_len {} but carries {} weights",
                artifact.input_len,
                artifact.weights.len()
            ));
        }
        Self::new(artifact.weights, artifact.bias)
    }

    pub fn decision(&self, features: &[f32]) -> Result<f32> {
        if features.len() != self.weights.len() {
            return Err(anyhow!(
                "expected {} features, received {}",
                self.weights.len(),
                features.len()
            ));
        }
        let dot: f32 = self
            .weights
            .iter()
            .zip(features)
            .map(|(w, x)| w * x)
            .sum();
        Ok(dot + self.bias)
    }
}

impl SpotClassifier for LinearClassifier {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn input_len(&self) -> Option<usize> {
        Some(self.weights.len())
    }

    fn predict(&mut self, features: &[f32]) -> Result<Occupancy> {
        if self.decision(features)? > 0.0 {
            Ok(Occupancy::Occupied)
        } else {
            Ok(Occupancy::Empty)
        }
    }
}
