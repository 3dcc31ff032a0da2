//! Spot classifier backends.
//!
//! - `linear`: JSON linear decision function (always available)
//! - `onnx`: ONNX model via tract (feature: backend-tract)
//! - `stub`: mean-brightness stand-in for dry runs and tests

mod backend;
mod backends;

use std::path::Path;

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::frame::FeatureShape;

pub use backend::SpotClassifier;
pub use backends::{LinearClassifier, StubClassifier};
#[cfg(feature = "backend-tract")]
pub use backends::TractClassifier;

/// Which backend to load the classifier artifact with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    #[default]
    Linear,
    Onnx,
    Stub,
}

impl ClassifierKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "onnx" => Ok(Self::Onnx),
            "stub" => Ok(Self::Stub),
            other => Err(anyhow!(
                "unknown classifier kind '{}' (expected linear, onnx or stub)",
                other
            )),
        }
    }
}

/// Load the session classifier and check it agrees with the feature shape.
///
/// Any failure here is a startup failure: the processing loop must not start.
pub fn load_classifier(
    kind: ClassifierKind,
    path: Option<&Path>,
    shape: FeatureShape,
) -> Result<Box<dyn SpotClassifier>> {
    let mut classifier: Box<dyn SpotClassifier> = match kind {
        ClassifierKind::Stub => Box::new(StubClassifier::default()),
        ClassifierKind::Linear => {
            let path = path.ok_or_else(|| anyhow!("linear classifier requires an artifact path"))?;
            Box::new(LinearClassifier::load(path)?)
        }
        ClassifierKind::Onnx => {
            let path = path.ok_or_else(|| anyhow!("onnx classifier requires a model path"))?;
            load_onnx(path, shape)?
        }
    };

    if let Some(expected) = classifier.input_len() {
        if expected != shape.len() {
            return Err(anyhow!(
                "classifier '{}' expects {} features but crops produce {} ({}x{}x3)",
                classifier.name(),
                expected,
                shape.len(),
                shape.width,
                shape.height
            ));
        }
    }
    classifier.warm_up()?;
    log::info!(
        "classifier '{}' loaded ({} features per crop)",
        classifier.name(),
        shape.len()
    );
    Ok(classifier)
}

#[cfg(feature = "backend-tract")]
fn load_onnx(path: &Path, shape: FeatureShape) -> Result<Box<dyn SpotClassifier>> {
    Ok(Box::new(TractClassifier::new(path, shape.len())?))
}

#[cfg(not(feature = "backend-tract"))]
fn load_onnx(_path: &Path, _shape: FeatureShape) -> Result<Box<dyn SpotClassifier>> {
    Err(anyhow!("onnx classifier requires the backend-tract feature"))
}
