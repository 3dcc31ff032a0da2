use anyhow::Result;

use crate::Occupancy;

/// Binary occupancy classifier over a flattened crop feature vector.
///
/// The artifact behind a classifier is loaded once at startup and is read-only for
/// the session. `predict` receives features produced by `SpotCrop::features`: a
/// row-major (y, x, RGB) vector of floats in [0, 1].
pub trait SpotClassifier: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Expected feature vector length, when the artifact fixes one.
    fn input_len(&self) -> Option<usize>;

    /// Classify one feature vector.
    fn predict(&mut self, features: &[f32]) -> Result<Occupancy>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<C: SpotClassifier + ?Sized> SpotClassifier for Box<C> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn input_len(&self) -> Option<usize> {
        (**self).input_len()
    }

    fn predict(&mut self, features: &[f32]) -> Result<Occupancy> {
        (**self).predict(features)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
