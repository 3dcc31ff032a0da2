pub mod linear;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use linear::LinearClassifier;
pub use stub::StubClassifier;

#[cfg(feature = "backend-tract")]
pub use tract::TractClassifier;
