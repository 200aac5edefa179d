//! Concrete inference back-ends, one per Cargo feature.

#[cfg(feature = "ort")]
mod ort;
#[cfg(feature = "tract")]
mod tract;

#[cfg(feature = "ort")]
pub use self::ort::OrtBackend;
#[cfg(feature = "tract")]
pub use self::tract::TractBackend;
