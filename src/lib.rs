//! # Touch Scorer
//!
//! Anomaly scoring for touch gestures with a reconstruction autoencoder.
//! A gesture (label + nine measurements) is encoded, standardized,
//! reconstructed by a trained backend, and the reconstruction error is
//! normalized against a calibrated threshold into a score in `[0, 1]`.
//!
//! ```text
//! RawRecord ─▶ FeatureCodec ─▶ Scaler ─▶ Backend ─▶ mse ─▶ Threshold ─▶ score
//! ```
//!
//! ## Modules
//!
//! - **Features**: label map and fixed-order feature vectors
//! - **Scaler / Threshold**: the JSON artifacts that travel with a model
//! - **Backend**: full-precision (`.apr`) and int8 compact (`.taeg`) models
//! - **Bundle**: versioned, digest-checked artifact directories
//! - **Training**: staged pipeline from normal data to an exported bundle
//! - **Batch / Service**: CSV scoring and the line-delimited JSON service

pub mod aprender_integration;
pub mod backend;
pub mod batch;
pub mod bundle;
pub mod config;
pub mod container;
pub mod error;
pub mod features;
pub mod report;
pub mod scaler;
pub mod scorer;
pub mod service;
pub mod threshold;
pub mod training;

pub use error::{ErrorKind, Result, ScorerError};

/// Re-exports for convenient access
pub mod prelude {
    pub use crate::backend::{Backend, BackendKind, Reconstruct};
    pub use crate::batch::{BatchDriver, BatchOutcome, Summary};
    pub use crate::bundle::{BundleManifest, LoadOptions, ModelBundle};
    pub use crate::config::ScorerConfig;
    pub use crate::error::{ErrorKind, Result, ScorerError};
    pub use crate::features::{FeatureCodec, FeatureVector, GestureMap, RawRecord};
    pub use crate::scaler::Scaler;
    pub use crate::scorer::{reconstruction_error, ScoreRecord};
    pub use crate::service::{ScoringService, ServiceStats};
    pub use crate::threshold::{normalize, Threshold};
    pub use crate::training::{train, TrainingConfig};
}
