//! Estimates the daily duration of steady power supply for a locality.
//!
//! A consumer narrows town -> substation -> feeder against a static
//! reference table, picks a rural/urban class, and a pre-trained regression
//! model turns the selection into hours and minutes of supply per day.

pub mod catalog;
pub mod config;
pub mod error;
pub mod model;
pub mod selector;
pub mod server;
pub mod types;

pub use catalog::ReferenceCatalog;
pub use error::{Error, Result};
pub use model::{FeatureTransformer, OneHotEncoder, PredictionService, Predictor};
pub use selector::CascadingSelector;
pub use types::{Field, LocalityClass, LocalityRecord, PredictionResult, Selection, Stage};
