//! Learning from interactions.
//!
//! Each interaction becomes a [`LearningEvent`] with candidate triples. A
//! consolidation pass clusters pending candidates and promotes the ones
//! repeated across enough distinct interactions into the knowledge store.

pub mod consolidator;
pub mod dbscan;
mod event;
pub mod metrics;

pub use consolidator::{ConsolidationReport, LearningModule};
pub use dbscan::{dbscan, Clustering, Label};
pub use event::*;
pub use metrics::LearningMetrics;
