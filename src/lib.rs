//! Synheart Sentinel - Real-time alert pipeline for wearable sensor streams
//!
//! Sentinel turns raw biomechanical and physiological sensor readings into
//! deduplicated, prioritized alerts through a concurrent pipeline:
//! metric extraction → threshold analysis ∥ anomaly detection → alert
//! synthesis → correlation → distribution.
//!
//! ## Modules
//!
//! - **Analysis**: `extractor`, `window`, `threshold`, `baseline`, `anomaly`
//! - **Alerting**: `synthesizer`, `correlator`, `distributor`, `subscription`
//! - **Resilience**: `breaker`, `persistence`, `locks`

pub mod anomaly;
pub mod baseline;
pub mod breaker;
pub mod config;
pub mod correlator;
pub mod distributor;
pub mod error;
pub mod extractor;
pub mod locks;
pub mod persistence;
pub mod pipeline;
pub mod schema;
pub mod subscription;
pub mod synthesizer;
pub mod telemetry;
pub mod threshold;
pub mod types;
pub mod window;

pub use breaker::{BreakerStats, CircuitState};
pub use config::SentinelConfig;
pub use error::AlertError;
pub use persistence::{AlertPersistence, BulkUpdateResult, InMemoryAlertStore};
pub use pipeline::AlertPipeline;
pub use subscription::{Subscription, SubscriptionHandle};
pub use types::{
    Alert, AlertFilter, AlertMetrics, AlertStatus, AlertType, ChannelValue, Metric,
    ProcessOptions, ReadingType, SensorReading, Severity, TimeRange,
};

// Schema exports
pub use schema::{ReadingEnvelope, SCHEMA_VERSION};

/// Sentinel version reported by the CLI
pub const SENTINEL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name stamped on CLI output
pub const PRODUCER_NAME: &str = "synheart-sentinel";
