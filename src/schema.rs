//! sensor.reading.v1 ingestion schema
//!
//! Line-oriented envelope for feeding recorded sensor streams into the
//! pipeline. Each envelope carries one reading, the session it belongs to and
//! optional per-call processing options.

use crate::error::AlertError;
use crate::extractor::MetricExtractor;
use crate::types::{ProcessOptions, SensorReading};
use serde::{Deserialize, Serialize};

/// Current schema version
pub const SCHEMA_VERSION: &str = "sensor.reading.v1";

/// One reading with its session and options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingEnvelope {
    pub schema_version: String,
    pub session_id: String,
    pub reading: SensorReading,
    #[serde(default)]
    pub options: ProcessOptions,
}

impl ReadingEnvelope {
    pub fn new(session_id: impl Into<String>, reading: SensorReading) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            session_id: session_id.into(),
            reading,
            options: ProcessOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ProcessOptions) -> Self {
        self.options = options;
        self
    }

    /// Structural checks only; data quality is judged by the pipeline
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ValidationError::InvalidSchemaVersion {
                expected: SCHEMA_VERSION.to_string(),
                actual: self.schema_version.clone(),
            });
        }
        if self.session_id.trim().is_empty() {
            return Err(ValidationError::MissingField("session_id"));
        }
        if self.reading.sensor_id.trim().is_empty() {
            return Err(ValidationError::MissingField("reading.sensor_id"));
        }

        let expected = MetricExtractor::expected_channels(self.reading.reading_type);
        if self.reading.channels.len() < expected {
            return Err(ValidationError::ChannelCount {
                reading_type: self.reading.reading_type.as_str().to_string(),
                expected,
                actual: self.reading.channels.len(),
            });
        }
        if !(0.0..=100.0).contains(&self.reading.data_quality) {
            return Err(ValidationError::DataQualityRange(self.reading.data_quality));
        }
        Ok(())
    }
}

/// Validation errors for reading envelopes
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid schema version: expected {expected}, got {actual}")]
    InvalidSchemaVersion { expected: String, actual: String },

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("{reading_type} reading needs at least {expected} channels, got {actual}")]
    ChannelCount {
        reading_type: String,
        expected: usize,
        actual: usize,
    },

    #[error("data_quality {0} outside 0-100")]
    DataQualityRange(f64),
}

/// Result of envelope validation
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub index: usize,
    pub sensor_id: String,
    pub error: String,
}

/// Parse a JSON array of envelopes
pub fn parse_array(json: &str) -> Result<Vec<ReadingEnvelope>, AlertError> {
    let envelopes: Vec<ReadingEnvelope> = serde_json::from_str(json)?;
    Ok(envelopes)
}

/// Parse NDJSON (one envelope per line, blank lines skipped)
pub fn parse_ndjson(ndjson: &str) -> Result<Vec<ReadingEnvelope>, AlertError> {
    let mut envelopes = Vec::new();
    for (line_num, line) in ndjson.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let envelope = serde_json::from_str::<ReadingEnvelope>(trimmed).map_err(|e| {
            AlertError::ParseError(format!("Failed to parse line {}: {}", line_num + 1, e))
        })?;
        envelopes.push(envelope);
    }
    Ok(envelopes)
}

/// Parse either a JSON array or NDJSON, decided by the first non-blank character
pub fn parse_any(input: &str) -> Result<Vec<ReadingEnvelope>, AlertError> {
    if input.trim_start().starts_with('[') {
        parse_array(input)
    } else {
        parse_ndjson(input)
    }
}

/// Collect the envelopes that fail validation
pub fn validate_envelopes(envelopes: &[ReadingEnvelope]) -> Vec<ValidationResult> {
    envelopes
        .iter()
        .enumerate()
        .filter_map(|(index, envelope)| {
            envelope.validate().err().map(|e| ValidationResult {
                index,
                sensor_id: envelope.reading.sensor_id.clone(),
                error: e.to_string(),
            })
        })
        .collect()
}
