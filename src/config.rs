//! Index configuration knobs.

use regex::Regex;
use serde::Deserialize;

use crate::types::IndexError;

/// Configuration for chunking, clustering, and similarity search.
///
/// All fields have working defaults so callers can start from
/// [`IndexConfig::default()`] and override selectively, or deserialize the
/// whole struct from their own configuration layer.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Dimension every stored and queried vector must have.
    pub embedding_dimension: usize,
    /// Token budget per chunk.
    pub chunk_tokens: usize,
    /// Token budget for the sliding overlap between consecutive chunks.
    pub overlap_tokens: usize,
    /// Similarity threshold in percent (0–100); results below are dropped.
    pub similarity_threshold: f32,
    /// Maximum number of chunks sampled for a clustering pass.
    pub cluster_sample_size: usize,
    /// Target number of chunks per cluster.
    pub cluster_size: usize,
    /// Partition clusters by language tag instead of one global partition.
    pub partition_by_language: bool,
    /// Regex; documents whose id matches are excluded from indexing.
    pub exclude_pattern: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            embedding_dimension: 1536,
            chunk_tokens: 300,
            overlap_tokens: 60,
            similarity_threshold: 50.0,
            cluster_sample_size: 2000,
            cluster_size: 400,
            partition_by_language: false,
            exclude_pattern: None,
        }
    }
}

impl IndexConfig {
    /// Threshold as a fraction comparable to a dot product of unit vectors.
    pub fn threshold_fraction(&self) -> f32 {
        self.similarity_threshold / 100.0
    }

    /// Compiles the exclusion pattern, if configured.
    pub fn exclude_regex(&self) -> Result<Option<Regex>, IndexError> {
        self.exclude_pattern
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| {
                    IndexError::Config(format!("invalid exclude pattern '{pattern}': {err}"))
                })
            })
            .transpose()
    }

    /// Validates invariants that would otherwise surface as runtime errors.
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.embedding_dimension == 0 {
            return Err(IndexError::Config("embedding_dimension must be > 0".into()));
        }
        if self.chunk_tokens == 0 {
            return Err(IndexError::Config("chunk_tokens must be > 0".into()));
        }
        if self.cluster_size == 0 {
            return Err(IndexError::Config("cluster_size must be > 0".into()));
        }
        if !(0.0..=100.0).contains(&self.similarity_threshold) {
            return Err(IndexError::Config(format!(
                "similarity_threshold must be within 0–100, got {}",
                self.similarity_threshold
            )));
        }
        self.exclude_regex()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        IndexConfig::default().validate().unwrap();
    }

    #[test]
    fn threshold_is_a_fraction() {
        let config = IndexConfig {
            similarity_threshold: 55.0,
            ..Default::default()
        };
        assert!((config.threshold_fraction() - 0.55).abs() < f32::EPSILON);
    }

    #[test]
    fn bad_pattern_is_a_config_error() {
        let config = IndexConfig {
            exclude_pattern: Some("[".into()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(IndexError::Config(_))));
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let config = IndexConfig {
            similarity_threshold: 101.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
