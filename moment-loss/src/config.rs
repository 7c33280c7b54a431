//! Configuration for the similarity-aware span loss.
//!
//! Configurations are serde-backed Burn [`Config`]s and can be stored next to
//! training configs as JSON.

use std::collections::HashSet;

use burn::{module::Ignored, prelude::*};

use crate::{
    error::{MomentLossError, MomentLossResult},
    loss::SimilarityLoss,
};

/// A similarity-aware term that can be added to the base `1 - IoU` loss.
#[derive(Config, Debug, PartialEq, Eq, Hash)]
pub enum SimTerm {
    /// `|mean(Q-P over pred) - mean(Q-P over GT)| * (1 - IoU)`. Identifier `1`.
    SimDiff,
    /// `(1 - pooled(GT-P clip similarity)) * (1 - IoU)`. Identifier `2`.
    GtPred,
    /// `(1 - mean(Q-P over pred)) * (1 - IoU)`. Identifier `3`.
    QueryPred,
}

impl SimTerm {
    /// Numeric identifier used by training configurations.
    pub const fn id(&self) -> u8 {
        match self {
            Self::SimDiff => 1,
            Self::GtPred => 2,
            Self::QueryPred => 3,
        }
    }

    /// Parse a numeric term identifier.
    ///
    /// # Errors
    ///
    /// Returns [`MomentLossError::InvalidParameter`] for identifiers other than 1, 2 or 3.
    pub fn from_id(id: u8) -> MomentLossResult<Self> {
        match id {
            1 => Ok(Self::SimDiff),
            2 => Ok(Self::GtPred),
            3 => Ok(Self::QueryPred),
            other => Err(MomentLossError::InvalidParameter {
                parameter: "terms".to_owned(),
                reason: format!("unknown term identifier {other}, expected 1, 2 or 3"),
            }),
        }
    }

    /// Whether the term reads the frame-to-query similarity sequence.
    pub const fn needs_query_sims(&self) -> bool {
        matches!(self, Self::SimDiff | Self::QueryPred)
    }

    /// Whether the term reads the frame-to-frame similarity matrix.
    pub const fn needs_clip_sims(&self) -> bool {
        matches!(self, Self::GtPred)
    }
}

/// Pooling of the GT/prediction block of the clip-to-clip similarity matrix.
#[derive(Config, Debug, PartialEq, Eq, Hash)]
pub enum GtPredPooling {
    /// Rows are predicted clips, columns GT clips; mean over the whole block.
    Mean,
    /// Rows are predicted clips, columns GT clips; best GT match per predicted
    /// clip, averaged over predicted clips.
    PredMaxMean,
    /// Rows are GT clips, columns predicted clips; best predicted match per GT
    /// clip, averaged over GT clips.
    GtMaxMean,
}

impl Default for GtPredPooling {
    fn default() -> Self {
        Self::Mean
    }
}

/// Source of the number of clips per video.
#[derive(Config, Debug, PartialEq, Eq, Hash)]
pub enum ClipLength {
    /// `floor(duration / clip_unit)` from per-video durations. Needed for
    /// datasets with variable video length.
    Duration,
    /// The sequence length of the similarity tensors, shared by all videos.
    Sequence,
}

impl Default for ClipLength {
    fn default() -> Self {
        Self::Duration
    }
}

/// Configuration for creating a [similarity-aware span loss](SimilarityLoss).
#[derive(Config, Debug)]
pub struct SimilarityLossConfig {
    /// Enabled similarity terms, applied in order. Empty means plain `1 - IoU`.
    #[config(default = "Vec::new()")]
    pub terms: Vec<SimTerm>,

    /// Pooling used by [`SimTerm::GtPred`].
    #[config(default = "GtPredPooling::Mean")]
    pub pooling: GtPredPooling,

    /// How clip lengths are derived.
    #[config(default = "ClipLength::Duration")]
    pub clip_length: ClipLength,

    /// Seconds per clip. Default: 2.0
    #[config(default = 2.0)]
    pub clip_unit: f64,

    /// Upper bound in seconds for windows built from predictions. Default: 150.0
    #[config(default = 150.0)]
    pub max_duration: f64,

    /// Check similarity means for NaN and log them. Forces a device sync.
    #[config(default = true)]
    pub detect_nan: bool,
}

impl SimilarityLossConfig {
    /// Set the enabled terms from numeric identifiers (`1`, `2`, `3`).
    ///
    /// Identifiers form a set: repeated identifiers enable their term once, at
    /// the position of the first occurrence.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown identifiers.
    pub fn with_term_ids(self, ids: &[u8]) -> MomentLossResult<Self> {
        let mut terms = Vec::with_capacity(ids.len());
        for &id in ids {
            let term = SimTerm::from_id(id)?;
            if !terms.contains(&term) {
                terms.push(term);
            }
        }
        Ok(self.with_terms(terms))
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MomentLossError::InvalidParameter`] if the clip unit or max
    /// duration is not positive, or a term is listed twice.
    pub fn validate(&self) -> MomentLossResult<()> {
        if self.clip_unit.is_nan() || self.clip_unit <= 0.0 {
            return Err(MomentLossError::InvalidParameter {
                parameter: "clip_unit".to_owned(),
                reason: format!("must be positive, got {}", self.clip_unit),
            });
        }

        if self.max_duration.is_nan() || self.max_duration <= 0.0 {
            return Err(MomentLossError::InvalidParameter {
                parameter: "max_duration".to_owned(),
                reason: format!("must be positive, got {}", self.max_duration),
            });
        }

        let mut seen = HashSet::new();
        if let Some(duplicate) = self.terms.iter().find(|term| !seen.insert(*term)) {
            return Err(MomentLossError::InvalidParameter {
                parameter: "terms".to_owned(),
                reason: format!("term {duplicate:?} is listed more than once"),
            });
        }

        Ok(())
    }

    /// Initialize the [similarity-aware span loss](SimilarityLoss).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn init(&self) -> MomentLossResult<SimilarityLoss> {
        self.validate()?;
        Ok(SimilarityLoss {
            terms: Ignored(self.terms.clone()),
            pooling: Ignored(self.pooling.clone()),
            clip_length: Ignored(self.clip_length.clone()),
            clip_unit: self.clip_unit,
            max_duration: self.max_duration,
            detect_nan: self.detect_nan,
        })
    }
}
