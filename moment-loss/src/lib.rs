//! Similarity-aware temporal span losses for video moment retrieval.
//!
//! Given predicted and ground-truth spans over a video and similarity scores
//! produced by an encoder, this crate computes the IoU loss of each span pair
//! augmented with similarity-aware terms, using the Burn deep learning
//! framework. All computations are backend-agnostic and differentiable.
//!
//! ## Loss terms
//!
//! - **`S_Diff`** ([`SimTerm::SimDiff`]): difference of the mean query
//!   similarity inside the predicted and the ground-truth windows
//! - **`S_GT_P`** ([`SimTerm::GtPred`]): clip-to-clip similarity between
//!   predicted and ground-truth windows, pooled with [`GtPredPooling`]
//! - **`S_Q_P`** ([`SimTerm::QueryPred`]): query similarity of the predicted
//!   window
//!
//! Each term is weighted by `1 - IoU` and added to the base `1 - IoU` loss.
//!
//! ## Usage Example
//!
//! ```rust
//! use burn::{backend::NdArray, nn::loss::Reduction, prelude::*};
//! use moment_loss::{SimTerm, SimilarityInputs, SimilarityLossConfig};
//!
//! let device = Default::default();
//! let loss = SimilarityLossConfig::new()
//!     .with_terms(vec![SimTerm::SimDiff, SimTerm::QueryPred])
//!     .init()
//!     .unwrap();
//!
//! let pred = Tensor::<NdArray, 2>::from_floats([[0.1, 0.4]], &device);
//! let gt = Tensor::<NdArray, 2>::from_floats([[0.2, 0.5]], &device);
//! let query_sims = Tensor::<NdArray, 2>::ones([1, 75], &device);
//!
//! let (value, diagnostics) = loss
//!     .forward(
//!         pred,
//!         gt,
//!         SimilarityInputs::query(query_sims),
//!         &[0],
//!         Some(&[150.0]),
//!         Reduction::Mean,
//!     )
//!     .unwrap();
//! assert_eq!(value.dims(), [1]);
//! assert_eq!(diagnostics.pred_spans.len(), 1);
//! ```
//!
//! Span geometry (format conversion, IoU, GIoU) lives in [`burn_span_ops`]
//! and is re-exported here.

mod clip_index;
mod config;
mod error;
mod loss;
mod similarity;

pub use burn_span_ops as span_ops;
pub use clip_index::{
    clip_len_from_duration, windows_from_cxw, ClipRanges, ClipSpan, TimeWindow, VideoGroups,
};
pub use config::{ClipLength, GtPredPooling, SimTerm, SimilarityLossConfig};
pub use error::{MomentLossError, MomentLossResult};
pub use loss::{LossDiagnostics, SimilarityInputs, SimilarityLoss};
pub use similarity::{gt_pred_term, query_pred_term, sim_diff_term};

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    pub type TestBackend = NdArray<f32>;
}
