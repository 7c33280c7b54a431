//! Similarity-aware span loss.
//!
//! Starts from the IoU loss of each (prediction, ground truth) pair and adds
//! the enabled similarity terms:
//!
//! ```text
//! loss = (1 - IoU) + sum(enabled terms)
//! ```
//!
//! Spans are mapped onto clip ranges either with per-video durations
//! (variable-length videos) or with the sequence length of the similarity
//! tensors (fixed-length videos).

use burn::{
    module::{Content, DisplaySettings, Ignored, ModuleDisplay},
    nn::loss::Reduction,
    prelude::*,
};
use burn_span_ops::{first_inverted_span, paired_temporal_iou};
use serde::{Deserialize, Serialize};

use crate::{
    clip_index::{
        clip_len_from_duration, windows_from_cxw, ClipRanges, ClipSpan, TimeWindow, VideoGroups,
    },
    config::{ClipLength, GtPredPooling, SimTerm},
    error::{MomentLossError, MomentLossResult},
    similarity::{gt_pred_term, query_pred_term, sim_diff_term},
};

/// Similarity tensors produced by the encoder for one step.
///
/// Which members are required depends on the enabled terms:
/// [`SimTerm::SimDiff`] and [`SimTerm::QueryPred`] read `query`,
/// [`SimTerm::GtPred`] reads `clip`.
#[derive(Clone, Debug)]
pub struct SimilarityInputs<B: Backend> {
    /// Frame-to-query similarity, `[num_videos, seq_len]`.
    pub query: Option<Tensor<B, 2>>,
    /// Frame-to-frame similarity, `[num_videos, seq_len, seq_len]`.
    pub clip: Option<Tensor<B, 3>>,
}

impl<B: Backend> SimilarityInputs<B> {
    pub fn new(query: Option<Tensor<B, 2>>, clip: Option<Tensor<B, 3>>) -> Self {
        Self { query, clip }
    }

    /// Only frame-to-query similarity.
    pub fn query(query: Tensor<B, 2>) -> Self {
        Self::new(Some(query), None)
    }

    /// Only frame-to-frame similarity.
    pub fn clip(clip: Tensor<B, 3>) -> Self {
        Self::new(None, Some(clip))
    }

    /// No similarity tensors; only valid without enabled terms.
    pub fn none() -> Self {
        Self::new(None, None)
    }

    fn query_for(&self, term: &SimTerm) -> MomentLossResult<Tensor<B, 2>> {
        self.query
            .clone()
            .ok_or_else(|| MomentLossError::MissingSimilarity {
                term: term.clone(),
                tensor: "frame-to-query",
            })
    }

    fn clip_for(&self, term: &SimTerm) -> MomentLossResult<Tensor<B, 3>> {
        self.clip
            .clone()
            .ok_or_else(|| MomentLossError::MissingSimilarity {
                term: term.clone(),
                tensor: "frame-to-frame",
            })
    }

    /// `[num_videos, seq_len]` shared by the provided tensors.
    fn sequence_shape(&self) -> MomentLossResult<Option<[usize; 2]>> {
        match (&self.query, &self.clip) {
            (None, None) => Ok(None),
            (Some(query), None) => Ok(Some(query.dims())),
            (None, Some(clip)) => square_shape(clip).map(Some),
            (Some(query), Some(clip)) => {
                let query_shape = query.dims();
                let clip_shape = square_shape(clip)?;
                if query_shape != clip_shape {
                    return Err(MomentLossError::ShapeMismatch {
                        expected: format!("query similarity of shape {clip_shape:?}"),
                        actual: format!("{query_shape:?}"),
                    });
                }
                Ok(Some(clip_shape))
            }
        }
    }
}

fn square_shape<B: Backend>(clip: &Tensor<B, 3>) -> MomentLossResult<[usize; 2]> {
    let [num_videos, rows, cols] = clip.dims();
    if rows != cols {
        return Err(MomentLossError::ShapeMismatch {
            expected: format!("[{num_videos}, {rows}, {rows}]"),
            actual: format!("[{num_videos}, {rows}, {cols}]"),
        });
    }
    Ok([num_videos, rows])
}

/// Per-video values collected during a loss evaluation, for logging.
///
/// Outer vectors are indexed by video, inner vectors follow batch order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LossDiagnostics {
    pub pred_spans: Vec<Vec<ClipSpan>>,
    pub gt_spans: Vec<Vec<ClipSpan>>,
    pub ious: Vec<Vec<f32>>,
    pub losses: Vec<Vec<f32>>,
}

/// Similarity-aware span loss.
///
/// Created from a [`SimilarityLossConfig`](crate::SimilarityLossConfig).
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct SimilarityLoss {
    /// Enabled similarity terms, applied in order.
    pub terms: Ignored<Vec<SimTerm>>,
    /// Pooling used by [`SimTerm::GtPred`].
    pub pooling: Ignored<GtPredPooling>,
    /// How clip lengths are derived.
    pub clip_length: Ignored<ClipLength>,
    /// Seconds per clip.
    pub clip_unit: f64,
    /// Upper bound in seconds for windows built from predictions.
    pub max_duration: f64,
    /// Check similarity means for NaN and log them.
    pub detect_nan: bool,
}

impl ModuleDisplay for SimilarityLoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("terms", &self.terms)
            .add("pooling", &self.pooling)
            .add("clip_length", &self.clip_length)
            .add("clip_unit", &self.clip_unit)
            .add("max_duration", &self.max_duration)
            .optional()
    }
}

impl SimilarityLoss {
    /// Convert `(center, width)` predictions into windows in seconds, grouped
    /// per video, bounded by the configured maximum duration and snapped to
    /// the configured clip unit.
    ///
    /// # Shapes
    ///
    /// - cxw_spans: `[batch_size, 2]`
    ///
    /// # Errors
    ///
    /// See [`windows_from_cxw`].
    pub fn windows<B: Backend>(
        &self,
        cxw_spans: Tensor<B, 2>,
        durations: &[f32],
        idx: &[usize],
    ) -> MomentLossResult<Vec<Vec<TimeWindow>>> {
        windows_from_cxw(cxw_spans, durations, idx, self.clip_unit, self.max_duration)
    }

    /// Compute the loss with reduction.
    ///
    /// # Shapes
    ///
    /// - pred_spans: `[batch_size, 2]`
    /// - gt_spans: `[batch_size, 2]`
    /// - output: `[1]`
    ///
    /// # Errors
    ///
    /// See [`SimilarityLoss::forward_no_reduction`].
    pub fn forward<B: Backend>(
        &self,
        pred_spans: Tensor<B, 2>,
        gt_spans: Tensor<B, 2>,
        sims: SimilarityInputs<B>,
        idx: &[usize],
        durations: Option<&[f32]>,
        reduction: Reduction,
    ) -> MomentLossResult<(Tensor<B, 1>, LossDiagnostics)> {
        let (loss, diagnostics) =
            self.forward_no_reduction(pred_spans, gt_spans, sims, idx, durations)?;
        let loss = match reduction {
            Reduction::Mean | Reduction::Auto => loss.mean(),
            Reduction::Sum => loss.sum(),
        };
        Ok((loss, diagnostics))
    }

    /// Compute the loss of every (prediction, ground truth) pair.
    ///
    /// `idx[b]` is the video of batch row `b`, i.e. its row in the similarity
    /// tensors. `durations[v]` is the length of video `v` in seconds and is
    /// required with [`ClipLength::Duration`].
    ///
    /// # Shapes
    ///
    /// - pred_spans: `[batch_size, 2]`, normalized `(start, end)`
    /// - gt_spans: `[batch_size, 2]`, normalized `(start, end)`
    /// - output: `[batch_size]`
    ///
    /// # Errors
    ///
    /// Returns an error if a span has `end < start`, the inputs disagree on
    /// batch size or number of videos, or an enabled term is missing its
    /// similarity tensor.
    pub fn forward_no_reduction<B: Backend>(
        &self,
        pred_spans: Tensor<B, 2>,
        gt_spans: Tensor<B, 2>,
        sims: SimilarityInputs<B>,
        idx: &[usize],
        durations: Option<&[f32]>,
    ) -> MomentLossResult<(Tensor<B, 1>, LossDiagnostics)> {
        let batch_size = self.check_spans(&pred_spans, &gt_spans, idx)?;
        self.check_terms(&sims)?;

        let iou = paired_temporal_iou(pred_spans.clone(), gt_spans.clone());
        let mut loss = Tensor::ones_like(&iou) - iou.clone();

        let sequence_shape = sims.sequence_shape()?;
        let clip_lens = self.clip_lens(sequence_shape, durations)?;
        let groups = VideoGroups::new(idx, clip_lens.len())?;
        let ranges = ClipRanges::new(
            &span_rows(&pred_spans),
            &span_rows(&gt_spans),
            groups,
            &clip_lens,
        )?;

        for term in self.terms.0.iter() {
            let value = match term {
                SimTerm::SimDiff => {
                    let query = sims.query_for(term)?;
                    sim_diff_term(iou.clone(), &ranges, query, self.detect_nan)
                }
                SimTerm::GtPred => {
                    let clip = sims.clip_for(term)?;
                    gt_pred_term(iou.clone(), &ranges, clip, &self.pooling.0)
                }
                SimTerm::QueryPred => {
                    let query = sims.query_for(term)?;
                    query_pred_term(iou.clone(), &ranges, query)
                }
            };
            loss = loss + value;
        }

        let diagnostics = LossDiagnostics {
            pred_spans: ranges.groups.collect_per_video(&ranges.pred),
            gt_spans: ranges.groups.collect_per_video(&ranges.gt),
            ious: ranges.groups.collect_per_video(&tensor_values(&iou)),
            losses: ranges.groups.collect_per_video(&tensor_values(&loss)),
        };

        tracing::debug!(
            batch_size,
            num_videos = ranges.groups.num_videos(),
            terms = ?self.terms.0,
            "computed similarity-aware span loss"
        );

        Ok((loss, diagnostics))
    }

    fn check_spans<B: Backend>(
        &self,
        pred_spans: &Tensor<B, 2>,
        gt_spans: &Tensor<B, 2>,
        idx: &[usize],
    ) -> MomentLossResult<usize> {
        let pred_dims = pred_spans.dims();
        let gt_dims = gt_spans.dims();
        if pred_dims[1] != 2 {
            return Err(MomentLossError::ShapeMismatch {
                expected: format!("[{}, 2]", pred_dims[0]),
                actual: format!("{pred_dims:?}"),
            });
        }
        if gt_dims != pred_dims {
            return Err(MomentLossError::ShapeMismatch {
                expected: format!("{pred_dims:?}"),
                actual: format!("{gt_dims:?}"),
            });
        }

        let [batch_size, _] = pred_dims;
        if batch_size == 0 {
            return Err(MomentLossError::EmptyBatch);
        }
        if idx.len() != batch_size {
            return Err(MomentLossError::BatchSizeMismatch {
                what: "video indices",
                expected: batch_size,
                actual: idx.len(),
            });
        }

        if let Some(row) = first_inverted_span(pred_spans) {
            return Err(MomentLossError::InvertedSpan {
                set: "predicted",
                row,
            });
        }
        if let Some(row) = first_inverted_span(gt_spans) {
            return Err(MomentLossError::InvertedSpan {
                set: "ground truth",
                row,
            });
        }

        Ok(batch_size)
    }

    fn check_terms<B: Backend>(&self, sims: &SimilarityInputs<B>) -> MomentLossResult<()> {
        for term in self.terms.0.iter() {
            if term.needs_query_sims() {
                sims.query_for(term)?;
            }
            if term.needs_clip_sims() {
                sims.clip_for(term)?;
            }
        }
        Ok(())
    }

    /// Number of clips of every video.
    fn clip_lens(
        &self,
        sequence_shape: Option<[usize; 2]>,
        durations: Option<&[f32]>,
    ) -> MomentLossResult<Vec<usize>> {
        match self.clip_length.0 {
            ClipLength::Duration => {
                let durations = durations.ok_or(MomentLossError::MissingDurations)?;
                if let Some([num_videos, seq_len]) = sequence_shape {
                    if durations.len() != num_videos {
                        return Err(MomentLossError::BatchSizeMismatch {
                            what: "durations",
                            expected: num_videos,
                            actual: durations.len(),
                        });
                    }
                    // Ranges are clamped to the tensor length, which must hold a clip
                    if seq_len == 0 {
                        return Err(MomentLossError::EmptyClipSequence {
                            video: 0,
                            duration: durations.first().copied().unwrap_or_default(),
                        });
                    }
                }

                durations
                    .iter()
                    .enumerate()
                    .map(|(video, &duration)| {
                        let clip_len = clip_len_from_duration(duration, self.clip_unit);
                        if clip_len == 0 {
                            return Err(MomentLossError::EmptyClipSequence { video, duration });
                        }
                        Ok(clip_len)
                    })
                    .collect()
            }
            ClipLength::Sequence => {
                let [num_videos, seq_len] =
                    sequence_shape.ok_or(MomentLossError::UnknownClipLength)?;
                if seq_len == 0 {
                    return Err(MomentLossError::EmptyClipSequence {
                        video: 0,
                        duration: 0.0,
                    });
                }
                Ok(vec![seq_len; num_videos])
            }
        }
    }
}

/// Read `[N, 2]` spans back to the host.
fn span_rows<B: Backend>(spans: &Tensor<B, 2>) -> Vec<[f32; 2]> {
    let values: Vec<f32> = tensor_values(spans);
    values
        .chunks_exact(2)
        .map(|bounds| [bounds[0], bounds[1]])
        .collect()
}

fn tensor_values<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> Vec<f32> {
    tensor.to_data().iter::<f32>().collect()
}
