//! Similarity-aware loss terms.
//!
//! Every term combines the paired IoU with similarity scores pooled over the
//! clip ranges of the predicted and ground-truth spans:
//!
//! ```text
//! S_Diff = (1 - IoU) * |mean(Q-P over pred) - mean(Q-P over GT)|
//! S_GT_P = (1 - IoU) * (1 - pool(clip similarity block of pred x GT))
//! S_Q_P  = (1 - IoU) * (1 - mean(Q-P over pred))
//! ```
//!
//! Terms are computed per video over its grouped rows and returned in batch
//! row order. Clip ranges are clamped to the sequence length of the
//! similarity tensor before slicing.

use burn::{prelude::*, tensor::cast::ToElement};

use crate::{
    clip_index::{ClipRanges, ClipSpan},
    config::GtPredPooling,
};

impl GtPredPooling {
    /// Pool the block of `clip_sims[video]` spanned by the predicted and GT
    /// clip ranges into a single value.
    ///
    /// # Shapes
    ///
    /// - clip_sims: `[num_videos, seq_len, seq_len]`
    /// - output: `[1]`
    pub fn pool<B: Backend>(
        &self,
        clip_sims: &Tensor<B, 3>,
        video: usize,
        pred: ClipSpan,
        gt: ClipSpan,
    ) -> Tensor<B, 1> {
        let video = video..video + 1;
        match self {
            Self::Mean => clip_sims
                .clone()
                .slice([video, pred.range(), gt.range()])
                .mean(),
            Self::PredMaxMean => clip_sims
                .clone()
                .slice([video, pred.range(), gt.range()])
                .max_dim(2)
                .mean(),
            Self::GtMaxMean => clip_sims
                .clone()
                .slice([video, gt.range(), pred.range()])
                .max_dim(2)
                .mean(),
        }
    }
}

/// `S_Diff`: L1 distance between the mean query similarity of the predicted
/// and the ground-truth windows, weighted by `1 - IoU`.
///
/// NaN means are logged when `detect_nan` is set and propagate into the term.
///
/// # Shapes
///
/// - iou: `[batch_size]`
/// - query_sims: `[num_videos, seq_len]`
/// - output: `[batch_size]`
pub fn sim_diff_term<B: Backend>(
    iou: Tensor<B, 1>,
    ranges: &ClipRanges,
    query_sims: Tensor<B, 2>,
    detect_nan: bool,
) -> Tensor<B, 1> {
    let [_, seq_len] = query_sims.dims();

    let sim_diffs = per_row(ranges, |video, row| {
        let pred = ranges.pred[row].clamp_to(seq_len);
        let gt = ranges.gt[row].clamp_to(seq_len);

        let pred_sim = window_mean(&query_sims, video, pred);
        let gt_sim = window_mean(&query_sims, video, gt);

        if detect_nan {
            warn_on_nan(&pred_sim, "predicted", video, ranges.pred[row], pred);
            warn_on_nan(&gt_sim, "ground truth", video, ranges.gt[row], gt);
        }

        (pred_sim - gt_sim).abs()
    });

    one_minus(iou) * sim_diffs
}

/// `S_GT_P`: dissimilarity between predicted and ground-truth clips, pooled
/// with `pooling` and weighted by `1 - IoU`.
///
/// # Shapes
///
/// - iou: `[batch_size]`
/// - clip_sims: `[num_videos, seq_len, seq_len]`
/// - output: `[batch_size]`
pub fn gt_pred_term<B: Backend>(
    iou: Tensor<B, 1>,
    ranges: &ClipRanges,
    clip_sims: Tensor<B, 3>,
    pooling: &GtPredPooling,
) -> Tensor<B, 1> {
    let [_, rows, cols] = clip_sims.dims();
    let seq_len = rows.min(cols);

    let pooled = per_row(ranges, |video, row| {
        let pred = ranges.pred[row].clamp_to(seq_len);
        let gt = ranges.gt[row].clamp_to(seq_len);
        pooling.pool(&clip_sims, video, pred, gt)
    });

    one_minus(iou) * one_minus(pooled)
}

/// `S_Q_P`: low query relevance of the predicted window, weighted by
/// `1 - IoU`. Independent of the ground-truth window.
///
/// # Shapes
///
/// - iou: `[batch_size]`
/// - query_sims: `[num_videos, seq_len]`
/// - output: `[batch_size]`
pub fn query_pred_term<B: Backend>(
    iou: Tensor<B, 1>,
    ranges: &ClipRanges,
    query_sims: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let [_, seq_len] = query_sims.dims();

    let means = per_row(ranges, |video, row| {
        window_mean(&query_sims, video, ranges.pred[row].clamp_to(seq_len))
    });

    one_minus(iou) * one_minus(means)
}

/// Evaluate `value(video, row)` for every grouped row and stack the results
/// in batch row order.
fn per_row<B: Backend>(
    ranges: &ClipRanges,
    mut value: impl FnMut(usize, usize) -> Tensor<B, 1>,
) -> Tensor<B, 1> {
    let mut values = Vec::with_capacity(ranges.batch_size());
    for (video, rows) in ranges.groups.iter() {
        for &row in rows {
            values.push((row, value(video, row)));
        }
    }
    values.sort_by_key(|(row, _)| *row);

    Tensor::cat(values.into_iter().map(|(_, value)| value).collect(), 0)
}

fn window_mean<B: Backend>(
    query_sims: &Tensor<B, 2>,
    video: usize,
    span: ClipSpan,
) -> Tensor<B, 1> {
    query_sims
        .clone()
        .slice([video..video + 1, span.range()])
        .mean()
}

fn one_minus<B: Backend>(values: Tensor<B, 1>) -> Tensor<B, 1> {
    Tensor::ones_like(&values) - values
}

fn warn_on_nan<B: Backend>(
    mean: &Tensor<B, 1>,
    window: &'static str,
    video: usize,
    raw: ClipSpan,
    clamped: ClipSpan,
) {
    if mean.clone().into_scalar().to_f64().is_nan() {
        tracing::warn!(video, window, ?raw, ?clamped, "similarity mean is NaN");
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{TensorData, Tolerance};

    use super::*;
    use crate::{clip_index::VideoGroups, tests::TestBackend};

    fn ranges(
        idx: &[usize],
        num_videos: usize,
        pred: &[(usize, usize)],
        gt: &[(usize, usize)],
    ) -> ClipRanges {
        let span = |&(start, end): &(usize, usize)| ClipSpan { start, end };
        ClipRanges {
            groups: VideoGroups::new(idx, num_videos).unwrap(),
            pred: pred.iter().map(span).collect(),
            gt: gt.iter().map(span).collect(),
        }
    }

    fn iou(values: TensorData) -> Tensor<TestBackend, 1> {
        Tensor::from_data(values, &Default::default())
    }

    fn clip_sims() -> Tensor<TestBackend, 3> {
        Tensor::from_data(
            TensorData::from([[[0.9, 0.1, 0.3], [0.2, 0.8, 0.4], [0.5, 0.6, 0.7]]]),
            &Default::default(),
        )
    }

    #[test]
    fn sim_diff_term_weights_mean_difference_by_iou_complement() {
        let query_sims = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[1.0, 0.0, 0.5, 0.5]]),
            &Default::default(),
        );
        // Row 0: means 0.5 and 0.5; row 1: means 1.0 and 0.0
        let ranges = ranges(&[0, 0], 1, &[(0, 1), (0, 0)], &[(2, 3), (1, 1)]);

        let result = sim_diff_term(iou(TensorData::from([0.5, 0.25])), &ranges, query_sims, true);

        result
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([0.0, 0.75]), Tolerance::absolute(1e-6));
    }

    #[test]
    fn sim_diff_term_identical_windows_is_zero() {
        let query_sims = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[0.3, 0.9, 0.1, 0.4]]),
            &Default::default(),
        );
        let ranges = ranges(&[0], 1, &[(1, 2)], &[(1, 2)]);

        let result = sim_diff_term(iou(TensorData::from([1.0])), &ranges, query_sims, false);

        result
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([0.0]), Tolerance::absolute(1e-6));
    }

    #[test]
    fn sim_diff_term_propagates_nan_similarity() {
        let query_sims = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[f32::NAN, 1.0]]),
            &Default::default(),
        );
        let ranges = ranges(&[0], 1, &[(0, 0)], &[(1, 1)]);

        let result = sim_diff_term(iou(TensorData::from([0.0])), &ranges, query_sims, true);

        assert!(result.into_scalar().to_f64().is_nan());
    }

    #[test]
    fn gt_pred_pooling_modes_pool_in_their_own_direction() {
        let sims = clip_sims();
        let pred = ClipSpan { start: 0, end: 1 };
        let gt = ClipSpan { start: 1, end: 2 };

        let pooled = |pooling: GtPredPooling| {
            pooling
                .pool(&sims, 0, pred, gt)
                .into_scalar()
                .to_f64()
        };

        // Block rows 0..2, cols 1..3: [[0.1, 0.3], [0.8, 0.4]]
        assert!((pooled(GtPredPooling::Mean) - 0.4).abs() < 1e-6);
        // Row maxima 0.3 and 0.8
        assert!((pooled(GtPredPooling::PredMaxMean) - 0.55).abs() < 1e-6);
        // Block rows 1..3, cols 0..2: [[0.2, 0.8], [0.5, 0.6]], row maxima 0.8 and 0.6
        assert!((pooled(GtPredPooling::GtMaxMean) - 0.7).abs() < 1e-6);
    }

    #[test]
    fn gt_pred_term_combines_iou_and_pooled_similarity() {
        let ranges = ranges(&[0], 1, &[(0, 1)], &[(1, 2)]);

        let result = gt_pred_term(
            iou(TensorData::from([0.5])),
            &ranges,
            clip_sims(),
            &GtPredPooling::PredMaxMean,
        );

        // (1 - 0.5) * (1 - 0.55)
        result
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([0.225]), Tolerance::absolute(1e-6));
    }

    #[test]
    fn gt_pred_term_clamps_ranges_to_sequence_length() {
        let ranges = ranges(&[0], 1, &[(2, 9)], &[(5, 9)]);

        let result = gt_pred_term(
            iou(TensorData::from([0.0])),
            &ranges,
            clip_sims(),
            &GtPredPooling::Mean,
        );

        // Both ranges clamp to clip 2: 1 - 0.7
        result
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([0.3]), Tolerance::absolute(1e-6));
    }

    #[test]
    fn query_pred_term_follows_batch_row_order() {
        let query_sims = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[0.2, 0.2], [0.8, 0.8]]),
            &Default::default(),
        );
        // Row 0 belongs to video 1, row 1 to video 0
        let ranges = ranges(&[1, 0], 2, &[(0, 1), (0, 1)], &[(0, 0), (0, 0)]);

        let result = query_pred_term(iou(TensorData::from([0.0, 0.0])), &ranges, query_sims);

        result
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([0.2, 0.8]), Tolerance::absolute(1e-6));
    }
}
