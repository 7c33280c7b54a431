//! Temporal intersection over union between sets of spans.
//!
//! The cross-product variants compare every row of the first set against
//! every row of the second and return `[N, M]` matrices. The paired variant
//! compares row `i` with row `i` only.
//!
//! ```text
//! intersection = max(0, min(end1, end2) - max(start1, start2))
//! union        = (end1 - start1) + (end2 - start2) - intersection
//! IoU          = intersection / union
//! GIoU         = IoU - (enclosing - union) / enclosing
//! ```

use burn::prelude::*;

/// Start and end columns of two span sets broadcast to `[N, M]`.
struct PairwiseBounds<B: Backend> {
    start1: Tensor<B, 2>,
    end1: Tensor<B, 2>,
    start2: Tensor<B, 2>,
    end2: Tensor<B, 2>,
}

impl<B: Backend> PairwiseBounds<B> {
    fn new(spans1: Tensor<B, 2>, spans2: Tensor<B, 2>) -> Self {
        assert_span_shape(&spans1, "spans1");
        assert_span_shape(&spans2, "spans2");
        let [n, _] = spans1.dims();
        let [m, _] = spans2.dims();

        let (start1, end1) = split_bounds(spans1);
        let (start2, end2) = split_bounds(spans2);

        Self {
            start1: start1.repeat_dim(1, m),
            end1: end1.repeat_dim(1, m),
            start2: start2.reshape([1, m]).repeat_dim(0, n),
            end2: end2.reshape([1, m]).repeat_dim(0, n),
        }
    }

    fn intersection(&self) -> Tensor<B, 2> {
        let left = self.start1.clone().max_pair(self.start2.clone());
        let right = self.end1.clone().min_pair(self.end2.clone());
        (right - left).clamp_min(0.0)
    }

    fn enclosing(&self) -> Tensor<B, 2> {
        let left = self.start1.clone().min_pair(self.start2.clone());
        let right = self.end1.clone().max_pair(self.end2.clone());
        (right - left).clamp_min(0.0)
    }

    fn length1(&self) -> Tensor<B, 2> {
        self.end1.clone() - self.start1.clone()
    }

    fn length2(&self) -> Tensor<B, 2> {
        self.end2.clone() - self.start2.clone()
    }
}

/// Pairwise IoU between every span of `spans1` and every span of `spans2`.
///
/// Division by zero is not guarded: two zero-length spans give NaN.
///
/// # Shapes
///
/// - spans1: `[N, 2]`
/// - spans2: `[M, 2]`
/// - output: `(iou [N, M], union [N, M])`
pub fn temporal_iou<B: Backend>(
    spans1: Tensor<B, 2>,
    spans2: Tensor<B, 2>,
) -> (Tensor<B, 2>, Tensor<B, 2>) {
    let bounds = PairwiseBounds::new(spans1, spans2);

    let inter = bounds.intersection();
    let union = bounds.length1() + bounds.length2() - inter.clone();
    let iou = inter / union.clone();

    (iou, union)
}

/// Intersection divided by the length of the predicted span.
///
/// # Shapes
///
/// - gt_spans: `[N, 2]`
/// - pred_spans: `[M, 2]`
/// - output: `[N, M]`
pub fn temporal_intersection_over_pred<B: Backend>(
    gt_spans: Tensor<B, 2>,
    pred_spans: Tensor<B, 2>,
) -> Tensor<B, 2> {
    let bounds = PairwiseBounds::new(gt_spans, pred_spans);
    bounds.intersection() / bounds.length2()
}

/// Generalized temporal IoU, see <https://giou.stanford.edu/>.
///
/// # Panics
///
/// Panics if any span in either set has `end < start`.
///
/// # Shapes
///
/// - spans1: `[N, 2]`
/// - spans2: `[M, 2]`
/// - output: `[N, M]`
pub fn generalized_temporal_iou<B: Backend>(
    spans1: Tensor<B, 2>,
    spans2: Tensor<B, 2>,
) -> Tensor<B, 2> {
    assert_ordered(&spans1, "spans1");
    assert_ordered(&spans2, "spans2");

    let bounds = PairwiseBounds::new(spans1, spans2);

    let inter = bounds.intersection();
    let union = bounds.length1() + bounds.length2() - inter.clone();
    let iou = inter / union.clone();

    let enclosing = bounds.enclosing();
    iou - (enclosing.clone() - union) / enclosing
}

/// IoU between aligned pairs of spans, i.e. the diagonal of [`temporal_iou`].
///
/// # Shapes
///
/// - spans1: `[B, 2]`
/// - spans2: `[B, 2]`
/// - output: `[B]`
pub fn paired_temporal_iou<B: Backend>(spans1: Tensor<B, 2>, spans2: Tensor<B, 2>) -> Tensor<B, 1> {
    let dims1 = spans1.dims();
    let dims2 = spans2.dims();
    assert_eq!(dims1, dims2, "Shape of spans1 ({dims1:?}) must match spans2 ({dims2:?})");
    assert_span_shape(&spans1, "spans1");
    let [batch_size, _] = dims1;

    let (start1, end1) = split_bounds(spans1);
    let (start2, end2) = split_bounds(spans2);

    let left = start1.clone().max_pair(start2.clone());
    let right = end1.clone().min_pair(end2.clone());
    let inter = (right - left).clamp_min(0.0);
    let union = (end1 - start1) + (end2 - start2) - inter.clone();

    (inter / union).reshape([batch_size])
}

/// Index of the first row with `end < start`, if any.
///
/// Reads the tensor back to the host.
pub fn first_inverted_span<B: Backend>(spans: &Tensor<B, 2>) -> Option<usize> {
    let values: Vec<f32> = spans.to_data().iter::<f32>().collect();
    values
        .chunks_exact(2)
        .position(|bounds| bounds[1] < bounds[0])
}

/// Split `[N, 2]` spans into `[N, 1]` start and end columns.
fn split_bounds<B: Backend>(spans: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
    (spans.clone().narrow(1, 0, 1), spans.narrow(1, 1, 1))
}

fn assert_span_shape<B: Backend>(spans: &Tensor<B, 2>, name: &str) {
    let dims = spans.dims();
    assert_eq!(dims[1], 2, "{name} must have shape [N, 2], got {dims:?}");
}

fn assert_ordered<B: Backend>(spans: &Tensor<B, 2>, name: &str) {
    let inverted = first_inverted_span(spans);
    assert!(
        inverted.is_none(),
        "{name} must satisfy end >= start, row {inverted:?} is inverted"
    );
}

#[cfg(test)]
mod tests {
    use burn::tensor::{TensorData, Tolerance, Transaction};

    use super::*;
    use crate::tests::TestBackend;

    fn spans(data: TensorData) -> Tensor<TestBackend, 2> {
        Tensor::from_data(data, &Default::default())
    }

    #[test]
    fn temporal_iou_matches_reference_values() {
        let spans1 = spans(TensorData::from([[0.0, 0.2], [0.5, 1.0]]));
        let spans2 = spans(TensorData::from([[0.0, 0.3], [0.0, 1.0]]));

        let (iou, union) = temporal_iou(spans1, spans2);

        let [iou_data, union_data] = Transaction::default()
            .register(iou)
            .register(union)
            .execute()
            .try_into()
            .expect("Correct amount of tensor data");

        let expected_iou = TensorData::from([[0.6667, 0.2], [0.0, 0.5]]);
        iou_data.assert_approx_eq::<f32>(&expected_iou, Tolerance::absolute(1e-4));

        let expected_union = TensorData::from([[0.3, 1.0], [0.8, 1.0]]);
        union_data.assert_approx_eq::<f32>(&expected_union, Tolerance::absolute(1e-6));
    }

    #[test]
    fn temporal_iou_is_symmetric_up_to_transpose() {
        let spans1 = spans(TensorData::from([[0.1, 0.4], [0.3, 0.9], [0.0, 1.0]]));
        let spans2 = spans(TensorData::from([[0.2, 0.5], [0.6, 0.7]]));

        let (forward, _) = temporal_iou(spans1.clone(), spans2.clone());
        let (backward, _) = temporal_iou(spans2, spans1);

        assert_eq!(forward.dims(), [3, 2]);
        forward
            .into_data()
            .assert_approx_eq::<f32>(&backward.transpose().into_data(), Tolerance::default());
    }

    #[test]
    fn temporal_iou_identical_spans_returns_one() {
        let spans1 = spans(TensorData::from([[0.25, 0.75]]));

        let (iou, _) = temporal_iou(spans1.clone(), spans1);

        iou.into_data()
            .assert_approx_eq::<f32>(&TensorData::from([[1.0]]), Tolerance::default());
    }

    #[test]
    fn temporal_iou_disjoint_spans_returns_zero() {
        let spans1 = spans(TensorData::from([[0.0, 0.2]]));
        let spans2 = spans(TensorData::from([[0.5, 0.9]]));

        let (iou, union) = temporal_iou(spans1, spans2);

        iou.into_data()
            .assert_approx_eq::<f32>(&TensorData::from([[0.0]]), Tolerance::default());
        // Disjoint spans: union is the sum of both lengths
        union
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([[0.6]]), Tolerance::absolute(1e-6));
    }

    #[test]
    fn temporal_intersection_over_pred_divides_by_pred_length() {
        let gt = spans(TensorData::from([[0.0, 0.2], [0.5, 1.0]]));
        let pred = spans(TensorData::from([[0.0, 0.3], [0.0, 1.0]]));

        let result = temporal_intersection_over_pred(gt, pred);

        let expected = TensorData::from([[0.6667, 0.2], [0.0, 0.5]]);
        result
            .into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::absolute(1e-4));
    }

    #[test]
    fn generalized_temporal_iou_matches_reference_values() {
        let spans1 = spans(TensorData::from([[0.0, 0.2], [0.5, 1.0]]));
        let spans2 = spans(TensorData::from([[0.0, 0.3], [0.0, 1.0]]));

        let giou = generalized_temporal_iou(spans1, spans2);

        let expected = TensorData::from([[0.6667, 0.2], [-0.2, 0.5]]);
        giou.into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::absolute(1e-4));
    }

    #[test]
    fn generalized_temporal_iou_never_exceeds_iou() {
        let spans1 = spans(TensorData::from([[0.0, 0.1], [0.2, 0.6], [0.45, 0.95]]));
        let spans2 = spans(TensorData::from([[0.05, 0.3], [0.7, 1.0], [0.2, 0.6]]));

        let giou = generalized_temporal_iou(spans1.clone(), spans2.clone());
        let (iou, _) = temporal_iou(spans1, spans2);

        let giou: Vec<f32> = giou.into_data().iter::<f32>().collect();
        let iou: Vec<f32> = iou.into_data().iter::<f32>().collect();
        for (g, i) in giou.iter().zip(iou.iter()) {
            assert!(g <= &(i + 1e-6), "GIoU {g} should not exceed IoU {i}");
        }
    }

    #[test]
    #[should_panic = "spans2 must satisfy end >= start"]
    fn generalized_temporal_iou_inverted_span_panics() {
        let spans1 = spans(TensorData::from([[0.0, 0.2]]));
        let spans2 = spans(TensorData::from([[0.6, 0.4]]));

        let _ = generalized_temporal_iou(spans1, spans2);
    }

    #[test]
    fn paired_temporal_iou_equals_cross_product_diagonal() {
        let spans1 = spans(TensorData::from([[0.0, 0.2], [0.5, 1.0]]));
        let spans2 = spans(TensorData::from([[0.0, 0.3], [0.0, 1.0]]));

        let paired = paired_temporal_iou(spans1, spans2);

        assert_eq!(paired.dims(), [2]);
        paired
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([0.6667, 0.5]), Tolerance::absolute(1e-4));
    }

    #[test]
    #[should_panic = "Shape of spans1"]
    fn paired_temporal_iou_mismatched_batches_panics() {
        let spans1 = spans(TensorData::from([[0.0, 0.2], [0.5, 1.0]]));
        let spans2 = spans(TensorData::from([[0.0, 0.3]]));

        let _ = paired_temporal_iou(spans1, spans2);
    }

    #[test]
    fn first_inverted_span_reports_offending_row() {
        let ordered = spans(TensorData::from([[0.0, 0.2], [0.3, 0.3]]));
        let inverted = spans(TensorData::from([[0.0, 0.2], [0.3, 0.4], [0.9, 0.1]]));

        assert_eq!(first_inverted_span(&ordered), None);
        assert_eq!(first_inverted_span(&inverted), Some(2));
    }
}
