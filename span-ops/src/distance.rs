//! Center distance penalty between aligned span pairs.

use burn::prelude::*;

/// Distance between span centers divided by the squared enclosing length.
///
/// Spans are compared pairwise (row `i` against row `i`). Two identical
/// zero-length spans give NaN.
///
/// # Shapes
///
/// - spans1: `[B, 2]`
/// - spans2: `[B, 2]`
/// - output: `[B]`
pub fn distance_term<B: Backend>(spans1: Tensor<B, 2>, spans2: Tensor<B, 2>) -> Tensor<B, 1> {
    let dims1 = spans1.dims();
    let dims2 = spans2.dims();
    assert_eq!(dims1, dims2, "Shape of spans1 ({dims1:?}) must match spans2 ({dims2:?})");
    let [batch_size, _] = dims1;

    let start1 = spans1.clone().narrow(1, 0, 1);
    let end1 = spans1.narrow(1, 1, 1);
    let start2 = spans2.clone().narrow(1, 0, 1);
    let end2 = spans2.narrow(1, 1, 1);

    let enclosing = (end1.clone().max_pair(end2.clone())
        - start1.clone().min_pair(start2.clone()))
    .clamp_min(0.0);

    let center1 = (start1 + end1).mul_scalar(0.5);
    let center2 = (start2 + end2).mul_scalar(0.5);
    let center_dist = (center2 - center1).abs();

    (center_dist / (enclosing.clone() * enclosing)).reshape([batch_size])
}
