//! Conversions between `(start, end)` and `(center, width)` span formats.
//!
//! Both functions operate on the last dimension of a tensor of any rank,
//! which must have size 2.

use burn::prelude::*;

/// Convert spans from `(start, end)` to `(center, width)`.
///
/// # Shapes
///
/// - spans: `[..., 2]`
/// - output: `[..., 2]`
///
/// ```text
/// [[0.0, 1.0], [0.2, 0.4]] -> [[0.5, 1.0], [0.3, 0.2]]
/// ```
pub fn span_xx_to_cxw<B: Backend, const D: usize>(spans: Tensor<B, D>) -> Tensor<B, D> {
    assert_last_dim(&spans);
    let last = D - 1;

    let start = spans.clone().narrow(last, 0, 1);
    let end = spans.narrow(last, 1, 1);

    let center = (start.clone() + end.clone()).mul_scalar(0.5);
    let width = end - start;

    Tensor::cat(vec![center, width], last)
}

/// Convert spans from `(center, width)` to `(start, end)`.
///
/// # Shapes
///
/// - spans: `[..., 2]`
/// - output: `[..., 2]`
pub fn span_cxw_to_xx<B: Backend, const D: usize>(spans: Tensor<B, D>) -> Tensor<B, D> {
    assert_last_dim(&spans);
    let last = D - 1;

    let center = spans.clone().narrow(last, 0, 1);
    let half_width = spans.narrow(last, 1, 1).mul_scalar(0.5);

    let start = center.clone() - half_width.clone();
    let end = center + half_width;

    Tensor::cat(vec![start, end], last)
}

fn assert_last_dim<B: Backend, const D: usize>(spans: &Tensor<B, D>) {
    let dims = spans.dims();
    assert_eq!(
        dims[D - 1],
        2,
        "Spans must have a last dimension of size 2, got shape {dims:?}"
    );
}
