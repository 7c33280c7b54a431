//! Temporal span operations for the Burn deep learning framework
//!
//! Spans are 1-D windows stored in the last dimension of a tensor, either as
//! `(start, end)` ("xx" format) or as `(center, width)` ("cxw" format).
//! All operations are generic over the backend, so gradients flow through
//! them under `Autodiff`.

use burn::prelude::*;

mod convert;
mod distance;
mod iou;

// Convenient re-exports
pub use convert::{span_cxw_to_xx, span_xx_to_cxw};
pub use distance::distance_term;
pub use iou::{
    first_inverted_span, generalized_temporal_iou, paired_temporal_iou,
    temporal_intersection_over_pred, temporal_iou,
};

/// Span format conversions as tensor methods
pub trait SpanTensorOps<B: Backend, const D: usize> {
    /// Convert `(start, end)` spans into `(center, width)` spans
    fn xx_to_cxw(self) -> Self;

    /// Convert `(center, width)` spans into `(start, end)` spans
    fn cxw_to_xx(self) -> Self;
}

impl<B: Backend, const D: usize> SpanTensorOps<B, D> for Tensor<B, D> {
    fn xx_to_cxw(self) -> Self {
        span_xx_to_cxw(self)
    }

    fn cxw_to_xx(self) -> Self {
        span_cxw_to_xx(self)
    }
}

#[cfg(test)]
mod tests {
    use burn::{
        backend::{Autodiff, NdArray},
        tensor::{TensorData, Tolerance},
    };

    use super::*;

    pub type TestBackend = NdArray<f32>;

    #[test]
    fn span_tensor_ops_methods_match_free_functions() {
        let device = Default::default();
        let spans = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[0.1, 0.5], [0.25, 0.75]]),
            &device,
        );

        let by_method = spans.clone().xx_to_cxw();
        let by_function = span_xx_to_cxw(spans);

        by_method
            .into_data()
            .assert_approx_eq::<f32>(&by_function.into_data(), Tolerance::default());
    }

    #[test]
    fn paired_iou_propagates_gradients_to_predicted_spans() {
        type AutodiffBackend = Autodiff<TestBackend>;
        let device = Default::default();

        let pred = Tensor::<AutodiffBackend, 2>::from_data(TensorData::from([[0.2, 0.6]]), &device)
            .require_grad();
        let target =
            Tensor::<AutodiffBackend, 2>::from_data(TensorData::from([[0.4, 0.8]]), &device);

        let loss = (Tensor::ones([1], &device) - paired_temporal_iou(pred.clone(), target)).sum();
        let grads = loss.backward();

        let grad = pred.grad(&grads).expect("Gradient for predicted spans");
        assert_eq!(grad.dims(), [1, 2]);
    }
}
