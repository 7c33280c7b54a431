//! JSON batches recorded from a training run.
//!
//! A batch file holds the span pairs of one step, the batch-to-video mapping,
//! optional per-video durations and the similarity scores of each video:
//!
//! ```json
//! {
//!   "pred_spans": [[0.1, 0.4], [0.5, 0.9]],
//!   "gt_spans": [[0.2, 0.5], [0.5, 1.0]],
//!   "idx": [0, 0],
//!   "durations": [150.0],
//!   "query_sims": [[0.1, 0.2, 0.3, 0.4]],
//!   "clip_sims": null
//! }
//! ```

use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use burn::{prelude::*, tensor::TensorData};
use moment_loss::{LossDiagnostics, SimilarityInputs};
use serde::{Deserialize, Serialize};

/// One recorded training step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFile {
    /// Predicted spans, normalized `(start, end)`.
    pub pred_spans: Vec<[f32; 2]>,
    /// Ground-truth spans, normalized `(start, end)`.
    pub gt_spans: Vec<[f32; 2]>,
    /// Video of every span pair.
    pub idx: Vec<usize>,
    /// Length of every video in seconds.
    #[serde(default)]
    pub durations: Option<Vec<f32>>,
    /// Frame-to-query similarity per video, `[num_videos][seq_len]`.
    #[serde(default)]
    pub query_sims: Option<Vec<Vec<f32>>>,
    /// Frame-to-frame similarity per video, `[num_videos][seq_len][seq_len]`.
    #[serde(default)]
    pub clip_sims: Option<Vec<Vec<Vec<f32>>>>,
}

/// Tensors built from a [`BatchFile`] on a device.
#[derive(Debug, Clone)]
pub struct BatchTensors<B: Backend> {
    pub pred_spans: Tensor<B, 2>,
    pub gt_spans: Tensor<B, 2>,
    pub sims: SimilarityInputs<B>,
}

/// Loss values and diagnostics of one evaluated batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossReport {
    pub backend: String,
    pub loss: Vec<f32>,
    pub mean_loss: f32,
    pub diagnostics: LossDiagnostics,
}

impl BatchFile {
    /// Loads a batch from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let batch_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch file: {}", path.display()))?;
        serde_json::from_str(&batch_str)
            .with_context(|| format!("Failed to parse batch file: {}", path.display()))
    }

    /// Builds the input tensors on `device`.
    ///
    /// # Errors
    ///
    /// Returns an error if the span lists differ in length or a similarity
    /// table is ragged.
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> Result<BatchTensors<B>> {
        if self.pred_spans.len() != self.gt_spans.len() {
            bail!(
                "pred_spans has {} rows but gt_spans has {}",
                self.pred_spans.len(),
                self.gt_spans.len()
            );
        }

        let query = self
            .query_sims
            .as_deref()
            .map(|rows| {
                let [num_videos, seq_len] = table_shape(rows, "query_sims")?;
                let values = rows.iter().flatten().copied().collect();
                Ok::<_, anyhow::Error>(tensor_from(values, [num_videos, seq_len], device))
            })
            .transpose()?;

        let clip = self
            .clip_sims
            .as_deref()
            .map(|videos| {
                let num_videos = videos.len();
                let mut shape = None;
                for (video, rows) in videos.iter().enumerate() {
                    let video_shape = table_shape(rows, "clip_sims")?;
                    let expected = *shape.get_or_insert(video_shape);
                    if video_shape != expected {
                        bail!("clip_sims video {video} has shape {video_shape:?}, expected {expected:?}");
                    }
                }
                let [rows, cols] = shape.unwrap_or([0, 0]);
                let values = videos.iter().flatten().flatten().copied().collect();
                Ok::<_, anyhow::Error>(tensor_from(values, [num_videos, rows, cols], device))
            })
            .transpose()?;

        Ok(BatchTensors {
            pred_spans: spans_tensor(&self.pred_spans, device),
            gt_spans: spans_tensor(&self.gt_spans, device),
            sims: SimilarityInputs::new(query, clip),
        })
    }
}

/// Shape of a rectangular table.
fn table_shape(rows: &[Vec<f32>], name: &str) -> Result<[usize; 2]> {
    let cols = rows.first().map_or(0, Vec::len);
    if let Some(row) = rows.iter().position(|row| row.len() != cols) {
        bail!(
            "{name} row {row} has {} values, expected {cols}",
            rows[row].len()
        );
    }
    Ok([rows.len(), cols])
}

fn spans_tensor<B: Backend>(spans: &[[f32; 2]], device: &B::Device) -> Tensor<B, 2> {
    let values = spans.iter().flatten().copied().collect();
    tensor_from(values, [spans.len(), 2], device)
}

fn tensor_from<B: Backend, const D: usize>(
    values: Vec<f32>,
    shape: [usize; D],
    device: &B::Device,
) -> Tensor<B, D> {
    Tensor::from_data(TensorData::new(values, shape), device)
}
