//! Mapping of normalized spans onto discrete clip indices.
//!
//! A video of `clip_len` clips covers the normalized range `[0, 1]`. A span
//! value `v` maps to clip `round(v * clip_len)`, rounded half to even, and
//! start and end are clamped independently to `[0, clip_len - 1]`. Predicted
//! spans can reach outside `[0, 1]`, so clamping is the only recovery applied.
//!
//! Batch rows are grouped per video with [`VideoGroups`], since a video can own
//! several span pairs (e.g. many candidate windows of one pretraining video).

use std::ops::Range;

use burn::prelude::*;
use burn_span_ops::span_cxw_to_xx;
use serde::{Deserialize, Serialize};

use crate::error::{MomentLossError, MomentLossResult};

/// Inclusive range of clip indices `[start, end]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipSpan {
    pub start: usize,
    pub end: usize,
}

impl ClipSpan {
    /// Map a normalized `(start, end)` span onto `clip_len` clips.
    pub fn from_normalized(start: f32, end: f32, clip_len: usize) -> Self {
        Self {
            start: normalized_to_index(start, clip_len),
            end: normalized_to_index(end, clip_len),
        }
    }

    /// Restrict the span to a sequence of `seq_len` clips.
    pub fn clamp_to(self, seq_len: usize) -> Self {
        let last = seq_len.saturating_sub(1);
        Self {
            start: self.start.min(last),
            end: self.end.min(last),
        }
    }

    /// Half-open index range, usable for tensor slicing.
    pub const fn range(&self) -> Range<usize> {
        self.start..self.end + 1
    }

    /// Number of clips covered.
    pub const fn num_clips(&self) -> usize {
        self.end + 1 - self.start
    }
}

fn normalized_to_index(value: f32, clip_len: usize) -> usize {
    let last = clip_len.saturating_sub(1) as f32;
    // NaN saturates to 0 on cast
    (value * clip_len as f32).round_ties_even().clamp(0.0, last) as usize
}

/// Number of clips of a video lasting `duration` seconds.
pub fn clip_len_from_duration(duration: f32, clip_unit: f64) -> usize {
    (f64::from(duration) / clip_unit).floor().max(0.0) as usize
}

/// Batch rows grouped by the video they belong to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VideoGroups {
    rows: Vec<Vec<usize>>,
}

impl VideoGroups {
    /// Group batch rows by video index. Rows keep their batch order inside
    /// each video.
    ///
    /// # Errors
    ///
    /// Returns [`MomentLossError::VideoIndexOutOfRange`] if an index is not
    /// smaller than `num_videos`.
    pub fn new(idx: &[usize], num_videos: usize) -> MomentLossResult<Self> {
        let mut rows = vec![Vec::new(); num_videos];
        for (row, &video) in idx.iter().enumerate() {
            let group = rows
                .get_mut(video)
                .ok_or(MomentLossError::VideoIndexOutOfRange {
                    row,
                    index: video,
                    num_videos,
                })?;
            group.push(row);
        }
        Ok(Self { rows })
    }

    pub fn num_videos(&self) -> usize {
        self.rows.len()
    }

    /// Total number of grouped batch rows.
    pub fn num_rows(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    /// Batch rows of a video.
    pub fn rows(&self, video: usize) -> &[usize] {
        self.rows.get(video).map_or(&[], Vec::as_slice)
    }

    /// Iterate `(video, rows)` pairs in video order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[usize])> {
        self.rows
            .iter()
            .enumerate()
            .map(|(video, rows)| (video, rows.as_slice()))
    }

    /// Regroup per-row values into per-video lists.
    pub fn collect_per_video<T: Clone>(&self, per_row: &[T]) -> Vec<Vec<T>> {
        self.rows
            .iter()
            .map(|rows| rows.iter().map(|&row| per_row[row].clone()).collect())
            .collect()
    }
}

/// Predicted and ground-truth clip ranges for every batch row.
#[derive(Clone, Debug)]
pub struct ClipRanges {
    pub groups: VideoGroups,
    pub pred: Vec<ClipSpan>,
    pub gt: Vec<ClipSpan>,
}

impl ClipRanges {
    /// Map normalized span rows onto clip ranges of their video.
    ///
    /// `clip_lens[v]` is the number of clips of video `v`.
    ///
    /// # Errors
    ///
    /// Returns an error if the inputs do not have one entry per batch row.
    pub fn new(
        pred: &[[f32; 2]],
        gt: &[[f32; 2]],
        groups: VideoGroups,
        clip_lens: &[usize],
    ) -> MomentLossResult<Self> {
        if gt.len() != pred.len() {
            return Err(MomentLossError::BatchSizeMismatch {
                what: "ground truth spans",
                expected: pred.len(),
                actual: gt.len(),
            });
        }
        if groups.num_rows() != pred.len() {
            return Err(MomentLossError::BatchSizeMismatch {
                what: "video indices",
                expected: pred.len(),
                actual: groups.num_rows(),
            });
        }
        if clip_lens.len() != groups.num_videos() {
            return Err(MomentLossError::BatchSizeMismatch {
                what: "clip lengths",
                expected: groups.num_videos(),
                actual: clip_lens.len(),
            });
        }

        let mut pred_ranges = vec![ClipSpan { start: 0, end: 0 }; pred.len()];
        let mut gt_ranges = pred_ranges.clone();
        for (video, rows) in groups.iter() {
            let clip_len = clip_lens[video];
            for &row in rows {
                let [start, end] = pred[row];
                pred_ranges[row] = ClipSpan::from_normalized(start, end, clip_len);
                let [start, end] = gt[row];
                gt_ranges[row] = ClipSpan::from_normalized(start, end, clip_len);
            }
        }

        Ok(Self {
            groups,
            pred: pred_ranges,
            gt: gt_ranges,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.pred.len()
    }
}

/// A window in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: f32,
    pub end: f32,
}

/// Convert `(center, width)` predictions into windows in seconds, grouped
/// per video.
///
/// Each span is scaled by the duration of its video, clamped to
/// `[0, max_duration]` and snapped to the nearest multiple of `clip_unit`.
///
/// # Shapes
///
/// - cxw_spans: `[B, 2]`
///
/// # Errors
///
/// Returns an error if `idx` does not have one entry per span or refers to a
/// video without a duration.
pub fn windows_from_cxw<B: Backend>(
    cxw_spans: Tensor<B, 2>,
    durations: &[f32],
    idx: &[usize],
    clip_unit: f64,
    max_duration: f64,
) -> MomentLossResult<Vec<Vec<TimeWindow>>> {
    let [batch_size, _] = cxw_spans.dims();
    if idx.len() != batch_size {
        return Err(MomentLossError::BatchSizeMismatch {
            what: "video indices",
            expected: batch_size,
            actual: idx.len(),
        });
    }

    let groups = VideoGroups::new(idx, durations.len())?;
    let xx: Vec<f32> = span_cxw_to_xx(cxw_spans).into_data().iter::<f32>().collect();

    let snap = |seconds: f64| {
        let clamped = seconds.clamp(0.0, max_duration);
        ((clamped / clip_unit).round_ties_even() * clip_unit) as f32
    };

    let windows: Vec<TimeWindow> = xx
        .chunks_exact(2)
        .zip(idx)
        .map(|(bounds, &video)| {
            let duration = f64::from(durations[video]);
            TimeWindow {
                start: snap(f64::from(bounds[0]) * duration),
                end: snap(f64::from(bounds[1]) * duration),
            }
        })
        .collect();

    Ok(groups.collect_per_video(&windows))
}
