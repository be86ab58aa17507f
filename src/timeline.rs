use crate::record::{DetectorTag, EyeId};
use crate::store::PupilData;
use serde::Serialize;

/// Target number of points per eye drawn in a timeline row
pub const NUMBER_SAMPLES_TIMELINE: usize = 4000;

/// Downsampled `(timestamp, value)` series for one pupil datum field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineCache {
    /// Eye 0
    pub right: Vec<(f64, f64)>,
    /// Eye 1
    pub left: Vec<(f64, f64)>,
    pub xlim: (f64, f64),
    pub ylim: (f64, f64),
}

impl TimelineCache {
    pub fn series(&self, eye_id: EyeId) -> &[(f64, f64)] {
        match eye_id {
            EyeId::Eye0 => &self.right,
            EyeId::Eye1 => &self.left,
        }
    }
}

/// Build the timeline rows for `key` of the `tag` detector.
///
/// Records without a numeric `key` are skipped. When `ylim` is not given it
/// spans the interquartile range widened by 1.5 IQR on each side.
pub fn cache_timeline_data(
    data: &PupilData,
    key: &str,
    tag: &DetectorTag,
    world_timestamps: &[f64],
    ylim: Option<(f64, f64)>,
) -> TimelineCache {
    let xlim = match (world_timestamps.first(), world_timestamps.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => (0.0, 0.0),
    };

    if data.is_empty() {
        return TimelineCache {
            right: Vec::new(),
            left: Vec::new(),
            xlim,
            ylim: (0.0, 1.0),
        };
    }

    let [right, left] = EyeId::ALL.map(|eye_id| downsample(data, eye_id, tag, key));

    let ylim = ylim.unwrap_or_else(|| {
        let mut values: Vec<f64> = right.iter().chain(&left).map(|(_, v)| *v).collect();
        values.sort_by(f64::total_cmp);
        match (quantile(&values, 0.25), quantile(&values, 0.75)) {
            (Some(low), Some(high)) => {
                let iqr = high - low;
                (low - 1.5 * iqr, high + 1.5 * iqr)
            }
            _ => (0.0, 1.0),
        }
    });

    TimelineCache {
        right,
        left,
        xlim,
        ylim,
    }
}

fn downsample(data: &PupilData, eye_id: EyeId, tag: &DetectorTag, key: &str) -> Vec<(f64, f64)> {
    let timestamps = data.timestamps(eye_id, tag);
    let records = data.records(eye_id, tag);
    let (Some(&t0), Some(&t1)) = (timestamps.first(), timestamps.last()) else {
        return Vec::new();
    };

    let step = if NUMBER_SAMPLES_TIMELINE > 1 {
        (t1 - t0) / (NUMBER_SAMPLES_TIMELINE - 1) as f64
    } else {
        0.0
    };

    let mut indices: Vec<usize> = (0..NUMBER_SAMPLES_TIMELINE)
        .map(|i| find_closest(timestamps, t0 + step * i as f64))
        .collect();
    indices.sort_unstable();
    indices.dedup();

    indices
        .into_iter()
        .filter_map(|idx| {
            let record = &records[idx];
            record
                .datum
                .field(key)
                .map(|value| (record.timestamp, value))
        })
        .collect()
}

/// Index of the sorted `timestamps` entry nearest to `target`, ties go right
pub fn find_closest(timestamps: &[f64], target: f64) -> usize {
    if timestamps.len() < 2 {
        return 0;
    }
    let idx = timestamps
        .partition_point(|ts| *ts < target)
        .clamp(1, timestamps.len() - 1);
    let left = timestamps[idx - 1];
    let right = timestamps[idx];
    if target - left < right - target {
        idx - 1
    } else {
        idx
    }
}

/// Linearly interpolated quantile of already sorted values
fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let pos = q * last as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}
