use serde::{Deserialize, Serialize};

use crate::engine::PhaseTag;

/// One observed sample: elapsed time since session start paired with the
/// measured value (milliseconds for latency, Mbps for throughput).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    pub elapsed_seconds: f64,
    pub value: f64,
}

/// Append-only series of samples, ordered by elapsed time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleSeries {
    points: Vec<SamplePoint>,
}

impl SampleSeries {
    fn push(&mut self, elapsed_seconds: f64, value: f64) {
        self.points.push(SamplePoint {
            elapsed_seconds,
            value,
        });
    }

    pub fn points(&self) -> &[SamplePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn clear(&mut self) {
        self.points.clear();
    }
}

/// Accumulates the latency and throughput series of one session and keeps
/// the running median of the latency samples.
#[derive(Debug, Default)]
pub struct SampleAggregator {
    latency: SampleSeries,
    download: SampleSeries,
    upload: SampleSeries,
    running_median: Option<f64>,
}

impl SampleAggregator {
    /// Appends a latency sample, converted from nanoseconds to whole
    /// milliseconds. Callers skip absent latency values, they are never
    /// recorded as zero.
    pub fn record_latency(&mut self, elapsed_seconds: f64, nanos: u64) {
        let millis = (nanos as f64 / 1e6).round();
        self.latency.push(elapsed_seconds, millis);
    }

    /// Appends a download throughput sample in Mbps. Accepted only while
    /// the reported phase is `DOWN`; returns whether a sample was added.
    pub fn record_download(
        &mut self,
        elapsed_seconds: f64,
        bits_per_second: u64,
        phase: PhaseTag,
    ) -> bool {
        if phase != PhaseTag::Down {
            return false;
        }
        self.download.push(elapsed_seconds, bits_per_second as f64 / 1e6);
        true
    }

    /// Appends an upload throughput sample in Mbps. Accepted only while
    /// the reported phase is `UP`; returns whether a sample was added.
    pub fn record_upload(
        &mut self,
        elapsed_seconds: f64,
        bits_per_second: u64,
        phase: PhaseTag,
    ) -> bool {
        if phase != PhaseTag::Up {
            return false;
        }
        self.upload.push(elapsed_seconds, bits_per_second as f64 / 1e6);
        true
    }

    /// Median over all latency samples recorded so far. Odd count: the
    /// middle element of the value-sorted sequence; even count: the mean
    /// of the two middle elements; no samples: `None`.
    pub fn median_latency_ms(&self) -> Option<f64> {
        median(self.latency.points())
    }

    /// Full recomputation of the running median, done on every phase
    /// transition. Sample counts stay small (well under a hundred per
    /// test), so recomputing beats maintaining an incremental structure.
    pub fn recompute_median(&mut self) -> Option<f64> {
        self.running_median = self.median_latency_ms();
        self.running_median
    }

    /// The median as of the last recomputation point.
    pub fn running_median(&self) -> Option<f64> {
        self.running_median
    }

    pub fn latency(&self) -> &SampleSeries {
        &self.latency
    }

    pub fn download(&self) -> &SampleSeries {
        &self.download
    }

    pub fn upload(&self) -> &SampleSeries {
        &self.upload
    }

    pub fn reset(&mut self) {
        self.latency.clear();
        self.download.clear();
        self.upload.clear();
        self.running_median = None;
    }
}

fn median(points: &[SamplePoint]) -> Option<f64> {
    if points.is_empty() {
        return None;
    }

    let mut values: Vec<f64> = points.iter().map(|point| point.value).collect();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let middle = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[middle - 1] + values[middle]) / 2.0)
    } else {
        Some(values[middle])
    }
}
