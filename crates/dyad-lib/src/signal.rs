use serde::{Deserialize, Serialize};

/// One ECG channel sampled uniformly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Uniform sampling frequency in Hz
    pub fs: f64,
    /// Samples
    pub data: Vec<f64>,
}

impl TimeSeries {
    pub fn new(fs: f64, data: Vec<f64>) -> Self {
        Self { fs, data }
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    pub fn duration(&self) -> f64 {
        self.data.len() as f64 / self.fs
    }
}

/// Point events on a timeline (R-peak sample positions).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Events {
    pub indices: Vec<usize>,
}

impl Events {
    pub fn from_indices(indices: Vec<usize>) -> Self {
        Self { indices }
    }
    pub fn len(&self) -> usize {
        self.indices.len()
    }
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// RR intervals in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RRSeries {
    pub rr_ms: Vec<f64>,
}

impl RRSeries {
    pub fn from_peaks(peaks: &[usize], fs: f64) -> Self {
        let rr_ms = peaks
            .windows(2)
            .map(|w| (w[1] as f64 - w[0] as f64) / fs * 1000.0)
            .collect();
        Self { rr_ms }
    }

    pub fn len(&self) -> usize {
        self.rr_ms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rr_ms.is_empty()
    }

    /// Beat times (seconds after the first peak) at which each interval ends.
    pub fn beat_times(&self) -> Vec<f64> {
        let mut acc = 0.0;
        self.rr_ms
            .iter()
            .map(|rr| {
                acc += rr / 1000.0;
                acc
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rr_from_peaks_in_milliseconds() {
        let rr = RRSeries::from_peaks(&[0, 400, 850], 500.0);
        assert_eq!(rr.rr_ms, vec![800.0, 900.0]);
        let times = rr.beat_times();
        assert!((times[0] - 0.8).abs() < 1e-12);
        assert!((times[1] - 1.7).abs() < 1e-12);
    }
}
