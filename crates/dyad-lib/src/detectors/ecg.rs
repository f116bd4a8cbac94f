use crate::{
    params::CleaningMethod,
    signal::{Events, TimeSeries},
};

/// Tuning of the R-peak detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EcgPipelineConfig {
    /// Lower cutoff for the single-pole high-pass filter (Hz).
    pub lowcut_hz: f64,
    /// Upper cutoff for the single-pole low-pass filter (Hz).
    pub highcut_hz: f64,
    /// Moving window integration length (seconds).
    pub integration_window_s: f64,
    /// Minimum physiological RR distance / refractory period (seconds).
    pub min_rr_s: f64,
    /// Scale between noise and signal envelopes for the adaptive threshold.
    pub threshold_scale: f64,
    /// How far back to search (seconds) for the precise R-peak after a detection.
    pub search_back_s: f64,
}

impl Default for EcgPipelineConfig {
    fn default() -> Self {
        Self {
            lowcut_hz: 5.0,
            highcut_hz: 15.0,
            integration_window_s: 0.150,
            min_rr_s: 0.250,
            threshold_scale: 0.6,
            search_back_s: 0.150,
        }
    }
}

/// High-pass cutoff of the `neurokit` cleaning method (Hz).
const BASELINE_CUTOFF_HZ: f64 = 0.5;

/// Remove baseline wander and powerline interference from a raw ECG trace.
pub fn clean_ecg(ts: &TimeSeries, method: CleaningMethod, powerline: Option<f64>) -> Vec<f64> {
    let fs = ts.fs.max(1.0);
    match method {
        CleaningMethod::Neurokit => {
            let hp = single_pole_highpass(&ts.data, fs, BASELINE_CUTOFF_HZ);
            match powerline {
                Some(freq) if freq > 0.0 => {
                    let win = (fs / freq).round() as usize;
                    centered_moving_average(&hp, win)
                }
                _ => hp,
            }
        }
        CleaningMethod::PanTompkins => {
            let cfg = EcgPipelineConfig::default();
            bandpass(&ts.data, fs, cfg.lowcut_hz, cfg.highcut_hz)
        }
        CleaningMethod::None => ts.data.clone(),
    }
}

/// Detect R-peaks with the adaptive-threshold detector, falling back to the local-maxima
/// picker when fewer than two beats are found.
pub fn detect_r_peaks_with_config(ts: &TimeSeries, cfg: &EcgPipelineConfig) -> Events {
    if ts.is_empty() {
        return Events::from_indices(Vec::new());
    }

    let (bandpassed, integrated) = pan_tompkins_envelope(ts, cfg);
    let peaks = pick_peaks(&bandpassed, &integrated, ts.fs, cfg);

    if peaks.len() < 2 {
        return local_maxima_peaks(ts, cfg);
    }

    Events::from_indices(peaks)
}

/// Local maxima above a moving-average baseline, separated by the refractory period.
pub fn local_maxima_peaks(ts: &TimeSeries, cfg: &EcgPipelineConfig) -> Events {
    let min_gap = (cfg.min_rr_s * ts.fs).max(1.0) as usize;
    let data = &ts.data;
    if data.len() < 3 {
        return Events::default();
    }

    let win = ((0.150 * ts.fs) as usize).max(1);
    let ma = moving_average(data, win);

    let mut peaks: Vec<usize> = Vec::new();
    for i in 1..data.len() - 1 {
        let y = data[i] - ma[i];
        if y > 0.0 && y > (data[i - 1] - ma[i - 1]) && y > (data[i + 1] - ma[i + 1]) {
            if let Some(last) = peaks.last_mut() {
                if i - *last < min_gap {
                    if y > data[*last] - ma[*last] {
                        *last = i;
                    }
                    continue;
                }
            }
            peaks.push(i);
        }
    }
    Events::from_indices(peaks)
}

/// Drop beats that follow their predecessor by less than half the median RR interval.
/// Returns the corrected peaks and the number of removed beats.
pub fn correct_artifacts(peaks: &Events) -> (Events, usize) {
    if peaks.len() < 3 {
        return (peaks.clone(), 0);
    }
    let mut rr: Vec<usize> = peaks.indices.windows(2).map(|w| w[1] - w[0]).collect();
    rr.sort_unstable();
    let median = rr[rr.len() / 2] as f64;
    let min_rr = median * 0.5;

    let mut kept: Vec<usize> = Vec::with_capacity(peaks.len());
    for &peak in &peaks.indices {
        match kept.last() {
            Some(&last) if ((peak - last) as f64) < min_rr => {}
            _ => kept.push(peak),
        }
    }
    let removed = peaks.len() - kept.len();
    (Events::from_indices(kept), removed)
}

fn pan_tompkins_envelope(ts: &TimeSeries, cfg: &EcgPipelineConfig) -> (Vec<f64>, Vec<f64>) {
    let data = &ts.data;
    let fs = ts.fs.max(1.0);
    let bandpassed = bandpass(data, fs, cfg.lowcut_hz, cfg.highcut_hz);
    let derivative = derivative(&bandpassed);
    let squared = square(&derivative);
    let win = ((cfg.integration_window_s * fs).round() as usize).max(1);
    let integrated = moving_average(&squared, win);
    (bandpassed, integrated)
}

fn bandpass(data: &[f64], fs: f64, low: f64, high: f64) -> Vec<f64> {
    if data.is_empty() {
        return Vec::new();
    }
    let hp = if low > 0.0 {
        single_pole_highpass(data, fs, low)
    } else {
        data.to_vec()
    };
    if high <= 0.0 || high >= fs * 0.5 {
        hp
    } else {
        single_pole_lowpass(&hp, fs, high)
    }
}

fn single_pole_highpass(data: &[f64], fs: f64, cutoff: f64) -> Vec<f64> {
    if data.is_empty() {
        return Vec::new();
    }
    let dt = 1.0 / fs;
    let rc = 1.0 / (2.0 * std::f64::consts::PI * cutoff.max(0.01));
    let alpha = rc / (rc + dt);
    let mut out = Vec::with_capacity(data.len());
    let mut prev_y = 0.0;
    let mut prev_x = data[0];
    for &x in data {
        let y = alpha * (prev_y + x - prev_x);
        out.push(y);
        prev_y = y;
        prev_x = x;
    }
    out
}

fn single_pole_lowpass(data: &[f64], fs: f64, cutoff: f64) -> Vec<f64> {
    if data.is_empty() {
        return Vec::new();
    }
    let dt = 1.0 / fs;
    let rc = 1.0 / (2.0 * std::f64::consts::PI * cutoff.max(0.01));
    let alpha = dt / (rc + dt);
    let mut out = Vec::with_capacity(data.len());
    let mut prev = data[0];
    for &x in data {
        prev += alpha * (x - prev);
        out.push(prev);
    }
    out
}

fn derivative(data: &[f64]) -> Vec<f64> {
    if data.is_empty() {
        return Vec::new();
    }
    let mut out = vec![0.0; data.len()];
    for i in 1..data.len() {
        out[i] = data[i] - data[i - 1];
    }
    out
}

fn square(data: &[f64]) -> Vec<f64> {
    data.iter().map(|x| x * x).collect()
}

fn moving_average(data: &[f64], win: usize) -> Vec<f64> {
    if data.is_empty() {
        return Vec::new();
    }
    if win <= 1 {
        return data.to_vec();
    }
    let mut out = vec![0.0; data.len()];
    let mut acc = 0.0;
    for (i, &sample) in data.iter().enumerate() {
        acc += sample;
        if i >= win {
            acc -= data[i - win];
        }
        out[i] = acc / win as f64;
    }
    out
}

/// Zero-phase boxcar: each sample is the mean of the `win` samples centred on it
/// (truncated at the edges).
fn centered_moving_average(data: &[f64], win: usize) -> Vec<f64> {
    if win <= 1 || data.is_empty() {
        return data.to_vec();
    }
    let mut prefix = Vec::with_capacity(data.len() + 1);
    prefix.push(0.0);
    for &x in data {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + x);
    }
    let before = (win - 1) / 2;
    let after = win - 1 - before;
    (0..data.len())
        .map(|i| {
            let start = i.saturating_sub(before);
            let end = (i + after + 1).min(data.len());
            (prefix[end] - prefix[start]) / (end - start) as f64
        })
        .collect()
}

fn pick_peaks(
    bandpassed: &[f64],
    envelope: &[f64],
    fs: f64,
    cfg: &EcgPipelineConfig,
) -> Vec<usize> {
    if bandpassed.is_empty() || envelope.is_empty() {
        return Vec::new();
    }

    let refractory = (cfg.min_rr_s * fs).round().max(1.0) as usize;
    let search = (cfg.search_back_s * fs).round().max(1.0) as usize;

    let init = envelope.len().min((fs as usize).max(1));
    let avg = envelope[..init].iter().sum::<f64>() / init as f64;
    let mut signal_level = avg;
    let mut noise_level = avg * 0.5;
    let mut threshold = noise_level + cfg.threshold_scale * (signal_level - noise_level).max(0.0);
    let mut last_peak_sample = 0usize;
    let mut peaks = Vec::new();

    for (i, &sample) in envelope.iter().enumerate() {
        let refractory_ok = peaks.is_empty() || i - last_peak_sample >= refractory;
        if sample >= threshold && refractory_ok {
            let start = i.saturating_sub(search);
            let end = i.min(bandpassed.len() - 1);
            let mut idx = start;
            let mut max_val = f64::MIN;
            for (j, &value) in bandpassed.iter().enumerate().take(end + 1).skip(start) {
                if value > max_val {
                    max_val = value;
                    idx = j;
                }
            }
            peaks.push(idx);
            last_peak_sample = i;
            signal_level = 0.125 * sample + 0.875 * signal_level;
        } else {
            noise_level = 0.125 * sample + 0.875 * noise_level;
        }

        threshold = noise_level + cfg.threshold_scale * (signal_level - noise_level).max(0.0);
    }

    peaks.sort_unstable();
    peaks.dedup();
    peaks
}
