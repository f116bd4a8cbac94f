use crate::error::AnalysisError;
use crate::params::{HrvFrequencySettings, PsdMethod};
use crate::signal::RRSeries;
use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Fewest R-peaks for which HRV indices are defined.
pub const MIN_PEAKS: usize = 3;

/// Resampling rate of the RR tachogram (Hz).
pub const INTERPOLATION_RATE: f64 = 4.0;

/// Time-domain HRV indices, in milliseconds unless noted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HrvTimeFeatures {
    pub mean_nn: f64,
    pub sdnn: f64,
    pub rmssd: f64,
    pub sdsd: f64,
    pub cvnn: f64,
    pub cvsd: f64,
    pub median_nn: f64,
    pub mad_nn: f64,
    pub mcv_nn: f64,
    pub iqr_nn: f64,
    pub min_nn: f64,
    pub max_nn: f64,
    /// Percent of successive differences above 50 ms.
    pub pnn50: f64,
    /// Percent of successive differences above 20 ms.
    pub pnn20: f64,
}

pub const TIME_FEATURES: [&str; 14] = [
    "HRV_MeanNN",
    "HRV_SDNN",
    "HRV_RMSSD",
    "HRV_SDSD",
    "HRV_CVNN",
    "HRV_CVSD",
    "HRV_MedianNN",
    "HRV_MadNN",
    "HRV_MCVNN",
    "HRV_IQRNN",
    "HRV_MinNN",
    "HRV_MaxNN",
    "HRV_pNN50",
    "HRV_pNN20",
];

impl HrvTimeFeatures {
    /// Values paired with [`TIME_FEATURES`].
    pub fn columns(&self) -> Vec<(&'static str, f64)> {
        let values = [
            self.mean_nn,
            self.sdnn,
            self.rmssd,
            self.sdsd,
            self.cvnn,
            self.cvsd,
            self.median_nn,
            self.mad_nn,
            self.mcv_nn,
            self.iqr_nn,
            self.min_nn,
            self.max_nn,
            self.pnn50,
            self.pnn20,
        ];
        TIME_FEATURES.into_iter().zip(values).collect()
    }
}

/// Band powers of the RR tachogram. Ratios are NaN when their denominator vanishes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HrvFrequencyFeatures {
    pub ulf: f64,
    pub vlf: f64,
    pub lf: f64,
    pub hf: f64,
    pub vhf: f64,
    pub total_power: f64,
    pub lf_hf: f64,
    pub lf_n: f64,
    pub hf_n: f64,
    pub ln_hf: f64,
}

pub const FREQUENCY_FEATURES: [&str; 10] = [
    "HRV_ULF", "HRV_VLF", "HRV_LF", "HRV_HF", "HRV_VHF", "HRV_TP", "HRV_LFHF", "HRV_LFn",
    "HRV_HFn", "HRV_LnHF",
];

impl HrvFrequencyFeatures {
    pub fn columns(&self) -> Vec<(&'static str, f64)> {
        let values = [
            self.ulf,
            self.vlf,
            self.lf,
            self.hf,
            self.vhf,
            self.total_power,
            self.lf_hf,
            self.lf_n,
            self.hf_n,
            self.ln_hf,
        ];
        FREQUENCY_FEATURES.into_iter().zip(values).collect()
    }
}

fn rr_from_peaks(peaks: &[usize], fs: f64) -> Result<RRSeries, AnalysisError> {
    if peaks.len() < MIN_PEAKS {
        return Err(AnalysisError::InsufficientBeats {
            found: peaks.len(),
            required: MIN_PEAKS,
        });
    }
    if fs <= 0.0 {
        return Err(AnalysisError::Numerical(format!(
            "sampling rate must be positive, got {fs}"
        )));
    }
    Ok(RRSeries::from_peaks(peaks, fs))
}

pub fn hrv_time(peaks: &[usize], fs: f64) -> Result<HrvTimeFeatures, AnalysisError> {
    let rr = rr_from_peaks(peaks, fs)?;
    let nn = &rr.rr_ms;
    let n = nn.len() as f64;
    let diffs: Vec<f64> = nn.windows(2).map(|w| w[1] - w[0]).collect();

    let mean_nn = mean(nn);
    let sdnn = sample_std(nn);
    let rmssd = if diffs.is_empty() {
        0.0
    } else {
        (diffs.iter().map(|d| d * d).sum::<f64>() / diffs.len() as f64).sqrt()
    };
    let sdsd = sample_std(&diffs);

    let mut sorted = nn.clone();
    sorted.sort_by(f64::total_cmp);
    let median_nn = quantile(&sorted, 0.5);
    let mut deviations: Vec<f64> = nn.iter().map(|x| (x - median_nn).abs()).collect();
    deviations.sort_by(f64::total_cmp);
    let mad_nn = 1.4826 * quantile(&deviations, 0.5);

    let above = |limit: f64| diffs.iter().filter(|d| d.abs() > limit).count() as f64 / n * 100.0;

    Ok(HrvTimeFeatures {
        mean_nn,
        sdnn,
        rmssd,
        sdsd,
        cvnn: sdnn / mean_nn,
        cvsd: rmssd / mean_nn,
        median_nn,
        mad_nn,
        mcv_nn: mad_nn / median_nn,
        iqr_nn: quantile(&sorted, 0.75) - quantile(&sorted, 0.25),
        min_nn: sorted[0],
        max_nn: sorted[sorted.len() - 1],
        pnn50: above(50.0),
        pnn20: above(20.0),
    })
}

pub fn hrv_frequency(
    peaks: &[usize],
    fs: f64,
    settings: &HrvFrequencySettings,
) -> Result<HrvFrequencyFeatures, AnalysisError> {
    let rr = rr_from_peaks(peaks, fs)?;
    let tachogram = interpolate_rr(&rr, INTERPOLATION_RATE);
    if tachogram.len() < 2 {
        return Err(AnalysisError::Numerical(
            "RR tachogram is shorter than two samples".into(),
        ));
    }
    let (freqs, mut powers) = match settings.psd_method {
        PsdMethod::Welch => welch_psd(&tachogram, INTERPOLATION_RATE)?,
        PsdMethod::Periodogram => periodogram(&tachogram, INTERPOLATION_RATE)?,
    };
    if settings.normalize {
        let peak = powers.iter().copied().fold(0.0, f64::max);
        if peak > 0.0 {
            powers.iter_mut().for_each(|p| *p /= peak);
        }
    }

    let df = if freqs.len() > 1 { freqs[1] - freqs[0] } else { 0.0 };
    let band_power = |low: f64, high: f64| integrate_band(&freqs, &powers, (low, high)) * df;
    let ulf = band_power(settings.ulf.low(), settings.ulf.high());
    let vlf = band_power(settings.vlf.low(), settings.vlf.high());
    let lf = band_power(settings.lf.low(), settings.lf.high());
    let hf = band_power(settings.hf.low(), settings.hf.high());
    let vhf = band_power(settings.vhf.low(), settings.vhf.high());
    let total_power = ulf + vlf + lf + hf + vhf;

    let ratio = |num: f64, den: f64| if den > 0.0 { num / den } else { f64::NAN };
    Ok(HrvFrequencyFeatures {
        ulf,
        vlf,
        lf,
        hf,
        vhf,
        total_power,
        lf_hf: ratio(lf, hf),
        lf_n: ratio(lf, total_power),
        hf_n: ratio(hf, total_power),
        ln_hf: if hf > 0.0 { hf.ln() } else { f64::NAN },
    })
}

fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

fn sample_std(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let m = mean(data);
    (data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (data.len() as f64 - 1.0)).sqrt()
}

/// Linear-interpolated quantile of sorted data.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

fn integrate_band(freqs: &[f64], powers: &[f64], band: (f64, f64)) -> f64 {
    freqs
        .iter()
        .zip(powers)
        .filter(|(f, _)| **f >= band.0 && **f < band.1)
        .map(|(_, p)| *p)
        .sum()
}

fn welch_psd(signal: &[f64], fs: f64) -> Result<(Vec<f64>, Vec<f64>), AnalysisError> {
    let n = signal.len();
    let window = ((fs * 30.0).max(4.0).min(n as f64)) as usize;
    let step = (window / 2).max(1);
    let taper = hann(window);
    let mut freqs = Vec::new();
    let mut powers = Vec::new();
    let mut pos = 0;
    let mut segments = 0;
    while pos + window <= n {
        let (f, p) = tapered_spectrum(&signal[pos..pos + window], &taper, fs)?;
        if segments == 0 {
            freqs = f;
            powers = p;
        } else {
            powers.iter_mut().zip(p).for_each(|(acc, x)| *acc += x);
        }
        segments += 1;
        pos += step;
    }
    if segments > 0 {
        for p in powers.iter_mut() {
            *p /= segments as f64;
        }
    }
    Ok((freqs, powers))
}

fn periodogram(signal: &[f64], fs: f64) -> Result<(Vec<f64>, Vec<f64>), AnalysisError> {
    let boxcar = vec![1.0; signal.len()];
    tapered_spectrum(signal, &boxcar, fs)
}

/// One-sided power spectral density of a mean-removed, tapered frame.
fn tapered_spectrum(
    frame: &[f64],
    taper: &[f64],
    fs: f64,
) -> Result<(Vec<f64>, Vec<f64>), AnalysisError> {
    let n = frame.len();
    let frame_mean = frame.iter().sum::<f64>() / n as f64;
    let mut buffer: Vec<f64> = frame
        .iter()
        .zip(taper)
        .map(|(x, w)| (x - frame_mean) * w)
        .collect();
    let mut planner = RealFftPlanner::<f64>::new();
    let r2c = planner.plan_fft_forward(n);
    let mut spectrum = r2c.make_output_vec();
    r2c.process(&mut buffer, &mut spectrum)
        .map_err(|e| AnalysisError::Numerical(e.to_string()))?;
    let scale = 1.0 / (fs * taper.iter().map(|w| w * w).sum::<f64>());
    let freqs = (0..spectrum.len())
        .map(|k| k as f64 * fs / n as f64)
        .collect();
    let powers = spectrum
        .iter()
        .enumerate()
        .map(|(k, val)| {
            let one_sided = if k == 0 || (n % 2 == 0 && k == n / 2) {
                1.0
            } else {
                2.0
            };
            one_sided * val.norm_sqr() * scale
        })
        .collect();
    Ok((freqs, powers))
}

/// RR intervals (ms) placed at the beat that ends them and linearly resampled at `fs`.
fn interpolate_rr(rr: &RRSeries, fs: f64) -> Vec<f64> {
    let times = rr.beat_times();
    let values = &rr.rr_ms;
    let (Some(&first), Some(&last)) = (times.first(), times.last()) else {
        return Vec::new();
    };
    let n = ((last - first) * fs).floor() as usize + 1;
    let mut signal = Vec::with_capacity(n);
    let mut idx = 0;
    for i in 0..n {
        let t = first + i as f64 / fs;
        while idx + 2 < times.len() && times[idx + 1] < t {
            idx += 1;
        }
        let value = if idx + 1 < times.len() {
            let span = times[idx + 1] - times[idx];
            let frac = if span > 0.0 {
                ((t - times[idx]) / span).clamp(0.0, 1.0)
            } else {
                0.0
            };
            values[idx] + (values[idx + 1] - values[idx]) * frac
        } else {
            values[idx]
        };
        signal.push(value);
    }
    signal
}

fn hann(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / (size as f64)).cos()))
        .collect()
}
