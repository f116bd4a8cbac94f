//! Seeded synthetic dyad recordings, written in the acquisition export format.

use crate::io::dyad::{ACQUISITION_START, CHILD_ECG_COLUMN, ECG_TIME_COLUMN, MOTHER_ECG_COLUMN};
use crate::params::Role;
use crate::pipeline::SubjectIdentity;
use crate::table::{EventMarker, EventTable, IndexUnit, SignalEventTable, SignalTable};
use anyhow::{Context, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::f64::consts::PI;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub seed: u64,
    pub sampling_frequency: u32,
    pub duration_s: f64,
    /// Mean beat-to-beat interval of the child (seconds).
    pub child_rr_s: f64,
    /// Mean beat-to-beat interval of the mother (seconds).
    pub mother_rr_s: f64,
    /// Uniform jitter added to every interval (seconds).
    pub rr_jitter_s: f64,
    /// Amplitude of the uniform measurement noise (mV).
    pub noise: f64,
    /// `(event, event_description, timestamp_ms)`.
    pub events: Vec<(String, String, f64)>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            sampling_frequency: 500,
            duration_s: 660.0,
            child_rr_s: 0.45,
            mother_rr_s: 0.8,
            rr_jitter_s: 0.03,
            noise: 0.02,
            events: vec![
                ("E1".into(), "baseline resting start".into(), 1_000.0),
                ("E2".into(), "Book start".into(), 330_000.0),
            ],
        }
    }
}

fn beat_times(rng: &mut StdRng, mean_rr: f64, jitter: f64, duration_s: f64) -> Vec<f64> {
    let mut beats = Vec::new();
    let mut t = rng.gen_range(0.1..0.1 + mean_rr);
    while t < duration_s {
        beats.push(t);
        let delta = if jitter > 0.0 {
            rng.gen_range(-jitter..jitter)
        } else {
            0.0
        };
        t += mean_rr + delta;
    }
    beats
}

/// One ECG trace: narrow R waves and broader T waves on a slow baseline wander.
fn synthesize_channel(rng: &mut StdRng, config: &SimulationConfig, mean_rr: f64) -> Vec<f64> {
    let fs = config.sampling_frequency as f64;
    let samples = (config.duration_s * fs).round() as usize;
    let beats = beat_times(rng, mean_rr, config.rr_jitter_s, config.duration_s);
    let mut data: Vec<f64> = (0..samples)
        .map(|i| {
            let t = i as f64 / fs;
            let wander = 0.05 * (2.0 * PI * 0.3 * t).sin();
            let noise = if config.noise > 0.0 {
                rng.gen_range(-config.noise..config.noise)
            } else {
                0.0
            };
            wander + noise
        })
        .collect();
    let reach = (0.4 * fs) as usize;
    for &bt in &beats {
        let center = (bt * fs) as usize;
        let lo = center.saturating_sub(reach);
        let hi = (center + reach).min(samples);
        for (i, v) in data.iter_mut().enumerate().take(hi).skip(lo) {
            let t = i as f64 / fs;
            let r = (-0.5 * ((t - bt) / 0.012).powi(2)).exp();
            let tw = (-0.5 * ((t - bt - 0.25 * mean_rr) / 0.04).powi(2)).exp();
            *v += 1.2 * r + 0.25 * tw;
        }
    }
    data
}

fn rr_for(config: &SimulationConfig, role: Role) -> f64 {
    match role {
        Role::Child => config.child_rr_s,
        Role::Mother => config.mother_rr_s,
    }
}

/// Two-channel ECG (index in seconds) plus its event log (milliseconds).
pub fn simulate_recording(config: &SimulationConfig) -> Result<(SignalTable, EventTable)> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let fs = config.sampling_frequency as f64;
    let child = synthesize_channel(&mut rng, config, rr_for(config, Role::Child));
    let mother = synthesize_channel(&mut rng, config, rr_for(config, Role::Mother));
    let index = (0..child.len()).map(|i| i as f64 / fs).collect();
    let signal = SignalTable::new(IndexUnit::Seconds, index, child, mother)?;
    let markers = config
        .events
        .iter()
        .map(|(event, description, timestamp)| EventMarker {
            timestamp: *timestamp,
            event: event.clone(),
            event_description: description.clone(),
        })
        .collect();
    Ok((signal, EventTable::new(IndexUnit::Milliseconds, markers)))
}

/// Simulated recording merged the same way loaded files are.
pub fn simulate_dyad_table(config: &SimulationConfig) -> Result<SignalEventTable> {
    let (signal, events) = simulate_recording(config)?;
    let signal = signal.to_unit(events.unit(), config.sampling_frequency as f64)?;
    Ok(SignalEventTable::merge(&signal, &events)?)
}

pub fn write_ecg<W: Write>(mut out: W, signal: &SignalTable) -> Result<()> {
    writeln!(out, "Simulated dyad ECG export")?;
    writeln!(out, "{ECG_TIME_COLUMN}\t{CHILD_ECG_COLUMN}\t{MOTHER_ECG_COLUMN}")?;
    let child = signal.channel(Role::Child);
    let mother = signal.channel(Role::Mother);
    for (row, t) in signal.index().iter().enumerate() {
        writeln!(out, "{t:.4}\t{:.6}\t{:.6}", child[row], mother[row])?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_events<W: Write>(mut out: W, events: &EventTable) -> Result<()> {
    writeln!(out, "Simulated dyad event log")?;
    writeln!(out, "E0\t{ACQUISITION_START}\t0")?;
    for marker in events.markers() {
        writeln!(
            out,
            "{}\t{}\t{}",
            marker.event, marker.event_description, marker.timestamp
        )?;
    }
    out.flush()?;
    Ok(())
}

/// Write `{C}{id}_{wave}_mc.txt` and `{C}{id}_{wave}_event.txt` into `dir`.
pub fn write_dyad_files(
    dir: &Path,
    identity: &SubjectIdentity,
    config: &SimulationConfig,
) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let (signal, events) = simulate_recording(config)?;
    let stem = format!(
        "{}{:02}_{}",
        identity.condition, identity.subject_id, identity.wave
    );
    let ecg_path = dir.join(format!("{stem}_mc.txt"));
    let event_path = dir.join(format!("{stem}_event.txt"));
    let file = File::create(&ecg_path).with_context(|| format!("creating {}", ecg_path.display()))?;
    write_ecg(BufWriter::new(file), &signal)?;
    let file =
        File::create(&event_path).with_context(|| format!("creating {}", event_path.display()))?;
    write_events(BufWriter::new(file), &events)?;
    Ok((ecg_path, event_path))
}
