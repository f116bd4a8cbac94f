use crate::analysis::SignalQuality;
use crate::windowing::PlotRequest;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Axis {
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Style {
    pub width: f32,
    pub dash: Option<[f32; 2]>,
    pub color: Color,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    pub fn rgb(&self) -> (u8, u8, u8) {
        (
            ((self.0 >> 16) & 0xFF) as u8,
            ((self.0 >> 8) & 0xFF) as u8,
            (self.0 & 0xFF) as u8,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub style: Style,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScatterSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub radius: u32,
    pub color: Color,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Series {
    Line(LineSeries),
    Scatter(ScatterSeries),
}

impl Series {
    pub fn points(&self) -> &[[f64; 2]] {
        match self {
            Series::Line(line) => &line.points,
            Series::Scatter(scatter) => &scatter.points,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Figure {
    pub title: Option<String>,
    pub x: Axis,
    pub y: Axis,
    pub series: Vec<Series>,
}

impl Figure {
    pub fn new(title: impl Into<Option<String>>) -> Self {
        Self {
            title: title.into(),
            x: Axis { label: None },
            y: Axis { label: None },
            series: Vec::new(),
        }
    }

    pub fn add_series(&mut self, series: Series) {
        self.series.push(series);
    }

    /// `(x_min, x_max, y_min, y_max)` over every series, `None` when there are no points.
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let mut points = self
            .series
            .iter()
            .flat_map(|s| s.points())
            .filter(|p| p[0].is_finite() && p[1].is_finite());
        let first = points.next()?;
        let init = (first[0], first[0], first[1], first[1]);
        Some(points.fold(init, |(x0, x1, y0, y1), p| {
            (x0.min(p[0]), x1.max(p[0]), y0.min(p[1]), y1.max(p[1]))
        }))
    }
}

/// Renders stacked panels into one image.
pub trait PlotBackend {
    fn draw(&mut self, panels: &[Figure]) -> anyhow::Result<()>;
}

pub fn decimate_points(points: &[[f64; 2]], max_points: usize) -> Vec<[f64; 2]> {
    if points.len() <= max_points {
        return points.to_vec();
    }
    let bucket_size = points.len() as f64 / max_points as f64;
    let mut result = Vec::with_capacity(max_points);
    for i in 0..max_points {
        let start = (i as f64 * bucket_size).floor() as usize;
        if start >= points.len() {
            break;
        }
        let sample = points[start];
        result.push(sample);
    }
    result
}

fn line(name: &str, points: Vec<[f64; 2]>, width: f32, color: u32) -> Series {
    Series::Line(LineSeries {
        name: name.into(),
        points,
        style: Style {
            width,
            dash: None,
            color: Color(color),
        },
    })
}

/// QA panels of one analysis window: the cleaned trace with its R-peaks, then the
/// continuous quality index when there is one. Time runs in seconds from the
/// window start.
pub fn window_figures(request: &PlotRequest, fs: f64, max_points: usize) -> Vec<Figure> {
    let window = &request.window;
    let origin = window.index.first().copied().unwrap_or(0.0);
    let seconds: Vec<f64> = window
        .index
        .iter()
        .map(|&t| window.unit.to_seconds(t - origin, fs))
        .collect();
    let trace = |values: &[f64]| -> Vec<[f64; 2]> {
        seconds.iter().zip(values).map(|(&t, &v)| [t, v]).collect()
    };

    let title = match &window.quality {
        SignalQuality::Categorical(label) => format!(
            "{} window {} ({label})",
            request.segment, request.analysis_window
        ),
        SignalQuality::Continuous(_) => {
            format!("{} window {}", request.segment, request.analysis_window)
        }
    };
    let mut ecg = Figure::new(Some(title));
    ecg.x.label = Some("time (s)".into());
    ecg.y.label = Some("ECG (mV)".into());
    ecg.add_series(line(
        "ECG_Clean",
        decimate_points(&trace(&window.clean), max_points),
        1.4,
        0x1F77B4,
    ));
    ecg.add_series(Series::Scatter(ScatterSeries {
        name: "ECG_R_Peaks".into(),
        points: window
            .peak_positions()
            .into_iter()
            .map(|i| [seconds[i], window.clean[i]])
            .collect(),
        radius: 3,
        color: Color(0xD62728),
    }));

    let mut panels = vec![ecg];
    if let SignalQuality::Continuous(values) = &window.quality {
        let mut quality = Figure::new(Some("signal quality".to_string()));
        quality.x.label = Some("time (s)".into());
        quality.add_series(line(
            "ECG_Quality",
            decimate_points(&trace(values), max_points),
            1.0,
            0x2CA02C,
        ));
        panels.push(quality);
    }
    panels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::QualityLabel;
    use crate::table::{EcgSignalTable, IndexUnit};

    fn request(quality: SignalQuality) -> PlotRequest {
        let len = 1_000;
        PlotRequest {
            segment: "baseline".into(),
            analysis_window: 2,
            window: EcgSignalTable {
                unit: IndexUnit::Milliseconds,
                index: (0..len).map(|i| 60_000.0 + i as f64 * 2.0).collect(),
                raw: vec![0.0; len],
                clean: (0..len).map(|i| (i % 100) as f64).collect(),
                r_peaks: (0..len).map(|i| i % 250 == 99).collect(),
                quality,
                event: vec![None; len],
                event_description: vec![None; len],
            },
        }
    }

    #[test]
    fn decimation_caps_point_count() {
        let points: Vec<[f64; 2]> = (0..1000).map(|i| [i as f64, 0.0]).collect();
        assert_eq!(decimate_points(&points, 100).len(), 100);
        assert_eq!(decimate_points(&points[..10], 100).len(), 10);
    }

    #[test]
    fn window_figure_marks_peaks_from_window_start() {
        let panels = window_figures(&request(SignalQuality::Continuous(vec![0.9; 1_000])), 500.0, 256);
        assert_eq!(panels.len(), 2);
        let ecg = &panels[0];
        assert_eq!(ecg.title.as_deref(), Some("baseline window 2"));
        let peaks = ecg.series[1].points();
        assert_eq!(peaks.len(), 4);
        assert!((peaks[0][0] - 0.198).abs() < 1e-9);
        assert_eq!(peaks[0][1], 99.0);
        let (x0, x1, _, _) = ecg.bounds().unwrap();
        assert_eq!(x0, 0.0);
        assert!(x1 < 2.0);
        assert!(ecg.series[0].points().len() <= 256);
    }

    #[test]
    fn categorical_quality_goes_into_the_title() {
        let panels = window_figures(
            &request(SignalQuality::Categorical(QualityLabel::Excellent)),
            500.0,
            256,
        );
        assert_eq!(panels.len(), 1);
        assert_eq!(panels[0].title.as_deref(), Some("baseline window 2 (Excellent)"));
    }
}
