pub mod analysis;
pub mod detectors;
pub mod error;
pub mod gate;
pub mod io;
pub mod metrics;
pub mod params;
pub mod pipeline;
pub mod plot;
pub mod report;
pub mod segment;
pub mod signal;
pub mod simulate;
pub mod table;
pub mod windowing;

pub use error::{AnalysisError, DyadError};
pub use params::{ParameterSet, PipelineConfig, Role};
pub use pipeline::{DyadOutput, DyadPipeline, SubjectIdentity};
pub use signal::*;
