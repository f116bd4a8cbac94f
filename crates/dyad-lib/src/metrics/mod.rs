pub mod hrv;
pub mod sqi;

pub use hrv::*;
pub use sqi::*;
