pub mod dyad;
pub mod export;
