pub mod analysis;

pub use analysis::{AnalysisRequest, PerformanceRecord};
