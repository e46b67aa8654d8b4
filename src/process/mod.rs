pub mod orchestrator;
pub mod quality;

pub use orchestrator::{AnnotationProcess, BlockNeighbors, ProcessError, ProcessOutput};
pub use quality::{decide_speaker_quality, QualityVerdict};
