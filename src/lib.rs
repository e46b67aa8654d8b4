pub mod io;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod process;
pub mod store;
pub mod units;

pub use llm::{OpenAiClient, OpenAiConfig, StructuredGateway, DEFAULT_OPENAI_BASE_URL};
pub use models::{
    AttemptRecord, EmpathyDecision, QualityDecision, SpeakerDecision, UtteranceBlock,
};
pub use pipeline::{annotate_directory, AnnotateConfig, AnnotateSummary, DEFAULT_MODEL};
pub use process::{AnnotationProcess, BlockNeighbors, ProcessOutput};
pub use store::{setup_database, SqliteStore};
pub use units::{
    CaseContext, EmpathyClassifier, LlmEmpathyUnit, LlmSpeakerUnit, SpeakerClassifier,
    DEFAULT_MAX_ATTEMPTS,
};
