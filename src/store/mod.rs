pub mod report;
pub mod sqlite;

pub use report::{
    build_analytics_markdown, build_release_debug_markdown, build_report, format_report,
    ReportMetrics,
};
pub use sqlite::{
    setup_database, AnnotationRow, SqliteStore, REVIEW_NOT_APPLICABLE, REVIEW_NOT_OK, REVIEW_OK,
    REVIEW_PENDING,
};
