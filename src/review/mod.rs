//! Review domain - the canonical feedback schema and the pure aggregator.

pub mod aggregate;
pub mod types;

pub use aggregate::{AggregatedTheme, FeedbackInstance, FeedbackSummary, aggregate};
pub use types::{
    AnalysisResult, CodeContext, DevelopmentTrajectory, Feedback, FeedbackItem, FocusArea,
    ManagerialInsights, PatternAnalysisResult, PatternCategory, RecurringPattern,
};
