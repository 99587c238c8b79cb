mod evaluation;
mod report;

pub use evaluation::{evaluate, start_evaluation, EvaluationError};
pub use report::{AverageMetrics, ClassMetrics, ClassificationReport};
