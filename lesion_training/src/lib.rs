mod training;

pub use training::{start_training, train, TrainingError, TrainingOutcome};
