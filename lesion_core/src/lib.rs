pub mod artifact;
pub mod backend;
pub mod config;
pub mod dataset;
pub mod labels;
pub mod model;
pub mod preprocess;
pub mod telemetry;
