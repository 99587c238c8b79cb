mod burn_service;
mod server;
mod state;
mod telemetry;

pub mod app;
pub mod model_service;
pub mod routes;

pub use app::start_app;
pub use burn_service::BurnModelService;
pub use server::{build_router, HttpServer};
pub use state::ServiceContext;
pub use telemetry::Metrics;
