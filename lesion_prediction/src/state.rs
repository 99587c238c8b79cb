use crate::{model_service::ModelService, telemetry::Metrics};
use std::sync::Arc;

/// Built once at startup and shared read-only by every handler.
pub struct ServiceContext<M: ModelService> {
    pub model_service: Arc<M>,
    pub metrics: Arc<Metrics>,
}

impl<M: ModelService> ServiceContext<M> {
    pub fn new(model_service: M, metrics: Metrics) -> Self {
        Self {
            model_service: Arc::new(model_service),
            metrics: Arc::new(metrics),
        }
    }
}

// Derived Clone would require `M: Clone`.
impl<M: ModelService> Clone for ServiceContext<M> {
    fn clone(&self) -> Self {
        Self {
            model_service: Arc::clone(&self.model_service),
            metrics: Arc::clone(&self.metrics),
        }
    }
}
