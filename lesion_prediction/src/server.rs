use crate::{model_service::ModelService, routes::api_routes, state::ServiceContext};
use axum::{extract::DefaultBodyLimit, Router};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use lesion_core::config::ServerConfig;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

pub fn build_router<M: ModelService>(context: ServiceContext<M>) -> Router {
    let metrics_layer = HttpMetricsLayerBuilder::new().build();

    Router::new()
        .merge(api_routes::<M>())
        .with_state(context)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(metrics_layer)
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new<M: ModelService>(
        context: ServiceContext<M>,
        config: &ServerConfig,
    ) -> anyhow::Result<Self> {
        let router = build_router(context);
        let listener = TcpListener::bind(config.get_address()).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        mut shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting prediction service on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            Ok(())
        });

        Ok(server_handle)
    }
}
