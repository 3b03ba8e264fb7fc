use crate::admin::ManagementService;
use crate::application::maintenance::{spawn_pruner, spawn_sweeper, SweepIntervals};
use crate::config::Settings;
use crate::gateway::health::{HealthMonitor, HttpProbe};
use crate::gateway::upstream::UpstreamClient;
use crate::gateway::{Dispatcher, GatewayContext, GatewayService};
use crate::infrastructure::log_messages::application as messages;
use crate::infrastructure::{ConfigStore, StoreSeed};
use crate::Result;
use axum::Router;
use futures_util::future::join_all;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

/// Main application struct that coordinates all components
pub struct Application {
    settings: Settings,
    context: GatewayContext,
    client: UpstreamClient,
}

impl Application {
    #[instrument]
    pub async fn new() -> Result<Self> {
        let settings = Settings::new()?;
        Self::with_settings(settings)
    }

    /// Build every component without binding any socket
    pub fn with_settings(settings: Settings) -> Result<Self> {
        settings.validate()?;

        let store = match &settings.store.seed_file {
            Some(path) => {
                info!(path = %path.display(), "{}", messages::LOADING_SEED);
                ConfigStore::from_seed(StoreSeed::from_file(path)?)?
            }
            None => ConfigStore::new(),
        };

        let context = GatewayContext::new(
            Arc::new(store),
            Arc::new(settings.jwt_verifier()),
            settings.cache_limits(),
            settings.breaker_policy(),
        );

        Ok(Self {
            settings,
            context,
            client: UpstreamClient::new(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn context(&self) -> &GatewayContext {
        &self.context
    }

    pub fn gateway_router(&self) -> Router {
        let dispatcher = Dispatcher::new(
            self.settings.gateway_config(),
            self.context.clone(),
            self.client.clone(),
        );
        GatewayService::new(Arc::new(dispatcher)).into_router()
    }

    pub fn management_router(&self) -> Router {
        ManagementService::new(self.context.clone()).into_router()
    }

    /// Bind both listeners and serve until Ctrl-C
    #[instrument(skip(self))]
    pub async fn run(self) -> Result<()> {
        let host = self.settings.application.host.clone();
        let gateway_port = *self.settings.application.gateway_port.as_ref();
        let management_port = *self.settings.application.management_port.as_ref();

        let gateway = TcpListener::bind((host.as_str(), gateway_port)).await?;
        let management = TcpListener::bind((host.as_str(), management_port)).await?;

        self.serve(gateway, management, shutdown_signal()).await
    }

    /// Serve on already-bound listeners until `shutdown` resolves
    pub async fn serve(
        self,
        gateway: TcpListener,
        management: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        info!(
            environment = %self.settings.application.environment,
            "{}",
            messages::STARTING
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        let background = self.spawn_background(&stop_rx);

        info!(addr = %gateway.local_addr()?, "{}", messages::GATEWAY_LISTENING);
        info!(addr = %management.local_addr()?, "{}", messages::MANAGEMENT_LISTENING);

        let gateway_server = axum::serve(
            gateway,
            self.gateway_router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(stopped(stop_rx.clone()));
        let management_server = axum::serve(
            management,
            self.management_router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(stopped(stop_rx));

        let servers = async move {
            tokio::try_join!(
                gateway_server.into_future(),
                management_server.into_future()
            )
        };
        tokio::pin!(servers);
        info!("{}", messages::STARTED_SUCCESSFULLY);

        let result = tokio::select! {
            result = &mut servers => result,
            () = shutdown => {
                info!("{}", messages::SHUTDOWN_SIGNAL);
                let _ = stop_tx.send(true);
                servers.await
            }
        };

        let _ = stop_tx.send(true);
        for joined in join_all(background).await {
            if let Err(e) = joined {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        result?;
        info!("{}", messages::STOPPED);
        Ok(())
    }

    fn spawn_background(&self, stop: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        if self.settings.health.enabled {
            let monitor = HealthMonitor::new(
                Arc::clone(&self.context.store),
                Arc::clone(&self.context.origins),
                Arc::new(HttpProbe::new(self.client.clone())),
            );
            handles.push(monitor.spawn(stop.clone()));
        }
        handles.push(spawn_sweeper(
            self.context.clone(),
            SweepIntervals {
                cache: Duration::from_secs(self.settings.cache.sweep_interval_secs),
                rate_limits: Duration::from_secs(self.settings.rate_limit.sweep_interval_secs),
            },
            stop.clone(),
        ));
        handles.push(spawn_pruner(self.context.clone(), stop.clone()));
        handles
    }
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C; shutting down");
    }
}
