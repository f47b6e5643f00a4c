//! Application state.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;
use vgen_notify::{Notifier, NotifierConfig};
use vgen_queue::EventBroadcaster;
use vgen_render_client::RenderClient;
use vgen_store::{FileRepository, JobRepository, JobStore, MemoryRepository, StoreConfig};
use vgen_worker::{
    Fanout, MonitorConfig, ProcessExit, RenderMonitor, Scheduler, SchedulerConfig,
    SupervisorConfig, SystemClock, WebhookIngestion, WorkflowSupervisor,
};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    /// Wrap an already built scheduler.
    pub fn with_scheduler(config: ApiConfig, scheduler: Arc<Scheduler>) -> Self {
        Self { config, scheduler }
    }

    /// Build the scheduler and its collaborators from the environment.
    ///
    /// Returns the receiving end of the workflow exit channel; the caller
    /// drives it with [`Scheduler::run_exit_loop`].
    pub async fn new(config: ApiConfig) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<ProcessExit>)> {
        let scheduler_config = SchedulerConfig::from_env();

        let repo: Arc<dyn JobRepository> = match &scheduler_config.data_dir {
            Some(dir) => {
                info!("Using file-backed job store at {}", dir.display());
                Arc::new(FileRepository::open(dir).await?)
            }
            None => {
                info!("Using in-memory job store");
                Arc::new(MemoryRepository::new())
            }
        };
        let store = Arc::new(JobStore::open(repo, StoreConfig::from_env()).await?);

        let notifier = Notifier::new(NotifierConfig::from_env())?;
        let broadcaster = Arc::new(EventBroadcaster::default());
        let fanout = Arc::new(Fanout::new(broadcaster, Some(notifier)));
        let ingestion = Arc::new(WebhookIngestion::new(store.clone(), fanout.clone()));

        let render_client = RenderClient::from_env()?;
        let monitor = Arc::new(RenderMonitor::new(
            MonitorConfig::from_env(),
            Arc::new(render_client),
            ingestion.clone(),
            Arc::new(SystemClock),
        ));

        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let supervisor_config = SupervisorConfig {
            callback_url: config.callback_url(),
            webhook_secret: config.webhook_secret.clone(),
            ..SupervisorConfig::from_env()
        };
        let supervisor = Arc::new(WorkflowSupervisor::new(supervisor_config, exit_tx));

        let scheduler = Arc::new(Scheduler::new(
            scheduler_config,
            store,
            fanout,
            supervisor,
            ingestion,
            monitor,
        ));

        Ok((Self { config, scheduler }, exit_rx))
    }
}
