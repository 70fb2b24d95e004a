//! Application state wiring the population service to its adapters.
//!
//! `PopulationService` is generic over store, authority, and rewriter;
//! AppState pins it to the concrete infra implementations.

use std::path::PathBuf;
use std::time::Duration;

use buildpool_core::service::pool::PopulationService;
use buildpool_infra::authority::HttpPoolAuthority;
use buildpool_infra::config::load_pool_config;
use buildpool_infra::credential::resolve_token;
use buildpool_infra::filesystem::population::FsPopulationStore;
use buildpool_infra::filesystem::resolve_data_dir;
use buildpool_infra::rewriter::CommandRewriter;
use buildpool_types::config::PoolConfig;

pub type ConcretePopulationService =
    PopulationService<FsPopulationStore, HttpPoolAuthority, CommandRewriter>;

pub struct AppState {
    pub service: ConcretePopulationService,
    pub config: PoolConfig,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Resolve the data directory, load config and credentials, and open the
    /// local replica.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_pool_config(&data_dir).await;
        let token = resolve_token(&data_dir).await;
        if token.is_none() {
            tracing::debug!("No authority token configured; requests are unauthenticated");
        }

        let authority = HttpPoolAuthority::new(
            config.authority_url.clone(),
            token,
            Duration::from_secs(config.sync.request_timeout_secs),
        )?;
        let rewriter = CommandRewriter::new(&config.rewriter);
        let store = FsPopulationStore::new(data_dir.clone());

        let service = PopulationService::open(store, authority, rewriter, &config).await?;

        Ok(Self {
            service,
            config,
            data_dir,
        })
    }
}
