use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use signage::clock::SystemClock;
use signage::config::{
    CacheConfig, ConfigurationCache, ConfigurationProvider, FileConfigurationProvider,
    FileSnapshotStore, HttpConfigurationProvider,
};
use signage::logging::init_logging;
use signage::playback::HeadlessPresenter;
use signage::scheduler::{RecurrenceEvaluator, SchedulerConfig, SignageScheduler};
use signage::settings::{ConfigSource, Settings};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env().context("invalid settings")?;
    let (logging, _guard) = init_logging(&settings.log_dir, settings.log_filter.as_deref())
        .context("failed to initialize logging")?;

    let shutdown = CancellationToken::new();
    logging.start_retention_cleanup(shutdown.child_token());

    let provider: Arc<dyn ConfigurationProvider> = match &settings.source {
        ConfigSource::Url(url) => Arc::new(HttpConfigurationProvider::new(
            url,
            settings.fetch_timeout,
        )?),
        ConfigSource::File(path) => Arc::new(FileConfigurationProvider::new(path.clone())),
    };
    info!(
        source = %provider.describe(),
        configuration_id = %settings.configuration_id,
        timezone = %settings.timezone,
        "starting signage player"
    );

    let snapshots = Arc::new(FileSnapshotStore::new(settings.snapshot_dir.clone()));
    let cache = ConfigurationCache::new(
        provider,
        Some(snapshots),
        CacheConfig {
            configuration_id: settings.configuration_id.clone(),
            refresh_interval: settings.refresh_interval,
            fetch_timeout: settings.fetch_timeout,
            warm_start: true,
        },
    )
    .await;

    let scheduler = Arc::new(
        SignageScheduler::new(
            cache.clone(),
            Arc::new(HeadlessPresenter::new()),
            Arc::new(SystemClock),
            SchedulerConfig {
                evaluation_interval: settings.evaluation_interval,
            },
        )
        .with_evaluator(RecurrenceEvaluator::new().timezone(settings.timezone)),
    );
    scheduler.on_layout_change(|layout| {
        info!(
            schedule_id = %layout.schedule_id,
            regions = layout.regions.len(),
            "now showing {}",
            layout.name
        );
    });

    cache.start();
    scheduler.start();

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutting down");

    scheduler.stop().await;
    cache.stop().await;
    shutdown.cancel();
    Ok(())
}
