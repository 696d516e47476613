//! Application entry point: noise-mapper.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Resolve the user id and check that automatic registration is enabled.
//! 4. Create the [`tokio`] runtime.
//! 5. Build the collaborators (gpsd, cpal, Nominatim, store, log status).
//! 6. Start the pipeline and run until Ctrl-C.
//! 7. Stop the pipeline, which waits for the microphone to be released.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use noise_mapper::{
    audio::{CpalLevelSource, SignalLevelSampler},
    config::{AppConfig, AppPaths, StoreBackend},
    pipeline::{AutoCapturePipeline, Collaborators, PipelineOptions, StartRequest},
    place::{NominatimGeocoder, PlaceResolver},
    position::GpsdPositionSource,
    status::LogStatusSink,
    store::{CaptureStore, JournalStore, MemoryStore, RestStore},
};

fn build_store(config: &AppConfig) -> Arc<dyn CaptureStore> {
    match config.store.backend {
        StoreBackend::Rest => {
            log::info!("Saving records to {}", config.store.base_url);
            Arc::new(RestStore::from_config(&config.store))
        }
        StoreBackend::Journal => {
            let paths = AppPaths::new();
            log::info!("Saving records to {}", paths.journal_file.display());
            Arc::new(JournalStore::new(paths.journal_file, paths.user_settings_file))
        }
        StoreBackend::Memory => {
            log::warn!("Memory store selected: records are discarded on exit");
            Arc::new(MemoryStore::new())
        }
    }
}

fn build_collaborators(config: &AppConfig) -> Collaborators {
    let geocoder = NominatimGeocoder::from_config(&config.geocoder);
    Collaborators {
        positions: Arc::new(GpsdPositionSource::from_config(&config.position)),
        sampler: SignalLevelSampler::new(Arc::new(CpalLevelSource::from_config(&config.sampler))),
        resolver: PlaceResolver::new(
            Arc::new(geocoder),
            Duration::from_secs(config.geocoder.timeout_secs),
        ),
        store: build_store(config),
        status: Arc::new(LogStatusSink),
    }
}

async fn run(config: AppConfig, user_id: String) -> Result<()> {
    let mut pipeline = AutoCapturePipeline::new(
        build_collaborators(&config),
        PipelineOptions::from_config(&config),
    );

    pipeline
        .start(StartRequest::new(user_id))
        .await
        .context("failed to start automatic capture")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    log::info!("Ctrl-C received, shutting down");

    pipeline.stop().await;
    Ok(())
}

fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("noise-mapper starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 3. Identity and master switch
    let Some(user_id) = config.resolve_user_id() else {
        bail!("no user id: set NOISE_MAPPER_USER or account.user_id in settings.toml");
    };
    if !config.auto_register_enabled {
        bail!("automatic registration is disabled (auto_register_enabled = false)");
    }

    // 4. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    rt.block_on(run(config, user_id))
}
