//! Classification Engine entry point: bootstraps the durable catalog,
//! loads the item cache, spins up the background threads and worker
//! pool, and serves the HTTP control surface. Exits non-zero on any
//! fatal startup error (unreadable config, uninitializable item cache,
//! HTTP bind failure).

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use classifier_core::TokenDictionary;
use classifier_engine::{CatalogDbConfig, EngineConfig, EngineCredentials, EngineState, PostgresCatalog};
use classifier_fetch::feature_extractor::HttpFeatureExtractor;
use classifier_fetch::tags::{TagDocumentClient, TagIndexClient};
use classifier_fetch::tokenizer::TokenizerClient;
use classifier_storage::{ItemCache, ItemCacheConfig};
use classifier_tagger::TaggerCache;

#[tokio::main]
async fn main() -> ExitCode {
    classifier_engine::telemetry::init_logging();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "fatal startup error");
            ExitCode::from(1)
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let engine_config = EngineConfig::from_env();
    let credentials = EngineCredentials::from_env();

    let db_config = CatalogDbConfig::from_env();
    let pool = db_config.create_pool()?;
    let catalog = Arc::new(PostgresCatalog::new(pool.clone()));
    catalog.ensure_schema().await?;

    let dictionary_store = classifier_engine::PostgresDictionaryStore::new(pool);
    dictionary_store.ensure_schema().await?;
    let dictionary = TokenDictionary::new(dictionary_store);

    let http = reqwest::Client::new();
    let tokenizer = TokenizerClient::new(http.clone(), engine_config.tokenizer_url.clone());
    let extractor = Arc::new(HttpFeatureExtractor::new(tokenizer, dictionary));

    let item_cache = Arc::new(ItemCache::new(
        catalog.clone(),
        extractor,
        ItemCacheConfig::from_env(),
    ));
    item_cache.load().await?;

    let tag_client = TagDocumentClient::new(http.clone());
    let index_client = TagIndexClient::new(http.clone(), engine_config.tag_index_url.clone());
    let tagger_cache = Arc::new(TaggerCache::new(item_cache.clone(), tag_client, index_client));

    let state = Arc::new(EngineState::new(
        item_cache.clone(),
        tagger_cache,
        engine_config.clone(),
        credentials,
    ));

    // The item cache's background threads watch the same shutdown
    // signal `RunControl` uses for the worker pool, so one `stop()`
    // call after the server future resolves tears down everything.
    let shutdown_rx = state.run.shutdown_rx.clone();
    let feature_extraction = item_cache.spawn_feature_extraction_thread(shutdown_rx.clone());
    let purger = item_cache.spawn_purge_thread(shutdown_rx.clone());

    let (update_tx, mut update_rx) = tokio::sync::mpsc::channel::<usize>(16);
    item_cache.set_update_callback(update_tx).await;
    let cache_updater = item_cache.spawn_cache_updater_thread(shutdown_rx.clone());

    let update_callback_state = state.clone();
    tokio::spawn(async move {
        while let Some(added) = update_rx.recv().await {
            classifier_engine::jobs::enqueue_new_item_jobs(&update_callback_state, added).await;
        }
    });

    let workers = classifier_engine::jobs::spawn_workers(&state);

    let app = classifier_engine::routes::router(state.clone());
    let addr: SocketAddr = ([0, 0, 0, 0], engine_config.http_port).into();
    tracing::info!(%addr, "starting classification engine");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    tokio::select! {
        result = server => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    state.run.stop();
    for worker in workers {
        let _ = worker.await;
    }
    let _ = feature_extraction.await;
    let _ = purger.await;
    let _ = cache_updater.await;

    Ok(())
}
