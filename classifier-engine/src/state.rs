//! Shared state handed to every HTTP handler and worker task: the item
//! and tagger caches, the job table, the classification queue, and the
//! signed result uploader. Mirrors the `Arc<AppState>`-behind-`State`-
//! extractor shape the control surface uses for its handlers, generalized
//! to the tagger cache's client type parameters so tests can swap in
//! fakes the way `classifier_tagger::TaggerCache`'s own tests do.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reqwest::Client;
use tokio::sync::{watch, Mutex, RwLock};

use classifier_core::{Job, JobId, JobState};
use classifier_fetch::signing::Credentials;
use classifier_fetch::uploader::ResultUploader;
use classifier_fetch::{TagDocumentClient, TagIndexClient};
use classifier_storage::{DurableCatalog, FeatureExtractor, ItemCache, TimedQueue};
use classifier_tagger::TaggerCache;

use crate::config::{EngineConfig, EngineCredentials};

/// Handle to the worker pool's running/suspended/shutdown flags,
/// separate from the rest of [`EngineState`] so a `stop`/`kill` handler
/// can flip them without touching the job table or caches.
pub struct RunControl {
    pub running: AtomicBool,
    suspended_tx: watch::Sender<bool>,
    pub suspended_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
    pub shutdown_rx: watch::Receiver<bool>,
}

impl RunControl {
    pub fn new() -> Self {
        let (suspended_tx, suspended_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            running: AtomicBool::new(true),
            suspended_tx,
            suspended_rx,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn suspend(&self) {
        let _ = self.suspended_tx.send(true);
    }

    pub fn resume(&self) {
        let _ = self.suspended_tx.send(false);
    }

    /// Allows in-flight jobs to drain; workers observe the shutdown
    /// signal between queue waits and exit without cancelling anything.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(true);
    }

    /// Flips the same flags `stop` does. `RunControl` has no job table
    /// to cancel, so it cannot by itself do a forced stop — see
    /// [`EngineState::kill`] for the version that also cancels
    /// in-flight jobs.
    pub fn kill(&self) {
        self.stop();
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

pub struct EngineState<C, F, T = TagDocumentClient, I = TagIndexClient> {
    pub item_cache: Arc<ItemCache<C, F>>,
    pub tagger_cache: Arc<TaggerCache<C, F, T, I>>,
    pub jobs: RwLock<HashMap<JobId, Job>>,
    pub queue: TimedQueue<JobId>,
    pub config: EngineConfig,
    pub uploader: ResultUploader,
    pub run: RunControl,
    /// Tag urls that have already received an upload this process
    /// lifetime; first upload per tag is a PUT (replace), later ones a
    /// POST (append).
    uploaded_once: Mutex<HashSet<String>>,
    pub allowed_ip: Option<IpAddr>,
}

impl<C, F, T, I> EngineState<C, F, T, I>
where
    C: DurableCatalog + 'static,
    F: FeatureExtractor + 'static,
{
    pub fn new(
        item_cache: Arc<ItemCache<C, F>>,
        tagger_cache: Arc<TaggerCache<C, F, T, I>>,
        config: EngineConfig,
        credentials: EngineCredentials,
    ) -> Self {
        let uploader = ResultUploader::new(
            Client::new(),
            Credentials {
                access_id: credentials.access_id,
                secret_key: credentials.secret_key,
            },
        );
        let allowed_ip = config.allowed_ip;
        Self {
            item_cache,
            tagger_cache,
            jobs: RwLock::new(HashMap::new()),
            queue: TimedQueue::new(),
            config,
            uploader,
            run: RunControl::new(),
            uploaded_once: Mutex::new(HashSet::new()),
            allowed_ip,
        }
    }

    /// Whether this is the first time `tag_url` is uploaded to this
    /// process run. Records the tag as seen on first call.
    pub async fn first_upload_this_session(&self, tag_url: &str) -> bool {
        let mut seen = self.uploaded_once.lock().await;
        seen.insert(tag_url.to_string())
    }

    pub async fn get_job(&self, id: JobId) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    pub async fn insert_job(&self, job: Job) {
        self.jobs.write().await.insert(job.id, job);
    }

    /// Forced stop: signals shutdown the same way `stop` does, then
    /// marks every non-terminal job `Cancelled` immediately rather than
    /// letting it finish its current step. Workers observe the
    /// cancellation at their next cooperative check point in `run_job`.
    pub async fn kill(&self) {
        self.run.kill();
        let mut jobs = self.jobs.write().await;
        for job in jobs.values_mut() {
            if !matches!(
                job.state,
                JobState::Complete | JobState::Cancelled | JobState::Error
            ) {
                job.state = JobState::Cancelled;
            }
        }
    }
}
