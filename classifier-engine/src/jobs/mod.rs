//! Job submission and the classification worker pool: the five-step
//! loop that drains the job queue, trains/checks-out a tagger, scores
//! items, and uploads the results.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use classifier_core::{EntityIdType, Job, JobErrorKind, JobId, JobState, ItemScope, Tagging, Timestamp};
use classifier_fetch::UploadMode;
use classifier_storage::{DurableCatalog, FeatureExtractor};
use classifier_tagger::{CheckedOutTagger, TagDocumentFetcher, TagIndexFetcher, TaggerLookup};

use crate::state::EngineState;

/// Dequeue timeout, matching the queue-wait convention used by the item
/// cache's own background threads.
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Creates a job, stores it in the job table, and enqueues it for a
/// worker. Returns the job as initially recorded (state `Waiting`).
pub async fn submit_job<C, F, T, I>(
    state: &EngineState<C, F, T, I>,
    tag_url: String,
    item_scope: ItemScope,
    now: Timestamp,
) -> Job
where
    C: DurableCatalog + 'static,
    F: FeatureExtractor + 'static,
{
    let job = Job::new(JobId::now_v7(), tag_url, item_scope, now);
    state.insert_job(job.clone()).await;
    state.queue.enqueue(job.id).await;
    job
}

/// Marks a job Cancelled if it isn't already in a terminal state.
/// Cancelled jobs are invisible to GET but remain in the table so a
/// worker mid-flight can observe the transition cooperatively.
pub async fn cancel_job<C, F, T, I>(state: &EngineState<C, F, T, I>, id: JobId) -> bool
where
    C: DurableCatalog + 'static,
    F: FeatureExtractor + 'static,
{
    let mut jobs = state.jobs.write().await;
    match jobs.get_mut(&id) {
        Some(job) if matches!(job.state, JobState::Complete | JobState::Error | JobState::Cancelled) => false,
        Some(job) => {
            job.state = JobState::Cancelled;
            true
        }
        None => false,
    }
}

/// Removes a job outright. Callers are expected to only do this for
/// jobs already in `Complete`.
pub async fn remove_job<C, F, T, I>(state: &EngineState<C, F, T, I>, id: JobId) -> bool
where
    C: DurableCatalog + 'static,
    F: FeatureExtractor + 'static,
{
    state.jobs.write().await.remove(&id).is_some()
}

/// Spawns `worker_threads` worker tasks draining the shared job queue.
pub fn spawn_workers<C, F, T, I>(state: &Arc<EngineState<C, F, T, I>>) -> Vec<JoinHandle<()>>
where
    C: DurableCatalog + 'static,
    F: FeatureExtractor + 'static,
    T: TagDocumentFetcher + 'static,
    I: TagIndexFetcher + 'static,
{
    (0..state.config.worker_threads.max(1))
        .map(|id| {
            let state = state.clone();
            tokio::spawn(worker_loop(state, id))
        })
        .collect()
}

async fn worker_loop<C, F, T, I>(state: Arc<EngineState<C, F, T, I>>, worker_id: usize)
where
    C: DurableCatalog + 'static,
    F: FeatureExtractor + 'static,
    T: TagDocumentFetcher + 'static,
    I: TagIndexFetcher + 'static,
{
    let mut shutdown = state.run.shutdown_rx.clone();
    let mut suspended = state.run.suspended_rx.clone();
    loop {
        if *shutdown.borrow() {
            break;
        }
        if *suspended.borrow() {
            tokio::select! {
                changed = suspended.changed() => {
                    if changed.is_err() { break; }
                    continue;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() { break; }
                    continue;
                }
            }
        }

        let job_id = tokio::select! {
            id = state.queue.dequeue_timeout(DEQUEUE_TIMEOUT) => id,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() { break; }
                continue;
            }
        };
        let Some(job_id) = job_id else { continue };

        if let Err(err) = run_job(&state, job_id).await {
            warn!(worker_id, job_id = %job_id, %err, "classification job failed unexpectedly");
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum WorkerError {
    #[error("job {0} vanished from the job table")]
    JobGone(JobId),
}

/// Runs one iteration of the worker loop's five steps for `job_id`.
/// Requeues the job itself (rather than looping in place) when a step
/// says to try again later, so other jobs get a turn on the queue.
async fn run_job<C, F, T, I>(state: &Arc<EngineState<C, F, T, I>>, job_id: JobId) -> Result<(), WorkerError>
where
    C: DurableCatalog + 'static,
    F: FeatureExtractor + 'static,
    T: TagDocumentFetcher + 'static,
    I: TagIndexFetcher + 'static,
{
    let Some(mut job) = state.get_job(job_id).await else {
        return Err(WorkerError::JobGone(job_id));
    };

    if job.state == JobState::Cancelled {
        return Ok(());
    }

    job.state = JobState::Training;
    if job.started_at.is_none() {
        job.started_at = Some(chrono::Utc::now());
    }
    state.insert_job(job.clone()).await;

    let lookup = state.tagger_cache.get_tagger(&job.tag_url).await;
    let checked_out = match lookup {
        TaggerLookup::NotFound => {
            fail_job(state, job, JobErrorKind::NoSuchTag, "no such tag".to_string()).await;
            return Ok(());
        }
        TaggerLookup::Error(err) => {
            fail_job(state, job, JobErrorKind::UnknownError, err.to_string()).await;
            return Ok(());
        }
        TaggerLookup::CheckedOut => {
            requeue_after_delay(state, job, JobErrorKind::CheckedOut).await;
            return Ok(());
        }
        TaggerLookup::Pending => {
            requeue_after_delay(state, job, JobErrorKind::MissingItemTimeout).await;
            return Ok(());
        }
        TaggerLookup::Ready(checked_out) => checked_out,
    };

    job.trained_at = Some(chrono::Utc::now());
    job.state = JobState::Classifying;
    state.insert_job(job.clone()).await;

    if refresh(state, job.id).await.map(|j| j.state) == Some(JobState::Cancelled) {
        state.tagger_cache.release_tagger(checked_out).await;
        return Ok(());
    }

    let taggings = classify_batch(state, &checked_out, job.item_scope).await;
    job.items_classified = taggings.len() as u64;
    job.classified_at = Some(chrono::Utc::now());
    job.progress = 50.0;
    job.state = JobState::Inserting;
    state.insert_job(job.clone()).await;

    let upload_result = upload_taggings(state, &checked_out, &taggings).await;
    state.tagger_cache.release_tagger(checked_out).await;

    match upload_result {
        Ok(()) => {
            job.state = JobState::Complete;
            job.progress = 100.0;
            job.completed_at = Some(chrono::Utc::now());
        }
        Err(reason) => {
            job.state = JobState::Error;
            job.error_kind = Some(JobErrorKind::UnknownError);
            job.error_message = Some(reason);
        }
    }
    state.insert_job(job).await;
    Ok(())
}

async fn refresh<C, F, T, I>(state: &EngineState<C, F, T, I>, id: JobId) -> Option<Job>
where
    C: DurableCatalog + 'static,
    F: FeatureExtractor + 'static,
{
    state.get_job(id).await
}

async fn classify_batch<C, F, T, I>(
    state: &EngineState<C, F, T, I>,
    checked_out: &CheckedOutTagger,
    scope: ItemScope,
) -> Vec<Tagging>
where
    C: DurableCatalog + 'static,
    F: FeatureExtractor + 'static,
{
    let items = match scope {
        ItemScope::All => state.item_cache.iter_from(None).await,
        ItemScope::New => {
            state
                .item_cache
                .items_since(checked_out.tagger.identity.last_classified)
                .await
        }
    };

    let mut taggings = Vec::with_capacity(items.len());
    for item in items {
        let strength = checked_out.tagger.classify(&item);
        if strength < state.config.positive_threshold {
            continue;
        }
        taggings.push(Tagging {
            item_id: item.id().to_string(),
            strength,
        });
    }
    taggings
}

async fn upload_taggings<C, F, T, I>(
    state: &EngineState<C, F, T, I>,
    checked_out: &CheckedOutTagger,
    taggings: &[Tagging],
) -> Result<(), String>
where
    C: DurableCatalog + 'static,
    F: FeatureExtractor + 'static,
{
    let body = checked_out.tagger.build_taggings_feed(
        &taggings.iter().map(|t| (t.item_id.clone(), t.strength)).collect::<Vec<_>>(),
    );
    let mode = if state.first_upload_this_session(&checked_out.tag_url).await {
        UploadMode::Replace
    } else {
        UploadMode::Append
    };
    state
        .uploader
        .upload(&checked_out.tagger.identity.result_upload_url, body, mode)
        .await
        .map_err(|err| err.to_string())
}

async fn fail_job<C, F, T, I>(
    state: &EngineState<C, F, T, I>,
    mut job: Job,
    kind: JobErrorKind,
    message: String,
) where
    C: DurableCatalog + 'static,
    F: FeatureExtractor + 'static,
{
    job.state = JobState::Error;
    job.error_kind = Some(kind);
    job.error_message = Some(message);
    job.completed_at = Some(chrono::Utc::now());
    state.insert_job(job).await;
}

/// Requeues `job` after `requeue_delay`, unless this is past the
/// missing-item timeout measured from `first_time_tried`, in which case
/// it becomes an Error job instead. `kind` labels the error produced if
/// the timeout is exceeded (`CheckedOut` or `MissingItemTimeout`).
async fn requeue_after_delay<C, F, T, I>(
    state: &Arc<EngineState<C, F, T, I>>,
    mut job: Job,
    kind: JobErrorKind,
) where
    C: DurableCatalog + 'static,
    F: FeatureExtractor + 'static,
    T: TagDocumentFetcher + 'static,
    I: TagIndexFetcher + 'static,
{
    let now = chrono::Utc::now();
    let first_tried = *job.first_time_tried.get_or_insert(now);

    if now.signed_duration_since(first_tried).to_std().unwrap_or_default() > state.config.missing_item_timeout {
        job.state = JobState::Error;
        job.error_kind = Some(kind);
        job.error_message = Some("timed out waiting for the tagger to become available".to_string());
        job.completed_at = Some(now);
        state.insert_job(job).await;
        return;
    }

    state.insert_job(job.clone()).await;
    let state = state.clone();
    let delay = state.config.requeue_delay;
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        state.queue.enqueue(job.id).await;
    });
}

/// Called when the item cache's update callback reports `added` new
/// items: enumerates the tag index and enqueues a "classify new items"
/// job per tag, per the update-callback contract.
pub async fn enqueue_new_item_jobs<C, F, T, I>(state: &Arc<EngineState<C, F, T, I>>, added: usize)
where
    C: DurableCatalog + 'static,
    F: FeatureExtractor + 'static,
    T: TagDocumentFetcher + 'static,
    I: TagIndexFetcher + 'static,
{
    if added == 0 {
        return;
    }
    let tags = match state.tagger_cache.fetch_tags().await {
        Ok(tags) => tags,
        Err(err) => {
            warn!(%err, "failed to enumerate tag index for update callback");
            return;
        }
    };
    info!(added, tag_count = tags.len(), "enqueuing new-item classification jobs");
    for tag_url in tags {
        submit_job(state, tag_url, ItemScope::New, chrono::Utc::now()).await;
    }
}
