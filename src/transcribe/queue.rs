//! Bounded-concurrency transcription queue.
//!
//! Jobs drain from a shared FIFO across a fixed set of workers. Retryable
//! failures back off exponentially; a failure carrying a retry-after hint
//! publishes a shared deadline that stalls every worker, so one throttled
//! response slows the whole queue instead of each worker discovering it
//! separately. A job that exhausts its retries resolves to an empty
//! transcript rather than failing the session.

use crate::config::TranscriptionConfig;
use crate::error::ScribeError;
use crate::session::types::now_ms;
use crate::transcribe::service::Transcriber;
use futures_util::future::join_all;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One segment awaiting transcription. Transient, never persisted.
#[derive(Debug, Clone)]
pub struct TranscriptionJob {
    pub job_id: String,
    pub segment_id: String,
    pub session_id: String,
    pub audio_path: PathBuf,
    /// Overrides the queue-level prompt when set.
    pub prompt: Option<String>,
    pub status: JobStatus,
    pub attempts: u32,
    pub created_at: i64,
}

impl TranscriptionJob {
    pub fn new(session_id: &str, segment_id: &str, audio_path: PathBuf) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            segment_id: segment_id.to_string(),
            session_id: session_id.to_string(),
            audio_path,
            prompt: None,
            status: JobStatus::Pending,
            attempts: 0,
            created_at: now_ms(),
        }
    }
}

/// Outcome for one job. `text` is empty when the job failed permanently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionResult {
    pub segment_id: String,
    pub text: String,
}

/// Snapshot of queue load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending: usize,
    pub processing: usize,
}

pub struct TranscriptionQueue {
    transcriber: Arc<dyn Transcriber>,
    concurrency: usize,
    max_retries: u32,
    retry_delay_ms: u64,
    pending: Mutex<VecDeque<TranscriptionJob>>,
    processing: AtomicUsize,
    rate_limited_until: Mutex<Option<Instant>>,
}

impl TranscriptionQueue {
    pub fn new(transcriber: Arc<dyn Transcriber>, config: &TranscriptionConfig) -> Self {
        Self {
            transcriber,
            concurrency: config.concurrency.max(1),
            max_retries: config.max_retries.max(1),
            retry_delay_ms: config.retry_delay_ms,
            pending: Mutex::new(VecDeque::new()),
            processing: AtomicUsize::new(0),
            rate_limited_until: Mutex::new(None),
        }
    }

    /// Appends a job to the shared FIFO.
    pub fn enqueue(&self, job: TranscriptionJob) {
        lock(&self.pending).push_back(job);
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            pending: lock(&self.pending).len(),
            processing: self.processing.load(Ordering::SeqCst),
        }
    }

    /// Runs every pending job to completion and returns one result per job.
    ///
    /// `prompt` applies to jobs without their own. Result order follows
    /// completion, not enqueue order; callers match on `segment_id`.
    pub async fn process_queue(&self, prompt: &str) -> Vec<TranscriptionResult> {
        let results = Mutex::new(Vec::new());
        let workers = (0..self.concurrency).map(|_| self.worker(prompt, &results));
        join_all(workers).await;

        let mut guard = lock(&results);
        std::mem::take(&mut *guard)
    }

    async fn worker(&self, prompt: &str, results: &Mutex<Vec<TranscriptionResult>>) {
        loop {
            let job = lock(&self.pending).pop_front();
            let Some(mut job) = job else { break };

            job.status = JobStatus::Processing;
            self.processing.fetch_add(1, Ordering::SeqCst);
            let outcome = self.run_job(&mut job, prompt).await;
            self.processing.fetch_sub(1, Ordering::SeqCst);

            // A permanently failed job still yields a result: an empty
            // transcript leaves a gap in the timeline instead of failing
            // the whole session.
            let text = match outcome {
                Ok(text) => {
                    job.status = JobStatus::Completed;
                    text
                }
                Err(_) => {
                    job.status = JobStatus::Failed;
                    String::new()
                }
            };

            lock(results).push(TranscriptionResult {
                segment_id: job.segment_id,
                text,
            });
        }
    }

    async fn run_job(
        &self,
        job: &mut TranscriptionJob,
        default_prompt: &str,
    ) -> crate::error::Result<String> {
        let prompt = job.prompt.clone();
        let prompt = prompt.as_deref().unwrap_or(default_prompt);

        for attempt in 0..self.max_retries {
            job.attempts = attempt + 1;
            self.wait_for_rate_limit().await;

            let error = match self
                .transcriber
                .transcribe(&job.audio_path, prompt)
                .await
            {
                Ok(text) => return Ok(text),
                Err(e) => e,
            };

            if let Some(hint) = error.retry_after_ms() {
                self.note_rate_limit(hint);
            }

            let last_attempt = attempt + 1 == self.max_retries;
            if !error.is_retryable() || last_attempt {
                error!(
                    job_id = %job.job_id,
                    segment_id = %job.segment_id,
                    attempts = job.attempts,
                    "transcription failed permanently: {error}"
                );
                return Err(error);
            }

            let delay_ms = error
                .retry_after_ms()
                .unwrap_or_else(|| self.retry_delay_ms.saturating_mul(1 << attempt));
            warn!(
                job_id = %job.job_id,
                segment_id = %job.segment_id,
                attempt = job.attempts,
                delay_ms,
                "transcription attempt failed, retrying: {error}"
            );
            sleep_until(Instant::now() + Duration::from_millis(delay_ms)).await;
        }
        Err(ScribeError::transcription("retries exhausted"))
    }

    /// Blocks until any published rate-limit deadline has passed.
    async fn wait_for_rate_limit(&self) {
        loop {
            let target = *lock(&self.rate_limited_until);
            match target {
                Some(until) if until > Instant::now() => sleep_until(until).await,
                _ => break,
            }
        }
    }

    /// Publishes a rate-limit deadline, only ever extending the current one.
    fn note_rate_limit(&self, hint_ms: u64) {
        let until = Instant::now() + Duration::from_millis(hint_ms);
        let mut guard = lock(&self.rate_limited_until);
        *guard = Some(match *guard {
            Some(existing) => existing.max(until),
            None => until,
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe::service::MockTranscriber;

    fn config(concurrency: usize, max_retries: u32) -> TranscriptionConfig {
        TranscriptionConfig {
            concurrency,
            max_retries,
            retry_delay_ms: 1000,
            ..TranscriptionConfig::default()
        }
    }

    fn job(segment_id: &str) -> TranscriptionJob {
        TranscriptionJob::new("session", segment_id, PathBuf::from("unused.wav"))
    }

    fn retryable(status: u16) -> ScribeError {
        ScribeError::Transcription {
            message: format!("service returned {status}"),
            status: Some(status),
            retry_after_ms: None,
            rate_limit: false,
        }
    }

    fn rate_limited(hint_ms: u64) -> ScribeError {
        ScribeError::Transcription {
            message: "service returned 429".to_string(),
            status: Some(429),
            retry_after_ms: Some(hint_ms),
            rate_limit: true,
        }
    }

    #[tokio::test]
    async fn jobs_drain_in_fifo_order() {
        let mock = Arc::new(
            MockTranscriber::new()
                .with_response("one")
                .with_response("two")
                .with_response("three"),
        );
        let queue = TranscriptionQueue::new(mock.clone(), &config(1, 3));

        for id in ["a", "b", "c"] {
            queue.enqueue(job(id));
        }
        assert_eq!(queue.status(), QueueStatus { pending: 3, processing: 0 });

        let results = queue.process_queue("prompt").await;

        assert_eq!(
            results,
            vec![
                TranscriptionResult {
                    segment_id: "a".to_string(),
                    text: "one".to_string()
                },
                TranscriptionResult {
                    segment_id: "b".to_string(),
                    text: "two".to_string()
                },
                TranscriptionResult {
                    segment_id: "c".to_string(),
                    text: "three".to_string()
                },
            ]
        );
        assert_eq!(mock.call_count(), 3);
        assert_eq!(queue.status(), QueueStatus { pending: 0, processing: 0 });
    }

    #[tokio::test]
    async fn new_jobs_start_pending_with_unique_ids() {
        let a = job("a");
        let b = job("a");
        assert_ne!(a.job_id, b.job_id);
        assert_eq!(a.status, JobStatus::Pending);
        assert_eq!(a.attempts, 0);
        assert!(a.prompt.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failure_is_retried_with_backoff() {
        let mock = Arc::new(
            MockTranscriber::new()
                .with_failure(retryable(500))
                .with_response("recovered"),
        );
        let queue = TranscriptionQueue::new(mock.clone(), &config(1, 3));

        queue.enqueue(job("a"));
        let start = Instant::now();
        let results = queue.process_queue("").await;

        assert_eq!(results[0].text, "recovered");
        assert_eq!(mock.call_count(), 2);
        // First backoff step is retry_delay_ms.
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn permanent_failure_resolves_to_empty_text_without_retry() {
        let mock = Arc::new(MockTranscriber::new().with_failure(ScribeError::Transcription {
            message: "service returned 400".to_string(),
            status: Some(400),
            retry_after_ms: None,
            rate_limit: false,
        }));
        let queue = TranscriptionQueue::new(mock.clone(), &config(1, 3));

        queue.enqueue(job("a"));
        let results = queue.process_queue("").await;

        assert_eq!(results[0].text, "");
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_resolve_to_empty_text() {
        let mock = Arc::new(
            MockTranscriber::new()
                .with_failure(retryable(503))
                .with_failure(retryable(503))
                .with_failure(retryable(503)),
        );
        let queue = TranscriptionQueue::new(mock.clone(), &config(1, 3));

        queue.enqueue(job("a"));
        let results = queue.process_queue("").await;

        assert_eq!(results[0].text, "");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_sets_the_next_delay() {
        let mock = Arc::new(
            MockTranscriber::new()
                .with_failure(rate_limited(5000))
                .with_response("after the limit"),
        );
        let queue = TranscriptionQueue::new(mock.clone(), &config(1, 3));

        queue.enqueue(job("a"));
        let start = Instant::now();
        let results = queue.process_queue("").await;

        assert_eq!(results[0].text, "after the limit");
        assert!(start.elapsed() >= Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_deadline_stalls_every_worker() {
        // Worker one hits the limit; worker two's job must also wait it out.
        let mock = Arc::new(
            MockTranscriber::new()
                .with_failure(rate_limited(10_000))
                .with_response("first")
                .with_response("second"),
        );
        let queue = TranscriptionQueue::new(mock.clone(), &config(2, 3));

        queue.enqueue(job("a"));
        queue.enqueue(job("b"));
        let start = Instant::now();
        let results = queue.process_queue("").await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.text.is_empty()));
        assert!(start.elapsed() >= Duration::from_millis(10_000));
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn empty_queue_is_a_no_op() {
        let mock = Arc::new(MockTranscriber::new());
        let queue = TranscriptionQueue::new(mock.clone(), &config(4, 3));

        let results = queue.process_queue("").await;
        assert!(results.is_empty());
        assert_eq!(mock.call_count(), 0);
    }
}
