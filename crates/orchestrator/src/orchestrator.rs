//! Orchestrator - job scheduling and worker coordination

use anyhow::{Context, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use netra_common::{Fingerprinter, ScanJob, ScanOptions, ScanRecord, Target};

use crate::progress::{ProgressSnapshot, ProgressTracker};
use crate::rate_limiter::RateLimiter;

/// Name a fingerprinter is looked up by when `run` is given none.
pub const DEFAULT_FINGERPRINTER: &str = "probes";

/// Queues scan jobs and fans each one out over a fixed pool of workers.
pub struct Orchestrator {
    job_queue: Arc<Mutex<VecDeque<ScanJob>>>,
    rate_limiter: Arc<RateLimiter>,
    progress: Arc<ProgressTracker>,
    fingerprinters: HashMap<String, Arc<dyn Fingerprinter>>,
    concurrency: usize,
    results: Arc<Mutex<Vec<ScanRecord>>>,
}

impl Orchestrator {
    /// `rate_limit` is in scans started per second; 0 disables it.
    pub fn new(concurrency: usize, rate_limit: u32) -> Self {
        Self {
            job_queue: Arc::new(Mutex::new(VecDeque::new())),
            rate_limiter: Arc::new(RateLimiter::new(rate_limit)),
            progress: Arc::new(ProgressTracker::new()),
            fingerprinters: HashMap::new(),
            concurrency: concurrency.max(1),
            results: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn from_options(options: &ScanOptions) -> Self {
        Self::new(options.max_concurrency, options.rate_limit.unwrap_or(0))
    }

    /// Register a fingerprinter under a name (e.g. "probes").
    pub fn add_fingerprinter(&mut self, name: &str, fingerprinter: Arc<dyn Fingerprinter>) {
        self.fingerprinters.insert(name.to_string(), fingerprinter);
    }

    pub async fn submit_job(&self, job: ScanJob) {
        debug!("queued job {} ({} targets)", job.id, job.target_count());
        self.job_queue.lock().await.push_back(job);
    }

    pub async fn pending_jobs(&self) -> usize {
        self.job_queue.lock().await.len()
    }

    /// Run the next queued job to completion and return its records in
    /// target order. No queued job yields an empty list.
    #[instrument(skip(self))]
    pub async fn run(&self, fingerprinter: Option<&str>) -> Result<Vec<ScanRecord>> {
        let Some(job) = self.job_queue.lock().await.pop_front() else {
            return Ok(Vec::new());
        };
        let fingerprinter = self.select(fingerprinter)?;

        info!(
            "starting job {} targets={} probes={}",
            job.id,
            job.target_count(),
            fingerprinter.probe_count()
        );
        self.progress.reset(job.target_count());

        let queue: VecDeque<(usize, Target)> = job.targets.into_iter().enumerate().collect();
        let queue = Arc::new(Mutex::new(queue));
        let collected = Arc::new(Mutex::new(Vec::new()));

        let mut workers = Vec::with_capacity(self.concurrency);
        for _ in 0..self.concurrency {
            let queue = queue.clone();
            let rate_limiter = self.rate_limiter.clone();
            let fingerprinter = fingerprinter.clone();
            let progress = self.progress.clone();
            let collected = collected.clone();

            workers.push(tokio::spawn(async move {
                loop {
                    let next = queue.lock().await.pop_front();
                    let Some((idx, target)) = next else {
                        break;
                    };

                    rate_limiter.acquire().await;
                    let started = Instant::now();
                    let finger = fingerprinter.fingerprint(&target).await;
                    progress.record(finger.is_some());

                    let record = ScanRecord::new(target, finger, started.elapsed());
                    collected.lock().await.push((idx, record));
                }
            }));
        }

        for worker in workers {
            worker.await.context("scan worker failed")?;
        }

        let mut records = std::mem::take(&mut *collected.lock().await);
        records.sort_unstable_by_key(|(idx, _)| *idx);
        let records: Vec<ScanRecord> = records.into_iter().map(|(_, record)| record).collect();

        self.results.lock().await.extend(records.iter().cloned());
        self.progress.log_summary();
        Ok(records)
    }

    /// Every record produced so far, across jobs.
    pub async fn get_results(&self) -> Vec<ScanRecord> {
        self.results.lock().await.clone()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    fn select(&self, name: Option<&str>) -> Result<Arc<dyn Fingerprinter>> {
        let key = name.unwrap_or(DEFAULT_FINGERPRINTER);
        self.fingerprinters
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("fingerprinter '{}' not registered", key))
    }
}
