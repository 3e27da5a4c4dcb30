use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::error;

/// Bounds how many units run at once and remembers the highest concurrency seen.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    bound: usize,
}

/// Held while a unit runs; frees the slot on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AdmissionGate {
    pub fn new(bound: usize) -> Self {
        let bound = bound.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(bound)),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            bound,
        }
    }

    pub async fn acquire(&self) -> Result<AdmissionPermit, AcquireError> {
        let permit = self.semaphore.clone().acquire_owned().await?;
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        Ok(AdmissionPermit {
            _permit: permit,
            active: self.active.clone(),
        })
    }

    pub fn bound(&self) -> usize {
        self.bound
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Runs `work` for every item with at most `gate.bound()` in flight and waits
/// for all of them. Output is in completion order; a panicked unit is logged
/// and contributes nothing.
pub async fn run_bounded<I, T, F, Fut>(gate: &AdmissionGate, items: I, work: F) -> Vec<T>
where
    I: IntoIterator,
    F: Fn(I::Item) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut set = JoinSet::new();
    for item in items {
        let gate = gate.clone();
        let unit = work(item);
        set.spawn(async move {
            let _permit = gate.acquire().await?;
            Ok::<T, AcquireError>(unit.await)
        });
    }

    let mut outputs = Vec::with_capacity(set.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(output)) => outputs.push(output),
            Ok(Err(e)) => error!(error = %e, "Unit was never admitted"),
            Err(e) => error!(error = %e, "Unit panicked or was cancelled"),
        }
    }
    outputs
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Succeeded,
    CacheHits,
    Crawled,
    NotFound,
    Malformed,
    Untrusted,
    SkippedKnown,
    BlockedAttempts,
    Exhausted,
    Aborted,
}

/// Outcome tallies for a single crawl run. Create a fresh one per run.
#[derive(Debug, Default)]
pub struct CrawlStats {
    succeeded: AtomicU64,
    cache_hits: AtomicU64,
    crawled: AtomicU64,
    not_found: AtomicU64,
    malformed: AtomicU64,
    untrusted: AtomicU64,
    skipped_known: AtomicU64,
    blocked_attempts: AtomicU64,
    exhausted: AtomicU64,
    aborted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    pub succeeded: u64,
    pub cache_hits: u64,
    pub crawled: u64,
    pub not_found: u64,
    pub malformed: u64,
    pub untrusted: u64,
    pub skipped_known: u64,
    pub blocked_attempts: u64,
    pub exhausted: u64,
    pub aborted: u64,
}

impl CrawlStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::Succeeded => &self.succeeded,
            Counter::CacheHits => &self.cache_hits,
            Counter::Crawled => &self.crawled,
            Counter::NotFound => &self.not_found,
            Counter::Malformed => &self.malformed,
            Counter::Untrusted => &self.untrusted,
            Counter::SkippedKnown => &self.skipped_known,
            Counter::BlockedAttempts => &self.blocked_attempts,
            Counter::Exhausted => &self.exhausted,
            Counter::Aborted => &self.aborted,
        }
    }

    pub fn incr(&self, counter: Counter) {
        self.counter(counter).fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counter(counter).load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CrawlSummary {
        CrawlSummary {
            succeeded: self.get(Counter::Succeeded),
            cache_hits: self.get(Counter::CacheHits),
            crawled: self.get(Counter::Crawled),
            not_found: self.get(Counter::NotFound),
            malformed: self.get(Counter::Malformed),
            untrusted: self.get(Counter::Untrusted),
            skipped_known: self.get(Counter::SkippedKnown),
            blocked_attempts: self.get(Counter::BlockedAttempts),
            exhausted: self.get(Counter::Exhausted),
            aborted: self.get(Counter::Aborted),
        }
    }
}
