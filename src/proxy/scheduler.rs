//! Bounded-parallelism scan over all candidates

use crate::error::ScanError;
use crate::proxy::checker::ProxyChecker;
use crate::proxy::models::{ProxyCandidate, ValidatedProxy, ValidationOutcome};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, error};

/// Default number of candidates validated at once
pub const DEFAULT_CONCURRENCY: usize = 200;

/// Counters shared between the scheduler and whoever watches progress.
///
/// `total` is fixed at construction; only the scheduler increments the
/// others.
#[derive(Debug, Default)]
pub struct ScanStats {
    total: usize,
    checked: AtomicUsize,
    live: AtomicUsize,
}

/// Point-in-time copy of [`ScanStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub total: usize,
    pub checked: usize,
    pub live: usize,
}

impl StatsSnapshot {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.checked as f64 / self.total as f64 * 100.0
        }
    }

    pub fn is_complete(&self) -> bool {
        self.checked >= self.total
    }
}

impl ScanStats {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        // `live` is bumped after `checked`, so reading it first keeps live <= checked
        let live = self.live.load(Ordering::SeqCst);
        let checked = self.checked.load(Ordering::SeqCst);
        StatsSnapshot {
            total: self.total,
            checked,
            live,
        }
    }

    fn record(&self, valid: bool) {
        self.checked.fetch_add(1, Ordering::SeqCst);
        if valid {
            self.live.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Runs the checker for every candidate, at most `concurrency` at a time
pub struct ScanScheduler {
    checker: Arc<ProxyChecker>,
    concurrency: usize,
    stats: Arc<ScanStats>,
    live_feed: Option<mpsc::UnboundedSender<ValidatedProxy>>,
}

impl ScanScheduler {
    pub fn new(checker: Arc<ProxyChecker>, concurrency: usize, stats: Arc<ScanStats>) -> Self {
        Self {
            checker,
            concurrency: concurrency.max(1),
            stats,
            live_feed: None,
        }
    }

    /// Send every live proxy to `feed` as soon as it is found
    pub fn with_live_feed(mut self, feed: mpsc::UnboundedSender<ValidatedProxy>) -> Self {
        self.live_feed = Some(feed);
        self
    }

    /// Validate all candidates and return one outcome per candidate.
    ///
    /// Blocks until every task has finished; outcomes come back in
    /// completion order. A task that panics counts as an invalid outcome
    /// for its candidate.
    pub async fn run(
        &self,
        candidates: Vec<ProxyCandidate>,
        reference_ip: Option<IpAddr>,
    ) -> Result<Vec<ValidationOutcome>, ScanError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut in_flight: HashMap<task::Id, ProxyCandidate> = HashMap::new();
        let mut outcomes = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let permit = Arc::clone(&semaphore).acquire_owned().await?;
            let checker = Arc::clone(&self.checker);
            let stats = Arc::clone(&self.stats);
            let live_feed = self.live_feed.clone();
            let owned = candidate.clone();

            let handle = tasks.spawn(async move {
                let outcome = checker.validate(&owned, reference_ip).await;
                drop(permit);

                stats.record(outcome.is_valid());
                if let Some(proxy) = &outcome.proxy {
                    debug!("LIVE: {}", proxy);
                    if let Some(feed) = live_feed {
                        let _ = feed.send(proxy.clone());
                    }
                }
                outcome
            });
            in_flight.insert(handle.id(), candidate);

            // Reap finished tasks while admission is throttled
            while let Some(joined) = tasks.try_join_next_with_id() {
                outcomes.extend(self.settle(joined, &mut in_flight));
            }
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            outcomes.extend(self.settle(joined, &mut in_flight));
        }

        Ok(outcomes)
    }

    fn settle(
        &self,
        joined: Result<(task::Id, ValidationOutcome), JoinError>,
        in_flight: &mut HashMap<task::Id, ProxyCandidate>,
    ) -> Option<ValidationOutcome> {
        match joined {
            Ok((id, outcome)) => {
                in_flight.remove(&id);
                Some(outcome)
            }
            Err(e) => {
                let candidate = in_flight.remove(&e.id())?;
                // The task died before recording itself
                error!(candidate = %candidate, "Validation task failed: {}", e);
                self.stats.record(false);
                Some(ValidationOutcome::invalid(candidate))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use crate::proxy::checker::tests::{registry, ScriptedProber};
    use crate::proxy::models::ProbeResponse;
    use crate::proxy::report::ReportBuilder;
    use crate::proxy::tunnel::Probe;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::time::Duration;
    use url::Url;

    /// Tracks how many probes run at the same time
    #[derive(Default)]
    struct GaugeProber {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Probe for GaugeProber {
        async fn probe(&self, ip: IpAddr, _port: &str, _target: &Url) -> Result<ProbeResponse, ProbeError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ProbeResponse::new(200, format!("{{\"ip\":\"{}\"}}", ip)))
        }
    }

    /// Echoes the candidate's own address, but panics for one of them
    struct PanickingProber {
        fatal: IpAddr,
    }

    #[async_trait]
    impl Probe for PanickingProber {
        async fn probe(&self, ip: IpAddr, _port: &str, _target: &Url) -> Result<ProbeResponse, ProbeError> {
            if ip == self.fatal {
                panic!("prober blew up for {}", ip);
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok(ProbeResponse::new(200, format!("{{\"ip\":\"{}\"}}", ip)))
        }
    }

    fn candidates(count: usize) -> Vec<ProxyCandidate> {
        (0..count)
            .map(|i| {
                let ip = format!("8.8.{}.{}", i / 250, i % 250 + 1);
                ProxyCandidate::new(ip.parse().unwrap(), "443", "us", "Org")
            })
            .collect()
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = ScanStats::new(3);
        stats.record(true);
        stats.record(false);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot, StatsSnapshot { total: 3, checked: 2, live: 1 });
        assert!(!snapshot.is_complete());
        assert!((snapshot.percent() - 66.666).abs() < 0.01);

        let empty = ScanStats::new(0).snapshot();
        assert!(empty.is_complete());
        assert_eq!(empty.percent(), 100.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_limit_respected() {
        let prober = Arc::new(GaugeProber::default());
        let checker = Arc::new(ProxyChecker::new(
            registry(&["https://w1.example.com"]),
            prober.clone(),
        ));
        let stats = Arc::new(ScanStats::new(120));
        let scheduler = ScanScheduler::new(checker, 7, stats.clone());

        // Watch the counters from outside while the scan runs
        let watched = stats.clone();
        let sampler = tokio::spawn(async move {
            let mut samples = 0usize;
            loop {
                let snapshot = watched.snapshot();
                assert!(snapshot.live <= snapshot.checked, "{:?}", snapshot);
                assert!(snapshot.checked <= snapshot.total, "{:?}", snapshot);
                samples += 1;
                if snapshot.is_complete() {
                    return samples;
                }
                tokio::task::yield_now().await;
            }
        });

        let outcomes = scheduler.run(candidates(120), None).await.unwrap();
        assert!(sampler.await.unwrap() > 1);

        assert_eq!(outcomes.len(), 120);
        assert!(outcomes.iter().all(|o| o.is_valid()));
        assert!(prober.peak.load(Ordering::SeqCst) <= 7);
        assert!(prober.peak.load(Ordering::SeqCst) >= 1);
        assert_eq!(stats.snapshot(), StatsSnapshot { total: 120, checked: 120, live: 120 });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_exactly_one_outcome_per_candidate() {
        let mut prober = ScriptedProber::default();
        for (i, candidate) in candidates(40).iter().enumerate() {
            if i % 3 == 0 {
                let ip = candidate.ip.to_string();
                prober = prober.answer(&ip, "checkip.amazonaws.com", 200, &ip);
            }
        }
        let checker = Arc::new(ProxyChecker::new(registry(&["https://w1.example.com"]), Arc::new(prober)));
        let stats = Arc::new(ScanStats::new(40));
        let scheduler = ScanScheduler::new(checker, 5, stats.clone());

        let outcomes = scheduler.run(candidates(40), None).await.unwrap();

        let seen: HashSet<_> = outcomes.iter().map(|o| o.candidate.ip).collect();
        assert_eq!(outcomes.len(), 40);
        assert_eq!(seen.len(), 40);
        assert_eq!(outcomes.iter().filter(|o| o.is_valid()).count(), 14);
        assert_eq!(stats.snapshot(), StatsSnapshot { total: 40, checked: 40, live: 14 });
    }

    #[tokio::test]
    async fn test_live_feed_receives_valid_proxies() {
        let prober = ScriptedProber::default().answer("1.2.3.4", "1.1.1.1", 200, "ip=1.2.3.4\nloc=ID");
        let checker = Arc::new(ProxyChecker::new(registry(&[]), Arc::new(prober)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = ScanScheduler::new(checker, 2, Arc::new(ScanStats::new(2))).with_live_feed(tx);

        let input = vec![
            ProxyCandidate::new("1.2.3.4".parse().unwrap(), "80", "id", "A"),
            ProxyCandidate::new("4.3.2.1".parse().unwrap(), "80", "id", "B"),
        ];
        let outcomes = scheduler.run(input, None).await.unwrap();
        drop(scheduler);

        assert_eq!(outcomes.len(), 2);
        let live = rx.recv().await.unwrap();
        assert_eq!(live.ip.to_string(), "1.2.3.4");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_end_to_end_scenario() {
        let prober = ScriptedProber::default()
            .answer(
                "1.2.3.4",
                "w1.example.com",
                200,
                r#"{"ip":"1.2.3.4","as_organization":"Org-One!!"}"#,
            )
            .answer("5.6.7.8", "checkip.amazonaws.com", 200, "9.9.9.9");
        let checker = Arc::new(ProxyChecker::new(registry(&["https://w1.example.com"]), Arc::new(prober)));
        let stats = Arc::new(ScanStats::new(2));
        let scheduler = ScanScheduler::new(checker, 200, stats.clone());

        let input = vec![
            ProxyCandidate::new("1.2.3.4".parse().unwrap(), "8080", "id", "Org One"),
            ProxyCandidate::new("5.6.7.8".parse().unwrap(), "443", "us", "Org Two"),
        ];
        let outcomes = scheduler
            .run(input, Some("9.9.9.9".parse().unwrap()))
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        let first = outcomes.iter().find(|o| o.candidate.port == "8080").unwrap();
        let proxy = first.proxy.as_ref().unwrap();
        assert_eq!(proxy.country, "ID");
        assert_eq!(proxy.org, "OrgOne");
        assert_eq!(proxy.source.to_string(), "Worker-1");

        let second = outcomes.iter().find(|o| o.candidate.port == "443").unwrap();
        assert!(!second.is_valid());

        let report = ReportBuilder::default().build(&outcomes);
        let lines: Vec<_> = report.alphabetical.iter().map(|p| p.to_report_line()).collect();
        assert_eq!(lines, vec!["1.2.3.4,8080,ID,OrgOne"]);
        assert_eq!(stats.snapshot(), StatsSnapshot { total: 2, checked: 2, live: 1 });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_panicking_task_yields_invalid_outcome() {
        let input = candidates(30);
        let fatal = input[11].ip;
        let checker = Arc::new(ProxyChecker::new(
            registry(&["https://w1.example.com"]),
            Arc::new(PanickingProber { fatal }),
        ));
        let stats = Arc::new(ScanStats::new(30));
        let scheduler = ScanScheduler::new(checker, 4, stats.clone());

        let outcomes = scheduler.run(input, None).await.unwrap();

        assert_eq!(outcomes.len(), 30);
        let seen: HashSet<_> = outcomes.iter().map(|o| o.candidate.ip).collect();
        assert_eq!(seen.len(), 30);
        let failed = outcomes.iter().find(|o| o.candidate.ip == fatal).unwrap();
        assert!(!failed.is_valid());
        assert_eq!(outcomes.iter().filter(|o| o.is_valid()).count(), 29);
        assert_eq!(stats.snapshot(), StatsSnapshot { total: 30, checked: 30, live: 29 });
    }
}
