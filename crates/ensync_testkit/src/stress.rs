//! Stress tests for sync rounds.
//!
//! These helpers run many replicas against one server from several threads
//! and check that they all converge.

use crate::fixtures::{TestReplica, TestServer};
use ensync_core::crypto::KeyMaterial;
use ensync_sync_engine::SyncError;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Rounds attempted.
    pub total_rounds: usize,
    /// Rounds that completed.
    pub successful_rounds: usize,
    /// Rounds refused because another round held the pair.
    pub busy_rounds: usize,
    /// Rounds that failed for any other reason.
    pub failed_rounds: usize,
    /// Total duration.
    pub duration: Duration,
    /// Rounds per second.
    pub rounds_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, busy: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + busy + failed;
        let rounds_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_rounds: total,
            successful_rounds: successful,
            busy_rounds: busy,
            failed_rounds: failed,
            duration,
            rounds_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total rounds: {}", self.total_rounds);
        println!("Successful: {}", self.successful_rounds);
        println!("Busy: {}", self.busy_rounds);
        println!("Failed: {}", self.failed_rounds);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} rounds/sec", self.rounds_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of replicas, one thread each.
    pub replicas: usize,
    /// Write-then-sync rounds per replica.
    pub rounds: usize,
    /// Documents written per round.
    pub writes_per_round: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            replicas: 4,
            rounds: 20,
            writes_per_round: 5,
        }
    }
}

/// Runs replicas concurrently against one server, then settles them.
///
/// Every replica writes and syncs on its own thread. Returns the result
/// together with the replicas, which have all converged.
pub fn concurrent_writers(config: &StressConfig) -> (StressTestResult, Vec<TestReplica>) {
    let server = TestServer::memory();
    let keys = KeyMaterial::generate();
    let replicas: Vec<_> = (0..config.replicas)
        .map(|_| TestReplica::memory(&keys))
        .collect();

    let successful = AtomicUsize::new(0);
    let busy = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for (index, replica) in replicas.iter().enumerate() {
            let server = &server;
            let (successful, busy, failed) = (&successful, &busy, &failed);
            scope.spawn(move || {
                let target = server.target("stress");
                for round in 0..config.rounds {
                    for write in 0..config.writes_per_round {
                        replica
                            .replica
                            .create_doc(json!({"replica": index, "round": round, "write": write}))
                            .expect("Failed to create document");
                    }
                    match replica.sync(&target) {
                        Ok(_) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(SyncError::SyncInProgress { .. }) => busy.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            });
        }
    });

    let duration = start.elapsed();

    // Two passes: the first delivers every replica's writes, the second
    // brings the earlier replicas up to date.
    let target = server.target("stress");
    for _ in 0..2 {
        for replica in &replicas {
            replica.sync(&target).expect("Settling sync failed");
        }
    }

    let result = StressTestResult::new(
        successful.load(Ordering::Relaxed),
        busy.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        duration,
    );
    (result, replicas)
}
