use crate::executor::{HarnessError, Target, TestHarness};
use crate::mutator::MutationEngine;
use crate::registry::{CrashRegistry, Verdict};
use log::{debug, info};
use rand::Rng;
use std::fmt;
use std::time::{Duration, Instant};

/// Fewest executions between two progress lines.
const MIN_PROGRESS_INTERVAL: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Strategy A: null out each byte value in turn.
    ValueSweep,
    /// Strategy B: randomized multi-byte corruption.
    RandomCorruption,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::ValueSweep => write!(f, "value sweep"),
            Phase::RandomCorruption => write!(f, "random corruption"),
        }
    }
}

/// Counters for one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseStats {
    pub executions: u64,
    pub new_signatures: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CampaignStats {
    pub value_sweep: PhaseStats,
    pub random_corruption: PhaseStats,
    pub elapsed: Duration,
}

impl CampaignStats {
    pub fn executions(&self) -> u64 {
        self.value_sweep.executions + self.random_corruption.executions
    }
}

/// Executions between progress lines: every 1% of a known total, but never
/// more often than every [`MIN_PROGRESS_INTERVAL`] executions.
fn progress_interval(total: Option<usize>) -> u64 {
    total.map_or(1000, |n| n as u64 / 100).max(MIN_PROGRESS_INTERVAL)
}

/// Runs every mutant of `mutants` through the harness and records the outcome.
///
/// Mutants are generated, executed and classified one at a time, in order.
/// The first harness error stops the phase.
pub fn run_phase<T, I>(
    phase: Phase,
    mutants: I,
    harness: &mut TestHarness<T>,
    registry: &mut CrashRegistry,
) -> Result<PhaseStats, HarnessError>
where
    T: Target,
    I: Iterator<Item = Vec<u8>>,
{
    let total = mutants.size_hint().1;
    let report_every = progress_interval(total);
    let start_time = Instant::now();
    let mut stats = PhaseStats::default();

    info!(
        "Starting {phase} ({} mutants)",
        total.map_or("?".to_string(), |n| n.to_string())
    );

    for mutant in mutants {
        let outcome = harness.execute(&mutant)?;
        stats.executions += 1;

        match registry.record(&outcome, &mutant) {
            Verdict::NewSignature { .. } => stats.new_signatures += 1,
            verdict => debug!("{phase} #{}: {verdict:?}", stats.executions),
        }

        if stats.executions % report_every == 0 {
            let elapsed = start_time.elapsed().as_secs_f32();
            let exec_per_sec = if elapsed > 0.0 {
                stats.executions as f32 / elapsed
            } else {
                0.0
            };
            info!(
                "{phase}: {} executed, {} unique failures, {:.2} execs/sec",
                stats.executions,
                registry.len(),
                exec_per_sec
            );
        }
    }

    info!(
        "Finished {phase}: {} executions, {} new signatures in {:.2?}",
        stats.executions,
        stats.new_signatures,
        start_time.elapsed()
    );
    Ok(stats)
}

/// Runs a full campaign: the value sweep, then `iterations` randomized
/// corruptions, recording every outcome in `registry`.
pub fn run_campaign<T, R>(
    engine: &mut MutationEngine<R>,
    harness: &mut TestHarness<T>,
    registry: &mut CrashRegistry,
    iterations: u64,
) -> Result<CampaignStats, HarnessError>
where
    T: Target,
    R: Rng,
{
    let start_time = Instant::now();

    let value_sweep = run_phase(Phase::ValueSweep, engine.value_sweep(), harness, registry)?;
    let random_corruption = run_phase(
        Phase::RandomCorruption,
        engine.random_corruption(iterations),
        harness,
        registry,
    )?;

    Ok(CampaignStats {
        value_sweep,
        random_corruption,
        elapsed: start_time.elapsed(),
    })
}
