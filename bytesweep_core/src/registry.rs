use crate::evidence::EvidenceStore;
use crate::executor::{ExecutionOutcome, ExecutionStatus};
use log::{debug, error, info};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// What the registry did with one execution outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The target exited successfully.
    Passed,
    /// The target was killed by the harness timeout.
    Hang,
    /// The target failed without printing anything; dropped by policy.
    Silent,
    /// First sighting of this signature.
    NewSignature {
        signature: String,
        evidence: Option<PathBuf>,
    },
    /// Signature already known; its count was incremented.
    Repeat { signature: String, count: u64 },
}

/// One line of the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureCount {
    pub signature: String,
    pub count: u64,
}

/// Snapshot of a registry at the end of a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Report {
    /// Distinct signatures, in the order they were first seen.
    pub signatures: Vec<SignatureCount>,
    pub hangs: u64,
    pub silent_failures: u64,
    pub evidence_failures: u64,
}

impl Report {
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn total_failures(&self) -> u64 {
        self.signatures.iter().map(|s| s.count).sum()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Results:")?;
        for entry in &self.signatures {
            writeln!(f, "\t{}: Found {} times.", entry.signature, entry.count)?;
        }
        if self.hangs > 0 {
            writeln!(f, "Timed out: {} executions.", self.hangs)?;
        }
        if self.silent_failures > 0 {
            writeln!(
                f,
                "Ignored {} failing executions with no diagnostic output.",
                self.silent_failures
            )?;
        }
        if self.evidence_failures > 0 {
            writeln!(
                f,
                "Could not save evidence for {} new signatures.",
                self.evidence_failures
            )?;
        }
        Ok(())
    }
}

/// Deduplicates failing executions by their diagnostic text.
///
/// The first outcome with a given signature stores its mutant through the
/// [`EvidenceStore`]; later ones only bump the count. A failed evidence write
/// is logged and counted but does not stop the campaign.
#[derive(Debug)]
pub struct CrashRegistry {
    evidence: Option<EvidenceStore>,
    positions: HashMap<String, usize>,
    entries: Vec<SignatureCount>,
    hangs: u64,
    silent_failures: u64,
    evidence_failures: u64,
}

impl CrashRegistry {
    pub fn new(evidence: EvidenceStore) -> Self {
        Self::with_evidence(Some(evidence))
    }

    /// A registry that counts signatures without writing anything to disk.
    pub fn in_memory() -> Self {
        Self::with_evidence(None)
    }

    fn with_evidence(evidence: Option<EvidenceStore>) -> Self {
        Self {
            evidence,
            positions: HashMap::new(),
            entries: Vec::new(),
            hangs: 0,
            silent_failures: 0,
            evidence_failures: 0,
        }
    }

    /// Classifies `outcome`, which was produced by running `mutant`.
    pub fn record(&mut self, outcome: &ExecutionOutcome, mutant: &[u8]) -> Verdict {
        if outcome.status == ExecutionStatus::TimedOut {
            self.hangs += 1;
            return Verdict::Hang;
        }
        if !outcome.status.is_failure() {
            return Verdict::Passed;
        }

        let signature = outcome.diagnostic.trim();
        if signature.is_empty() {
            self.silent_failures += 1;
            debug!(
                "Ignoring failure without diagnostic output ({:?})",
                outcome.status
            );
            return Verdict::Silent;
        }

        if let Some(&position) = self.positions.get(signature) {
            let entry = &mut self.entries[position];
            entry.count += 1;
            return Verdict::Repeat {
                signature: entry.signature.clone(),
                count: entry.count,
            };
        }

        self.positions
            .insert(signature.to_string(), self.entries.len());
        self.entries.push(SignatureCount {
            signature: signature.to_string(),
            count: 1,
        });

        let evidence = self.persist(signature, mutant);
        info!("New unique failure: {signature}");
        Verdict::NewSignature {
            signature: signature.to_string(),
            evidence,
        }
    }

    fn persist(&mut self, signature: &str, mutant: &[u8]) -> Option<PathBuf> {
        let store = self.evidence.as_ref()?;
        match store.persist(signature, mutant) {
            Ok(path) => {
                debug!("Saved evidence to {path:?}");
                Some(path)
            }
            Err(e) => {
                error!("{e}");
                self.evidence_failures += 1;
                None
            }
        }
    }

    pub fn count(&self, signature: &str) -> Option<u64> {
        self.positions
            .get(signature.trim())
            .map(|&position| self.entries[position].count)
    }

    /// Number of distinct signatures seen so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hangs(&self) -> u64 {
        self.hangs
    }

    pub fn report(&self) -> Report {
        Report {
            signatures: self.entries.clone(),
            hangs: self.hangs,
            silent_failures: self.silent_failures,
            evidence_failures: self.evidence_failures,
        }
    }
}
