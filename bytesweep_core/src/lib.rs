pub mod campaign;
pub mod config;
pub mod evidence;
pub mod executor;
pub mod mutator;
pub mod registry;
pub mod seed;

pub use campaign::{CampaignStats, Phase, PhaseStats, run_campaign, run_phase};
pub use config::{BytesweepConfig, ConfigError};
pub use evidence::{EvidenceError, EvidenceStore};
pub use executor::{
    CommandTarget, ExecutionOutcome, ExecutionStatus, HarnessError, InProcessTarget,
    StagingPaths, Target, TestHarness,
};
pub use mutator::{
    DEFAULT_RNG_SEED, MutationEngine, Mutator, NullValueMutator, RandomCorruption,
    RandomOverwriteMutator, ValueSweep,
};
pub use registry::{CrashRegistry, Report, SignatureCount, Verdict};
pub use seed::{Seed, SeedError};
