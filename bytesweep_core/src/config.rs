use crate::evidence::EvidenceStore;
use crate::executor::{CommandTarget, HarnessError, StagingPaths};
use crate::mutator::DEFAULT_RNG_SEED;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid target settings: {0}")]
    Target(#[from] HarnessError),
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CampaignSettings {
    #[serde(default = "default_seed_file")]
    pub seed_file: PathBuf,
    #[serde(default = "default_rng_seed")]
    pub rng_seed: u64,
}

fn default_seed_file() -> PathBuf {
    PathBuf::from("cross.jpg")
}

fn default_rng_seed() -> u64 {
    DEFAULT_RNG_SEED
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self {
            seed_file: default_seed_file(),
            rng_seed: default_rng_seed(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TargetSettings {
    /// Program followed by any leading arguments. The mutant path and output
    /// path are appended on every run.
    #[serde(default = "default_command")]
    pub command: Vec<String>,
    #[serde(default = "default_mutant_path")]
    pub mutant_path: PathBuf,
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
    #[serde(default = "default_capture_path")]
    pub capture_path: PathBuf,
    /// Unset means wait for the target indefinitely.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Directory the target runs in. Relative mutant, output and capture
    /// paths are resolved against it.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_command() -> Vec<String> {
    vec!["./jpg2bmp".to_string()]
}

fn default_mutant_path() -> PathBuf {
    PathBuf::from("input.jpg")
}

fn default_output_path() -> PathBuf {
    PathBuf::from("temp.bmp")
}

fn default_capture_path() -> PathBuf {
    PathBuf::from("errorOutput.txt")
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            command: default_command(),
            mutant_path: default_mutant_path(),
            output_path: default_output_path(),
            capture_path: default_capture_path(),
            timeout_ms: None,
            working_dir: None,
        }
    }
}

impl TargetSettings {
    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.working_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn staging_paths(&self) -> StagingPaths {
        StagingPaths {
            mutant: self.resolve(&self.mutant_path),
            output: self.resolve(&self.output_path),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn build_target(&self) -> Result<CommandTarget, HarnessError> {
        Ok(
            CommandTarget::new(self.command.clone(), self.resolve(&self.capture_path))?
                .with_timeout(self.timeout())
                .with_working_dir(self.working_dir.clone()),
        )
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CrashSettings {
    #[serde(default = "default_crash_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_extension")]
    pub extension: String,
    /// When set, the final report is also written here as JSON.
    #[serde(default)]
    pub summary_file: Option<PathBuf>,
}

pub fn default_crash_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_extension() -> String {
    "jpg".to_string()
}

impl Default for CrashSettings {
    fn default() -> Self {
        Self {
            dir: default_crash_dir(),
            extension: default_extension(),
            summary_file: None,
        }
    }
}

impl CrashSettings {
    pub fn evidence_store(&self) -> EvidenceStore {
        EvidenceStore::new(self.dir.clone(), self.extension.clone())
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct BytesweepConfig {
    #[serde(default)]
    pub campaign: CampaignSettings,
    #[serde(default)]
    pub target: TargetSettings,
    #[serde(default)]
    pub crashes: CrashSettings,
}

impl BytesweepConfig {
    /// Name of the file picked up from the working directory when present.
    pub const DEFAULT_FILE_NAME: &'static str = "bytesweep.toml";

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.command.is_empty() {
            return Err(ConfigError::Target(HarnessError::EmptyCommand));
        }
        Ok(())
    }
}
