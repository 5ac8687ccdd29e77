//! Configuration file management for cadence.
//!
//! Provides a TOML-based config file at `~/.config/cadence/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use cadence_core::lease::LeaseConfig;
use cadence_core::orchestrator::OrchestratorConfig;
use cadence_core::phase::PhaseConfig;
use cadence_core::scheduler::SchedulerConfig;
use cadence_db::config::DbConfig;

/// Environment variable naming the generator program.
pub const GENERATOR_ENV: &str = "CADENCE_GENERATOR";

/// Longest accepted lease: one week.
const MAX_LEASE_MINUTES: i64 = 7 * 24 * 60;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    pub scheduler: SchedulerSection,
    pub phases: PhasesSection,
    pub generator: GeneratorSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub daily_scan_secs: u64,
    pub weekly_scan_secs: u64,
    pub sweep_interval_secs: u64,
    pub shutdown_grace_secs: u64,
    pub max_concurrent: usize,
    pub lease_minutes: i64,
    pub generator_timeout_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        let scheduler = SchedulerConfig::default();
        let orchestrator = OrchestratorConfig::default();
        Self {
            daily_scan_secs: scheduler.daily_scan.as_secs(),
            weekly_scan_secs: scheduler.weekly_scan.as_secs(),
            sweep_interval_secs: scheduler.sweep_interval.as_secs(),
            shutdown_grace_secs: scheduler.shutdown_grace.as_secs(),
            max_concurrent: orchestrator.max_concurrent,
            lease_minutes: LeaseConfig::default().duration.num_minutes(),
            generator_timeout_secs: orchestrator.generator_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PhasesSection {
    pub taper_ratio: f64,
    pub peak_ratio: f64,
    pub deload_every: u32,
}

impl Default for PhasesSection {
    fn default() -> Self {
        let phases = PhaseConfig::default();
        Self {
            taper_ratio: phases.taper_ratio,
            peak_ratio: phases.peak_ratio,
            deload_every: phases.deload_every,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSection {
    /// Program run once per generated week.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the cadence config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/cadence` or `~/.config/cadence`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("cadence");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("cadence")
}

/// Return the path to the cadence config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file at `path`. A missing file is `None`; an
/// unreadable or malformed one is an error.
pub fn load_config_from(path: &Path) -> Result<Option<ConfigFile>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to read config file at {}", path.display()));
        }
    };
    let config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(Some(config))
}

/// Serialize and write the config file to `path`, creating parent dirs as
/// needed.
pub fn save_config_to(config: &ConfigFile, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// External generator program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct CadenceConfig {
    pub db_config: DbConfig,
    pub scheduler: SchedulerConfig,
    pub orchestrator: OrchestratorConfig,
    pub lease: LeaseConfig,
    pub phases: PhaseConfig,
    pub generator: Option<GeneratorCommand>,
}

impl CadenceConfig {
    /// Resolve configuration from the default config file location.
    pub fn resolve(cli_db_url: Option<&str>, cli_generator: Option<&str>) -> Result<Self> {
        let file = load_config_from(&config_path())?;
        Self::from_parts(cli_db_url, cli_generator, file.unwrap_or_default())
    }

    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `CADENCE_DATABASE_URL` > `[database].url` > `DbConfig::DEFAULT_URL`
    /// - Generator: `cli_generator` > `CADENCE_GENERATOR` > `[generator].command` > none
    ///
    /// Arguments from `[generator].args` apply only to the program named in
    /// the file.
    pub fn from_parts(
        cli_db_url: Option<&str>,
        cli_generator: Option<&str>,
        file: ConfigFile,
    ) -> Result<Self> {
        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var(DbConfig::URL_ENV) {
            url
        } else if let Some(url) = file.database.url {
            url
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };
        let mut db_config = DbConfig::new(db_url);
        if let Some(max) = file.database.max_connections {
            db_config = db_config.with_max_connections(max);
        }

        let generator = if let Some(program) = cli_generator {
            Some(GeneratorCommand {
                program: program.to_string(),
                args: Vec::new(),
            })
        } else if let Ok(program) = std::env::var(GENERATOR_ENV) {
            Some(GeneratorCommand {
                program,
                args: Vec::new(),
            })
        } else {
            file.generator.command.map(|program| GeneratorCommand {
                program,
                args: file.generator.args,
            })
        };

        let s = file.scheduler;
        if !(1..=MAX_LEASE_MINUTES).contains(&s.lease_minutes) {
            bail!(
                "scheduler.lease_minutes must be between 1 and {MAX_LEASE_MINUTES}, got {}",
                s.lease_minutes
            );
        }
        let lease = LeaseConfig {
            duration: chrono::TimeDelta::try_minutes(s.lease_minutes)
                .context("scheduler.lease_minutes is out of range")?,
        };
        let generator_timeout = Duration::from_secs(s.generator_timeout_secs);
        let lease_secs = u64::try_from(lease.duration.num_seconds()).unwrap_or(u64::MAX);
        if generator_timeout.as_secs() >= lease_secs {
            bail!(
                "scheduler.generator_timeout_secs ({}) must be shorter than the lease ({} minutes)",
                s.generator_timeout_secs,
                s.lease_minutes
            );
        }

        let p = file.phases;
        let ratios_ok = (0.0..=1.0).contains(&p.taper_ratio)
            && (0.0..=1.0).contains(&p.peak_ratio)
            && p.taper_ratio + p.peak_ratio <= 1.0;
        if !ratios_ok {
            bail!(
                "phases.taper_ratio ({}) and phases.peak_ratio ({}) must lie in [0, 1] and sum to at most 1",
                p.taper_ratio,
                p.peak_ratio
            );
        }

        Ok(Self {
            db_config,
            scheduler: SchedulerConfig {
                daily_scan: Duration::from_secs(s.daily_scan_secs),
                weekly_scan: Duration::from_secs(s.weekly_scan_secs),
                sweep_interval: Duration::from_secs(s.sweep_interval_secs),
                shutdown_grace: Duration::from_secs(s.shutdown_grace_secs),
            },
            orchestrator: OrchestratorConfig {
                max_concurrent: s.max_concurrent.max(1),
                generator_timeout,
            },
            lease,
            phases: PhaseConfig {
                taper_ratio: p.taper_ratio,
                peak_ratio: p.peak_ratio,
                deload_every: p.deload_every,
            },
            generator,
        })
    }

    /// The generator command, or an error telling the operator how to set one.
    pub fn require_generator(&self) -> Result<&GeneratorCommand> {
        self.generator.as_ref().with_context(|| {
            format!(
                "no generator configured; pass --generator, set {GENERATOR_ENV}, \
                 or set [generator].command in {}",
                config_path().display()
            )
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
