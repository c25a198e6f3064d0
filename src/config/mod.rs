use anyhow::{Context, Error};
use confique::Config;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

#[derive(Debug, Config)]
pub struct RollupConfig {
    #[config(env = "ROLLUP_RULES_FILE", default = "config/aggregation-rules.conf")]
    pub rules_file: PathBuf,

    #[config(env = "ROLLUP_RULES_RELOAD_INTERVAL_SECONDS", default = 45)]
    pub rules_reload_interval_seconds: u64,

    /// When disabled, points pass through without being aggregated
    #[config(env = "ROLLUP_AGGREGATION_ENABLED", default = true)]
    pub aggregation_enabled: bool,

    #[config(env = "ROLLUP_SLOT_PRECISION_SECONDS", default = 60)]
    pub slot_precision_seconds: i64,

    #[config(env = "ROLLUP_SLOT_MAX_LIFE_SECONDS", default = 120)]
    pub slot_max_life_seconds: i64,

    #[config(env = "ROLLUP_RECOVERY_MAX_SLOTS", default = 3)]
    pub recovery_max_slots: usize,

    #[config(env = "ROLLUP_MIN_PAUSE_BETWEEN_FLUSHES_SECONDS", default = 15)]
    pub min_pause_between_flushes_seconds: u64,

    #[config(env = "ROLLUP_INTERVAL_SECONDS", default = 5)]
    pub rollup_interval_seconds: u64,

    #[config(env = "ROLLUP_POLICY_CACHE_SIZE", default = 100000)]
    pub policy_cache_size: usize,

    /// Replay mode: the data drives the clock and the open windows are bounded
    #[config(env = "ROLLUP_RECOVERY_MODE", default = false)]
    pub recovery_mode: bool,
}

impl RollupConfig {
    pub fn load() -> Result<RollupConfig, Error> {
        let c = RollupConfig::builder()
            .env()
            .file("settings.toml")
            .load()?;

        Ok(c)
    }

    pub fn rules_reload_interval(&self) -> Duration {
        Duration::from_secs(self.rules_reload_interval_seconds)
    }

    pub fn min_pause_between_flushes(&self) -> Duration {
        Duration::from_secs(self.min_pause_between_flushes_seconds)
    }

    pub fn rollup_interval(&self) -> Duration {
        Duration::from_secs(self.rollup_interval_seconds.max(1))
    }
}

pub static ROLLUP_CONFIG: OnceLock<Arc<RollupConfig>> = OnceLock::new();

pub fn get() -> Result<Arc<RollupConfig>, Error> {
    ROLLUP_CONFIG.get().cloned().ok_or_else(|| {
        Error::msg(
            "Configuration not loaded. Please call load_configuration() before using the configuration",
        )
    })
}

pub fn load_configuration() -> Result<(), Error> {
    if ROLLUP_CONFIG.get().is_some() {
        return Ok(());
    }

    let config = RollupConfig::load().context("Failed to load rollup configuration")?;
    ROLLUP_CONFIG.get_or_init(|| Arc::new(config));

    Ok(())
}
