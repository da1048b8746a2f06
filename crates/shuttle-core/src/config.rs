//! SchedulerConfig - 運用パラメータ
//!
//! すべてのフィールドに既定値があるので、設定ファイルでは変えたい項目だけ書けばよい。

use serde::{Deserialize, Serialize};

/// 設定値の検証エラー
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("{field} must be a finite number, got {value}")]
    NotFinite { field: &'static str, value: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum ids accepted by a bulk operation.
    pub bulk_limit: usize,
    /// Maximum ids accepted by `release_waiting`.
    pub waiting_release_limit: usize,
    /// Site recorded on assignment when the worker offers none.
    pub default_site: String,
    /// Treat a repeated mark-processing / status set with the same token as success.
    pub idempotent_repeats: bool,
    pub tuning: TuningConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            bulk_limit: 100_000,
            waiting_release_limit: 100,
            default_site: "unknown".to_string(),
            idempotent_repeats: true,
            tuning: TuningConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bulk_limit == 0 {
            return Err(ConfigError::NotPositive { field: "bulk_limit" });
        }
        if self.waiting_release_limit == 0 {
            return Err(ConfigError::NotPositive {
                field: "waiting_release_limit",
            });
        }
        self.tuning.validate()
    }
}

/// Failure-driven requirement tuning thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// Observed cpu at or below this is noise.
    pub cpu_noise_floor: f64,
    /// Observed cpu above this is treated as a bogus report.
    pub cpu_ceiling: f64,
    /// Observed cpu must reach `current * ratio` to count as overuse.
    pub cpu_overuse_ratio: f64,
    pub cpu_step: f64,
    /// Observed memory / disk / time below this is ignored.
    pub quantity_noise_floor: f64,
    /// Proposal = observed * margin.
    pub quantity_margin: f64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            cpu_noise_floor: 1.1,
            cpu_ceiling: 20.0,
            cpu_overuse_ratio: 1.1,
            cpu_step: 1.0,
            quantity_noise_floor: 0.5,
            quantity_margin: 1.5,
        }
    }
}

impl TuningConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("cpu_noise_floor", self.cpu_noise_floor),
            ("cpu_ceiling", self.cpu_ceiling),
            ("cpu_overuse_ratio", self.cpu_overuse_ratio),
            ("cpu_step", self.cpu_step),
            ("quantity_noise_floor", self.quantity_noise_floor),
            ("quantity_margin", self.quantity_margin),
        ];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(ConfigError::NotFinite { field, value });
            }
        }
        if self.cpu_step <= 0.0 {
            return Err(ConfigError::NotPositive { field: "cpu_step" });
        }
        if self.quantity_margin <= 0.0 {
            return Err(ConfigError::NotPositive {
                field: "quantity_margin",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SchedulerConfig::default();
        assert_eq!(config.bulk_limit, 100_000);
        assert_eq!(config.waiting_release_limit, 100);
        assert_eq!(config.default_site, "unknown");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_input_keeps_defaults() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{"bulk_limit": 10, "tuning": {"quantity_margin": 2.0}}"#)
                .unwrap();
        assert_eq!(config.bulk_limit, 10);
        assert_eq!(config.tuning.quantity_margin, 2.0);
        assert_eq!(config.tuning.cpu_ceiling, 20.0);
        assert!(config.idempotent_repeats);
    }

    #[test]
    fn zero_limits_are_rejected() {
        let config = SchedulerConfig {
            bulk_limit: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::NotPositive { field: "bulk_limit" })
        );
    }

    #[test]
    fn non_finite_tuning_is_rejected() {
        let tuning = TuningConfig {
            cpu_ceiling: f64::INFINITY,
            ..Default::default()
        };
        assert!(matches!(
            tuning.validate(),
            Err(ConfigError::NotFinite { field: "cpu_ceiling", .. })
        ));
    }
}
