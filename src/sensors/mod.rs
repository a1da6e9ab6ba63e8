//! Simulated sensors for development and the demo binary
//!
//! Real drivers live outside this crate. Each simulated sensor replays a
//! script of outcomes with latency, which is enough to exercise every path of
//! the orchestrator end to end.

pub mod simulated;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::{FailureReason, ModuleId, ModuleRegistry};
use crate::validation::{validate_help_text, validate_step_delay_ms};

pub use simulated::SimulatedModule;

/// What a simulated sensor reports at one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptOutcome {
    Success,
    Failure(FailureReason),
    Help(String),
    UserCancel,
}

impl ScriptOutcome {
    /// Whether this step ends the invocation
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ScriptOutcome::Help(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptStep {
    /// Delay before reporting, counted from the previous step (ms)
    pub after_ms: u64,
    pub outcome: ScriptOutcome,
}

impl ScriptStep {
    pub fn new(after_ms: u64, outcome: ScriptOutcome) -> Self {
        Self { after_ms, outcome }
    }
}

fn default_true() -> bool {
    true
}

/// One simulated sensor
///
/// The script is consumed across invocations: a restart picks up where the
/// previous invocation stopped. An exhausted script leaves the sensor silent
/// until it is canceled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub id: ModuleId,
    #[serde(default = "default_true")]
    pub present: bool,
    #[serde(default = "default_true")]
    pub enrolled: bool,
    #[serde(default)]
    pub script: Vec<ScriptStep>,
}

impl SensorConfig {
    pub fn new(id: ModuleId, script: Vec<ScriptStep>) -> Self {
        Self {
            id,
            present: true,
            enrolled: true,
            script,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (index, step) in self.script.iter().enumerate() {
            validate_step_delay_ms(step.after_ms)
                .map_err(|e| anyhow!("sensor {} step {}: {}", self.id, index, e))?;
            if let ScriptOutcome::Help(text) = &step.outcome {
                validate_help_text(text)
                    .map_err(|e| anyhow!("sensor {} step {}: {}", self.id, index, e))?;
            }
        }
        Ok(())
    }
}

/// Demo sensors: a fingerprint reader that misses once, then matches, and a
/// slower face unlock
pub fn default_sensors() -> Vec<SensorConfig> {
    vec![
        SensorConfig::new(
            ModuleId::Fingerprint,
            vec![
                ScriptStep::new(400, ScriptOutcome::Help("Place your finger".to_string())),
                ScriptStep::new(
                    600,
                    ScriptOutcome::Failure(FailureReason::AuthenticationFailed),
                ),
                ScriptStep::new(800, ScriptOutcome::Success),
            ],
        ),
        SensorConfig::new(
            ModuleId::Face,
            vec![ScriptStep::new(2_500, ScriptOutcome::Success)],
        ),
    ]
}

/// Build a registry holding one [`SimulatedModule`] per sensor
pub fn build_registry(sensors: &[SensorConfig]) -> Result<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();
    for sensor in sensors {
        if registry.contains(&sensor.id) {
            bail!("Sensor defined twice: {}", sensor.id);
        }
        sensor.validate()?;
        registry.register(Arc::new(SimulatedModule::new(sensor.clone())));
    }

    log::info!("✓ {} simulated sensor(s) registered", registry.len());
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sensors_build() {
        let registry = build_registry(&default_sensors()).unwrap();
        assert_eq!(registry.ids(), vec![ModuleId::Fingerprint, ModuleId::Face]);
    }

    #[test]
    fn test_duplicate_sensor_rejected() {
        let sensors = vec![
            SensorConfig::new(ModuleId::Face, vec![]),
            SensorConfig::new(ModuleId::Face, vec![]),
        ];
        assert!(build_registry(&sensors).is_err());
    }

    #[test]
    fn test_bad_help_text_rejected() {
        let sensor = SensorConfig::new(
            ModuleId::Iris,
            vec![ScriptStep::new(10, ScriptOutcome::Help("bad\u{7}".to_string()))],
        );
        assert!(sensor.validate().is_err());
    }

    #[test]
    fn test_sensor_toml_shape() {
        let toml_str = r#"
            id = "vendor:palm"
            enrolled = false

            [[script]]
            after_ms = 250
            outcome = { failure = "sensor_failed" }

            [[script]]
            after_ms = 100
            outcome = "success"
        "#;
        let sensor: SensorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(sensor.id, ModuleId::vendor("palm").unwrap());
        assert!(sensor.present);
        assert!(!sensor.enrolled);
        assert_eq!(
            sensor.script,
            vec![
                ScriptStep::new(250, ScriptOutcome::Failure(FailureReason::SensorFailed)),
                ScriptStep::new(100, ScriptOutcome::Success),
            ]
        );
    }
}
