//! Horizontal autoscaling policy attached to a Function
//!
//! The policy scales a function's deployment on CPU and memory utilization.
//! A disabled policy carries no numbers at all, so switching autoscaling off
//! never leaves stale bounds behind in the stored record.

use serde::{Deserialize, Serialize};

use super::ValidationError;

/// Autoscaler settings as supplied by a caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerInput {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub min_replicas: Option<i32>,
    #[serde(default)]
    pub max_replicas: Option<i32>,
    /// Target average CPU utilization (percent)
    #[serde(default)]
    pub average_cpu: Option<i32>,
    /// Target average memory utilization (percent)
    #[serde(default)]
    pub average_memory: Option<i32>,
}

/// Autoscaler value stored on a Function
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Autoscaler {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_cpu: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_memory: Option<i32>,
}

/// Fully-specified policy handed to the cluster layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoscalingPolicy {
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub average_cpu: i32,
    pub average_memory: i32,
}

impl From<AutoscalerInput> for Autoscaler {
    fn from(input: AutoscalerInput) -> Self {
        if !input.enabled {
            return Autoscaler::disabled();
        }
        Self {
            enabled: true,
            min_replicas: input.min_replicas,
            max_replicas: input.max_replicas,
            average_cpu: input.average_cpu,
            average_memory: input.average_memory,
        }
    }
}

impl Autoscaler {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Check that an enabled autoscaler carries every number it needs.
    ///
    /// An inverted `min`/`max` pair is not an error here; it is corrected
    /// when the policy is applied to the cluster.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.enabled {
            return Ok(());
        }

        let missing: Vec<&str> = [
            ("minReplicas", self.min_replicas),
            ("maxReplicas", self.max_replicas),
            ("averageCpu", self.average_cpu),
            ("averageMemory", self.average_memory),
        ]
        .iter()
        .filter(|(_, v)| v.is_none())
        .map(|(name, _)| *name)
        .collect();

        if !missing.is_empty() {
            return Err(ValidationError(format!(
                "autoscaler is enabled but missing: {}",
                missing.join(", ")
            )));
        }

        if self.min_replicas.unwrap_or(0) < 1 {
            return Err(ValidationError(
                "autoscaler minReplicas must be at least 1".to_string(),
            ));
        }

        for (name, value) in [
            ("averageCpu", self.average_cpu),
            ("averageMemory", self.average_memory),
        ] {
            if value.unwrap_or(0) <= 0 {
                return Err(ValidationError(format!(
                    "autoscaler {} must be a positive percentage",
                    name
                )));
            }
        }

        Ok(())
    }

    /// The policy to apply, if autoscaling is enabled and complete
    pub fn policy(&self) -> Option<AutoscalingPolicy> {
        if !self.enabled {
            return None;
        }
        Some(AutoscalingPolicy {
            min_replicas: self.min_replicas?,
            max_replicas: self.max_replicas?,
            average_cpu: self.average_cpu?,
            average_memory: self.average_memory?,
        })
    }
}

impl AutoscalingPolicy {
    /// Replica bounds with `max` forced strictly above `min`
    pub fn replica_bounds(&self) -> (i32, i32) {
        let min = self.min_replicas;
        let max = self.max_replicas.max(min.saturating_add(1));
        (min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(enabled: bool) -> AutoscalerInput {
        AutoscalerInput {
            enabled,
            min_replicas: Some(2),
            max_replicas: Some(5),
            average_cpu: Some(70),
            average_memory: Some(80),
        }
    }

    #[test]
    fn test_disabled_input_copies_no_numbers() {
        let autoscaler = Autoscaler::from(input(false));
        assert!(!autoscaler.enabled);
        assert_eq!(autoscaler.min_replicas, None);
        assert_eq!(autoscaler.max_replicas, None);
        assert_eq!(autoscaler.average_cpu, None);
        assert_eq!(autoscaler.average_memory, None);
        assert_eq!(autoscaler.policy(), None);

        let json = serde_json::to_value(&autoscaler).unwrap();
        assert_eq!(json, serde_json::json!({"enabled": false}));
    }

    #[test]
    fn test_enabled_input_copies_numbers() {
        let autoscaler = Autoscaler::from(input(true));
        let policy = autoscaler.policy().unwrap();
        assert_eq!(policy.min_replicas, 2);
        assert_eq!(policy.max_replicas, 5);
        assert_eq!(policy.average_cpu, 70);
        assert_eq!(policy.average_memory, 80);
    }

    #[test]
    fn test_replica_bounds_correction() {
        let inverted = AutoscalingPolicy {
            min_replicas: 3,
            max_replicas: 2,
            average_cpu: 50,
            average_memory: 50,
        };
        assert_eq!(inverted.replica_bounds(), (3, 4));

        let equal = AutoscalingPolicy {
            max_replicas: 3,
            ..inverted
        };
        assert_eq!(equal.replica_bounds(), (3, 4));

        let valid = AutoscalingPolicy {
            min_replicas: 2,
            max_replicas: 5,
            ..inverted
        };
        assert_eq!(valid.replica_bounds(), (2, 5));
    }

    #[test]
    fn test_replica_bounds_at_i32_max() {
        let policy = AutoscalingPolicy {
            min_replicas: i32::MAX,
            max_replicas: 1,
            average_cpu: 50,
            average_memory: 50,
        };
        assert_eq!(policy.replica_bounds(), (i32::MAX, i32::MAX));
    }

    #[test]
    fn test_validate_missing_fields() {
        let autoscaler = Autoscaler::from(AutoscalerInput {
            enabled: true,
            min_replicas: Some(1),
            ..Default::default()
        });
        let err = autoscaler.validate().unwrap_err();
        assert!(err.0.contains("maxReplicas"));
        assert!(err.0.contains("averageCpu"));
        assert!(!err.0.contains("minReplicas"));
    }

    #[test]
    fn test_validate_accepts_inverted_bounds() {
        let autoscaler = Autoscaler::from(AutoscalerInput {
            enabled: true,
            min_replicas: Some(3),
            max_replicas: Some(2),
            average_cpu: Some(60),
            average_memory: Some(60),
        });
        assert!(autoscaler.validate().is_ok());
    }

    #[test]
    fn test_validate_disabled_always_ok() {
        assert!(Autoscaler::disabled().validate().is_ok());
    }
}
