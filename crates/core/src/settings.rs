use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::model::{DetectionPolicy, EscalationPolicy, EscalationPolicyError};

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("detection tick interval must be > 0 ms")]
    InvalidTickInterval,

    #[error(transparent)]
    Threshold(#[from] EscalationPolicyError),

    #[error("{field} must be within [0, 1], got {value}")]
    InvalidScore { field: &'static str, value: f32 },

    #[error("invalid scoring base URL")]
    InvalidBaseUrl,

    #[error("invalid value for {var}: {raw}")]
    InvalidNumber { var: &'static str, raw: String },
}

/// Unvalidated settings, e.g. straight from the environment.
#[derive(Clone, Debug, Default)]
pub struct ProctoringSettingsDraft {
    pub tick_interval_ms: Option<u64>,
    pub threshold: Option<u32>,
    pub subject_min_score: Option<f32>,
    pub prohibited_min_score: Option<f32>,
    pub scoring_base_url: Option<String>,
    pub scoring_token: Option<String>,
}

impl ProctoringSettingsDraft {
    /// Read overrides from `PROCTOR_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::InvalidNumber` when a numeric variable does not parse.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with a custom variable source.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::InvalidNumber` when a numeric variable does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        fn parse<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            var: &'static str,
        ) -> Result<Option<T>, SettingsError> {
            match normalize_optional(lookup(var)) {
                None => Ok(None),
                Some(raw) => raw
                    .parse::<T>()
                    .map(Some)
                    .map_err(|_| SettingsError::InvalidNumber { var, raw }),
            }
        }

        Ok(Self {
            tick_interval_ms: parse(&lookup, "PROCTOR_TICK_MS")?,
            threshold: parse(&lookup, "PROCTOR_THRESHOLD")?,
            subject_min_score: parse(&lookup, "PROCTOR_SUBJECT_MIN_SCORE")?,
            prohibited_min_score: parse(&lookup, "PROCTOR_PROHIBITED_MIN_SCORE")?,
            scoring_base_url: normalize_optional(lookup("PROCTOR_SCORING_URL")),
            scoring_token: normalize_optional(lookup("PROCTOR_SCORING_TOKEN")),
        })
    }

    /// Apply defaults and validate.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` for a zero tick, zero threshold, out-of-range
    /// score floor or malformed base URL.
    pub fn validate(self) -> Result<ProctoringSettings, SettingsError> {
        let tick_ms = self
            .tick_interval_ms
            .unwrap_or(ProctoringSettings::DEFAULT_TICK_MS);
        if tick_ms == 0 {
            return Err(SettingsError::InvalidTickInterval);
        }

        let escalation = match self.threshold {
            Some(threshold) => EscalationPolicy::uniform(threshold)?,
            None => EscalationPolicy::default(),
        };

        let defaults = DetectionPolicy::default();
        let subject_min_score = check_score(
            "subject_min_score",
            self.subject_min_score
                .unwrap_or(defaults.subject_min_score()),
        )?;
        let prohibited_min_score = check_score(
            "prohibited_min_score",
            self.prohibited_min_score
                .unwrap_or(defaults.prohibited_min_score()),
        )?;
        let detection = DetectionPolicy::new(
            defaults.subject_label(),
            subject_min_score,
            defaults.prohibited_labels().to_vec(),
            prohibited_min_score,
        );

        let scoring_base_url = normalize_optional(self.scoring_base_url);
        if let Some(url) = scoring_base_url.as_ref() {
            if Url::parse(url).is_err() {
                return Err(SettingsError::InvalidBaseUrl);
            }
        }

        Ok(ProctoringSettings {
            tick_interval: Duration::from_millis(tick_ms),
            escalation,
            detection,
            scoring_base_url,
            scoring_token: normalize_optional(self.scoring_token),
        })
    }
}

/// Policy constants for a proctored session.
#[derive(Clone, Debug, PartialEq)]
pub struct ProctoringSettings {
    tick_interval: Duration,
    escalation: EscalationPolicy,
    detection: DetectionPolicy,
    scoring_base_url: Option<String>,
    scoring_token: Option<String>,
}

impl ProctoringSettings {
    pub const DEFAULT_TICK_MS: u64 = 4_000;

    /// Defaults overridden by `PROCTOR_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if any variable is malformed.
    pub fn from_env() -> Result<Self, SettingsError> {
        ProctoringSettingsDraft::from_env()?.validate()
    }

    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    #[must_use]
    pub fn escalation(&self) -> &EscalationPolicy {
        &self.escalation
    }

    #[must_use]
    pub fn detection(&self) -> &DetectionPolicy {
        &self.detection
    }

    #[must_use]
    pub fn scoring_base_url(&self) -> Option<&str> {
        self.scoring_base_url.as_deref()
    }

    #[must_use]
    pub fn scoring_token(&self) -> Option<&str> {
        self.scoring_token.as_deref()
    }

    #[must_use]
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    #[must_use]
    pub fn with_escalation(mut self, escalation: EscalationPolicy) -> Self {
        self.escalation = escalation;
        self
    }

    #[must_use]
    pub fn with_detection(mut self, detection: DetectionPolicy) -> Self {
        self.detection = detection;
        self
    }
}

impl Default for ProctoringSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(Self::DEFAULT_TICK_MS),
            escalation: EscalationPolicy::default(),
            detection: DetectionPolicy::default(),
            scoring_base_url: None,
            scoring_token: None,
        }
    }
}

fn check_score(field: &'static str, value: f32) -> Result<f32, SettingsError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(SettingsError::InvalidScore { field, value })
    }
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ViolationChannel;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let settings = ProctoringSettingsDraft::from_lookup(lookup(&[]))
            .unwrap()
            .validate()
            .unwrap();
        assert_eq!(settings, ProctoringSettings::default());
        assert_eq!(settings.tick_interval(), Duration::from_secs(4));
        assert_eq!(
            settings.escalation().threshold(ViolationChannel::TabSwitch),
            3
        );
    }

    #[test]
    fn overrides_are_applied() {
        let settings = ProctoringSettingsDraft::from_lookup(lookup(&[
            ("PROCTOR_TICK_MS", "2000"),
            ("PROCTOR_THRESHOLD", "5"),
            ("PROCTOR_SUBJECT_MIN_SCORE", "0.7"),
            ("PROCTOR_SCORING_URL", " https://lms.example.com/api "),
            ("PROCTOR_SCORING_TOKEN", "   "),
        ]))
        .unwrap()
        .validate()
        .unwrap();

        assert_eq!(settings.tick_interval(), Duration::from_secs(2));
        assert_eq!(
            settings.escalation().threshold(ViolationChannel::ClipboardAttempt),
            5
        );
        assert!((settings.detection().subject_min_score() - 0.7).abs() < f32::EPSILON);
        assert_eq!(settings.scoring_base_url(), Some("https://lms.example.com/api"));
        assert_eq!(settings.scoring_token(), None);
    }

    #[test]
    fn malformed_number_names_the_variable() {
        let err = ProctoringSettingsDraft::from_lookup(lookup(&[("PROCTOR_TICK_MS", "soon")]))
            .unwrap_err();
        assert_eq!(
            err,
            SettingsError::InvalidNumber {
                var: "PROCTOR_TICK_MS",
                raw: "soon".into()
            }
        );
    }

    #[test]
    fn rejects_invalid_values() {
        let zero_tick = ProctoringSettingsDraft {
            tick_interval_ms: Some(0),
            ..Default::default()
        };
        assert_eq!(zero_tick.validate(), Err(SettingsError::InvalidTickInterval));

        let bad_score = ProctoringSettingsDraft {
            prohibited_min_score: Some(1.5),
            ..Default::default()
        };
        assert!(matches!(
            bad_score.validate(),
            Err(SettingsError::InvalidScore { .. })
        ));

        let bad_url = ProctoringSettingsDraft {
            scoring_base_url: Some("not a url".into()),
            ..Default::default()
        };
        assert_eq!(bad_url.validate(), Err(SettingsError::InvalidBaseUrl));
    }
}
