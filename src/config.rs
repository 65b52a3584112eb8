//! Configuration types.
//!
//! Everything is read from environment variables; each field has a default
//! except the API key. Thresholds the pipeline treats as business policy
//! (freight sizing boundaries, the generic-commodity list) live here rather
//! than at their call sites.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig, RetryPolicy};
use crate::pipeline::types::FreightType;

/// Default generic commodity nouns (lowercase, unqualified).
pub const DEFAULT_GENERIC_COMMODITIES: &[&str] = &[
    "goods",
    "items",
    "products",
    "merchandise",
    "stuff",
    "freight",
    "cargo",
    "materials",
    "things",
    "misc",
    "miscellaneous",
    "general",
];

/// Policy values for freight-type resolution and validation.
#[derive(Debug, Clone)]
pub struct FreightPolicy {
    /// Weights strictly below this (lb) resolve to LTL.
    pub ltl_max_lb: f64,
    /// Weights from `ltl_max_lb` up to and including this (lb) resolve to PARTIAL.
    pub partial_max_lb: f64,
    /// Commodity descriptions that are insufficient on their own.
    pub generic_commodities: Vec<String>,
    /// Freight types where a date-less pickup time blocks materialization.
    pub timing_critical: Vec<FreightType>,
}

impl Default for FreightPolicy {
    fn default() -> Self {
        Self {
            ltl_max_lb: 5_000.0,
            partial_max_lb: 15_000.0,
            generic_commodities: DEFAULT_GENERIC_COMMODITIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timing_critical: vec![FreightType::Reefer, FreightType::Hazmat],
        }
    }
}

impl FreightPolicy {
    pub fn with_thresholds(mut self, ltl_max_lb: f64, partial_max_lb: f64) -> Self {
        self.ltl_max_lb = ltl_max_lb;
        self.partial_max_lb = partial_max_lb;
        self
    }

    pub fn is_generic_commodity(&self, normalized: &str) -> bool {
        self.generic_commodities.iter().any(|g| g == normalized)
    }

    pub fn is_timing_critical(&self, freight_type: FreightType) -> bool {
        self.timing_critical.contains(&freight_type)
    }
}

/// Bounds on the clarification dialogue.
#[derive(Debug, Clone)]
pub struct ClarificationConfig {
    /// Clarification messages sent before a conversation is abandoned.
    pub max_rounds: u32,
    /// How long to wait for a reply before abandoning.
    pub reply_timeout: Duration,
    /// How often the sweeper checks for timed-out requests.
    pub sweep_interval: Duration,
}

impl Default for ClarificationConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            reply_timeout: Duration::from_secs(72 * 3600), // 3 days
            sweep_interval: Duration::from_secs(300),      // 5 minutes
        }
    }
}

/// Classifier settings.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Positive decisions below this confidence go to human review.
    pub min_confidence: f32,
    /// Senders that always go to the text service, bypassing the rules.
    pub always_classify: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            always_classify: Vec::new(),
        }
    }
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    pub llm: LlmConfig,
    pub retry: RetryPolicy,
    pub freight: FreightPolicy,
    pub clarification: ClarificationConfig,
    pub classifier: ClassifierConfig,
    pub db_path: String,
    pub log_dir: Option<String>,
}

impl IntakeConfig {
    /// Build configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend: LlmBackend = match lookup("INTAKE_LLM_BACKEND") {
            Some(raw) => raw.parse().map_err(|message| ConfigError::InvalidValue {
                key: "INTAKE_LLM_BACKEND".into(),
                message,
            })?,
            None => LlmBackend::Anthropic,
        };

        let (key_var, default_model) = match backend {
            LlmBackend::Anthropic => ("ANTHROPIC_API_KEY", "claude-3-5-haiku-latest"),
            LlmBackend::OpenAi => ("OPENAI_API_KEY", "gpt-4o-mini"),
        };
        let api_key = lookup(key_var)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(key_var.to_string()))?;
        let model = lookup("INTAKE_LLM_MODEL").unwrap_or_else(|| default_model.to_string());

        let retry = RetryPolicy {
            timeout: Duration::from_secs(parse_or(&lookup, "INTAKE_LLM_TIMEOUT_SECS", 30u64)?),
            max_attempts: parse_or(&lookup, "INTAKE_LLM_MAX_ATTEMPTS", 3u32)?,
            initial_backoff: Duration::from_millis(parse_or(
                &lookup,
                "INTAKE_LLM_BACKOFF_MS",
                500u64,
            )?),
            ..RetryPolicy::default()
        };
        if retry.max_attempts == 0 {
            return Err(invalid("INTAKE_LLM_MAX_ATTEMPTS", "must be at least 1"));
        }

        let mut freight = FreightPolicy::default();
        freight.ltl_max_lb = parse_or(&lookup, "INTAKE_LTL_MAX_LB", freight.ltl_max_lb)?;
        freight.partial_max_lb =
            parse_or(&lookup, "INTAKE_PARTIAL_MAX_LB", freight.partial_max_lb)?;
        if freight.ltl_max_lb <= 0.0 || freight.partial_max_lb < freight.ltl_max_lb {
            return Err(invalid(
                "INTAKE_PARTIAL_MAX_LB",
                "thresholds must satisfy 0 < LTL max <= PARTIAL max",
            ));
        }
        if let Some(list) = lookup("INTAKE_GENERIC_COMMODITIES") {
            let nouns: Vec<String> = list
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !nouns.is_empty() {
                freight.generic_commodities = nouns;
            }
        }

        let clarification = ClarificationConfig {
            max_rounds: parse_or(&lookup, "INTAKE_MAX_ROUNDS", 3u32)?,
            reply_timeout: Duration::from_secs(
                parse_or(&lookup, "INTAKE_REPLY_TIMEOUT_HOURS", 72u64)? * 3600,
            ),
            sweep_interval: Duration::from_secs(parse_or(
                &lookup,
                "INTAKE_SWEEP_INTERVAL_SECS",
                300u64,
            )?),
        };
        if clarification.max_rounds == 0 {
            return Err(invalid("INTAKE_MAX_ROUNDS", "must be at least 1"));
        }
        if clarification.sweep_interval.is_zero() {
            return Err(invalid("INTAKE_SWEEP_INTERVAL_SECS", "must be at least 1"));
        }

        let min_confidence: f32 = parse_or(&lookup, "INTAKE_MIN_CONFIDENCE", 0.6f32)?;
        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(invalid("INTAKE_MIN_CONFIDENCE", "must be between 0 and 1"));
        }
        let always_classify: Vec<String> = lookup("INTAKE_ALWAYS_CLASSIFY")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            llm: LlmConfig {
                backend,
                api_key: SecretString::from(api_key),
                model,
            },
            retry,
            freight,
            clarification,
            classifier: ClassifierConfig {
                min_confidence,
                always_classify,
            },
            db_path: lookup("INTAKE_DB_PATH")
                .unwrap_or_else(|| "./data/freight-intake.db".to_string()),
            log_dir: lookup("INTAKE_LOG_DIR").filter(|s| !s.trim().is_empty()),
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
        None => Ok(default),
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
