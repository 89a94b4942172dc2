use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use voice_metrics::{CostEstimator, CostModel, SeriesLabels};

use crate::providers::{LlmProvider, SttProvider, TtsProvider};

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{modality} provider {provider} needs a credential: set api_key or one of {env:?}")]
    MissingCredential {
        modality: &'static str,
        provider: &'static str,
        env: &'static [&'static str],
    },

    #[error("elevenlabs tts requires voice_id")]
    MissingVoiceId,

    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub cost_per_input_token: f64,
    #[serde(default)]
    pub cost_per_output_token: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SttConfig {
    pub provider: SttProvider,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub cost_per_second: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TtsConfig {
    pub provider: TtsProvider,
    pub model: String,
    pub voice: String,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub cost_per_character: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VadConfig {
    pub min_silence_duration: f64,
    pub activation_threshold: f64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            min_silence_duration: 0.3,
            activation_threshold: 0.4,
        }
    }
}

/// How this process exposes its registry to the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    pub listen_port: u16,
    pub publish_dir: Option<PathBuf>,
    pub publish_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            listen_port: 9200,
            publish_dir: None,
            publish_interval_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub agent_type: String,
    pub registry: RegistryConfig,
    pub primary_llm: LlmConfig,
    pub fast_llm: LlmConfig,
    pub stt: SttConfig,
    pub tts: TtsConfig,
    pub vad: VadConfig,
}

fn default_language() -> String {
    "en-US".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agent_type: "fast-preresponse".to_string(),
            registry: RegistryConfig::default(),
            primary_llm: LlmConfig {
                provider: LlmProvider::OpenAi,
                model: "openai-gpt-4o".to_string(),
                base_url: None,
                api_key: None,
                cost_per_input_token: 0.005 / 1000.0,
                cost_per_output_token: 0.015 / 1000.0,
            },
            fast_llm: LlmConfig {
                provider: LlmProvider::OpenAi,
                model: "google-gemini-2.5-flash-lite".to_string(),
                base_url: None,
                api_key: None,
                cost_per_input_token: 0.05 / 1_000_000.0,
                cost_per_output_token: 0.05 / 1_000_000.0,
            },
            stt: SttConfig {
                provider: SttProvider::Deepgram,
                model: Some("nova-3".to_string()),
                language: default_language(),
                api_key: None,
                base_url: None,
                cost_per_second: 0.00499 / 60.0,
            },
            tts: TtsConfig {
                provider: TtsProvider::OpenAi,
                model: "tts-1-hd".to_string(),
                voice: "alloy".to_string(),
                voice_id: None,
                api_key: None,
                base_url: None,
                cost_per_character: 0.015 / 1000.0,
            },
            vad: VadConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path` when given, otherwise start from the defaults; then
    /// apply environment overrides.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str::<AppConfig>(&content).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => AppConfig::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Nested keys use `__`, e.g. `PRIMARY_LLM__MODEL`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(agent_type) = lookup("AGENT_TYPE") {
            self.agent_type = agent_type;
        }
        if let Some(model) = lookup("PRIMARY_LLM__MODEL") {
            self.primary_llm.model = model;
        }
        if let Some(base_url) = lookup("PRIMARY_LLM__BASE_URL") {
            self.primary_llm.base_url = Some(base_url);
        }
        if let Some(model) = lookup("FAST_LLM__MODEL") {
            self.fast_llm.model = model;
        }
        if let Some(base_url) = lookup("FAST_LLM__BASE_URL") {
            self.fast_llm.base_url = Some(base_url);
        }
        if let Some(language) = lookup("STT__LANGUAGE") {
            self.stt.language = language;
        }
        if let Some(voice) = lookup("TTS__VOICE") {
            self.tts.voice = voice;
        }
        if let Some(voice_id) = lookup("TTS__VOICE_ID") {
            self.tts.voice_id = Some(voice_id);
        }
        if let Some(dir) = lookup("REGISTRY__PUBLISH_DIR") {
            self.registry.publish_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.agent_type.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "agent_type",
                reason: "must not be empty".to_string(),
            });
        }
        for (field, model) in [
            ("primary_llm.model", &self.primary_llm.model),
            ("fast_llm.model", &self.fast_llm.model),
            ("tts.model", &self.tts.model),
        ] {
            if model.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must not be empty".to_string(),
                });
            }
        }

        let rates = [
            ("primary_llm.cost_per_input_token", self.primary_llm.cost_per_input_token),
            ("primary_llm.cost_per_output_token", self.primary_llm.cost_per_output_token),
            ("fast_llm.cost_per_input_token", self.fast_llm.cost_per_input_token),
            ("fast_llm.cost_per_output_token", self.fast_llm.cost_per_output_token),
            ("stt.cost_per_second", self.stt.cost_per_second),
            ("tts.cost_per_character", self.tts.cost_per_character),
        ];
        for (field, rate) in rates {
            if !rate.is_finite() || rate < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("rate {} is not a non-negative number", rate),
                });
            }
        }

        if self.registry.publish_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "registry.publish_interval_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn series_labels(&self) -> SeriesLabels {
        SeriesLabels {
            agent_type: self.agent_type.clone(),
            llm_model: self.primary_llm.model.clone(),
            fast_llm_model: self.fast_llm.model.clone(),
            stt_provider: self.stt.provider.as_str().to_string(),
            tts_provider: self.tts.provider.as_str().to_string(),
        }
    }

    /// Rates for the primary model and the configured speech providers.
    pub fn cost_estimator(&self) -> CostEstimator {
        CostEstimator::new(
            CostModel {
                cost_per_input_token: self.primary_llm.cost_per_input_token,
                cost_per_output_token: self.primary_llm.cost_per_output_token,
                ..CostModel::default()
            },
            CostModel {
                cost_per_second: self.stt.cost_per_second,
                ..CostModel::default()
            },
            CostModel {
                cost_per_character: self.tts.cost_per_character,
                ..CostModel::default()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_deployment_rates() {
        let config = AppConfig::default();
        assert_eq!(config.agent_type, "fast-preresponse");
        assert!((config.primary_llm.cost_per_input_token - 0.000005).abs() < 1e-15);
        assert!((config.primary_llm.cost_per_output_token - 0.000015).abs() < 1e-15);
        assert_eq!(config.stt.model.as_deref(), Some("nova-3"));
        assert_eq!(config.tts.voice, "alloy");
        assert!(config.validate().is_ok());

        let labels = config.series_labels();
        assert_eq!(labels.stt_provider, "deepgram");
        assert_eq!(labels.tts_provider, "openai");
        assert_eq!(labels.fast_llm_model, "google-gemini-2.5-flash-lite");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("worker.toml");
        std::fs::write(
            &path,
            r#"
agent_type = "support-line"

[registry]
publish_dir = "/var/run/voice-metrics"

[tts]
provider = "elevenlabs"
model = "eleven_turbo_v2_5"
voice = "rachel"
voice_id = "21m00Tcm4TlvDq8ikWAM"
cost_per_character = 0.00003
"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();

        assert_eq!(config.tts.provider, TtsProvider::ElevenLabs);
        assert_eq!(config.tts.voice_id.as_deref(), Some("21m00Tcm4TlvDq8ikWAM"));
        assert_eq!(config.registry.listen_port, 9200);
        assert_eq!(
            config.registry.publish_dir,
            Some(PathBuf::from("/var/run/voice-metrics"))
        );
        assert_eq!(config.primary_llm.model, "openai-gpt-4o");
    }

    #[test]
    fn test_unknown_provider_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("worker.toml");
        std::fs::write(
            &path,
            r#"
[stt]
provider = "whisper-local"
"#,
        )
        .unwrap();

        assert!(matches!(
            AppConfig::load(Some(&path)),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            AppConfig::load(Some(&dir.path().join("absent.toml"))),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_env_overrides_use_nested_keys() {
        let env: HashMap<&str, &str> = [
            ("AGENT_TYPE", "night-shift"),
            ("PRIMARY_LLM__MODEL", "groq-llama-3.3-70b"),
            ("TTS__VOICE_ID", "voice-123"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env_overrides(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.agent_type, "night-shift");
        assert_eq!(config.primary_llm.model, "groq-llama-3.3-70b");
        assert_eq!(config.tts.voice_id.as_deref(), Some("voice-123"));
        assert_eq!(config.fast_llm.model, "google-gemini-2.5-flash-lite");
    }

    #[test]
    fn test_negative_rate_is_rejected() {
        let mut config = AppConfig::default();
        config.stt.cost_per_second = -0.1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "stt.cost_per_second",
                ..
            })
        ));
    }

    #[test]
    fn test_cost_estimator_uses_primary_model_rates() {
        let estimator = AppConfig::default().cost_estimator();
        assert_eq!(estimator.llm.cost_per_input_token, 0.005 / 1000.0);
        assert_eq!(estimator.stt.cost_per_second, 0.00499 / 60.0);
        assert_eq!(estimator.tts.cost_per_character, 0.015 / 1000.0);
        assert_eq!(estimator.llm.cost_per_second, 0.0);
    }
}
