//! Provider variants per modality and the startup check that every selected
//! provider can actually be constructed.

use serde::{Deserialize, Serialize};

use crate::config::{AppConfig, ConfigError, ConfigResult, LlmConfig};

const AWS_ENV: &[&str] = &["AWS_ACCESS_KEY_ID", "AWS_PROFILE", "AWS_WEB_IDENTITY_TOKEN_FILE"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAi,
    Groq,
    Aws,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SttProvider {
    Deepgram,
    Aws,
    OpenAi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsProvider {
    OpenAi,
    Groq,
    Aws,
    ElevenLabs,
}

impl LlmProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Groq => "groq",
            LlmProvider::Aws => "aws",
        }
    }

    /// Environment variables any of which supplies the credential.
    pub fn credential_env(self) -> &'static [&'static str] {
        match self {
            LlmProvider::OpenAi => &["OPENAI_API_KEY"],
            LlmProvider::Groq => &["GROQ_API_KEY"],
            LlmProvider::Aws => AWS_ENV,
        }
    }
}

impl SttProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            SttProvider::Deepgram => "deepgram",
            SttProvider::Aws => "aws",
            SttProvider::OpenAi => "openai",
        }
    }

    pub fn credential_env(self) -> &'static [&'static str] {
        match self {
            SttProvider::Deepgram => &["DEEPGRAM_API_KEY"],
            SttProvider::Aws => AWS_ENV,
            SttProvider::OpenAi => &["OPENAI_API_KEY"],
        }
    }
}

impl TtsProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            TtsProvider::OpenAi => "openai",
            TtsProvider::Groq => "groq",
            TtsProvider::Aws => "aws",
            TtsProvider::ElevenLabs => "elevenlabs",
        }
    }

    pub fn credential_env(self) -> &'static [&'static str] {
        match self {
            TtsProvider::OpenAi => &["OPENAI_API_KEY"],
            TtsProvider::Groq => &["GROQ_API_KEY"],
            TtsProvider::Aws => AWS_ENV,
            TtsProvider::ElevenLabs => &["ELEVEN_API_KEY", "ELEVENLABS_API_KEY"],
        }
    }
}

/// Where a provider's credential comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Credential {
    Config,
    Env(&'static str),
    /// A custom endpoint, e.g. a local gateway, handles auth itself.
    CustomEndpoint,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmPlugin {
    pub provider: LlmProvider,
    pub model: String,
    pub base_url: Option<String>,
    pub credential: Credential,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SttPlugin {
    pub provider: SttProvider,
    pub model: Option<String>,
    pub language: String,
    pub credential: Credential,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TtsPlugin {
    pub provider: TtsProvider,
    pub model: String,
    pub voice: String,
    pub voice_id: Option<String>,
    pub credential: Credential,
}

/// Validated provider selection for one worker process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderPlugins {
    pub primary_llm: LlmPlugin,
    pub fast_llm: LlmPlugin,
    pub stt: SttPlugin,
    pub tts: TtsPlugin,
}

impl ProviderPlugins {
    /// Check every configured provider against the process environment.
    pub fn build(config: &AppConfig) -> ConfigResult<Self> {
        Self::build_with_env(config, |key| std::env::var(key).ok())
    }

    pub fn build_with_env(
        config: &AppConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> ConfigResult<Self> {
        let plugins = Self {
            primary_llm: llm_plugin(&config.primary_llm, &env)?,
            fast_llm: llm_plugin(&config.fast_llm, &env)?,
            stt: SttPlugin {
                provider: config.stt.provider,
                model: config.stt.model.clone(),
                language: config.stt.language.clone(),
                credential: resolve_credential(
                    "stt",
                    config.stt.provider.as_str(),
                    config.stt.provider.credential_env(),
                    config.stt.api_key.as_deref(),
                    config.stt.base_url.as_deref(),
                    &env,
                )?,
            },
            tts: TtsPlugin {
                provider: config.tts.provider,
                model: config.tts.model.clone(),
                voice: config.tts.voice.clone(),
                voice_id: config.tts.voice_id.clone(),
                credential: resolve_credential(
                    "tts",
                    config.tts.provider.as_str(),
                    config.tts.provider.credential_env(),
                    config.tts.api_key.as_deref(),
                    config.tts.base_url.as_deref(),
                    &env,
                )?,
            },
        };

        if plugins.tts.provider == TtsProvider::ElevenLabs
            && plugins.tts.voice_id.as_deref().map_or(true, str::is_empty)
        {
            return Err(ConfigError::MissingVoiceId);
        }

        log::debug!(
            "Provider plugins: {}",
            serde_json::to_string(&plugins).unwrap_or_default()
        );
        Ok(plugins)
    }
}

fn llm_plugin(config: &LlmConfig, env: &impl Fn(&str) -> Option<String>) -> ConfigResult<LlmPlugin> {
    Ok(LlmPlugin {
        provider: config.provider,
        model: config.model.clone(),
        base_url: config.base_url.clone(),
        credential: resolve_credential(
            "llm",
            config.provider.as_str(),
            config.provider.credential_env(),
            config.api_key.as_deref(),
            config.base_url.as_deref(),
            env,
        )?,
    })
}

fn resolve_credential(
    modality: &'static str,
    provider: &'static str,
    env_keys: &'static [&'static str],
    api_key: Option<&str>,
    base_url: Option<&str>,
    env: &impl Fn(&str) -> Option<String>,
) -> ConfigResult<Credential> {
    if api_key.is_some_and(|key| !key.is_empty()) {
        return Ok(Credential::Config);
    }
    for &key in env_keys {
        if env(key).is_some_and(|value| !value.is_empty()) {
            return Ok(Credential::Env(key));
        }
    }
    if base_url.is_some_and(|url| !url.is_empty()) {
        return Ok(Credential::CustomEndpoint);
    }
    Err(ConfigError::MissingCredential {
        modality,
        provider,
        env: env_keys,
    })
}
