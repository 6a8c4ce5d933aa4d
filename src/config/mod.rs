use std::time::Duration;
use url::Url;

use crate::cli::Args;
use crate::error::ConfigError;
use crate::llm::EndpointConfig;
use crate::progress::{ ProgressConfig, MAX_SIMULATED_PROGRESS };
use crate::segment::{ EssayRouting, LengthBasis };

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryBackend {
    Memory,
    Redis {
        url: String,
        prefix: String,
    },
}

/// Model selection and request parameters for dispatches.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    pub chat_model: String,
    pub vision_model: String,
    pub image_model: String,
    pub temperature: f32,
    pub chat_max_tokens: u32,
    pub essay_max_tokens: u32,
    pub essay: EssayRouting,
    pub image_caption: String,
    pub progress: ProgressConfig,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            chat_model: "gpt-4o-mini".to_string(),
            vision_model: "gpt-4o".to_string(),
            image_model: "stable-diffusion".to_string(),
            temperature: 0.7,
            chat_max_tokens: 1000,
            essay_max_tokens: 2000,
            essay: EssayRouting::default(),
            image_caption: "Here is your generated image:".to_string(),
            progress: ProgressConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub chat_endpoint: EndpointConfig,
    pub image_endpoint: EndpointConfig,
    pub history: HistoryBackend,
    pub user_id: String,
    pub dispatch: DispatchSettings,
}

impl Settings {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        check_url("chat endpoint", &args.chat_endpoint)?;
        check_url("image endpoint", &args.image_endpoint)?;

        if !(0.0..=2.0).contains(&args.temperature) {
            return Err(ConfigError::Temperature(args.temperature));
        }
        if args.progress_ceiling > MAX_SIMULATED_PROGRESS {
            return Err(ConfigError::ProgressCeiling(args.progress_ceiling));
        }
        if args.progress_max_step == 0 {
            return Err(ConfigError::ProgressStep);
        }

        let basis = parse_length_basis(&args.essay_length_basis)?;
        let history = match args.history_type.to_lowercase().as_str() {
            "memory" => HistoryBackend::Memory,
            "redis" => {
                check_url("history host", &args.history_host)?;
                HistoryBackend::Redis {
                    url: args.history_host.clone(),
                    prefix: args.history_redis_prefix.clone(),
                }
            }
            other => {
                return Err(ConfigError::HistoryType(other.to_string()));
            }
        };

        Ok(Self {
            chat_endpoint: EndpointConfig::new(&args.chat_endpoint, Some(args.chat_api_key.clone())),
            image_endpoint: EndpointConfig::new(&args.image_endpoint, Some(args.image_api_key.clone())),
            history,
            user_id: args.user_id.clone(),
            dispatch: DispatchSettings {
                chat_model: args.chat_model.clone(),
                vision_model: args.vision_model.clone(),
                image_model: args.image_model.clone(),
                temperature: args.temperature,
                chat_max_tokens: args.chat_max_tokens,
                essay_max_tokens: args.essay_max_tokens,
                essay: EssayRouting {
                    threshold: args.essay_threshold,
                    basis,
                },
                image_caption: args.image_caption.clone(),
                progress: ProgressConfig {
                    tick: Duration::from_millis(args.progress_tick_ms),
                    max_step: args.progress_max_step,
                    ceiling: args.progress_ceiling,
                    seed: None,
                },
            },
        })
    }
}

fn check_url(name: &'static str, value: &str) -> Result<(), ConfigError> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|source| ConfigError::InvalidUrl { name, value: value.to_string(), source })
}

fn parse_length_basis(value: &str) -> Result<LengthBasis, ConfigError> {
    match value.to_lowercase().as_str() {
        "prose" => Ok(LengthBasis::Prose),
        "raw" => Ok(LengthBasis::Raw),
        _ => Err(ConfigError::LengthBasis(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["chat-orchestrator"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults_match_dispatch_defaults() {
        let settings = Settings::from_args(&args(&[])).unwrap();
        let defaults = DispatchSettings::default();
        assert_eq!(settings.dispatch.chat_max_tokens, defaults.chat_max_tokens);
        assert_eq!(settings.dispatch.essay_max_tokens, defaults.essay_max_tokens);
        assert_eq!(settings.dispatch.essay, defaults.essay);
        assert_eq!(settings.history, HistoryBackend::Memory);
        assert!(settings.chat_endpoint.api_key.is_none());
    }

    #[test]
    fn test_default_endpoints() {
        let settings = Settings::from_args(&args(&[])).unwrap();
        assert_eq!(settings.chat_endpoint.url, crate::llm::chat::openai::DEFAULT_CHAT_ENDPOINT);
        assert_eq!(settings.image_endpoint.url, crate::llm::image::DEFAULT_IMAGE_ENDPOINT);
    }

    #[test]
    fn test_redis_backend_and_raw_basis() {
        let settings = Settings::from_args(
            &args(&["--history-type", "Redis", "--essay-length-basis", "raw", "--chat-api-key", "sk-1"])
        ).unwrap();
        assert!(matches!(settings.history, HistoryBackend::Redis { .. }));
        assert_eq!(settings.dispatch.essay.basis, LengthBasis::Raw);
        assert_eq!(settings.chat_endpoint.api_key.as_deref(), Some("sk-1"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            Settings::from_args(&args(&["--temperature", "3.5"])),
            Err(ConfigError::Temperature(_))
        ));
        assert!(matches!(
            Settings::from_args(&args(&["--progress-ceiling", "95"])),
            Err(ConfigError::ProgressCeiling(95))
        ));
        assert!(matches!(
            Settings::from_args(&args(&["--chat-endpoint", "nope"])),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(matches!(
            Settings::from_args(&args(&["--history-type", "qdrant"])),
            Err(ConfigError::HistoryType(_))
        ));
        assert!(matches!(
            Settings::from_args(&args(&["--essay-length-basis", "words"])),
            Err(ConfigError::LengthBasis(_))
        ));
    }
}
