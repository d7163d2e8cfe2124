//! Environment-driven configuration.
//!
//! Everything the agent and the token minter need is read once at startup
//! into an immutable [`Config`]. Callers hold it behind an `Arc` and hand it
//! to whatever builds sessions; nothing here is global.

use secrecy::SecretString;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_VOICE: &str = "Charon";
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_AGENT_NAME: &str = "Aram Voice Assistant";
pub const DEFAULT_ROOM_PREFIX: &str = "call-";
pub const DEFAULT_ANAM_API_URL: &str = "https://api.anam.ai";
pub const DEFAULT_LIVEAVATAR_API_URL: &str = "https://api.liveavatar.com";

/// The bundled persona used when `AGENT_INSTRUCTIONS_PATH` is not set.
pub const DEFAULT_INSTRUCTIONS: &str = include_str!("../prompts/persona.yaml");

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "Missing required environment variables: {}. Please check the .env file.",
        .0.join(", ")
    )]
    MissingVar(Vec<&'static str>),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Credentials and endpoint for the LiveKit server.
#[derive(Clone, Debug)]
pub struct LiveKitSettings {
    pub url: String,
    pub api_key: String,
    pub api_secret: SecretString,
}

impl LiveKitSettings {
    /// The server URL without its `ws://`/`wss://` scheme, as the LiveKit
    /// playground expects it.
    pub fn display_url(&self) -> &str {
        self.url
            .strip_prefix("wss://")
            .or_else(|| self.url.strip_prefix("ws://"))
            .unwrap_or(&self.url)
    }
}

/// Parameters for the Gemini realtime model.
#[derive(Clone)]
pub struct ModelSettings {
    pub api_key: SecretString,
    pub model: String,
    pub voice: String,
    pub temperature: f32,
    pub instructions: String,
}

impl fmt::Debug for ModelSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSettings")
            .field("api_key", &self.api_key)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("temperature", &self.temperature)
            .field("instructions", &format_args!("<{} bytes>", self.instructions.len()))
            .finish()
    }
}

/// Display name of the agent and the prefix for rooms it creates.
#[derive(Clone, Debug)]
pub struct AgentIdentity {
    pub name: String,
    pub room_prefix: String,
}

impl AgentIdentity {
    /// A fresh room name, e.g. `call-1f3a9c0d`.
    pub fn new_room_name(&self) -> String {
        format!("{}{}", self.room_prefix, short_id())
    }

    /// A fresh participant identity for one agent session.
    pub fn new_participant_identity(&self) -> String {
        format!("agent-{}", short_id())
    }
}

pub(crate) fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// The hosted avatar services the agent can drive.
///
/// The order of [`AvatarProvider::ALL`] is the preference order used when
/// `AVATAR_PROVIDER` is not set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AvatarProvider {
    LiveAvatar,
    Anam,
}

impl AvatarProvider {
    pub const ALL: [AvatarProvider; 2] = [AvatarProvider::LiveAvatar, AvatarProvider::Anam];

    pub fn as_str(&self) -> &'static str {
        match self {
            AvatarProvider::LiveAvatar => "liveavatar",
            AvatarProvider::Anam => "anam",
        }
    }
}

impl fmt::Display for AvatarProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AvatarProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "liveavatar" | "live-avatar" | "live_avatar" => Ok(AvatarProvider::LiveAvatar),
            "anam" => Ok(AvatarProvider::Anam),
            other => Err(format!(
                "'{}' is not a known avatar provider (expected 'anam' or 'liveavatar')",
                other
            )),
        }
    }
}

/// API credentials for one avatar provider. Only built when both the key and
/// the avatar id are present.
#[derive(Clone, Debug)]
pub struct AvatarCredentials {
    pub api_key: SecretString,
    pub avatar_id: String,
    pub api_url: String,
}

/// Optional avatar overlay configuration.
#[derive(Clone, Debug, Default)]
pub struct AvatarSettings {
    /// Explicit selector from `AVATAR_PROVIDER`.
    pub provider: Option<AvatarProvider>,
    pub liveavatar: Option<AvatarCredentials>,
    pub anam: Option<AvatarCredentials>,
}

impl AvatarSettings {
    pub fn credentials(&self, provider: AvatarProvider) -> Option<&AvatarCredentials> {
        match provider {
            AvatarProvider::LiveAvatar => self.liveavatar.as_ref(),
            AvatarProvider::Anam => self.anam.as_ref(),
        }
    }

    /// The provider to start, if any.
    ///
    /// With a selector, that provider is used only if its credentials are
    /// present. Without one, the first provider in [`AvatarProvider::ALL`]
    /// with credentials wins.
    pub fn selected(&self) -> Option<(AvatarProvider, &AvatarCredentials)> {
        match self.provider {
            Some(provider) => self.credentials(provider).map(|c| (provider, c)),
            None => AvatarProvider::ALL
                .into_iter()
                .find_map(|p| self.credentials(p).map(|c| (p, c))),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub livekit: LiveKitSettings,
    pub model: ModelSettings,
    pub agent: AgentIdentity,
    pub avatar: AvatarSettings,
}

/// Reads a variable, treating unset and blank values alike.
fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn avatar_credentials(key_var: &str, id_var: &str, url_var: &str, default_url: &str) -> Option<AvatarCredentials> {
    let api_key = var(key_var)?;
    let avatar_id = var(id_var)?;
    Some(AvatarCredentials {
        api_key: api_key.into(),
        avatar_id,
        api_url: var(url_var).unwrap_or_else(|| default_url.to_string()),
    })
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let livekit_url = var("LIVEKIT_URL");
        let livekit_api_key = var("LIVEKIT_API_KEY");
        let livekit_api_secret = var("LIVEKIT_API_SECRET");
        let gemini_api_key = var("GEMINI_API_KEY").or_else(|| var("GOOGLE_API_KEY"));

        let (Some(url), Some(api_key), Some(api_secret), Some(gemini_api_key)) = (
            livekit_url.as_ref(),
            livekit_api_key.as_ref(),
            livekit_api_secret.as_ref(),
            gemini_api_key.as_ref(),
        ) else {
            let missing = [
                ("LIVEKIT_URL", livekit_url.is_none()),
                ("LIVEKIT_API_KEY", livekit_api_key.is_none()),
                ("LIVEKIT_API_SECRET", livekit_api_secret.is_none()),
                ("GEMINI_API_KEY (or GOOGLE_API_KEY)", gemini_api_key.is_none()),
            ]
            .into_iter()
            .filter_map(|(name, is_missing)| is_missing.then_some(name))
            .collect();
            return Err(ConfigError::MissingVar(missing));
        };

        let temperature = match var("GEMINI_TEMPERATURE") {
            Some(raw) => match raw.trim().parse::<f32>() {
                Ok(t) if t.is_finite() => t,
                _ => {
                    return Err(ConfigError::InvalidValue(
                        "GEMINI_TEMPERATURE".to_string(),
                        format!("'{}' is not a valid number", raw),
                    ));
                }
            },
            None => DEFAULT_TEMPERATURE,
        };

        let instructions = match var("AGENT_INSTRUCTIONS_PATH") {
            Some(path) => std::fs::read_to_string(&path).map_err(|e| {
                ConfigError::InvalidValue(
                    "AGENT_INSTRUCTIONS_PATH".to_string(),
                    format!("could not read '{}': {}", path, e),
                )
            })?,
            None => DEFAULT_INSTRUCTIONS.to_string(),
        };

        let provider = var("AVATAR_PROVIDER")
            .map(|raw| raw.parse::<AvatarProvider>())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue("AVATAR_PROVIDER".to_string(), e))?;

        Ok(Self {
            livekit: LiveKitSettings {
                url: url.clone(),
                api_key: api_key.clone(),
                api_secret: api_secret.clone().into(),
            },
            model: ModelSettings {
                api_key: gemini_api_key.clone().into(),
                model: var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                voice: var("GEMINI_VOICE").unwrap_or_else(|| DEFAULT_VOICE.to_string()),
                temperature,
                instructions,
            },
            agent: AgentIdentity {
                name: var("AGENT_NAME").unwrap_or_else(|| DEFAULT_AGENT_NAME.to_string()),
                room_prefix: var("ROOM_PREFIX").unwrap_or_else(|| DEFAULT_ROOM_PREFIX.to_string()),
            },
            avatar: AvatarSettings {
                provider,
                liveavatar: avatar_credentials(
                    "LIVEAVATAR_API_KEY",
                    "AVATAR_ID",
                    "LIVEAVATAR_API_URL",
                    DEFAULT_LIVEAVATAR_API_URL,
                ),
                anam: avatar_credentials(
                    "ANAM_API_KEY",
                    "ANAM_AVATAR_ID",
                    "ANAM_API_URL",
                    DEFAULT_ANAM_API_URL,
                ),
            },
        })
    }
}
