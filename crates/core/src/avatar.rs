//! Hosted avatar overlays.
//!
//! An avatar provider renders a talking head for the agent. Starting one means
//! asking the provider's REST API to open a session and send its own
//! participant into the LiveKit room, where it follows the agent's audio.

use crate::config::{AvatarCredentials, AvatarProvider, LiveKitSettings};
use crate::platform::AudioOutput;
use crate::token::{TokenError, TokenMinter};
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum AvatarError {
    #[error("Invalid avatar configuration: {0}")]
    Config(String),
    #[error("Avatar request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{provider} rejected the request with status {status}: {body}")]
    Rejected {
        provider: AvatarProvider,
        status: StatusCode,
        body: String,
    },
    #[error("Unexpected avatar response: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Binds an avatar to one session in one room.
#[derive(Clone, Debug)]
pub struct AvatarBinding {
    pub room: String,
    /// Identity of the agent participant the avatar speaks for.
    pub agent_identity: String,
    /// The session's audio output. A started avatar routes it to itself.
    pub audio: AudioOutput,
}

impl AvatarBinding {
    /// Identity the avatar participant joins with.
    pub fn avatar_identity(&self) -> String {
        format!("{}-avatar", self.agent_identity)
    }
}

/// An avatar overlay that can be started for one agent session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AvatarOverlay: Send + Sync {
    fn provider(&self) -> AvatarProvider;

    async fn start(&self, binding: AvatarBinding) -> Result<(), AvatarError>;

    /// Ends the provider session. A no-op if it never started.
    async fn stop(&self) -> Result<(), AvatarError>;
}

#[derive(Debug)]
enum ProviderSession {
    LiveAvatar {
        session_id: String,
        session_token: SecretString,
    },
    Anam,
}

/// Avatar overlay backed by a provider's REST API.
#[derive(Debug)]
pub struct HostedAvatar {
    provider: AvatarProvider,
    credentials: AvatarCredentials,
    livekit_url: String,
    minter: TokenMinter,
    http: reqwest::Client,
    active: Mutex<Option<ProviderSession>>,
}

impl HostedAvatar {
    pub fn new(
        provider: AvatarProvider,
        credentials: &AvatarCredentials,
        livekit: &LiveKitSettings,
    ) -> Result<Self, AvatarError> {
        reqwest::Url::parse(&credentials.api_url).map_err(|e| {
            AvatarError::Config(format!("{} API URL '{}': {}", provider, credentials.api_url, e))
        })?;
        if credentials.avatar_id.trim().is_empty() {
            return Err(AvatarError::Config(format!("{} avatar id is empty", provider)));
        }
        Ok(Self {
            provider,
            credentials: credentials.clone(),
            livekit_url: livekit.url.clone(),
            minter: TokenMinter::new(livekit),
            http: reqwest::Client::new(),
            active: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.credentials.api_url.trim_end_matches('/'), path)
    }

    async fn send<R: DeserializeOwned>(&self, request: RequestBuilder) -> Result<R, AvatarError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AvatarError::Rejected {
                provider: self.provider,
                status,
                body,
            });
        }
        response
            .json::<R>()
            .await
            .map_err(|e| AvatarError::InvalidResponse(e.to_string()))
    }

    async fn start_liveavatar(
        &self,
        binding: &AvatarBinding,
        token: String,
    ) -> Result<ProviderSession, AvatarError> {
        let request = liveavatar::TokenRequest {
            mode: "CUSTOM",
            avatar_id: &self.credentials.avatar_id,
            livekit_config: liveavatar::LiveKitConfig {
                livekit_url: &self.livekit_url,
                livekit_room: &binding.room,
                livekit_client_token: token,
            },
            agent_identity: &binding.agent_identity,
        };
        let created: liveavatar::TokenResponse = self
            .send(
                self.http
                    .post(self.endpoint("/v1/sessions/token"))
                    .header("X-API-KEY", self.credentials.api_key.expose_secret())
                    .json(&request),
            )
            .await?;
        debug!(session_id = %created.data.session_id, "LiveAvatar session created");

        let _: serde_json::Value = self
            .send(
                self.http
                    .post(self.endpoint("/v1/sessions/start"))
                    .bearer_auth(&created.data.session_token)
                    .json(&serde_json::json!({})),
            )
            .await?;
        Ok(ProviderSession::LiveAvatar {
            session_id: created.data.session_id,
            session_token: created.data.session_token.into(),
        })
    }

    async fn start_anam(
        &self,
        binding: &AvatarBinding,
        token: String,
    ) -> Result<ProviderSession, AvatarError> {
        let request = anam::SessionTokenRequest {
            persona_config: anam::PersonaConfig {
                avatar_id: &self.credentials.avatar_id,
            },
            environment: anam::Environment {
                livekit_url: &self.livekit_url,
                livekit_token: token,
                agent_identity: &binding.agent_identity,
            },
        };
        let created: anam::SessionTokenResponse = self
            .send(
                self.http
                    .post(self.endpoint("/v1/auth/session-token"))
                    .bearer_auth(self.credentials.api_key.expose_secret())
                    .json(&request),
            )
            .await?;

        let _: serde_json::Value = self
            .send(
                self.http
                    .post(self.endpoint("/v1/engine/session"))
                    .bearer_auth(&created.session_token)
                    .json(&serde_json::json!({})),
            )
            .await?;
        Ok(ProviderSession::Anam)
    }
}

#[async_trait]
impl AvatarOverlay for HostedAvatar {
    fn provider(&self) -> AvatarProvider {
        self.provider
    }

    async fn start(&self, binding: AvatarBinding) -> Result<(), AvatarError> {
        let identity = binding.avatar_identity();
        let token = self.minter.on_behalf_token(
            &binding.room,
            &identity,
            &format!("{} avatar", self.provider),
            &binding.agent_identity,
        )?;
        info!(provider = %self.provider, avatar_id = %self.credentials.avatar_id, %identity, "Starting avatar session");

        let session = match self.provider {
            AvatarProvider::LiveAvatar => self.start_liveavatar(&binding, token).await?,
            AvatarProvider::Anam => self.start_anam(&binding, token).await?,
        };
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(session);
        binding.audio.route_to_participant(identity);
        Ok(())
    }

    async fn stop(&self) -> Result<(), AvatarError> {
        let session = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match session {
            Some(ProviderSession::LiveAvatar {
                session_id,
                session_token,
            }) => {
                let _: serde_json::Value = self
                    .send(
                        self.http
                            .post(self.endpoint("/v1/sessions/stop"))
                            .bearer_auth(session_token.expose_secret())
                            .json(&serde_json::json!({ "session_id": session_id })),
                    )
                    .await?;
                info!(%session_id, "LiveAvatar session stopped");
            }
            // Anam's avatar leaves the room with the agent participant.
            Some(ProviderSession::Anam) => debug!("Anam session released"),
            None => {}
        }
        Ok(())
    }
}

mod liveavatar {
    use super::*;

    #[derive(Serialize)]
    pub(super) struct TokenRequest<'a> {
        pub mode: &'static str,
        pub avatar_id: &'a str,
        pub livekit_config: LiveKitConfig<'a>,
        pub agent_identity: &'a str,
    }

    #[derive(Serialize)]
    pub(super) struct LiveKitConfig<'a> {
        pub livekit_url: &'a str,
        pub livekit_room: &'a str,
        pub livekit_client_token: String,
    }

    #[derive(Deserialize)]
    pub(super) struct TokenResponse {
        pub data: SessionData,
    }

    #[derive(Deserialize)]
    pub(super) struct SessionData {
        pub session_id: String,
        pub session_token: String,
    }
}

mod anam {
    use super::*;

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct SessionTokenRequest<'a> {
        pub persona_config: PersonaConfig<'a>,
        pub environment: Environment<'a>,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct PersonaConfig<'a> {
        pub avatar_id: &'a str,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Environment<'a> {
        pub livekit_url: &'a str,
        pub livekit_token: String,
        pub agent_identity: &'a str,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct SessionTokenResponse {
        pub session_token: String,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::platform::AudioRoute;
    use crate::token::PUBLISH_ON_BEHALF_ATTRIBUTE;
    use axum::{
        Json, Router,
        extract::State,
        http::{HeaderMap, StatusCode as HttpStatus},
        routing::post,
    };
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorded {
        calls: Arc<Mutex<Vec<(String, Option<String>, Value)>>>,
    }

    impl Recorded {
        fn push(&self, path: &str, headers: &HeaderMap, auth_header: &str, body: Value) {
            let auth = headers
                .get(auth_header)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            self.calls.lock().unwrap().push((path.to_string(), auth, body));
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn credentials(api_url: String) -> AvatarCredentials {
        AvatarCredentials {
            api_key: "avatar-key".to_string().into(),
            avatar_id: "avatar-123".to_string(),
            api_url,
        }
    }

    fn binding() -> AvatarBinding {
        AvatarBinding {
            room: "call-demo".to_string(),
            agent_identity: "agent-1234".to_string(),
            audio: AudioOutput::default(),
        }
    }

    fn token_claims(token: &str) -> Value {
        let config = test_config();
        jsonwebtoken::decode::<Value>(
            token,
            &jsonwebtoken::DecodingKey::from_secret(
                config.livekit.api_secret.expose_secret().as_bytes(),
            ),
            &jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256),
        )
        .expect("avatar token should verify")
        .claims
    }

    #[tokio::test]
    async fn test_liveavatar_start_flow() {
        let recorded = Recorded::default();
        let router = Router::new()
            .route(
                "/v1/sessions/token",
                post(|State(r): State<Recorded>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    r.push("token", &headers, "x-api-key", body);
                    Json(json!({"data": {"session_id": "sess-1", "session_token": "sess-token"}}))
                }),
            )
            .route(
                "/v1/sessions/start",
                post(|State(r): State<Recorded>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    r.push("start", &headers, "authorization", body);
                    Json(json!({"code": 100}))
                }),
            )
            .route(
                "/v1/sessions/stop",
                post(|State(r): State<Recorded>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    r.push("stop", &headers, "authorization", body);
                    Json(json!({"code": 100}))
                }),
            )
            .with_state(recorded.clone());
        let url = serve(router).await;

        let config = test_config();
        let avatar = HostedAvatar::new(AvatarProvider::LiveAvatar, &credentials(url), &config.livekit)
            .expect("avatar should construct");
        assert_eq!(avatar.provider(), AvatarProvider::LiveAvatar);
        let binding = binding();
        let audio = binding.audio.clone();
        avatar.start(binding).await.expect("avatar should start");
        assert_eq!(
            audio.route(),
            AudioRoute::Participant {
                identity: "agent-1234-avatar".to_string()
            }
        );

        let calls = recorded.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        let (path, auth, body) = &calls[0];
        assert_eq!(path, "token");
        assert_eq!(auth.as_deref(), Some("avatar-key"));
        assert_eq!(body["avatar_id"], "avatar-123");
        assert_eq!(body["agent_identity"], "agent-1234");
        assert_eq!(body["livekit_config"]["livekit_room"], "call-demo");
        assert_eq!(body["livekit_config"]["livekit_url"], "wss://example.livekit.cloud");
        let claims = token_claims(body["livekit_config"]["livekit_client_token"].as_str().unwrap());
        assert_eq!(claims["sub"], "agent-1234-avatar");
        assert_eq!(claims["attributes"][PUBLISH_ON_BEHALF_ATTRIBUTE], "agent-1234");
        let (path, auth, _) = &calls[1];
        assert_eq!(path, "start");
        assert_eq!(auth.as_deref(), Some("Bearer sess-token"));

        avatar.stop().await.expect("avatar should stop");
        avatar.stop().await.expect("second stop is a no-op");
        let calls = recorded.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        let (path, auth, body) = &calls[2];
        assert_eq!(path, "stop");
        assert_eq!(auth.as_deref(), Some("Bearer sess-token"));
        assert_eq!(body["session_id"], "sess-1");
    }

    #[tokio::test]
    async fn test_anam_start_flow() {
        let recorded = Recorded::default();
        let router = Router::new()
            .route(
                "/v1/auth/session-token",
                post(|State(r): State<Recorded>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    r.push("session-token", &headers, "authorization", body);
                    Json(json!({"sessionToken": "anam-session"}))
                }),
            )
            .route(
                "/v1/engine/session",
                post(|State(r): State<Recorded>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    r.push("engine", &headers, "authorization", body);
                    Json(json!({"sessionId": "engine-1"}))
                }),
            )
            .with_state(recorded.clone());
        let url = serve(router).await;

        let config = test_config();
        let avatar = HostedAvatar::new(AvatarProvider::Anam, &credentials(format!("{}/", url)), &config.livekit)
            .unwrap();
        let binding = binding();
        let audio = binding.audio.clone();
        avatar.start(binding).await.expect("avatar should start");
        assert!(matches!(audio.route(), AudioRoute::Participant { .. }));
        avatar.stop().await.expect("Anam stop needs no request");

        let calls = recorded.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        let (_, auth, body) = &calls[0];
        assert_eq!(auth.as_deref(), Some("Bearer avatar-key"));
        assert_eq!(body["personaConfig"]["avatarId"], "avatar-123");
        assert_eq!(body["environment"]["agentIdentity"], "agent-1234");
        let claims = token_claims(body["environment"]["livekitToken"].as_str().unwrap());
        assert_eq!(claims["attributes"][PUBLISH_ON_BEHALF_ATTRIBUTE], "agent-1234");
        let (path, auth, _) = &calls[1];
        assert_eq!(path, "engine");
        assert_eq!(auth.as_deref(), Some("Bearer anam-session"));
    }

    #[tokio::test]
    async fn test_rejected_start_reports_status() {
        let router = Router::new().route(
            "/v1/sessions/token",
            post(|| async { (HttpStatus::UNAUTHORIZED, "invalid api key") }),
        );
        let url = serve(router).await;

        let config = test_config();
        let avatar = HostedAvatar::new(AvatarProvider::LiveAvatar, &credentials(url), &config.livekit)
            .unwrap();
        let binding = binding();
        let audio = binding.audio.clone();
        let err = avatar.start(binding).await.unwrap_err();
        assert_eq!(audio.route(), AudioRoute::RoomTrack);
        match err {
            AvatarError::Rejected { provider, status, body } => {
                assert_eq!(provider, AvatarProvider::LiveAvatar);
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(body, "invalid api key");
            }
            other => panic!("Expected Rejected, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_configuration_fails_construction() {
        let config = test_config();
        let err = HostedAvatar::new(
            AvatarProvider::Anam,
            &credentials("not a url".to_string()),
            &config.livekit,
        )
        .unwrap_err();
        assert!(matches!(err, AvatarError::Config(_)));

        let mut creds = credentials("https://api.anam.ai".to_string());
        creds.avatar_id = " ".to_string();
        assert!(HostedAvatar::new(AvatarProvider::Anam, &creds, &config.livekit).is_err());
    }
}
