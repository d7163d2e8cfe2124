//! LiveKit access tokens.
//!
//! Used by the token minter CLI for browser test clients, by the agent to join
//! its own rooms, and by the avatar clients to admit the avatar participant.

use crate::config::LiveKitSettings;
use livekit_api::access_token::{AccessToken, AccessTokenError, VideoGrants};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_ROOM: &str = "test-room";
pub const DEFAULT_PARTICIPANT: &str = "user";
pub const PLAYGROUND_URL: &str = "https://agents-playground.livekit.io";
/// Participant attribute naming the identity a participant publishes for.
pub const PUBLISH_ON_BEHALF_ATTRIBUTE: &str = "lk.publish_on_behalf";

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("LiveKit API key and secret are required to sign tokens")]
    MissingCredentials,
    #[error("Failed to sign access token: {0}")]
    Signing(#[from] AccessTokenError),
}

/// Signs room-scoped join tokens with the server's API key pair.
#[derive(Clone, Debug)]
pub struct TokenMinter {
    api_key: String,
    api_secret: SecretString,
}

impl TokenMinter {
    pub fn new(settings: &LiveKitSettings) -> Self {
        Self {
            api_key: settings.api_key.clone(),
            api_secret: settings.api_secret.clone(),
        }
    }

    /// Signs a token that lets `identity` join `room` and publish and
    /// subscribe to media. Without a `ttl` the LiveKit default expiry applies.
    pub fn join_token(
        &self,
        room: &str,
        identity: &str,
        name: &str,
        ttl: Option<Duration>,
    ) -> Result<String, TokenError> {
        self.sign(room, identity, name, ttl, None)
    }

    /// Signs a join token for a participant that publishes media on behalf of
    /// `publisher`, such as an avatar speaking for the agent.
    pub fn on_behalf_token(
        &self,
        room: &str,
        identity: &str,
        name: &str,
        publisher: &str,
    ) -> Result<String, TokenError> {
        self.sign(room, identity, name, None, Some(publisher))
    }

    fn sign(
        &self,
        room: &str,
        identity: &str,
        name: &str,
        ttl: Option<Duration>,
        publisher: Option<&str>,
    ) -> Result<String, TokenError> {
        if self.api_key.is_empty() || self.api_secret.expose_secret().is_empty() {
            return Err(TokenError::MissingCredentials);
        }

        let mut token = AccessToken::with_api_key(&self.api_key, self.api_secret.expose_secret())
            .with_identity(identity)
            .with_name(name)
            .with_grants(VideoGrants {
                room_join: true,
                room: room.to_string(),
                can_publish: true,
                can_subscribe: true,
                ..Default::default()
            });
        if let Some(ttl) = ttl {
            token = token.with_ttl(ttl);
        }
        if let Some(publisher) = publisher {
            token = token.with_attributes([(PUBLISH_ON_BEHALF_ATTRIBUTE, publisher)]);
        }

        Ok(token.to_jwt()?)
    }
}

/// What a human needs to connect a browser client with a minted token.
#[derive(Debug)]
pub struct ConnectionInstructions<'a> {
    pub room: &'a str,
    pub participant: &'a str,
    pub server: &'a str,
    pub token: &'a str,
}

impl fmt::Display for ConnectionInstructions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "LiveKit token generated successfully")?;
        writeln!(f, "Room: {}", self.room)?;
        writeln!(f, "Participant: {}", self.participant)?;
        writeln!(f, "LiveKit URL: {}", self.server)?;
        writeln!(f, "Token: {}", self.token)?;
        writeln!(f)?;
        writeln!(f, "How to use in the playground:")?;
        writeln!(f, "1. Go to: {}", PLAYGROUND_URL)?;
        writeln!(f, "2. Enter URL: {}", self.server)?;
        writeln!(f, "3. Enter Token: {}", self.token)?;
        write!(f, "4. Click Connect and start talking!")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Claims {
        iss: String,
        sub: String,
        name: String,
        exp: u64,
        nbf: u64,
        video: VideoClaims,
    }

    #[derive(Deserialize)]
    struct VideoClaims {
        #[serde(rename = "roomJoin")]
        room_join: bool,
        room: String,
        #[serde(rename = "canPublish")]
        can_publish: bool,
        #[serde(rename = "canSubscribe")]
        can_subscribe: bool,
    }

    fn decode_claims(token: &str, secret: &str) -> Claims {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
            .expect("token should verify with the API secret")
            .claims
    }

    #[test]
    fn test_join_token_grants() {
        let config = test_config();
        let minter = TokenMinter::new(&config.livekit);

        let token = minter
            .join_token("demo", "alice", "alice", None)
            .expect("Failed to generate token");
        assert!(!token.is_empty());

        let claims = decode_claims(&token, config.livekit.api_secret.expose_secret());
        assert_eq!(claims.iss, "APIkey123");
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.name, "alice");
        assert!(claims.video.room_join);
        assert_eq!(claims.video.room, "demo");
        assert!(claims.video.can_publish);
        assert!(claims.video.can_subscribe);
    }

    #[test]
    fn test_join_token_custom_ttl() {
        let config = test_config();
        let minter = TokenMinter::new(&config.livekit);

        let token = minter
            .join_token("demo", "alice", "Alice", Some(Duration::from_secs(600)))
            .unwrap();
        let claims = decode_claims(&token, config.livekit.api_secret.expose_secret());
        assert_eq!(claims.exp - claims.nbf, 600);
    }

    #[test]
    fn test_on_behalf_token_names_the_publisher() {
        let config = test_config();
        let minter = TokenMinter::new(&config.livekit);

        let token = minter
            .on_behalf_token("demo", "agent-1234-avatar", "anam avatar", "agent-1234")
            .unwrap();
        let validation = Validation::new(Algorithm::HS256);
        let claims = decode::<serde_json::Value>(
            &token,
            &DecodingKey::from_secret(config.livekit.api_secret.expose_secret().as_bytes()),
            &validation,
        )
        .unwrap()
        .claims;
        assert_eq!(claims["sub"], "agent-1234-avatar");
        assert_eq!(claims["attributes"][PUBLISH_ON_BEHALF_ATTRIBUTE], "agent-1234");
        assert_eq!(claims["video"]["room"], "demo");

        let plain = minter.join_token("demo", "alice", "alice", None).unwrap();
        let claims = decode::<serde_json::Value>(
            &plain,
            &DecodingKey::from_secret(config.livekit.api_secret.expose_secret().as_bytes()),
            &validation,
        )
        .unwrap()
        .claims;
        assert!(claims["attributes"].get(PUBLISH_ON_BEHALF_ATTRIBUTE).is_none());
    }

    #[test]
    fn test_wrong_secret_does_not_verify() {
        let config = test_config();
        let token = TokenMinter::new(&config.livekit)
            .join_token("demo", "alice", "alice", None)
            .unwrap();
        let validation = Validation::new(Algorithm::HS256);
        let result = decode::<serde_json::Value>(
            &token,
            &DecodingKey::from_secret(b"some-other-secret"),
            &validation,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_credentials_never_sign() {
        let mut config = test_config();
        config.livekit.api_secret = String::new().into();
        let err = TokenMinter::new(&config.livekit)
            .join_token("demo", "alice", "alice", None)
            .unwrap_err();
        assert!(matches!(err, TokenError::MissingCredentials));

        let mut config = test_config();
        config.livekit.api_key = String::new();
        assert!(
            TokenMinter::new(&config.livekit)
                .join_token("demo", "alice", "alice", None)
                .is_err()
        );
    }

    #[test]
    fn test_connection_instructions() {
        let text = ConnectionInstructions {
            room: "demo",
            participant: "alice",
            server: "example.livekit.cloud",
            token: "abc.def.ghi",
        }
        .to_string();
        assert!(text.contains("Room: demo"));
        assert!(text.contains("Participant: alice"));
        assert!(text.contains("2. Enter URL: example.livekit.cloud"));
        assert!(text.contains("3. Enter Token: abc.def.ghi"));
        assert!(text.contains(PLAYGROUND_URL));
    }
}
