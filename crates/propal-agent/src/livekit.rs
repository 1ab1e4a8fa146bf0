use std::time::Duration;

use livekit_api::access_token::{AccessToken, VideoGrants};

use crate::config::LiveKitConfig;
use crate::error::AgentError;

/// Identity the agent uses when it joins a room.
pub const AGENT_IDENTITY: &str = "propal-agent";

/// Issues LiveKit access tokens for conversation rooms.
#[derive(Debug, Clone)]
pub struct RoomTokens {
    config: LiveKitConfig,
}

impl RoomTokens {
    pub fn new(config: LiveKitConfig) -> Self {
        Self { config }
    }

    pub fn is_configured(&self) -> bool {
        self.config.has_credentials()
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Signs a token allowing `identity` to join `room_name` and exchange
    /// audio and data.
    pub fn join_token(
        &self,
        room_name: &str,
        identity: &str,
        display_name: &str,
    ) -> Result<String, AgentError> {
        if !self.is_configured() {
            return Err(AgentError::LiveKitNotConfigured);
        }

        let token = AccessToken::with_api_key(&self.config.api_key, &self.config.api_secret)
            .with_identity(identity)
            .with_name(display_name)
            .with_grants(VideoGrants {
                room_join: true,
                room: room_name.to_string(),
                can_publish: true,
                can_subscribe: true,
                can_publish_data: true,
                ..Default::default()
            })
            .with_ttl(Duration::from_secs(self.config.token_ttl_seconds));

        Ok(token.to_jwt()?)
    }

    /// Token for the agent itself to join `room_name`.
    pub fn agent_join_token(&self, room_name: &str) -> Result<String, AgentError> {
        self.join_token(room_name, AGENT_IDENTITY, "proPAL Voice Agent")
    }
}
