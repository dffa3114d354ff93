//! Participant token payload decoding.
//!
//! Participant tokens are JWTs. Only the payload segment is read, to learn
//! whether the token pre-dispatches any agents into the room. Signatures are
//! not verified; the server does that.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{error::TokenError, participant::Attributes};

/// Agent dispatch entry in a token's room configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDispatch {
    /// Name of the agent to dispatch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    /// Metadata passed to the dispatched agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

/// Room configuration embedded in a token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomConfig {
    /// Agents dispatched when the participant joins. `null` reads as none.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub agents: Vec<AgentDispatch>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<AgentDispatch>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<AgentDispatch>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Claims read from a participant token.
///
/// Unknown claims are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    /// Participant identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Participant display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Participant metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    /// Participant attributes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
    /// Room configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_config: Option<RoomConfig>,
}

impl TokenPayload {
    /// Number of agents the token dispatches.
    pub fn dispatched_agent_count(&self) -> usize {
        self.room_config.as_ref().map_or(0, |config| config.agents.len())
    }
}

/// Decode the payload claims of a participant token.
///
/// # Errors
///
/// - `TokenError::Malformed` if the token is not three dot-separated segments
/// - `TokenError::Encoding` if the payload is not base64url
/// - `TokenError::Json` if the payload is not a JSON claims object
pub fn decode_token_payload(token: &str) -> Result<TokenPayload, TokenError> {
    let segments: Vec<&str> = token.split('.').collect();
    let [_, payload, _] = segments.as_slice() else {
        return Err(TokenError::Malformed(segments.len()));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| TokenError::Encoding(e.to_string()))?;

    serde_json::from_slice(&bytes).map_err(|e| TokenError::Json(e.to_string()))
}

/// Encode `payload` as an unsigned token.
///
/// Produces the same three-segment shape as a real token with an empty
/// signature. Only useful where the consumer does not verify signatures.
pub fn encode_unsigned_token(payload: &TokenPayload) -> Result<String, TokenError> {
    const HEADER: &str = r#"{"alg":"none","typ":"JWT"}"#;

    let claims = serde_json::to_vec(payload).map_err(|e| TokenError::Json(e.to_string()))?;
    Ok(format!("{}.{}.", URL_SAFE_NO_PAD.encode(HEADER), URL_SAFE_NO_PAD.encode(claims)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_with_claims(json: &str) -> String {
        format!("e30.{}.sig", URL_SAFE_NO_PAD.encode(json))
    }

    #[test]
    fn counts_dispatched_agents() {
        let token = token_with_claims(
            r#"{"sub":"user-1","video":{"roomJoin":true},"roomConfig":{"agents":[{"agentName":"helper"}]}}"#,
        );
        let payload = decode_token_payload(&token).expect("decode");
        assert_eq!(payload.sub.as_deref(), Some("user-1"));
        assert_eq!(payload.dispatched_agent_count(), 1);
        assert_eq!(
            payload.room_config.map(|c| c.agents[0].agent_name.clone()),
            Some(Some("helper".to_string()))
        );
    }

    #[test]
    fn missing_room_config_means_no_agents() {
        let payload = decode_token_payload(&token_with_claims(r#"{"sub":"u"}"#)).expect("decode");
        assert_eq!(payload.dispatched_agent_count(), 0);

        let empty = decode_token_payload(&token_with_claims(r#"{"roomConfig":{}}"#)).expect("decode");
        assert_eq!(empty.dispatched_agent_count(), 0);
    }

    #[test]
    fn null_agent_list_means_no_agents() {
        let claims = r#"{"sub":"u","roomConfig":{"agents":null}}"#;
        let payload = decode_token_payload(&token_with_claims(claims)).expect("decode");
        assert_eq!(payload.dispatched_agent_count(), 0);

        let null_config = token_with_claims(r#"{"roomConfig":null}"#);
        assert_eq!(decode_token_payload(&null_config).map(|p| p.dispatched_agent_count()), Ok(0));
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert_eq!(decode_token_payload("abc"), Err(TokenError::Malformed(1)));
        assert!(matches!(decode_token_payload("a.!!!.c"), Err(TokenError::Encoding(_))));
        let not_json = format!("a.{}.c", URL_SAFE_NO_PAD.encode("nope"));
        assert!(matches!(decode_token_payload(&not_json), Err(TokenError::Json(_))));
    }

    #[test]
    fn unsigned_tokens_decode() {
        let payload = TokenPayload {
            sub: Some("me".into()),
            room_config: Some(RoomConfig { agents: vec![AgentDispatch::default(); 2] }),
            ..TokenPayload::default()
        };
        let token = encode_unsigned_token(&payload).expect("encode");
        assert_eq!(decode_token_payload(&token), Ok(payload));
    }
}
