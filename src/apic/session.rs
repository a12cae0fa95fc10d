//! Session establishment. Two deployment modes exist: a standalone run
//! (served from localhost, credentialed login against a configured
//! controller) and an embedded run (hosted on the controller itself, token
//! pair handed off by the hosting side). Session state lives on a
//! `SessionContext` that callers pass explicitly; there is no global token.

use rusqlite::Connection;

use crate::apic::types::LoginAttributes;
use crate::db::{get_setting_conn, set_setting_conn};

/// Settings keys the token pair persists under, matching the cookie names
/// the hosted UI uses.
pub const TOKEN_COOKIE: &str = "app_Cisco_CLUS_token";
pub const URL_TOKEN_COOKIE: &str = "app_Cisco_CLUS_urlToken";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    /// Development run served from localhost; logs in directly.
    Standalone,
    /// Hosted on the controller; tokens arrive from the hosting side.
    Embedded,
}

impl DeploymentMode {
    pub fn detect(app_host: &str) -> Self {
        if app_host.contains("localhost") {
            DeploymentMode::Standalone
        } else {
            DeploymentMode::Embedded
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionTokens {
    pub token: String,
    pub url_token: String,
}

/// Origin of a token hand-off message. Only the parent (hosting) side may
/// update session tokens.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageSource {
    Parent,
    Other(String),
}

/// Token hand-off message: a JSON-encoded `{token, urlToken}` payload pushed
/// by the hosting side in embedded mode.
#[derive(Debug, Clone)]
pub struct TokenMessage {
    pub source: MessageSource,
    pub data: String,
}

/// Parse one line of the embedded token feed. Lines are `<origin> <json>`;
/// the hosting side identifies itself as `parent`.
pub fn parse_token_feed_line(line: &str) -> Option<TokenMessage> {
    let (origin, data) = line.trim().split_once(' ')?;
    let source = match origin {
        "parent" => MessageSource::Parent,
        other => MessageSource::Other(other.to_string()),
    };
    Some(TokenMessage {
        source,
        data: data.trim_start().to_string(),
    })
}

/// Session state for one run. Queries carry these tokens; when none are
/// present the query goes out unauthenticated and the controller rejects it.
#[derive(Debug, Clone)]
pub struct SessionContext {
    mode: DeploymentMode,
    tokens: Option<SessionTokens>,
}

impl SessionContext {
    pub fn new(mode: DeploymentMode) -> Self {
        Self { mode, tokens: None }
    }

    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    pub fn tokens(&self) -> Option<&SessionTokens> {
        self.tokens.as_ref()
    }

    pub fn has_tokens(&self) -> bool {
        self.tokens.is_some()
    }

    pub fn set_tokens(&mut self, attributes: LoginAttributes) {
        self.tokens = Some(SessionTokens {
            token: attributes.token,
            url_token: attributes.url_token,
        });
    }

    /// Embedded-mode token hand-off. Messages from any source other than the
    /// parent leave session state unchanged, as does an undecodable payload.
    /// Accepted tokens are persisted under the cookie-name settings keys.
    /// Returns whether the message was accepted.
    pub fn accept_token_message(&mut self, message: &TokenMessage, conn: &Connection) -> bool {
        if message.source != MessageSource::Parent {
            log::debug!("ignoring token message from source {:?}", message.source);
            return false;
        }
        let Ok(attributes) = serde_json::from_str::<LoginAttributes>(&message.data) else {
            log::debug!("ignoring undecodable token message");
            return false;
        };
        self.set_tokens(attributes);
        if let Err(e) = self.persist(conn) {
            log::error!("Failed to persist session tokens: {}", e);
        }
        true
    }

    /// Store the current token pair under the cookie-name settings keys.
    pub fn persist(&self, conn: &Connection) -> Result<(), rusqlite::Error> {
        if let Some(tokens) = &self.tokens {
            set_setting_conn(conn, TOKEN_COOKIE, &tokens.token)?;
            set_setting_conn(conn, URL_TOKEN_COOKIE, &tokens.url_token)?;
        }
        Ok(())
    }

    /// Load a previously persisted token pair (the page-load path in the
    /// hosted UI). Returns whether a complete pair was found.
    pub fn restore(&mut self, conn: &Connection) -> bool {
        let token = get_setting_conn(conn, TOKEN_COOKIE);
        let url_token = get_setting_conn(conn, URL_TOKEN_COOKIE);
        match (token, url_token) {
            (Some(token), Some(url_token)) => {
                self.tokens = Some(SessionTokens { token, url_token });
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::new_test_connection;

    fn token_json(token: &str, url_token: &str) -> String {
        format!("{{\"token\":\"{}\",\"urlToken\":\"{}\"}}", token, url_token)
    }

    #[test]
    fn test_detect_mode_by_host() {
        assert_eq!(
            DeploymentMode::detect("localhost"),
            DeploymentMode::Standalone
        );
        assert_eq!(
            DeploymentMode::detect("localhost:8080"),
            DeploymentMode::Standalone
        );
        assert_eq!(
            DeploymentMode::detect("apic1.example.com"),
            DeploymentMode::Embedded
        );
    }

    #[test]
    fn test_accept_token_message_from_parent() {
        let conn = new_test_connection();
        let mut session = SessionContext::new(DeploymentMode::Embedded);

        let message = TokenMessage {
            source: MessageSource::Parent,
            data: token_json("tok-1", "url-tok-1"),
        };
        assert!(session.accept_token_message(&message, &conn));

        let tokens = session.tokens().unwrap();
        assert_eq!(tokens.token, "tok-1");
        assert_eq!(tokens.url_token, "url-tok-1");

        // Accepted tokens are persisted under the cookie names
        assert_eq!(
            get_setting_conn(&conn, TOKEN_COOKIE),
            Some("tok-1".to_string())
        );
        assert_eq!(
            get_setting_conn(&conn, URL_TOKEN_COOKIE),
            Some("url-tok-1".to_string())
        );
    }

    #[test]
    fn test_token_message_from_non_parent_leaves_session_unchanged() {
        let conn = new_test_connection();
        let mut session = SessionContext::new(DeploymentMode::Embedded);
        session.set_tokens(LoginAttributes {
            token: "old-tok".to_string(),
            url_token: "old-url-tok".to_string(),
        });

        let message = TokenMessage {
            source: MessageSource::Other("sibling-frame".to_string()),
            data: token_json("new-tok", "new-url-tok"),
        };
        assert!(!session.accept_token_message(&message, &conn));

        let tokens = session.tokens().unwrap();
        assert_eq!(tokens.token, "old-tok");
        assert_eq!(tokens.url_token, "old-url-tok");
        assert_eq!(get_setting_conn(&conn, TOKEN_COOKIE), None);
    }

    #[test]
    fn test_undecodable_token_message_ignored() {
        let conn = new_test_connection();
        let mut session = SessionContext::new(DeploymentMode::Embedded);

        let message = TokenMessage {
            source: MessageSource::Parent,
            data: "not json".to_string(),
        };
        assert!(!session.accept_token_message(&message, &conn));
        assert!(!session.has_tokens());
    }

    #[test]
    fn test_persist_and_restore_roundtrip() {
        let conn = new_test_connection();
        let mut session = SessionContext::new(DeploymentMode::Embedded);
        session.set_tokens(LoginAttributes {
            token: "tok-1".to_string(),
            url_token: "url-tok-1".to_string(),
        });
        session.persist(&conn).unwrap();

        let mut restored = SessionContext::new(DeploymentMode::Embedded);
        assert!(restored.restore(&conn));
        assert_eq!(restored.tokens(), session.tokens());
    }

    #[test]
    fn test_parse_token_feed_line() {
        let message = parse_token_feed_line("parent {\"token\":\"t\",\"urlToken\":\"u\"}").unwrap();
        assert_eq!(message.source, MessageSource::Parent);
        assert_eq!(message.data, "{\"token\":\"t\",\"urlToken\":\"u\"}");

        let message = parse_token_feed_line("sibling {}").unwrap();
        assert_eq!(message.source, MessageSource::Other("sibling".to_string()));

        assert!(parse_token_feed_line("").is_none());
        assert!(parse_token_feed_line("no-payload").is_none());
    }

    #[test]
    fn test_restore_requires_complete_pair() {
        let conn = new_test_connection();
        set_setting_conn(&conn, TOKEN_COOKIE, "tok-only").unwrap();

        let mut session = SessionContext::new(DeploymentMode::Embedded);
        assert!(!session.restore(&conn));
        assert!(!session.has_tokens());
    }
}
