// Handshake authentication for the real-time endpoint
//
// Session issuance is owned by an external service; this boundary only
// checks the token it minted. With SYNC_AUTH_TOKEN set, tokens have the
// shape "<secret>.<user_id>". With no secret configured the token is
// trusted as the user id itself, which is acceptable for development only.

use tracing::warn;

#[derive(Clone)]
pub struct Authenticator {
    shared_secret: Option<String>,
}

impl Authenticator {
    pub fn new(shared_secret: Option<String>) -> Self {
        if shared_secret.is_none() {
            warn!("SYNC_AUTH_TOKEN not set, real-time tokens are trusted as-is");
        }
        Self { shared_secret }
    }

    /// Resolve a handshake token to a user id, or None when invalid.
    pub fn authenticate(&self, token: &str) -> Option<String> {
        if token.is_empty() {
            return None;
        }
        match &self.shared_secret {
            None => Some(token.to_string()),
            Some(secret) => {
                let (presented, user_id) = token.split_once('.')?;
                if presented == secret && !user_id.is_empty() {
                    Some(user_id.to_string())
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_mode_trusts_token() {
        let auth = Authenticator::new(None);
        assert_eq!(auth.authenticate("user-1").as_deref(), Some("user-1"));
        assert!(auth.authenticate("").is_none());
    }

    #[test]
    fn test_shared_secret_mode() {
        let auth = Authenticator::new(Some("s3cr3t".to_string()));
        assert_eq!(auth.authenticate("s3cr3t.user-1").as_deref(), Some("user-1"));
        assert!(auth.authenticate("wrong.user-1").is_none());
        assert!(auth.authenticate("s3cr3t.").is_none());
        assert!(auth.authenticate("user-1").is_none());
    }
}
