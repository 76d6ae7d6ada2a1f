use super::client::PowerPanelClient;
use crate::error::AuthError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio::sync::Mutex;

/// PowerPanel never reports token lifetimes; tokens are assumed valid for this
/// long after a successful login.
pub const DEFAULT_TOKEN_VALIDITY: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
struct Session {
    token: String,
    expires_at: DateTime<Utc>,
}

impl Session {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// Saturates instead of overflowing for validities beyond the calendar range.
fn expiry_after(now: DateTime<Utc>, validity: ChronoDuration) -> DateTime<Utc> {
    now.checked_add_signed(validity).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Owns the PowerPanel bearer token and re-authenticates when it lapses.
pub struct SessionManager {
    client: PowerPanelClient,
    validity: ChronoDuration,
    session: Mutex<Session>,
}

impl SessionManager {
    /// Performs the initial login; a failure here means the appliance is unusable.
    pub async fn connect(client: PowerPanelClient, validity: Duration) -> Result<Self, AuthError> {
        let validity =
            ChronoDuration::from_std(validity).unwrap_or_else(|_| ChronoDuration::max_value());
        let token = client.login().await?;
        let session = Session {
            token,
            expires_at: expiry_after(Utc::now(), validity),
        };
        tracing::info!(
            base_url = %client.base_url(),
            expires_at = %session.expires_at,
            "authenticated with PowerPanel"
        );
        Ok(Self {
            client,
            validity,
            session: Mutex::new(session),
        })
    }

    pub async fn ensure_valid_token(&self) -> Result<String, AuthError> {
        let mut session = self.session.lock().await;
        if session.is_expired(Utc::now()) {
            tracing::debug!(expired_at = %session.expires_at, "PowerPanel token expired; refreshing");
            self.refresh(&mut session).await?;
        }
        Ok(session.token.clone())
    }

    /// Re-authenticates after the appliance rejected `stale_token`, unless
    /// another caller already replaced it.
    pub async fn force_refresh(&self, stale_token: &str) -> Result<String, AuthError> {
        let mut session = self.session.lock().await;
        if session.token == stale_token {
            tracing::info!("PowerPanel rejected token before expiry; re-authenticating");
            self.refresh(&mut session).await?;
        }
        Ok(session.token.clone())
    }

    pub async fn expires_at(&self) -> DateTime<Utc> {
        self.session.lock().await.expires_at
    }

    async fn refresh(&self, session: &mut Session) -> Result<(), AuthError> {
        let token = self.client.login().await?;
        session.token = token;
        session.expires_at = expiry_after(Utc::now(), self.validity);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn set_expires_at(&self, expires_at: DateTime<Utc>) {
        self.session.lock().await.expires_at = expires_at;
    }

    #[cfg(test)]
    pub(crate) async fn current_token(&self) -> String {
        self.session.lock().await.token.clone()
    }
}
