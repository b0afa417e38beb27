/*!
Who is calling

Users authenticate with an opaque bearer session token. We only ever
store the hmac of the token, so looking a user up means signing the
presented token and matching the hash.

Before a user exists they hold a "pending connection" token instead. It
is handed out along with spotify's authorize url, comes back to us as
the oauth `state`, and can be redeemed exactly once.
*/
use std::sync::Arc;

use async_mutex::Mutex;
use cached::stores::TimedCache;
use cached::Cached;
use chrono::Utc;

use crate::error::{Error, Result};
use crate::models::{Session, UserIdentity};
use crate::store::PgStore;
use crate::{utils, LOG};

#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a bearer session token, failing with `Error::Authentication`
    async fn resolve(&self, token: &str) -> Result<UserIdentity>;

    /// Create a brand new user along with a session token for them
    async fn create_identity(&self) -> Result<(UserIdentity, String)>;
}

/// Pull the token out of an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let header = header?.trim();
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// One-time tokens for connections that don't have a user yet
#[derive(Clone)]
pub struct PendingConnections {
    cache: Arc<Mutex<TimedCache<String, ()>>>,
}

impl PendingConnections {
    pub fn new(lifespan_seconds: u64) -> Self {
        Self {
            cache: Arc::new(Mutex::new(TimedCache::with_lifespan(lifespan_seconds))),
        }
    }

    pub async fn issue(&self) -> String {
        let token = utils::new_token();
        let mut lock = self.cache.lock().await;
        // expired entries are otherwise only dropped when their key is looked up
        lock.flush();
        lock.cache_set(token.clone(), ());
        token
    }

    /// `true` if `token` was issued, hasn't expired, and hasn't been redeemed
    pub async fn redeem(&self, token: &str) -> bool {
        let mut lock = self.cache.lock().await;
        lock.cache_remove(&token.to_string()).is_some()
    }
}

#[async_trait::async_trait]
impl IdentityProvider for PgStore {
    async fn resolve(&self, token: &str) -> Result<UserIdentity> {
        let hash = self.cipher.hmac_sign(token);
        let session = sqlx::query_as::<_, Session>(
            "
            select id, user_id, expires
            from dailytune.sessions
            where hash = $1 and expires > now()
            ",
        )
        .bind(&hash)
        .fetch_optional(&self.pool)
        .await?;
        let session = match session {
            None => {
                slog::info!(LOG, "no live session for presented token");
                return Err(Error::Authentication);
            }
            Some(s) => s,
        };
        slog::debug!(LOG, "resolved session"; "session_id" => session.id, "expires" => session.expires.to_rfc3339());

        if let Err(e) = sqlx::query(
            "delete from dailytune.sessions where user_id = $1 and expires <= now()",
        )
        .bind(&session.user_id)
        .execute(&self.pool)
        .await
        {
            slog::error!(
                LOG,
                "error deleting expired sessions for user {}, continuing: {:?}",
                session.user_id,
                e
            );
        }
        Ok(UserIdentity::new(session.user_id))
    }

    async fn create_identity(&self) -> Result<(UserIdentity, String)> {
        let user = UserIdentity::generate();
        let token = utils::new_token();
        let hash = self.cipher.hmac_sign(&token);
        let expires = Utc::now()
            .checked_add_signed(self.session_lifespan)
            .ok_or("error creating session expiration timestamp")?;

        let mut tr = self
            .pool
            .begin()
            .await
            .map_err(|e| se!("error starting user transaction {:?}", e))?;
        sqlx::query("insert into dailytune.users (id) values ($1)")
            .bind(user.as_str())
            .execute(&mut tr)
            .await
            .map_err(|e| se!("error inserting user {:?}", e))?;
        sqlx::query(
            "
            insert into
            dailytune.sessions (
                hash, user_id, expires
            )
            values ($1, $2, $3)
            ",
        )
        .bind(&hash)
        .bind(user.as_str())
        .bind(expires)
        .execute(&mut tr)
        .await
        .map_err(|e| se!("failed to insert user session {:?}", e))?;
        tr.commit()
            .await
            .map_err(|e| se!("error committing user insert {:?}", e))?;

        slog::info!(LOG, "created user"; "user_id" => user.as_str());
        Ok((user, token))
    }
}
