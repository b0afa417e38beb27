/*!
Persistence for spotify tokens and daily recommendation batches
*/
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::PgPool;

use crate::crypto::{Cipher, Enc};
use crate::error::{Error, Result};
use crate::models::{
    DailyRecommendation, NewRecommendation, SpotifyTokenRecord, StoredTokens, UserIdentity,
};
use crate::utils;

#[async_trait::async_trait]
pub trait TokenStore: Send + Sync {
    async fn get_tokens(&self, user: &UserIdentity) -> Result<Option<SpotifyTokenRecord>>;

    /// Insert or overwrite the user's single token record
    async fn upsert_tokens(&self, record: &SpotifyTokenRecord) -> Result<()>;

    /// Store a refreshed access token. `refresh_token` is only set when
    /// spotify rotated it.
    async fn update_access_token(
        &self,
        user: &UserIdentity,
        access_token: &str,
        expires_at: DateTime<Utc>,
        refresh_token: Option<&str>,
    ) -> Result<()>;
}

#[async_trait::async_trait]
pub trait RecommendationStore: Send + Sync {
    /// The stored batch for `date`, in the order spotify returned it
    async fn recommendations_for(
        &self,
        user: &UserIdentity,
        date: NaiveDate,
    ) -> Result<Vec<DailyRecommendation>>;

    /// Swap the batch for `date` with `recs` in one step. Readers see either
    /// the old batch or the new one, never a mix.
    async fn replace_recommendations(
        &self,
        user: &UserIdentity,
        date: NaiveDate,
        recs: &[NewRecommendation],
    ) -> Result<Vec<DailyRecommendation>>;
}

/// Postgres backed implementation of the store traits and of
/// `identity::IdentityProvider`
#[derive(Clone)]
pub struct PgStore {
    pub(crate) pool: PgPool,
    pub(crate) cipher: Cipher,
    pub(crate) session_lifespan: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, cipher: Cipher, session_lifespan_seconds: u64) -> Result<Self> {
        Ok(Self {
            pool,
            cipher,
            session_lifespan: utils::duration_seconds(session_lifespan_seconds)?,
        })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| se!("migration error {}", e))
    }
}

#[async_trait::async_trait]
impl TokenStore for PgStore {
    async fn get_tokens(&self, user: &UserIdentity) -> Result<Option<SpotifyTokenRecord>> {
        let stored = sqlx::query_as::<_, StoredTokens>(
            "
            select user_id, access_token, access_nonce, refresh_token, refresh_nonce, expires_at
            from dailytune.spotify_tokens
            where user_id = $1
            ",
        )
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await?;
        let stored = match stored {
            None => return Ok(None),
            Some(stored) => stored,
        };
        let access_token = self.cipher.decrypt(&Enc {
            value: stored.access_token,
            nonce: stored.access_nonce,
        })?;
        let refresh_token = self.cipher.decrypt(&Enc {
            value: stored.refresh_token,
            nonce: stored.refresh_nonce,
        })?;
        Ok(Some(SpotifyTokenRecord {
            user_id: UserIdentity::new(stored.user_id),
            access_token,
            refresh_token,
            expires_at: stored.expires_at,
        }))
    }

    async fn upsert_tokens(&self, record: &SpotifyTokenRecord) -> Result<()> {
        let access = self.cipher.encrypt(&record.access_token)?;
        let refresh = self.cipher.encrypt(&record.refresh_token)?;
        sqlx::query(
            "
            insert into
            dailytune.spotify_tokens (
                user_id,
                access_token, access_nonce,
                refresh_token, refresh_nonce,
                expires_at
            )
            values ($1, $2, $3, $4, $5, $6)
            on conflict (user_id) do update set
            access_token = excluded.access_token, access_nonce = excluded.access_nonce,
            refresh_token = excluded.refresh_token, refresh_nonce = excluded.refresh_nonce,
            expires_at = excluded.expires_at,
            modified = now()
            ",
        )
        .bind(record.user_id.as_str())
        .bind(&access.value)
        .bind(&access.nonce)
        .bind(&refresh.value)
        .bind(&refresh.nonce)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_access_token(
        &self,
        user: &UserIdentity,
        access_token: &str,
        expires_at: DateTime<Utc>,
        refresh_token: Option<&str>,
    ) -> Result<()> {
        let access = self.cipher.encrypt(access_token)?;
        let refresh = refresh_token.map(|t| self.cipher.encrypt(t)).transpose()?;
        let (refresh_value, refresh_nonce) = match refresh {
            Some(enc) => (Some(enc.value), Some(enc.nonce)),
            None => (None, None),
        };
        let updated = sqlx::query(
            "
            update dailytune.spotify_tokens set
                access_token = $1, access_nonce = $2, expires_at = $3,
                refresh_token = coalesce($4, refresh_token),
                refresh_nonce = coalesce($5, refresh_nonce),
                modified = now()
            where user_id = $6
            ",
        )
        .bind(&access.value)
        .bind(&access.nonce)
        .bind(expires_at)
        .bind(refresh_value)
        .bind(refresh_nonce)
        .bind(user.as_str())
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::NotConnected);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RecommendationStore for PgStore {
    async fn recommendations_for(
        &self,
        user: &UserIdentity,
        date: NaiveDate,
    ) -> Result<Vec<DailyRecommendation>> {
        let recs = sqlx::query_as::<_, DailyRecommendation>(
            "
            select *
            from dailytune.daily_recommendations
            where user_id = $1
                and recommendation_date = $2
            order by position, id
            ",
        )
        .bind(user.as_str())
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        Ok(recs)
    }

    async fn replace_recommendations(
        &self,
        user: &UserIdentity,
        date: NaiveDate,
        recs: &[NewRecommendation],
    ) -> Result<Vec<DailyRecommendation>> {
        let mut tr = self
            .pool
            .begin()
            .await
            .map_err(|e| se!("error starting recommendation transaction {:?}", e))?;

        // Concurrent replaces for the same user queue up here until the
        // holder commits, so a day's batch is always one complete response.
        sqlx::query("select pg_advisory_xact_lock(hashtext($1))")
            .bind(user.as_str())
            .execute(&mut tr)
            .await?;

        sqlx::query(
            "
            delete from dailytune.daily_recommendations
            where user_id = $1 and recommendation_date = $2
            ",
        )
        .bind(user.as_str())
        .bind(date)
        .execute(&mut tr)
        .await?;

        let mut inserted = Vec::with_capacity(recs.len());
        for (position, rec) in recs.iter().enumerate() {
            let row = sqlx::query_as::<_, DailyRecommendation>(
                "
                insert into dailytune.daily_recommendations
                (user_id, track_id, track_name, artist_name, album_name, album_image_url,
                 preview_url, spotify_url, recommendation_date, position)
                values
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                returning *
                ",
            )
            .bind(user.as_str())
            .bind(&rec.track_id)
            .bind(&rec.track_name)
            .bind(&rec.artist_name)
            .bind(&rec.album_name)
            .bind(&rec.album_image_url)
            .bind(&rec.preview_url)
            .bind(&rec.spotify_url)
            .bind(date)
            .bind(position as i32)
            .fetch_one(&mut tr)
            .await
            .map_err(|e| se!("failed to insert recommendation {:?}", e))?;
            inserted.push(row);
        }

        tr.commit()
            .await
            .map_err(|e| se!("error committing recommendations {:?}", e))?;
        Ok(inserted)
    }
}
