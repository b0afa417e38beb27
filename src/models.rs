use chrono::{DateTime, NaiveDate, Utc};

/// Stable identifier of one of our users. Issued by the identity
/// provider when a spotify account is first connected.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct UserIdentity(String);

impl UserIdentity {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decrypted spotify credentials for a single user
#[derive(Clone, Debug, PartialEq)]
pub struct SpotifyTokenRecord {
    pub user_id: UserIdentity,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl SpotifyTokenRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// What gets stored in `dailytune.spotify_tokens`. Both tokens are
/// AES_256_GCM encrypted with the application key and their own nonce.
#[derive(sqlx::FromRow, Debug)]
pub struct StoredTokens {
    pub user_id: String,
    pub access_token: String,
    pub access_nonce: String,
    pub refresh_token: String,
    pub refresh_nonce: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Debug, PartialEq, serde::Serialize)]
pub struct DailyRecommendation {
    pub id: i64,
    pub user_id: String,
    pub track_id: String,
    pub track_name: String,
    // all artist names, comma separated
    pub artist_name: String,
    pub album_name: Option<String>,
    pub album_image_url: Option<String>,
    pub preview_url: Option<String>,
    pub spotify_url: String,
    pub recommendation_date: NaiveDate,
    // order spotify returned the track in
    pub position: i32,
    pub created: DateTime<Utc>,
}

/// A mapped recommendation that hasn't been stored yet
#[derive(Clone, Debug, PartialEq, Default)]
pub struct NewRecommendation {
    pub track_id: String,
    pub track_name: String,
    pub artist_name: String,
    pub album_name: Option<String>,
    pub album_image_url: Option<String>,
    pub preview_url: Option<String>,
    pub spotify_url: String,
}

#[derive(sqlx::FromRow, Debug)]
pub struct Session {
    pub id: i64,
    pub user_id: String,
    pub expires: DateTime<Utc>,
}
