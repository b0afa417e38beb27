//! In-memory stand-ins for postgres and spotify used by the unit tests
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::identity::{IdentityProvider, PendingConnections};
use crate::models::{DailyRecommendation, NewRecommendation, SpotifyTokenRecord, UserIdentity};
use crate::service::Context;
use crate::spotify::{self, RecommendedTrack, Seeds, SpotifyAccess, SpotifyApi};
use crate::store::{RecommendationStore, TokenStore};
use crate::utils;

pub fn config() -> Config {
    let mut c = Config::from_lookup("test".into(), |_| None).unwrap();
    c.spotify_client_id = "test-client".into();
    c.spotify_client_secret = "test-secret".into();
    c.db_url = "postgres://localhost/dailytune_test".into();
    c.enc_key = "01234567890123456789012345678901".into();
    c
}

pub fn context(store: Arc<MemoryStore>, spotify: Arc<FakeSpotify>) -> Context {
    Context {
        config: Arc::new(config()),
        spotify,
        tokens: store.clone(),
        recommendations: store.clone(),
        identity: store,
        pending: PendingConnections::new(60),
    }
}

#[derive(Default)]
struct Inner {
    users: HashSet<String>,
    // session token -> user id
    sessions: HashMap<String, String>,
    tokens: HashMap<UserIdentity, SpotifyTokenRecord>,
    recommendations: Vec<DailyRecommendation>,
    next_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn user_count(&self) -> usize {
        self.lock().users.len()
    }

    pub fn token_count(&self) -> usize {
        self.lock().tokens.len()
    }

    pub fn recommendation_count(&self) -> usize {
        self.lock().recommendations.len()
    }
}

#[async_trait::async_trait]
impl TokenStore for MemoryStore {
    async fn get_tokens(&self, user: &UserIdentity) -> Result<Option<SpotifyTokenRecord>> {
        Ok(self.lock().tokens.get(user).cloned())
    }

    async fn upsert_tokens(&self, record: &SpotifyTokenRecord) -> Result<()> {
        self.lock()
            .tokens
            .insert(record.user_id.clone(), record.clone());
        Ok(())
    }

    async fn update_access_token(
        &self,
        user: &UserIdentity,
        access_token: &str,
        expires_at: DateTime<Utc>,
        refresh_token: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.lock();
        let record = inner.tokens.get_mut(user).ok_or(Error::NotConnected)?;
        record.access_token = access_token.to_string();
        record.expires_at = expires_at;
        if let Some(refresh_token) = refresh_token {
            record.refresh_token = refresh_token.to_string();
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RecommendationStore for MemoryStore {
    async fn recommendations_for(
        &self,
        user: &UserIdentity,
        date: NaiveDate,
    ) -> Result<Vec<DailyRecommendation>> {
        let mut recs: Vec<_> = self
            .lock()
            .recommendations
            .iter()
            .filter(|r| r.user_id == user.as_str() && r.recommendation_date == date)
            .cloned()
            .collect();
        recs.sort_by_key(|r| (r.position, r.id));
        Ok(recs)
    }

    async fn replace_recommendations(
        &self,
        user: &UserIdentity,
        date: NaiveDate,
        recs: &[NewRecommendation],
    ) -> Result<Vec<DailyRecommendation>> {
        let mut inner = self.lock();
        inner
            .recommendations
            .retain(|r| !(r.user_id == user.as_str() && r.recommendation_date == date));
        let mut inserted = Vec::with_capacity(recs.len());
        for (position, rec) in recs.iter().enumerate() {
            inner.next_id += 1;
            let row = DailyRecommendation {
                id: inner.next_id,
                user_id: user.as_str().to_string(),
                track_id: rec.track_id.clone(),
                track_name: rec.track_name.clone(),
                artist_name: rec.artist_name.clone(),
                album_name: rec.album_name.clone(),
                album_image_url: rec.album_image_url.clone(),
                preview_url: rec.preview_url.clone(),
                spotify_url: rec.spotify_url.clone(),
                recommendation_date: date,
                position: position as i32,
                created: Utc::now(),
            };
            inner.recommendations.push(row.clone());
            inserted.push(row);
        }
        Ok(inserted)
    }
}

#[async_trait::async_trait]
impl IdentityProvider for MemoryStore {
    async fn resolve(&self, token: &str) -> Result<UserIdentity> {
        self.lock()
            .sessions
            .get(token)
            .map(|id| UserIdentity::new(id.clone()))
            .ok_or(Error::Authentication)
    }

    async fn create_identity(&self) -> Result<(UserIdentity, String)> {
        let user = UserIdentity::generate();
        let token = utils::new_token();
        let mut inner = self.lock();
        inner.users.insert(user.as_str().to_string());
        inner
            .sessions
            .insert(token.clone(), user.as_str().to_string());
        Ok((user, token))
    }
}

/// What the fake spotify will do when called
pub struct Script {
    pub refresh_fails: bool,
    pub rotate_refresh_token: Option<String>,
    pub top_tracks: usize,
    pub top_artists: usize,
    pub top_artists_fail: bool,
    pub recommended: usize,
    // extra tracks returned without an id
    pub idless_tracks: usize,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            refresh_fails: false,
            rotate_refresh_token: None,
            top_tracks: spotify::TOP_ITEMS_LIMIT,
            top_artists: spotify::TOP_ITEMS_LIMIT,
            top_artists_fail: false,
            recommended: spotify::RECOMMENDATION_LIMIT,
            idless_tracks: 0,
        }
    }
}

/// What the fake spotify was asked
#[derive(Clone, Default, Debug)]
pub struct Calls {
    pub exchanges: usize,
    pub refreshes: usize,
    // access token presented on every api call
    pub access_tokens: Vec<String>,
    pub seeds: Vec<Seeds>,
}

#[derive(Default)]
pub struct FakeSpotify {
    script: Mutex<Script>,
    calls: Mutex<Calls>,
}

pub const GOOD_CODE: &str = "good-code";

impl FakeSpotify {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script<F: FnOnce(&mut Script)>(&self, f: F) {
        f(&mut self.script.lock().unwrap())
    }

    pub fn calls(&self) -> Calls {
        self.calls.lock().unwrap().clone()
    }

    fn saw_token(&self, access_token: &str) {
        self.calls
            .lock()
            .unwrap()
            .access_tokens
            .push(access_token.to_string());
    }
}

fn track(i: usize) -> RecommendedTrack {
    // every other track has no preview, like a lot of the real catalog
    let preview_url = if i % 2 == 0 {
        Some(format!("https://p.scdn.co/mp3-preview/{}", i))
    } else {
        None
    };
    serde_json::from_value(json!({
        "id": format!("track-{}", i),
        "name": format!("Track {}", i),
        "artists": [{"name": format!("Artist {}", i)}, {"name": "Featured"}],
        "album": {"name": format!("Album {}", i), "images": [{"url": format!("https://i.scdn.co/image/{}", i)}]},
        "preview_url": preview_url,
        "external_urls": {"spotify": format!("https://open.spotify.com/track/track-{}", i)}
    }))
    .unwrap()
}

#[async_trait::async_trait]
impl SpotifyApi for FakeSpotify {
    async fn exchange_code(&self, code: &str) -> Result<serde_json::Value> {
        self.calls.lock().unwrap().exchanges += 1;
        if code != GOOD_CODE {
            return Err(Error::upstream(
                "Failed to exchange code for token",
                400,
                r#"{"error":"invalid_grant","error_description":"Invalid authorization code"}"#
                    .to_string(),
            ));
        }
        Ok(json!({
            "access_token": "access-from-code",
            "token_type": "Bearer",
            "scope": spotify::SCOPES,
            "expires_in": 3600,
            "refresh_token": "refresh-from-code",
        }))
    }

    async fn refresh_access_token(&self, _refresh_token: &str) -> Result<SpotifyAccess> {
        self.calls.lock().unwrap().refreshes += 1;
        let script = self.script.lock().unwrap();
        if script.refresh_fails {
            return Err(Error::upstream(
                "Failed to refresh access token",
                400,
                r#"{"error":"invalid_grant","error_description":"Refresh token revoked"}"#
                    .to_string(),
            ));
        }
        Ok(SpotifyAccess {
            access_token: "refreshed-access".into(),
            token_type: Some("Bearer".into()),
            scope: Some(spotify::SCOPES.into()),
            expires_in: 3600,
            refresh_token: script.rotate_refresh_token.clone(),
        })
    }

    async fn top_track_ids(&self, access_token: &str) -> Result<Vec<String>> {
        self.saw_token(access_token);
        let n = self.script.lock().unwrap().top_tracks;
        Ok((0..n).map(|i| format!("top-track-{}", i)).collect())
    }

    async fn top_artist_ids(&self, access_token: &str) -> Result<Vec<String>> {
        self.saw_token(access_token);
        let (n, fail) = {
            let script = self.script.lock().unwrap();
            (script.top_artists, script.top_artists_fail)
        };
        if fail {
            return Err(Error::upstream(
                "Failed to fetch top artists",
                503,
                "service unavailable".to_string(),
            ));
        }
        Ok((0..n).map(|i| format!("top-artist-{}", i)).collect())
    }

    async fn recommendations(
        &self,
        access_token: &str,
        seeds: &Seeds,
    ) -> Result<Vec<RecommendedTrack>> {
        self.saw_token(access_token);
        self.calls.lock().unwrap().seeds.push(seeds.clone());
        let (n, idless) = {
            let script = self.script.lock().unwrap();
            (script.recommended, script.idless_tracks)
        };
        let mut tracks: Vec<RecommendedTrack> = (0..n).map(track).collect();
        for i in 0..idless {
            let mut t = track(n + i);
            t.id = None;
            tracks.insert(0, t);
        }
        Ok(tracks)
    }
}
