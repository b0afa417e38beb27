use serde::{Deserialize, Deserializer};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::NewRecommendation;
use crate::LOG;

/// Read-only profile and listening-history scopes
pub const SCOPES: &str =
    "user-read-private user-read-email user-top-read user-library-read user-read-recently-played";

pub const TOP_ITEMS_LIMIT: usize = 5;
pub const TOP_ITEMS_TIME_RANGE: &str = "short_term";
pub const RECOMMENDATION_LIMIT: usize = 20;
// spotify caps the combined number of seeds at 5
pub const MAX_SEED_TRACKS: usize = 2;
pub const MAX_SEED_ARTISTS: usize = 3;

fn null_as_default<'de, D, T>(d: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
pub struct SpotifyAccess {
    pub access_token: String,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub expires_in: u64,
    // only sent on the initial code exchange, and sometimes on refresh
    // when spotify decides to rotate it
    pub refresh_token: Option<String>,
}

impl SpotifyAccess {
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let access: SpotifyAccess = serde_json::from_value(value.clone())
            .map_err(|e| se!("token response parse error {}", e))?;
        if access.expires_in == 0 {
            return Err(se!("token response has no lifetime"));
        }
        Ok(access)
    }
}

#[derive(serde::Serialize)]
struct SpotifyAccessParams<'a> {
    grant_type: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
}

#[derive(serde::Serialize)]
struct RefreshParams<'a> {
    grant_type: &'a str,
    refresh_token: &'a str,
}

#[derive(serde::Deserialize, Default, Debug)]
struct TopItems {
    #[serde(default, deserialize_with = "null_as_default")]
    items: Vec<Item>,
}

#[derive(serde::Deserialize, Default, Debug)]
struct Item {
    id: Option<String>,
}

#[derive(serde::Deserialize, Default, Debug, Clone)]
pub struct NamedRef {
    pub name: Option<String>,
}

#[derive(serde::Deserialize, Default, Debug, Clone)]
pub struct Image {
    pub url: Option<String>,
}

#[derive(serde::Deserialize, Default, Debug, Clone)]
pub struct Album {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub images: Vec<Image>,
}

#[derive(serde::Deserialize, Default, Debug, Clone)]
pub struct ExternalUrls {
    pub spotify: Option<String>,
}

/// A track as returned by the recommendations api. Everything is
/// optional so one odd track can't sink the whole batch.
#[derive(serde::Deserialize, Default, Debug, Clone)]
pub struct RecommendedTrack {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub artists: Vec<NamedRef>,
    pub album: Option<Album>,
    pub preview_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub external_urls: ExternalUrls,
}

impl RecommendedTrack {
    /// Tracks without an id can't be linked to and are dropped,
    /// anything else missing is stored empty.
    pub fn to_new_recommendation(&self) -> Option<NewRecommendation> {
        let track_id = self.id.as_ref().filter(|id| !id.is_empty())?.clone();
        let artist_name = self
            .artists
            .iter()
            .filter_map(|a| a.name.as_deref())
            .collect::<Vec<_>>()
            .join(", ");
        let album_name = self.album.as_ref().and_then(|a| a.name.clone());
        let album_image_url = self
            .album
            .as_ref()
            .and_then(|a| a.images.first())
            .and_then(|i| i.url.clone());
        Some(NewRecommendation {
            track_id,
            track_name: self.name.clone().unwrap_or_default(),
            artist_name,
            album_name,
            album_image_url,
            preview_url: self.preview_url.clone(),
            spotify_url: self.external_urls.spotify.clone().unwrap_or_default(),
        })
    }
}

#[derive(serde::Deserialize, Default, Debug)]
struct RecommendationsResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    tracks: Vec<RecommendedTrack>,
}

/// Track and artist ids that bias the recommendation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Seeds {
    pub tracks: Vec<String>,
    pub artists: Vec<String>,
}

impl Seeds {
    pub fn from_top(top_tracks: Vec<String>, top_artists: Vec<String>) -> Self {
        Self {
            tracks: top_tracks.into_iter().take(MAX_SEED_TRACKS).collect(),
            artists: top_artists.into_iter().take(MAX_SEED_ARTISTS).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty() && self.artists.is_empty()
    }
}

/// Spotify's authorize url that users are sent to in order to connect
/// their account. `state` is echoed back to the callback.
pub fn authorize_url(config: &Config, state: &str) -> Result<String> {
    let base = format!(
        "{}/authorize",
        config.spotify_accounts_url.trim_end_matches('/')
    );
    let redirect = config.spotify_redirect_url();
    let url = surf::Url::parse_with_params(
        &base,
        &[
            ("client_id", config.spotify_client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", redirect.as_str()),
            ("scope", SCOPES),
            ("state", state),
        ],
    )
    .map_err(|e| se!("invalid authorize url {}", e))?;
    Ok(url.to_string())
}

/// Everything we ask of spotify
#[async_trait::async_trait]
pub trait SpotifyApi: Send + Sync {
    /// Trade an authorization code for tokens, returning spotify's response as-is
    async fn exchange_code(&self, code: &str) -> Result<serde_json::Value>;

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<SpotifyAccess>;

    async fn top_track_ids(&self, access_token: &str) -> Result<Vec<String>>;

    async fn top_artist_ids(&self, access_token: &str) -> Result<Vec<String>>;

    async fn recommendations(
        &self,
        access_token: &str,
        seeds: &Seeds,
    ) -> Result<Vec<RecommendedTrack>>;
}

pub struct SpotifyClient {
    client: surf::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    accounts_url: String,
    api_url: String,
}

impl SpotifyClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: surf::Client::new(),
            client_id: config.spotify_client_id.clone(),
            client_secret: config.spotify_client_secret.clone(),
            redirect_uri: config.spotify_redirect_url(),
            accounts_url: config.spotify_accounts_url.trim_end_matches('/').to_string(),
            api_url: config.spotify_api_url.trim_end_matches('/').to_string(),
        }
    }

    fn basic_auth(&self) -> String {
        let auth = base64::encode(format!("{}:{}", self.client_id, self.client_secret).as_bytes());
        format!("Basic {}", auth)
    }

    async fn token_request<T: serde::Serialize>(
        &self,
        params: &T,
        context: &str,
    ) -> Result<serde_json::Value> {
        let body = surf::Body::from_form(params).map_err(|e| se!("form error {}", e))?;
        let mut resp = self
            .client
            .post(format!("{}/api/token", self.accounts_url))
            .body(body)
            .header("authorization", self.basic_auth())
            .send()
            .await
            .map_err(|e| se!("{} request error {}", context, e))?;
        if !resp.status().is_success() {
            let text = resp.body_string().await.unwrap_or_default();
            slog::error!(LOG, "spotify token endpoint error"; "context" => context, "status" => u16::from(resp.status()), "body" => &text);
            return Err(Error::upstream(context, resp.status().into(), text));
        }
        resp.body_json()
            .await
            .map_err(|e| se!("{} json parse error {}", context, e))
    }

    async fn get_json<T>(&self, access_token: &str, url: surf::Url, context: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut resp = self
            .client
            .get(url)
            .header("authorization", format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(|e| se!("{} request error {}", context, e))?;
        if !resp.status().is_success() {
            let text = resp.body_string().await.unwrap_or_default();
            return Err(Error::upstream(context, resp.status().into(), text));
        }
        resp.body_json()
            .await
            .map_err(|e| se!("{} json error {}", context, e))
    }

    async fn top_ids(&self, access_token: &str, kind: &str) -> Result<Vec<String>> {
        let limit = TOP_ITEMS_LIMIT.to_string();
        let url = surf::Url::parse_with_params(
            &format!("{}/me/top/{}", self.api_url, kind),
            &[("limit", limit.as_str()), ("time_range", TOP_ITEMS_TIME_RANGE)],
        )
        .map_err(|e| se!("invalid top {} url {}", kind, e))?;
        let page: TopItems = self
            .get_json(access_token, url, &format!("Failed to fetch top {}", kind))
            .await?;
        Ok(page.items.into_iter().filter_map(|i| i.id).collect())
    }
}

#[async_trait::async_trait]
impl SpotifyApi for SpotifyClient {
    async fn exchange_code(&self, code: &str) -> Result<serde_json::Value> {
        let params = SpotifyAccessParams {
            grant_type: "authorization_code",
            code,
            redirect_uri: &self.redirect_uri,
        };
        self.token_request(&params, "Failed to exchange code for token")
            .await
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<SpotifyAccess> {
        let params = RefreshParams {
            grant_type: "refresh_token",
            refresh_token,
        };
        let access = self
            .token_request(&params, "Failed to refresh access token")
            .await?;
        SpotifyAccess::from_value(&access)
    }

    async fn top_track_ids(&self, access_token: &str) -> Result<Vec<String>> {
        self.top_ids(access_token, "tracks").await
    }

    async fn top_artist_ids(&self, access_token: &str) -> Result<Vec<String>> {
        self.top_ids(access_token, "artists").await
    }

    async fn recommendations(
        &self,
        access_token: &str,
        seeds: &Seeds,
    ) -> Result<Vec<RecommendedTrack>> {
        let seed_tracks = seeds.tracks.join(",");
        let seed_artists = seeds.artists.join(",");
        let limit = RECOMMENDATION_LIMIT.to_string();
        let url = surf::Url::parse_with_params(
            &format!("{}/recommendations", self.api_url),
            &[
                ("seed_tracks", seed_tracks.as_str()),
                ("seed_artists", seed_artists.as_str()),
                ("limit", limit.as_str()),
            ],
        )
        .map_err(|e| se!("invalid recommendations url {}", e))?;
        let resp: RecommendationsResponse = self
            .get_json(access_token, url, "Failed to fetch recommendations")
            .await?;
        Ok(resp.tracks)
    }
}
