/*!
Connecting a spotify account

`get-auth-url` and `exchange-code` are thin wrappers around spotify's
authorization code flow. `connect` is the full callback: it redeems the
pending connection token we sent as `state`, trades the code for tokens,
and stores them against a (possibly brand new) user.
*/
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::identity::{IdentityProvider, PendingConnections};
use crate::models::{SpotifyTokenRecord, UserIdentity};
use crate::spotify::{self, SpotifyAccess, SpotifyApi};
use crate::store::TokenStore;
use crate::{utils, LOG};

#[derive(serde::Serialize, Debug)]
pub struct AuthUrl {
    #[serde(rename = "authUrl")]
    pub auth_url: String,
    pub state: String,
}

pub async fn get_auth_url(config: &Config, pending: &PendingConnections) -> Result<AuthUrl> {
    let state = pending.issue().await;
    let auth_url = spotify::authorize_url(config, &state)?;
    slog::info!(LOG, "issued authorize url"; "redirect_uri" => config.spotify_redirect_url());
    Ok(AuthUrl { auth_url, state })
}

fn required<'a>(value: Option<&'a str>, what: &str) -> Result<&'a str> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::Validation(format!("Missing {}", what))),
    }
}

/// Returns spotify's token response untouched. Nothing is persisted.
pub async fn exchange_code(spotify: &dyn SpotifyApi, code: Option<&str>) -> Result<serde_json::Value> {
    let code = required(code, "authorization code")?;
    spotify.exchange_code(code).await
}

#[derive(serde::Serialize, Debug, PartialEq)]
pub struct Connected {
    pub user_id: UserIdentity,
    // only present when a new user was created for this connection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

pub struct ConnectRequest<'a> {
    pub code: Option<&'a str>,
    pub state: Option<&'a str>,
    // bearer token of an already signed in user who is reconnecting
    pub session: Option<&'a str>,
}

pub async fn connect(
    spotify: &dyn SpotifyApi,
    tokens: &dyn TokenStore,
    identity: &dyn IdentityProvider,
    pending: &PendingConnections,
    req: ConnectRequest<'_>,
) -> Result<Connected> {
    let code = required(req.code, "authorization code")?;
    let state = required(req.state, "connection state")?;
    if !pending.redeem(state).await {
        return Err(Error::Validation(
            "Invalid or expired connection state".to_string(),
        ));
    }

    // resolve an existing session before talking to spotify so a bad
    // session doesn't burn the single-use code
    let existing = match req.session {
        Some(token) => Some(identity.resolve(token).await?),
        None => None,
    };

    let raw = spotify.exchange_code(code).await?;
    let access = SpotifyAccess::from_value(&raw)?;
    let refresh_token = access
        .refresh_token
        .clone()
        .ok_or_else(|| se!("missing refresh token"))?;
    let expires_at = utils::expires_at_from_now(access.expires_in)?;

    let (user_id, session_token) = match existing {
        Some(user) => (user, None),
        None => {
            let (user, token) = identity.create_identity().await?;
            (user, Some(token))
        }
    };

    tokens
        .upsert_tokens(&SpotifyTokenRecord {
            user_id: user_id.clone(),
            access_token: access.access_token,
            refresh_token,
            expires_at,
        })
        .await?;
    slog::info!(
        LOG, "connected spotify account";
        "user_id" => user_id.as_str(),
        "is_new" => session_token.is_some(),
    );
    Ok(Connected {
        user_id,
        session_token,
        expires_at,
    })
}
