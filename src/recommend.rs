use chrono::Utc;

use crate::error::{Error, Result};
use crate::models::{DailyRecommendation, NewRecommendation, UserIdentity};
use crate::spotify::{Seeds, SpotifyApi, RECOMMENDATION_LIMIT};
use crate::store::{RecommendationStore, TokenStore};
use crate::{utils, LOG};

/// The user's current spotify access token, refreshing it first
/// if the stored one has expired.
pub async fn get_user_access_token(
    tokens: &dyn TokenStore,
    spotify: &dyn SpotifyApi,
    user: &UserIdentity,
) -> Result<String> {
    let record = tokens
        .get_tokens(user)
        .await?
        .ok_or(Error::NotConnected)?;
    if !record.is_expired_at(Utc::now()) {
        return Ok(record.access_token);
    }

    slog::info!(LOG, "refreshing access token for user {}", user);
    let access = spotify.refresh_access_token(&record.refresh_token).await?;
    let expires_at = utils::expires_at_from_now(access.expires_in)?;
    tokens
        .update_access_token(
            user,
            &access.access_token,
            expires_at,
            access.refresh_token.as_deref(),
        )
        .await?;
    Ok(access.access_token)
}

/// Generate today's batch for `user` from their recent top tracks and
/// artists, replacing whatever was stored for today.
pub async fn refresh_daily_recommendations(
    tokens: &dyn TokenStore,
    recommendations: &dyn RecommendationStore,
    spotify: &dyn SpotifyApi,
    user: &UserIdentity,
) -> Result<Vec<DailyRecommendation>> {
    let access_token = get_user_access_token(tokens, spotify, user).await?;

    let (top_tracks, top_artists) = futures::try_join!(
        spotify.top_track_ids(&access_token),
        spotify.top_artist_ids(&access_token),
    )?;
    let seeds = Seeds::from_top(top_tracks, top_artists);
    if seeds.is_empty() {
        return Err(Error::Validation(
            "Not enough listening history to seed recommendations".to_string(),
        ));
    }

    let tracks = spotify.recommendations(&access_token, &seeds).await?;
    let mapped: Vec<NewRecommendation> = tracks
        .iter()
        .filter_map(|t| t.to_new_recommendation())
        .collect();
    let skipped = tracks.len() - mapped.len();
    let new_recs: Vec<NewRecommendation> =
        mapped.into_iter().take(RECOMMENDATION_LIMIT).collect();

    let today = utils::today();
    let stored = recommendations
        .replace_recommendations(user, today, &new_recs)
        .await?;
    slog::info!(
        LOG, "stored daily recommendations";
        "user_id" => user.as_str(),
        "date" => today.to_string(),
        "count" => stored.len(),
        "skipped" => skipped,
        "seed_tracks" => seeds.tracks.len(),
        "seed_artists" => seeds.artists.len(),
    );
    Ok(stored)
}

/// Today's stored batch, without calling spotify
pub async fn todays_recommendations(
    recommendations: &dyn RecommendationStore,
    user: &UserIdentity,
) -> Result<Vec<DailyRecommendation>> {
    recommendations
        .recommendations_for(user, utils::today())
        .await
}
