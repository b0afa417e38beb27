use std::sync::Arc;

use tide::http::mime;
use tide::{Body, Request, Response, StatusCode};

use crate::auth::{self, ConnectRequest};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::identity::{self, IdentityProvider, PendingConnections};
use crate::models::{DailyRecommendation, UserIdentity};
use crate::recommend;
use crate::spotify::SpotifyApi;
use crate::store::{RecommendationStore, TokenStore};
use crate::{utils, LOG};

pub const CORS_ALLOW_ORIGIN: &str = "*";
pub const CORS_ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type";

#[derive(Clone)]
pub struct Context {
    pub config: Arc<Config>,
    pub spotify: Arc<dyn SpotifyApi>,
    pub tokens: Arc<dyn TokenStore>,
    pub recommendations: Arc<dyn RecommendationStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub pending: PendingConnections,
}

macro_rules! resp {
    (status => $status:expr, json => $obj:expr) => {{
        let body = Body::from_json(&$obj)?;
        Response::builder($status)
            .body(body)
            .content_type(mime::JSON)
            .build()
    }};
    (json => $obj:expr) => {{
        resp!(status => StatusCode::Ok, json => $obj)
    }};
}

pub fn app(ctx: Context) -> tide::Server<Context> {
    let mut app = tide::with_state(ctx);
    app.with(crate::logging::LogMiddleware::new());
    app.with(tide::utils::After(cors));
    for prefix in &["", "/api"] {
        app.at(&format!("{}/status", prefix))
            .get(status)
            .options(preflight);
        app.at(&format!("{}/spotify-auth", prefix))
            .post(spotify_auth)
            .options(preflight);
        app.at(&format!("{}/spotify-recommendations", prefix))
            .post(refresh_recommendations)
            .get(todays_recommendations)
            .options(preflight);
        app.at(&format!("{}/spotify-connection", prefix))
            .get(connection)
            .options(preflight);
    }
    app
}

pub async fn start(ctx: Context) -> Result<()> {
    let addr = ctx.config.listen_addr();
    let host = ctx.config.host();
    let app = app(ctx);
    slog::info!(LOG, "running at {}", host);
    app.listen(addr)
        .await
        .map_err(|e| se!("server error {}", e))?;
    Ok(())
}

#[derive(serde::Serialize)]
struct ErrorBody {
    error: String,
}

/// Every failure looks the same to callers: a 500 with the message
fn error_response(e: &Error) -> tide::Result {
    slog::error!(LOG, "{}", e; "kind" => e.kind());
    Ok(resp!(
        status => StatusCode::InternalServerError,
        json => ErrorBody {
            error: e.to_string(),
        }
    ))
}

fn respond<T: serde::Serialize>(result: Result<T>) -> tide::Result {
    match result {
        Ok(v) => Ok(resp!(json => v)),
        Err(e) => error_response(&e),
    }
}

async fn cors(mut res: Response) -> tide::Result {
    res.insert_header("access-control-allow-origin", CORS_ALLOW_ORIGIN);
    res.insert_header("access-control-allow-headers", CORS_ALLOW_HEADERS);
    Ok(res)
}

async fn preflight(_req: Request<Context>) -> tide::Result {
    Ok(Response::builder(StatusCode::Ok)
        .content_type(mime::JSON)
        .build())
}

#[derive(serde::Serialize)]
struct Status<'a> {
    ok: &'a str,
    version: &'a str,
}

async fn status(req: Request<Context>) -> tide::Result {
    Ok(resp!(json => Status {
        ok: "ok",
        version: &req.state().config.version,
    }))
}

fn session_token(req: &Request<Context>) -> Option<String> {
    let header = req.header("authorization").map(|h| h.last().as_str());
    identity::bearer_token(header).map(|t| t.to_string())
}

async fn authenticate(ctx: &Context, session: Option<&str>) -> Result<UserIdentity> {
    let token = session.ok_or(Error::Authentication)?;
    ctx.identity.resolve(token).await
}

/// Empty bodies read as the default so `get-auth-url` can be posted bare
async fn read_body<T>(req: &mut Request<Context>) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    let raw = req
        .body_string()
        .await
        .map_err(|e| se!("error reading request body {}", e))?;
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&raw).map_err(|_| Error::Validation("Invalid request body".to_string()))
}

#[derive(serde::Deserialize, Default)]
struct ActionQuery {
    action: Option<String>,
}

#[derive(serde::Deserialize, Default)]
struct AuthBody {
    action: Option<String>,
    code: Option<String>,
    state: Option<String>,
}

async fn spotify_auth(mut req: Request<Context>) -> tide::Result {
    let query: ActionQuery = req.query().unwrap_or_default();
    let session = session_token(&req);
    let body: AuthBody = match read_body(&mut req).await {
        Ok(body) => body,
        Err(e) => return error_response(&e),
    };
    let ctx = req.state();
    let action = query.action.or(body.action);
    slog::info!(LOG, "spotify auth"; "action" => action.as_deref().unwrap_or("none"));

    match action.as_deref() {
        Some("get-auth-url") => respond(auth::get_auth_url(&ctx.config, &ctx.pending).await),
        Some("exchange-code") => {
            respond(auth::exchange_code(ctx.spotify.as_ref(), body.code.as_deref()).await)
        }
        Some("connect") => respond(
            auth::connect(
                ctx.spotify.as_ref(),
                ctx.tokens.as_ref(),
                ctx.identity.as_ref(),
                &ctx.pending,
                ConnectRequest {
                    code: body.code.as_deref(),
                    state: body.state.as_deref(),
                    session: session.as_deref(),
                },
            )
            .await,
        ),
        _ => error_response(&Error::Validation("Invalid action".to_string())),
    }
}

#[derive(serde::Serialize)]
struct Refreshed {
    success: bool,
    recommendations: Vec<DailyRecommendation>,
}

async fn refresh(ctx: &Context, session: Option<&str>) -> Result<Refreshed> {
    let user = authenticate(ctx, session).await?;
    let recommendations = recommend::refresh_daily_recommendations(
        ctx.tokens.as_ref(),
        ctx.recommendations.as_ref(),
        ctx.spotify.as_ref(),
        &user,
    )
    .await?;
    Ok(Refreshed {
        success: true,
        recommendations,
    })
}

async fn refresh_recommendations(req: Request<Context>) -> tide::Result {
    let session = session_token(&req);
    respond(refresh(req.state(), session.as_deref()).await)
}

#[derive(serde::Serialize)]
struct Todays {
    date: chrono::NaiveDate,
    recommendations: Vec<DailyRecommendation>,
}

async fn todays(ctx: &Context, session: Option<&str>) -> Result<Todays> {
    let user = authenticate(ctx, session).await?;
    let recommendations =
        recommend::todays_recommendations(ctx.recommendations.as_ref(), &user).await?;
    Ok(Todays {
        date: utils::today(),
        recommendations,
    })
}

async fn todays_recommendations(req: Request<Context>) -> tide::Result {
    let session = session_token(&req);
    respond(todays(req.state(), session.as_deref()).await)
}

#[derive(serde::Serialize)]
struct Connection {
    connected: bool,
}

async fn is_connected(ctx: &Context, session: Option<&str>) -> Result<Connection> {
    let user = authenticate(ctx, session).await?;
    let tokens = ctx.tokens.get_tokens(&user).await?;
    Ok(Connection {
        connected: tokens.is_some(),
    })
}

async fn connection(req: Request<Context>) -> tide::Result {
    let session = session_token(&req);
    respond(is_connected(req.state(), session.as_deref()).await)
}
