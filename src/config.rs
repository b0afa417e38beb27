use std::convert::TryFrom;
use std::io::Read;
use std::{env, fs};

use crate::error::{Error, Result};

pub const DEFAULT_REDIRECT_BASE: &str = "https://dailytune.duckdns.org";
pub const SPOTIFY_ACCOUNTS_URL: &str = "https://accounts.spotify.com";
pub const SPOTIFY_API_URL: &str = "https://api.spotify.com/v1";

pub fn env_or(k: &str, default: &str) -> String {
    env::var(k).unwrap_or_else(|_| default.to_string())
}

#[derive(Clone, Debug)]
pub struct Config {
    pub version: String,
    pub ssl: bool,
    pub host: String,
    pub port: u16,
    pub log_format: String,
    pub log_level: String,
    pub spotify_client_id: String,
    pub spotify_client_secret: String,
    // scheme and host that spotify sends users back to, `/callback` is appended
    pub redirect_base: String,
    pub spotify_accounts_url: String,
    pub spotify_api_url: String,
    pub db_url: String,
    pub db_max_connections: u32,
    // 32 byte key used for token encryption and session hmacs
    pub enc_key: String,
    pub session_expiration_seconds: u64,
    pub pending_connection_seconds: u64,
}

impl Config {
    /// Load from the process environment and validate
    pub fn load() -> Result<Self> {
        let version = fs::File::open("commit_hash.txt")
            .and_then(|mut f| {
                let mut s = String::new();
                f.read_to_string(&mut s)?;
                Ok(s.trim().to_string())
            })
            .unwrap_or_else(|_| "unknown".to_string());
        let config = Self::from_lookup(version, |k| env::var(k).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Build from an arbitrary key lookup. Required values that are missing
    /// are left empty and rejected by `validate`.
    pub fn from_lookup<F>(version: String, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str, default: &str| lookup(k).unwrap_or_else(|| default.to_string());
        let parse_num = |k: &str, default: &str| -> Result<u64> {
            get(k, default)
                .trim()
                .parse::<u64>()
                .map_err(|_| Error::Configuration(format!("invalid {}", k)))
        };
        Ok(Self {
            version,
            ssl: get("SSL", "false") == "true",
            host: get("HOST", "localhost"),
            port: get("PORT", "3030")
                .trim()
                .parse()
                .map_err(|_| Error::Configuration("invalid PORT".to_string()))?,
            log_format: get("LOG_FORMAT", "json").to_lowercase().trim().to_string(),
            log_level: get("LOG_LEVEL", "INFO"),
            spotify_client_id: get("SPOTIFY_CLIENT_ID", ""),
            spotify_client_secret: get("SPOTIFY_CLIENT_SECRET", ""),
            redirect_base: get("REDIRECT_URI", DEFAULT_REDIRECT_BASE),
            spotify_accounts_url: get("SPOTIFY_ACCOUNTS_URL", SPOTIFY_ACCOUNTS_URL),
            spotify_api_url: get("SPOTIFY_API_URL", SPOTIFY_API_URL),
            db_url: get("DATABASE_URL", ""),
            db_max_connections: u32::try_from(parse_num("DATABASE_MAX_CONNECTIONS", "5")?)
                .map_err(|_| {
                    Error::Configuration("invalid DATABASE_MAX_CONNECTIONS".to_string())
                })?,
            enc_key: get("ENC_KEY", ""),
            session_expiration_seconds: parse_num("SESSION_EXPIRATION_SECONDS", "2592000")?,
            pending_connection_seconds: parse_num("PENDING_CONNECTION_SECONDS", "600")?,
        })
    }

    /// Fail fast on anything a request would otherwise trip over later
    pub fn validate(&self) -> Result<()> {
        if self.spotify_client_id.trim().is_empty() || self.spotify_client_secret.trim().is_empty()
        {
            return Err(Error::Configuration(
                "Spotify credentials not configured".to_string(),
            ));
        }
        if self.db_url.trim().is_empty() {
            return Err(Error::Configuration("DATABASE_URL not configured".to_string()));
        }
        if self.enc_key.len() != crate::crypto::KEY_LEN {
            return Err(Error::Configuration(format!(
                "ENC_KEY must be {} bytes",
                crate::crypto::KEY_LEN
            )));
        }
        if self.log_level.parse::<slog::Level>().is_err() {
            return Err(Error::Configuration(format!(
                "invalid LOG_LEVEL {}",
                self.log_level
            )));
        }
        for (name, secs) in &[
            ("SESSION_EXPIRATION_SECONDS", self.session_expiration_seconds),
            ("PENDING_CONNECTION_SECONDS", self.pending_connection_seconds),
        ] {
            if crate::utils::expires_at_from_now(*secs).is_err() {
                return Err(Error::Configuration(format!("{} is too large", name)));
            }
        }
        if self.db_max_connections == 0 {
            return Err(Error::Configuration(
                "DATABASE_MAX_CONNECTIONS must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn initialize(&self) -> Result<()> {
        slog::info!(
            crate::LOG, "initialized config";
            "version" => &self.version,
            "ssl" => &self.ssl,
            "host" => &self.host,
            "port" => &self.port,
            "log_format" => &self.log_format,
            "log_level" => &self.log_level,
            "redirect_uri" => self.spotify_redirect_url(),
        );
        Ok(())
    }

    pub fn host(&self) -> String {
        let p = if self.ssl { "https" } else { "http" };
        format!("{}://{}:{}", p, self.host, self.port)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn spotify_redirect_url(&self) -> String {
        format!("{}/callback", self.redirect_base.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    fn complete() -> Vec<(&'static str, &'static str)> {
        vec![
            ("SPOTIFY_CLIENT_ID", "client"),
            ("SPOTIFY_CLIENT_SECRET", "secret"),
            ("DATABASE_URL", "postgres://localhost/dailytune"),
            ("ENC_KEY", "01234567890123456789012345678901"),
        ]
    }

    #[test]
    fn defaults_fill_in_optional_values() {
        let c = Config::from_lookup("test".into(), lookup(&complete())).unwrap();
        c.validate().unwrap();
        assert_eq!(c.port, 3030);
        assert_eq!(c.db_max_connections, 5);
        assert_eq!(c.pending_connection_seconds, 600);
        assert_eq!(
            c.spotify_redirect_url(),
            "https://dailytune.duckdns.org/callback"
        );
        assert_eq!(c.listen_addr(), "localhost:3030");
    }

    #[test]
    fn redirect_base_trailing_slash_is_ignored() {
        let mut pairs = complete();
        pairs.push(("REDIRECT_URI", "http://localhost:8080/"));
        let c = Config::from_lookup("test".into(), lookup(&pairs)).unwrap();
        assert_eq!(c.spotify_redirect_url(), "http://localhost:8080/callback");
    }

    #[test]
    fn missing_credentials_fail_validation() {
        let pairs: Vec<_> = complete()
            .into_iter()
            .filter(|(k, _)| *k != "SPOTIFY_CLIENT_SECRET")
            .collect();
        let c = Config::from_lookup("test".into(), lookup(&pairs)).unwrap();
        let err = c.validate().unwrap_err();
        assert_eq!(err.to_string(), "Spotify credentials not configured");
    }

    #[test]
    fn short_key_and_bad_numbers_are_rejected() {
        let mut pairs = complete();
        pairs.retain(|(k, _)| *k != "ENC_KEY");
        pairs.push(("ENC_KEY", "too-short"));
        let c = Config::from_lookup("test".into(), lookup(&pairs)).unwrap();
        assert!(c.validate().is_err());

        let mut pairs = complete();
        pairs.push(("PORT", "not-a-port"));
        assert!(Config::from_lookup("test".into(), lookup(&pairs)).is_err());
    }

    #[test]
    fn pool_size_does_not_wrap() {
        let mut pairs = complete();
        pairs.push(("DATABASE_MAX_CONNECTIONS", "4294967297"));
        let err = Config::from_lookup("test".into(), lookup(&pairs)).unwrap_err();
        assert_eq!(err.to_string(), "invalid DATABASE_MAX_CONNECTIONS");
    }

    #[test]
    fn unrepresentable_lifespans_are_rejected() {
        let mut pairs = complete();
        pairs.push(("SESSION_EXPIRATION_SECONDS", "10000000000000000"));
        let c = Config::from_lookup("test".into(), lookup(&pairs)).unwrap();
        let err = c.validate().unwrap_err();
        assert_eq!(err.to_string(), "SESSION_EXPIRATION_SECONDS is too large");
    }
}
