use std::time::Duration;
use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

use crate::args::BaseArgs;
use crate::auth::{
    Credential, TokenEndpoints, DEFAULT_EXPIRATION_MINUTES, DEFAULT_OAUTH_TOKEN_URL,
    DEFAULT_REFERER, DEFAULT_TOKEN_URL,
};
use crate::http::RetryPolicy;
use crate::layers::{LayerConfig, LayerKind, DEFAULT_CONCURRENCY};
use crate::ui::{print_command_status, CommandStatus};
use crate::whitewater::DEFAULT_OBSERVATIONS_URL;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub lines_url: Option<String>,
    pub points_url: Option<String>,
    pub token_url: Option<String>,
    pub oauth_token_url: Option<String>,
    pub observations_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub referer: Option<String>,
    pub token_expiration_minutes: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub max_attempts: Option<usize>,
    pub concurrency: Option<usize>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Config {
    /// Fields set in `other` win.
    fn merge(&self, other: &Config) -> Config {
        let mut extra = self.extra.clone();
        extra.extend(other.extra.clone());
        Config {
            lines_url: other.lines_url.clone().or_else(|| self.lines_url.clone()),
            points_url: other.points_url.clone().or_else(|| self.points_url.clone()),
            token_url: other.token_url.clone().or_else(|| self.token_url.clone()),
            oauth_token_url: other
                .oauth_token_url
                .clone()
                .or_else(|| self.oauth_token_url.clone()),
            observations_url: other
                .observations_url
                .clone()
                .or_else(|| self.observations_url.clone()),
            username: other.username.clone().or_else(|| self.username.clone()),
            password: other.password.clone().or_else(|| self.password.clone()),
            client_id: other.client_id.clone().or_else(|| self.client_id.clone()),
            client_secret: other
                .client_secret
                .clone()
                .or_else(|| self.client_secret.clone()),
            referer: other.referer.clone().or_else(|| self.referer.clone()),
            token_expiration_minutes: other
                .token_expiration_minutes
                .or(self.token_expiration_minutes),
            timeout_secs: other.timeout_secs.or(self.timeout_secs),
            max_attempts: other.max_attempts.or(self.max_attempts),
            concurrency: other.concurrency.or(self.concurrency),
            extra,
        }
    }

    /// Overlays command-line and environment values.
    fn apply_args(&self, base: &BaseArgs) -> Config {
        let from_args = Config {
            lines_url: base.lines_url.clone(),
            points_url: base.points_url.clone(),
            token_url: base.token_url.clone(),
            oauth_token_url: base.oauth_token_url.clone(),
            observations_url: base.observations_url.clone(),
            username: base.username.clone(),
            password: base.password.clone(),
            client_id: base.client_id.clone(),
            client_secret: base.client_secret.clone(),
            timeout_secs: base.timeout_secs,
            max_attempts: base.max_attempts,
            concurrency: base.concurrency,
            ..Config::default()
        };
        self.merge(&from_args)
    }
}

pub fn global_config_dir() -> Result<PathBuf> {
    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(xdg).join("riverlevels"));
    }
    dirs::home_dir()
        .map(|path| path.join(".config").join("riverlevels"))
        .ok_or_else(|| anyhow!("$HOME not configured."))
}

pub fn global_path() -> Result<PathBuf> {
    Ok(global_config_dir()?.join("config.json"))
}

pub fn find_local_config_dir() -> Option<PathBuf> {
    let home = dirs::home_dir();
    let mut current_dir = env::current_dir().ok()?;

    loop {
        if current_dir.join(".riverlevels").is_dir() {
            return Some(current_dir.join(".riverlevels"));
        }
        if current_dir.join(".git").exists() {
            return None;
        }
        if Some(&current_dir) == home.as_ref() {
            return None;
        }
        if !current_dir.pop() {
            return None;
        }
    }
}

pub fn local_path() -> Option<PathBuf> {
    find_local_config_dir().map(|dir| dir.join("config.json"))
}

/// Missing files are empty configs; unreadable ones warn and are ignored.
pub fn load_file(path: &Path) -> Config {
    let file_contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Config::default(),
        Err(e) => {
            print_command_status(
                CommandStatus::Warning,
                &format!("could not read {}: {e}", path.display()),
            );
            return Config::default();
        }
    };

    let config: Config = match serde_json::from_str(&file_contents) {
        Ok(c) => c,
        Err(e) => {
            print_command_status(
                CommandStatus::Warning,
                &format!("could not parse {}: {e}", path.display()),
            );
            return Config::default();
        }
    };

    for key in config.extra.keys() {
        print_command_status(
            CommandStatus::Warning,
            &format!("unknown config key {} in {}", key, path.display()),
        );
    }
    tracing::debug!(path = %path.display(), "loaded config");

    config
}

/// Global config overlaid with local config, or just `explicit` when given.
pub fn load(explicit: Option<&Path>) -> Config {
    if let Some(path) = explicit {
        return load_file(path);
    }
    let global = global_path().map(|p| load_file(&p)).unwrap_or_default();
    let local = local_path().map(|p| load_file(&p)).unwrap_or_default();
    global.merge(&local)
}

/// Fully resolved run settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub credential: Option<Credential>,
    pub endpoints: TokenEndpoints,
    pub lines_url: Option<String>,
    pub points_url: Option<String>,
    pub observations_url: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub concurrency: usize,
}

impl Settings {
    pub fn resolve(base: &BaseArgs) -> Result<Settings> {
        let file = load(base.config.as_deref());
        Self::from_config(&file.apply_args(base))
    }

    pub fn from_config(config: &Config) -> Result<Settings> {
        let credential = resolve_credential(config)?;
        let timeout_secs = config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            bail!("timeout_secs must be greater than zero");
        }

        Ok(Settings {
            credential,
            endpoints: TokenEndpoints {
                generate_token_url: non_empty(&config.token_url)
                    .unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
                oauth_token_url: non_empty(&config.oauth_token_url)
                    .unwrap_or_else(|| DEFAULT_OAUTH_TOKEN_URL.to_string()),
                referer: non_empty(&config.referer).unwrap_or_else(|| DEFAULT_REFERER.to_string()),
                expiration_minutes: config
                    .token_expiration_minutes
                    .unwrap_or(DEFAULT_EXPIRATION_MINUTES),
            },
            lines_url: non_empty(&config.lines_url),
            points_url: non_empty(&config.points_url),
            observations_url: non_empty(&config.observations_url)
                .unwrap_or_else(|| DEFAULT_OBSERVATIONS_URL.to_string()),
            timeout: Duration::from_secs(timeout_secs),
            retry: RetryPolicy::with_max_attempts(
                config.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            ),
            concurrency: config.concurrency.unwrap_or(DEFAULT_CONCURRENCY).max(1),
        })
    }

    pub fn require_credential(&self) -> Result<Credential> {
        self.credential.clone().ok_or_else(|| {
            anyhow!(
                "no credentials configured. Set RIVERLEVELS_USERNAME/RIVERLEVELS_PASSWORD \
                 or RIVERLEVELS_CLIENT_ID/RIVERLEVELS_CLIENT_SECRET"
            )
        })
    }

    pub fn layer_url(&self, kind: LayerKind) -> Option<&str> {
        match kind {
            LayerKind::Lines => self.lines_url.as_deref(),
            LayerKind::Points => self.points_url.as_deref(),
        }
    }

    /// The requested layers, or every configured layer when none are named.
    pub fn layers(&self, requested: &[LayerKind]) -> Result<Vec<LayerConfig>> {
        let kinds: Vec<LayerKind> = if requested.is_empty() {
            [LayerKind::Lines, LayerKind::Points]
                .into_iter()
                .filter(|kind| self.layer_url(*kind).is_some())
                .collect()
        } else {
            requested.to_vec()
        };
        if kinds.is_empty() {
            bail!("no feature layers configured. Set --lines-url and/or --points-url");
        }

        kinds
            .into_iter()
            .map(|kind| {
                let url = self.layer_url(kind).ok_or_else(|| {
                    anyhow!(
                        "no URL configured for layer {}. Set --{}-url",
                        kind.as_str(),
                        kind.as_str()
                    )
                })?;
                Ok(LayerConfig {
                    kind,
                    base_url: url.to_string(),
                })
            })
            .collect()
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn resolve_credential(config: &Config) -> Result<Option<Credential>> {
    match (non_empty(&config.username), non_empty(&config.password)) {
        (Some(username), Some(password)) => {
            return Ok(Some(Credential::User { username, password }));
        }
        (Some(_), None) => bail!("username is set but password is missing"),
        (None, Some(_)) => bail!("password is set but username is missing"),
        (None, None) => {}
    }
    match (non_empty(&config.client_id), non_empty(&config.client_secret)) {
        (Some(client_id), Some(client_secret)) => Ok(Some(Credential::Application {
            client_id,
            client_secret,
        })),
        (Some(_), None) => bail!("client_id is set but client_secret is missing"),
        (None, Some(_)) => bail!("client_secret is set but client_id is missing"),
        (None, None) => Ok(None),
    }
}
