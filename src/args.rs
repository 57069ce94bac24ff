use std::path::PathBuf;

use clap::Args;

#[derive(Debug, Clone, Default, Args)]
pub struct BaseArgs {
    /// Output as JSON
    #[arg(short = 'j', long, global = true)]
    pub json: bool,

    /// Increase log verbosity (-v info, -vv debug). RIVERLEVELS_LOG takes precedence.
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to a .env file to load before running commands.
    #[arg(long, env = "RIVERLEVELS_ENV_FILE", hide_env_values = true, global = true)]
    pub env_file: Option<PathBuf>,

    /// Path to a JSON config file (overrides local and global config discovery)
    #[arg(long, env = "RIVERLEVELS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// ArcGIS Online username (or via RIVERLEVELS_USERNAME)
    #[arg(long, env = "RIVERLEVELS_USERNAME", hide_env_values = true, global = true)]
    pub username: Option<String>,

    /// ArcGIS Online password (or via RIVERLEVELS_PASSWORD)
    #[arg(long, env = "RIVERLEVELS_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// Application client id, used when no username is set (or via RIVERLEVELS_CLIENT_ID)
    #[arg(long, env = "RIVERLEVELS_CLIENT_ID", hide_env_values = true, global = true)]
    pub client_id: Option<String>,

    /// Application client secret (or via RIVERLEVELS_CLIENT_SECRET)
    #[arg(long, env = "RIVERLEVELS_CLIENT_SECRET", hide_env_values = true, global = true)]
    pub client_secret: Option<String>,

    /// Override the generateToken endpoint (or via RIVERLEVELS_TOKEN_URL)
    #[arg(long, env = "RIVERLEVELS_TOKEN_URL", hide_env_values = true, global = true)]
    pub token_url: Option<String>,

    /// Override the OAuth2 token endpoint (or via RIVERLEVELS_OAUTH_TOKEN_URL)
    #[arg(long, env = "RIVERLEVELS_OAUTH_TOKEN_URL", hide_env_values = true, global = true)]
    pub oauth_token_url: Option<String>,

    /// Feature layer URL for river reach lines (or via RIVERLEVELS_LINES_URL)
    #[arg(long, env = "RIVERLEVELS_LINES_URL", hide_env_values = true, global = true)]
    pub lines_url: Option<String>,

    /// Feature layer URL for river reach points (or via RIVERLEVELS_POINTS_URL)
    #[arg(long, env = "RIVERLEVELS_POINTS_URL", hide_env_values = true, global = true)]
    pub points_url: Option<String>,

    /// Base URL of the river gauge listings (or via RIVERLEVELS_OBSERVATIONS_URL)
    #[arg(long, env = "RIVERLEVELS_OBSERVATIONS_URL", hide_env_values = true, global = true)]
    pub observations_url: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, env = "RIVERLEVELS_TIMEOUT_SECS", global = true)]
    pub timeout_secs: Option<u64>,

    /// Attempts per request before a transient failure is reported
    #[arg(long, env = "RIVERLEVELS_MAX_ATTEMPTS", global = true)]
    pub max_attempts: Option<usize>,

    /// Block fetches in flight per layer
    #[arg(long, env = "RIVERLEVELS_CONCURRENCY", global = true)]
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone, Args)]
pub struct CLIArgs<T: Args> {
    #[command(flatten)]
    pub base: BaseArgs,

    #[command(flatten)]
    pub args: T,
}
