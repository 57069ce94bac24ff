use anyhow::Result;
use clap::Args;
use serde_json::json;

use crate::args::BaseArgs;
use crate::auth::mask_token;
use crate::context::Session;
use crate::ui::{print_command_status, with_spinner, CommandStatus};

#[derive(Debug, Clone, Args)]
pub struct TokenArgs {
    /// Print the full token instead of a masked one
    #[arg(long)]
    pub show: bool,
}

/// Exchanges the configured credentials for a token, to check they work.
pub async fn run(base: BaseArgs, args: TokenArgs) -> Result<()> {
    let session = Session::open(&base)?;
    let tokens = session.token_provider()?;
    let token = with_spinner("Requesting token...", tokens.get_token()).await?;

    let shown = if args.show {
        token.value().to_string()
    } else {
        mask_token(token.value())
    };
    let expires_at = token.expires_at().map(|t| t.to_rfc3339());

    if base.json {
        println!(
            "{}",
            serde_json::to_string(&json!({
                "token": shown,
                "expires_at": expires_at,
            }))?
        );
        return Ok(());
    }

    print_command_status(CommandStatus::Success, "Authenticated");
    println!("Token:   {shown}");
    println!(
        "Expires: {}",
        expires_at.as_deref().unwrap_or("unknown")
    );
    Ok(())
}
