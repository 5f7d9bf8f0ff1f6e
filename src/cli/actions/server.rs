use crate::api;
use crate::api::email::LogEmailSender;
use crate::api::handlers::auth::AuthConfig;
use crate::cli::{actions::Action, globals::GlobalArgs};
use anyhow::{Context, Result};
use std::sync::Arc;
use url::Url;

/// Handle the server action
pub async fn handle(action: Action, globals: &GlobalArgs) -> Result<()> {
    match action {
        Action::Server { port, dsn } => {
            // Fail early on malformed connection strings instead of at pool setup.
            Url::parse(&dsn).context("Invalid database connection string")?;

            let auth_config = AuthConfig::new(globals.frontend_url.clone());

            api::new(port, dsn, globals, auth_config, Arc::new(LogEmailSender)).await?;
        }
    }

    Ok(())
}
