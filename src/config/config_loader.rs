use anyhow::{Context, Result};

use super::config_model::{Database, DotEnvyConfig, Server, Stripe};

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("{} is not set", key))
}

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let server = Server {
        port: env_var("SERVER_PORT")?
            .parse()
            .context("SERVER_PORT is invalid")?,
        body_limit: env_var("SERVER_BODY_LIMIT")?
            .parse()
            .context("SERVER_BODY_LIMIT is invalid")?,
        timeout: env_var("SERVER_TIMEOUT")?
            .parse()
            .context("SERVER_TIMEOUT is invalid")?,
    };

    let database = Database {
        url: env_var("DATABASE_URL")?,
    };

    let stripe = Stripe {
        secret_key: env_var("STRIPE_SECRET_KEY")?,
        webhook_secret: env_var("STRIPE_WEBHOOK_SECRET")?,
        price_pro: env_var("STRIPE_PRICE_PRO")?,
        price_enterprise: env_var("STRIPE_PRICE_ENTERPRISE")?,
        // Checkout success/cancel and portal return URLs are derived from this.
        frontend_url: env_var("FRONTEND_URL")?.trim_end_matches('/').to_string(),
    };

    Ok(DotEnvyConfig {
        server,
        database,
        stripe,
    })
}
