// config.rs
// Runtime configuration read from the environment (after `.env` is loaded).

use std::{env, net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result};

use crate::ledger::NegativeStockPolicy;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub mongodb_uri: String,
    pub mongodb_db: String,
    pub secret_key: String,
    pub password_salt: String,
    /// `production` turns on the reCAPTCHA check.
    pub app_env: String,
    pub recaptcha_site_key: Option<String>,
    pub recaptcha_secret_key: Option<String>,
    pub mail_api_url: Option<String>,
    pub mail_api_key: Option<String>,
    pub mail_from: String,
    pub public_base_url: String,
    pub upload_dir: PathBuf,
    pub typst_bin: String,
    pub negative_stock: NegativeStockPolicy,
    pub seed_admin_email: Option<String>,
    pub seed_admin_password: Option<String>,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = var_or("BIND_ADDR", "0.0.0.0:8080")
            .parse()
            .context("BIND_ADDR must be host:port")?;
        let negative_stock = match optional("NEGATIVE_STOCK") {
            Some(raw) => NegativeStockPolicy::parse(&raw)
                .with_context(|| format!("unknown NEGATIVE_STOCK policy `{raw}`"))?,
            None => NegativeStockPolicy::default(),
        };

        Ok(AppConfig {
            bind_addr,
            mongodb_uri: var_or("MONGODB_URI", "mongodb://localhost:27017/?replicaSet=rs0"),
            mongodb_db: var_or("MONGODB_DB", "stockroom"),
            secret_key: var_or("SECRET_KEY", "dev-secret"),
            password_salt: var_or("SECURITY_PASSWORD_SALT", "password-reset-salt"),
            app_env: var_or("APP_ENV", "development"),
            recaptcha_site_key: optional("RECAPTCHA_SITE_KEY"),
            recaptcha_secret_key: optional("RECAPTCHA_SECRET_KEY"),
            mail_api_url: optional("MAIL_API_URL"),
            mail_api_key: optional("MAIL_API_KEY"),
            mail_from: var_or("MAIL_FROM", "no-reply@stockroom.local"),
            public_base_url: var_or("PUBLIC_BASE_URL", "http://localhost:8080")
                .trim_end_matches('/')
                .to_string(),
            upload_dir: PathBuf::from(var_or("UPLOAD_DIR", "uploads")),
            typst_bin: var_or("TYPST_BIN", "typst"),
            negative_stock,
            seed_admin_email: optional("SEED_ADMIN_EMAIL"),
            seed_admin_password: optional("SEED_ADMIN_PASSWORD"),
        })
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }
}
