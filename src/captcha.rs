// captcha.rs
// reCAPTCHA verification for the login form. Only enforced in production.

use serde::Deserialize;
use tracing::warn;

use crate::config::AppConfig;

const VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

#[derive(Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    success: bool,
}

pub async fn verify_recaptcha(
    client: &reqwest::Client,
    config: &AppConfig,
    response_token: Option<&str>,
) -> bool {
    if !config.is_production() {
        return true;
    }
    let Some(token) = response_token.filter(|t| !t.is_empty()) else {
        return false;
    };
    let secret = config.recaptcha_secret_key.clone().unwrap_or_default();

    let result = client
        .post(VERIFY_URL)
        .form(&[("secret", secret.as_str()), ("response", token)])
        .send()
        .await;
    match result {
        Ok(resp) => match resp.json::<VerifyResponse>().await {
            Ok(body) => body.success,
            Err(err) => {
                warn!(error = %err, "unreadable recaptcha answer");
                false
            }
        },
        Err(err) => {
            warn!(error = %err, "recaptcha request failed");
            false
        }
    }
}
