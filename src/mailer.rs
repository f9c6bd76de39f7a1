// mailer.rs
// Outgoing mail. Delivery runs on a detached task so request handlers never
// wait on the mail provider.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{error, info};

use crate::config::AppConfig;

#[derive(Debug, Clone, Serialize)]
pub struct MailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
}

#[derive(Clone)]
pub enum Mailer {
    /// No provider configured; messages are only logged.
    Log,
    /// JSON POST to an HTTP mail API.
    Http {
        client: reqwest::Client,
        url: String,
        api_key: Option<String>,
    },
}

impl Mailer {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let Some(url) = config.mail_api_url.clone() else {
            return Ok(Mailer::Log);
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build mail http client")?;
        Ok(Mailer::Http {
            client,
            url,
            api_key: config.mail_api_key.clone(),
        })
    }

    pub async fn send(&self, message: &MailMessage) -> Result<()> {
        match self {
            Mailer::Log => {
                info!(to = ?message.to, subject = %message.subject, "mail not sent, no provider configured");
                Ok(())
            }
            Mailer::Http {
                client,
                url,
                api_key,
            } => {
                let mut request = client.post(url).json(message);
                if let Some(key) = api_key {
                    request = request.bearer_auth(key);
                }
                let response = request.send().await.context("send mail request")?;
                if !response.status().is_success() {
                    bail!("mail api answered {}", response.status());
                }
                info!(to = ?message.to, subject = %message.subject, "mail sent");
                Ok(())
            }
        }
    }

    /// Fire-and-forget delivery; failures are logged.
    pub fn dispatch(&self, message: MailMessage) {
        let mailer = self.clone();
        tokio::spawn(async move {
            if let Err(err) = mailer.send(&message).await {
                error!(error = %err, to = ?message.to, "mail delivery failed");
            }
        });
    }
}

pub fn password_reset_message(from: &str, to: &str, reset_url: &str) -> MailMessage {
    MailMessage {
        from: from.to_string(),
        to: vec![to.to_string()],
        subject: "Password Reset Request".to_string(),
        text: format!(
            "To reset your password, click the link below:\n\n{reset_url}\n\nIf you did not request this, please ignore this email.\n"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_message_payload() {
        let message = password_reset_message(
            "noreply@example.com",
            "ana@example.com",
            "http://localhost:8080/reset-password/abc",
        );
        let payload = serde_json::to_value(&message).unwrap();
        assert_eq!(payload["to"], serde_json::json!(["ana@example.com"]));
        assert_eq!(payload["subject"], "Password Reset Request");
        assert!(
            payload["text"]
                .as_str()
                .unwrap()
                .contains("/reset-password/abc")
        );
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn log_mailer_keeps_reset_links_out_of_the_log() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let message = password_reset_message(
            "noreply@example.com",
            "ana@example.com",
            "http://localhost:8080/reset-password/secret-token",
        );
        Mailer::Log.send(&message).await.unwrap();

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("ana@example.com"));
        assert!(output.contains("Password Reset Request"));
        assert!(!output.contains("secret-token"));
    }
}
