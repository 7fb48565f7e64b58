//
// Mail collaborator (A3, §2): the narrow delivery boundary the REST
// surface calls to hand a user a one-time code. What goes out over
// SMTP versus what just lands on disk is a deployment concern external
// to this crate; only the trait and a local filesystem transport
// (suitable for development and tests) live here.
//
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

use async_trait::async_trait;
use lettre::{
    message::Mailbox,
    transport::smtp::authentication::Credentials,
    transport::smtp::client::{Tls, TlsParameters},
    transport::smtp::extension::ClientId,
    Address, AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::CONFIG;
use crate::error::Error;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_password_reset_code(&self, email: &str, code: &str) -> Result<(), Error>;
    async fn send_passwordless_code(&self, identifier: &str, code: &str) -> Result<(), Error>;
}

pub fn notifier() -> &'static dyn Notifier {
    static LOCAL: LocalNotifier = LocalNotifier;
    static SMTP: LazyLock<SmtpNotifier> = LazyLock::new(SmtpNotifier::from_config);

    if CONFIG.mail_transport() == "smtp" {
        &*SMTP
    } else {
        &LOCAL
    }
}

fn build_message(to: &str, subject: &str, body: String) -> Result<Message, Error> {
    let from = Address::from_str(&CONFIG.smtp_from()).map_err(|e| Error::new(format!("invalid SMTP_FROM address: {e}")))?;
    let to = Address::from_str(to).map_err(|e| Error::validation(format!("invalid recipient address: {e}")))?;
    Message::builder()
        .message_id(Some(format!("<{}@{}>", crate::util::get_uuid(), from.domain())))
        .to(Mailbox::new(None, to))
        .from(Mailbox::new(None, from))
        .subject(subject.to_string())
        .body(body)
        .map_err(|e| Error::new(format!("failed to build mail message: {e}")))
}

/// Writes each message as a `.eml` file under `<data_folder>/mail` instead
/// of sending it anywhere, matching how `lettre::AsyncFileTransport` is
/// documented to be used for development and integration tests.
pub struct LocalNotifier;

impl LocalNotifier {
    fn transport(&self) -> AsyncFileTransport<Tokio1Executor> {
        let dir: PathBuf = [CONFIG.data_folder(), "mail".to_string()].iter().collect();
        AsyncFileTransport::new(dir)
    }

    async fn deliver(&self, message: Message) -> Result<(), Error> {
        self.transport().send(message).await.map_err(|e| Error::new(format!("local mail delivery failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for LocalNotifier {
    async fn send_password_reset_code(&self, email: &str, code: &str) -> Result<(), Error> {
        let message = build_message(email, "Password reset code", format!("Your password reset code is: {code}"))?;
        self.deliver(message).await
    }

    async fn send_passwordless_code(&self, identifier: &str, code: &str) -> Result<(), Error> {
        let message = build_message(identifier, "Sign-in code", format!("Your sign-in code is: {code}"))?;
        self.deliver(message).await
    }
}

pub struct SmtpNotifier;

impl SmtpNotifier {
    fn from_config() -> Self {
        Self
    }

    async fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, Error> {
        let host = CONFIG.smtp_host().ok_or_else(|| Error::new("SMTP_HOST is not configured"))?;

        let mut tls_parameters = TlsParameters::builder(host.clone());
        tls_parameters = tls_parameters.dangerous_accept_invalid_certs(false);
        let tls_parameters = tls_parameters.build().map_err(|e| Error::new(format!("invalid SMTP TLS configuration: {e}")))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host.as_str())
            .port(CONFIG.smtp_port())
            .tls(Tls::Required(tls_parameters));

        if let (Some(user), Some(pass)) = (CONFIG.smtp_username(), CONFIG.smtp_password()) {
            builder = builder.credentials(Credentials::new(user, pass));
        }
        if let Some(helo_name) = CONFIG.helo_name() {
            builder = builder.hello_name(ClientId::Domain(helo_name));
        }

        Ok(builder.build())
    }

    async fn deliver(&self, message: Message) -> Result<(), Error> {
        let transport = self.transport().await?;
        transport.send(message).await.map_err(|e| Error::new(format!("SMTP delivery failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_password_reset_code(&self, email: &str, code: &str) -> Result<(), Error> {
        let message = build_message(email, "Password reset code", format!("Your password reset code is: {code}"))?;
        self.deliver(message).await
    }

    async fn send_passwordless_code(&self, identifier: &str, code: &str) -> Result<(), Error> {
        let message = build_message(identifier, "Sign-in code", format!("Your sign-in code is: {code}"))?;
        self.deliver(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_message_with_valid_recipient() {
        let message = build_message("user@example.com", "Sign-in code", "123456".to_string()).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Sign-in code"));
        assert!(raw.contains("user@example.com"));
    }

    #[test]
    fn rejects_malformed_recipient_address() {
        let err = build_message("not-an-address", "Sign-in code", "123456".to_string()).unwrap_err();
        assert_eq!(err.kind().as_str(), "validation_failed");
    }
}
