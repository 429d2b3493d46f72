//! Outbound transport: one authenticated SMTP connection per run.
//!
//! `SmtpMailer::connect` performs EHLO, STARTTLS (implicit TLS on port 465)
//! and AUTH, then hands back an [`SmtpSession`] that owns the socket until
//! `close` is called. Dropping an unclosed session aborts the socket.
//! There is no reconnect: a dead connection fails every later send.

use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{SmtpConnection, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::composer::OutboundMessage;
use crate::config::{SenderIdentity, SmtpConfig};
use crate::error::TransportError;

/// Port on which servers expect TLS from the first byte.
const IMPLICIT_TLS_PORT: u16 = 465;

/// Install the process-wide rustls crypto provider. Safe to call repeatedly.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Acquires sessions.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Establish an authenticated session for the duration of a run.
    async fn connect(&self) -> Result<Box<dyn MailSession>, TransportError>;
}

/// A live, authenticated connection.
#[async_trait]
pub trait MailSession: Send {
    /// Deliver one message.
    async fn send(&mut self, message: &OutboundMessage) -> Result<(), TransportError>;

    /// Say goodbye to the server. Later sends fail with `Closed`.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// SMTP transport backed by `lettre`'s low-level connection.
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    host: String,
    port: u16,
    timeout: Duration,
    username: String,
    password: SecretString,
}

impl SmtpMailer {
    pub fn new(smtp: &SmtpConfig, sender: &SenderIdentity) -> Self {
        Self {
            host: smtp.host.clone(),
            port: smtp.port,
            timeout: smtp.timeout,
            username: sender.email.clone(),
            password: sender.password.clone(),
        }
    }

    /// Blocking connect + handshake + auth.
    fn open(&self) -> Result<SmtpConnection, TransportError> {
        let conn_err = |reason: String| TransportError::ConnectionFailure {
            host: self.host.clone(),
            reason,
        };

        let hello = ClientId::Domain("localhost".to_string());
        let tls = || {
            TlsParameters::new(self.host.clone()).map_err(|e| conn_err(format!("TLS setup: {e}")))
        };

        let mut conn = if self.port == IMPLICIT_TLS_PORT {
            SmtpConnection::connect(
                (self.host.as_str(), self.port),
                Some(self.timeout),
                &hello,
                Some(&tls()?),
                None,
            )
            .map_err(|e| conn_err(e.to_string()))?
        } else {
            let mut conn = SmtpConnection::connect(
                (self.host.as_str(), self.port),
                Some(self.timeout),
                &hello,
                None,
                None,
            )
            .map_err(|e| conn_err(e.to_string()))?;
            if !conn.can_starttls() {
                conn.abort();
                return Err(conn_err("server does not offer STARTTLS".into()));
            }
            conn.starttls(&tls()?, &hello)
                .map_err(|e| conn_err(format!("STARTTLS: {e}")))?;
            conn
        };

        let credentials = Credentials::new(
            self.username.clone(),
            self.password.expose_secret().to_string(),
        );
        if let Err(e) = conn.auth(&[Mechanism::Plain, Mechanism::Login], &credentials) {
            conn.abort();
            return Err(if e.is_permanent() {
                TransportError::AuthFailure {
                    host: self.host.clone(),
                    reason: e.to_string(),
                }
            } else {
                conn_err(format!("AUTH: {e}"))
            });
        }

        Ok(conn)
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn connect(&self) -> Result<Box<dyn MailSession>, TransportError> {
        let mailer = self.clone();
        let conn = tokio::task::spawn_blocking(move || mailer.open())
            .await
            .map_err(|e| TransportError::ConnectionFailure {
                host: self.host.clone(),
                reason: format!("connect task panicked: {e}"),
            })??;

        info!(host = %self.host, port = self.port, "SMTP session established");
        Ok(Box::new(SmtpSession {
            host: self.host.clone(),
            conn: Some(conn),
        }))
    }
}

/// An open SMTP connection.
pub struct SmtpSession {
    host: String,
    conn: Option<SmtpConnection>,
}

#[async_trait]
impl MailSession for SmtpSession {
    async fn send(&mut self, message: &OutboundMessage) -> Result<(), TransportError> {
        let email = message.to_email()?;
        let envelope = email.envelope().clone();
        let body = email.formatted();
        let mut conn = self.conn.take().ok_or(TransportError::Closed)?;

        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = conn.send(&envelope, &body);
            (conn, result)
        })
        .await
        .map_err(|e| TransportError::SendFailure {
            recipient: message.to.clone(),
            reason: format!("send task panicked: {e}"),
        })?;
        self.conn = Some(conn);

        let response = result.map_err(|e| TransportError::SendFailure {
            recipient: message.to.clone(),
            reason: e.to_string(),
        })?;
        debug!(to = %message.to, code = %response.code(), "SMTP accepted message");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let host = self.host.clone();
        tokio::task::spawn_blocking(move || conn.quit())
            .await
            .map_err(|e| TransportError::ConnectionFailure {
                host: host.clone(),
                reason: format!("quit task panicked: {e}"),
            })?
            .map_err(|e| TransportError::ConnectionFailure {
                host,
                reason: e.to_string(),
            })?;

        info!(host = %self.host, "SMTP session closed");
        Ok(())
    }
}

impl Drop for SmtpSession {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            warn!(host = %self.host, "SMTP session dropped without QUIT, aborting connection");
            conn.abort();
        }
    }
}
