//! Outbound message composition.
//!
//! [`MessageComposer::compose`] is a pure function of the sender identity
//! and recipient: no I/O and no hidden state. Rendering into a `lettre`
//! message (address parsing, header encoding) happens separately in
//! [`OutboundMessage::to_email`] because that step can fail per recipient.

use lettre::{Address, Message};
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::Mailbox;

use crate::config::{HeaderOptions, MessageConfig, SenderIdentity};
use crate::error::TransportError;
use crate::recipients::RecipientRecord;

/// Opening paragraph used when no pitch is configured.
const DEFAULT_PITCH: &str = "I would like to explore whether there is a fit for my background \
on your team, and would be glad to share more details at your convenience.";

/// A composed message, ready to be rendered for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub from_name: String,
    pub from_email: String,
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub reply_to: Option<String>,
    pub list_unsubscribe: Option<String>,
    pub precedence: Option<String>,
}

/// Builds per-recipient messages from shared message settings.
#[derive(Debug, Clone)]
pub struct MessageComposer {
    subject: String,
    profile_url: String,
    resume_url: String,
    pitch: Option<String>,
    headers: HeaderOptions,
}

impl MessageComposer {
    pub fn new(config: &MessageConfig) -> Self {
        Self {
            subject: config.subject.clone(),
            profile_url: config.profile_url.clone(),
            resume_url: config.resume_url.clone(),
            pitch: config.pitch.clone(),
            headers: config.headers,
        }
    }

    /// Compose the message for one recipient.
    pub fn compose(&self, sender: &SenderIdentity, recipient: &RecipientRecord) -> OutboundMessage {
        OutboundMessage {
            from_name: sender.name.clone(),
            from_email: sender.email.clone(),
            to: recipient.email.clone(),
            subject: self.subject.clone(),
            html_body: self.render_body(sender, recipient),
            reply_to: self
                .headers
                .include_reply_to
                .then(|| sender.email.clone()),
            list_unsubscribe: self
                .headers
                .include_unsubscribe
                .then(|| format!("<mailto:{}?subject=unsubscribe>", sender.email)),
            precedence: self
                .headers
                .include_bulk_precedence
                .then(|| "bulk".to_string()),
        }
    }

    fn render_body(&self, sender: &SenderIdentity, recipient: &RecipientRecord) -> String {
        let pitch = self.pitch.as_deref().unwrap_or(DEFAULT_PITCH);
        format!(
            "<p>Hi {name},</p>\n\
             <p>I'm reaching out about opportunities at <b>{company}</b>.</p>\n\
             <p>{pitch}</p>\n\
             <p>Best regards,<br>\n\
             {sender_name}<br>\n\
             {phone}<br>\n\
             <a href=\"mailto:{sender_email}\">{sender_email}</a><br>\n\
             <a href=\"{profile}\">Profile</a> | <a href=\"{resume}\">Resume</a></p>\n",
            name = escape_html(&recipient.name),
            company = escape_html(&recipient.company),
            pitch = escape_html(pitch),
            sender_name = escape_html(&sender.name),
            phone = escape_html(&sender.phone),
            sender_email = escape_html(&sender.email),
            profile = escape_html(&self.profile_url),
            resume = escape_html(&self.resume_url),
        )
    }
}

impl OutboundMessage {
    /// Render into a `lettre` message.
    pub fn to_email(&self) -> Result<Message, TransportError> {
        let invalid = |what: &str, e: &dyn std::fmt::Display| TransportError::InvalidMessage {
            reason: format!("{what}: {e}"),
        };

        let from = Mailbox::new(
            Some(self.from_name.clone()),
            self.from_email
                .parse::<Address>()
                .map_err(|e| invalid("invalid from address", &e))?,
        );
        let to = self
            .to
            .parse::<Mailbox>()
            .map_err(|e| invalid(&format!("invalid to address {:?}", self.to), &e))?;

        let mut builder = Message::builder()
            .from(from)
            .to(to)
            .subject(self.subject.clone())
            .header(ContentType::TEXT_HTML);

        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(
                reply_to
                    .parse::<Mailbox>()
                    .map_err(|e| invalid("invalid reply-to address", &e))?,
            );
        }
        if let Some(value) = &self.list_unsubscribe {
            builder = builder.header(ListUnsubscribe(value.clone()));
        }
        if let Some(value) = &self.precedence {
            builder = builder.header(Precedence(value.clone()));
        }

        builder
            .body(self.html_body.clone())
            .map_err(|e| invalid("failed to build email", &e))
    }
}

/// `List-Unsubscribe` header.
#[derive(Debug, Clone)]
struct ListUnsubscribe(String);

impl Header for ListUnsubscribe {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("List-Unsubscribe")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// `Precedence` header.
#[derive(Debug, Clone)]
struct Precedence(String);

impl Header for Precedence {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("Precedence")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// Escape text for inclusion in HTML element content or attributes.
fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    fn sender() -> SenderIdentity {
        SenderIdentity {
            name: "Dana Reyes".into(),
            email: "dana@example.com".into(),
            phone: "+1 555 0100".into(),
            password: SecretString::from("unused"),
        }
    }

    fn recipient(company: &str) -> RecipientRecord {
        RecipientRecord {
            name: "Alice".into(),
            email: "alice@acme.test".into(),
            company: company.into(),
        }
    }

    fn composer(headers: HeaderOptions) -> MessageComposer {
        MessageComposer::new(&MessageConfig {
            subject: "Backend roles".into(),
            profile_url: "https://example.com/in/dana".into(),
            resume_url: "https://example.com/resume.pdf".into(),
            pitch: None,
            headers,
        })
    }

    #[test]
    fn body_interpolates_recipient_and_sender() {
        let msg = composer(HeaderOptions::default()).compose(&sender(), &recipient("Acme"));
        assert_eq!(msg.to, "alice@acme.test");
        assert_eq!(msg.subject, "Backend roles");
        assert!(msg.html_body.contains("Hi Alice,"));
        assert!(msg.html_body.contains("<b>Acme</b>"));
        assert!(msg.html_body.contains("mailto:dana@example.com"));
        assert!(msg.html_body.contains("https://example.com/in/dana"));
        assert!(msg.html_body.contains("https://example.com/resume.pdf"));
        assert!(msg.html_body.contains(DEFAULT_PITCH));
    }

    #[test]
    fn compose_is_deterministic() {
        let c = composer(HeaderOptions {
            include_reply_to: true,
            include_unsubscribe: true,
            include_bulk_precedence: true,
        });
        assert_eq!(
            c.compose(&sender(), &recipient("Acme")),
            c.compose(&sender(), &recipient("Acme"))
        );
    }

    #[test]
    fn empty_company_degrades_to_empty_string() {
        let msg = composer(HeaderOptions::default()).compose(&sender(), &recipient(""));
        assert!(msg.html_body.contains("<b></b>"));
    }

    #[test]
    fn recipient_fields_are_escaped() {
        let msg = composer(HeaderOptions::default()).compose(&sender(), &recipient("A&B <Labs>"));
        assert!(msg.html_body.contains("<b>A&amp;B &lt;Labs&gt;</b>"));
    }

    #[test]
    fn deliverability_headers_are_off_by_default() {
        let msg = composer(HeaderOptions::default()).compose(&sender(), &recipient("Acme"));
        assert!(msg.reply_to.is_none());
        assert!(msg.list_unsubscribe.is_none());
        assert!(msg.precedence.is_none());
    }

    #[test]
    fn rendered_email_carries_enabled_headers() {
        let msg = composer(HeaderOptions {
            include_reply_to: true,
            include_unsubscribe: true,
            include_bulk_precedence: true,
        })
        .compose(&sender(), &recipient("Acme"));

        let email = msg.to_email().unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("Reply-To: dana@example.com"));
        assert!(raw.contains("List-Unsubscribe: <mailto:dana@example.com?subject=unsubscribe>"));
        assert!(raw.contains("Precedence: bulk"));
        assert!(raw.contains("Content-Type: text/html"));
    }

    #[test]
    fn invalid_recipient_address_fails_to_render() {
        let mut bad = recipient("Acme");
        bad.email = "not an address".into();
        let msg = composer(HeaderOptions::default()).compose(&sender(), &bad);
        assert!(matches!(
            msg.to_email(),
            Err(TransportError::InvalidMessage { .. })
        ));
    }
}
