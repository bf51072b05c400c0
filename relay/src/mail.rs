//! Validation of sendmail form fields and construction of the upstream payload.

use crate::config::DkimConfig;
use crate::errors::RelayError;
use crate::html_text::html_to_text;
use serde::Serialize;
use std::sync::Arc;

pub const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";
pub const TEXT_HTML_UTF8: &str = "text/html; charset=utf-8";

/// Raw sendmail form fields. Absent fields stay `None`; when a field is repeated
/// the first value wins.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MailForm {
    pub from_email: Option<String>,
    pub from_name: Option<String>,
    pub to_email: Option<String>,
    pub to_name: Option<String>,
    pub subject: Option<String>,
    pub content: Option<String>,
    pub is_html: Option<String>,
}

impl MailForm {
    /// Parses an `application/x-www-form-urlencoded` body.
    pub fn parse(body: &[u8]) -> Self {
        let mut form = MailForm::default();

        for (name, value) in url::form_urlencoded::parse(body) {
            let slot = match &*name {
                "from_email" => &mut form.from_email,
                "from_name" => &mut form.from_name,
                "to_email" => &mut form.to_email,
                "to_name" => &mut form.to_name,
                "subject" => &mut form.subject,
                "content" => &mut form.content,
                "is_html" => &mut form.is_html,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }

        form
    }

    /// Everything after the first `@` of the sender, up to a second `@` if any.
    pub fn sender_domain(&self) -> Option<&str> {
        self.from_email.as_deref()?.split('@').nth(1)
    }

    /// `None` unless every required field is present and non-empty.
    pub fn to_message(&self) -> Option<EmailMessage> {
        fn required(field: &Option<String>) -> Option<String> {
            field.as_deref().filter(|value| !value.is_empty()).map(str::to_string)
        }

        Some(EmailMessage {
            from_email: required(&self.from_email)?,
            from_name: required(&self.from_name)?,
            to_email: required(&self.to_email)?,
            to_name: required(&self.to_name)?,
            subject: required(&self.subject)?,
            content: required(&self.content)?,
            is_html: self.is_html.as_deref() == Some("true"),
        })
    }
}

/// A validated message.
#[derive(Clone, Debug, PartialEq)]
pub struct EmailMessage {
    pub from_email: String,
    pub from_name: String,
    pub to_email: String,
    pub to_name: String,
    pub subject: String,
    pub content: String,
    pub is_html: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Address {
    pub email: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Personalization {
    pub to: Vec<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dkim_domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dkim_selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dkim_private_key: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub content_type: &'static str,
    pub value: String,
}

/// JSON body sent to the mail provider.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutboundPayload {
    pub personalizations: Vec<Personalization>,
    pub from: Address,
    pub subject: String,
    pub content: Vec<ContentPart>,
}

/// Turns sendmail forms into upstream payloads.
#[derive(Clone)]
pub struct MailRequestBuilder {
    dkim: Arc<DkimConfig>,
}

impl MailRequestBuilder {
    pub fn new(dkim: DkimConfig) -> Self {
        MailRequestBuilder {
            dkim: Arc::new(dkim),
        }
    }

    /// Validates the form and builds the payload.
    ///
    /// The DKIM check runs before the required-field check, so a sender domain
    /// without DKIM settings is reported even when other fields are missing.
    pub fn build(&self, form: &MailForm) -> Result<OutboundPayload, RelayError> {
        let domain = form.sender_domain().ok_or(RelayError::InvalidSender)?;

        let dkim = if self.dkim.enforce {
            let settings = self
                .dkim
                .resolve(domain)
                .ok_or_else(|| RelayError::DkimMissing(domain.to_string()))?;
            Some(settings)
        } else {
            None
        };

        let message = form.to_message().ok_or(RelayError::MissingParameters)?;

        let plain_text = if message.is_html {
            html_to_text(&message.content)
        } else {
            message.content.clone()
        };
        let mut content = vec![ContentPart {
            content_type: TEXT_PLAIN_UTF8,
            value: plain_text,
        }];
        if message.is_html {
            content.push(ContentPart {
                content_type: TEXT_HTML_UTF8,
                value: message.content,
            });
        }

        let personalization = Personalization {
            to: vec![Address {
                email: message.to_email,
                name: message.to_name,
            }],
            dkim_domain: dkim.map(|_| domain.to_string()),
            dkim_selector: dkim.map(|settings| settings.selector.to_string()),
            dkim_private_key: dkim.map(|settings| settings.private_key.to_string()),
        };

        Ok(OutboundPayload {
            personalizations: vec![personalization],
            from: Address {
                email: message.from_email,
                name: message.from_name,
            },
            subject: message.subject,
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DkimEntry;
    use serde_json::json;
    use std::collections::HashMap;

    fn form(is_html: bool, content: &str) -> MailForm {
        MailForm {
            from_email: Some("sender@example.com".into()),
            from_name: Some("Sender".into()),
            to_email: Some("rcpt@example.org".into()),
            to_name: Some("Recipient".into()),
            subject: Some("Hello".into()),
            content: Some(content.into()),
            is_html: Some(is_html.to_string()),
        }
    }

    fn dkim(enforce: bool) -> DkimConfig {
        DkimConfig {
            enforce,
            domains: HashMap::from([(
                "EXAMPLE_COM".to_string(),
                DkimEntry {
                    private_key: Some("PRIVATE".into()),
                    selector: Some("mail".into()),
                },
            )]),
        }
    }

    #[test]
    fn test_parse_form() {
        let body = b"from_email=a%40example.com&from_name=A+B&subject=Hi%21\
                     &content=%3Cp%3Ex%3C%2Fp%3E&is_html=true&subject=ignored&extra=1";
        let form = MailForm::parse(body);

        assert_eq!(form.from_email.as_deref(), Some("a@example.com"));
        assert_eq!(form.from_name.as_deref(), Some("A B"));
        assert_eq!(form.subject.as_deref(), Some("Hi!"));
        assert_eq!(form.content.as_deref(), Some("<p>x</p>"));
        assert_eq!(form.is_html.as_deref(), Some("true"));
        assert_eq!(form.to_email, None);
    }

    #[test]
    fn test_sender_domain() {
        let mut form = MailForm::default();
        assert_eq!(form.sender_domain(), None);

        form.from_email = Some("no-at-sign".into());
        assert_eq!(form.sender_domain(), None);

        form.from_email = Some("a@b@c".into());
        assert_eq!(form.sender_domain(), Some("b"));

        form.from_email = Some("user@".into());
        assert_eq!(form.sender_domain(), Some(""));
    }

    #[test]
    fn test_plain_text_message() {
        let builder = MailRequestBuilder::new(dkim(false));
        let payload = builder.build(&form(false, "Just text")).unwrap();

        assert_eq!(
            payload.content,
            vec![ContentPart {
                content_type: TEXT_PLAIN_UTF8,
                value: "Just text".into()
            }]
        );
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "personalizations": [{
                    "to": [{"email": "rcpt@example.org", "name": "Recipient"}]
                }],
                "from": {"email": "sender@example.com", "name": "Sender"},
                "subject": "Hello",
                "content": [{"type": "text/plain; charset=utf-8", "value": "Just text"}]
            })
        );
    }

    #[test]
    fn test_html_message_has_two_parts() {
        let builder = MailRequestBuilder::new(dkim(false));
        let html = "<p>Hi</p><p>There</p>";
        let payload = builder.build(&form(true, html)).unwrap();

        assert_eq!(payload.content.len(), 2);
        assert_eq!(payload.content[0].content_type, TEXT_PLAIN_UTF8);
        assert_eq!(payload.content[0].value, "Hi\nThere");
        assert_eq!(payload.content[1].content_type, TEXT_HTML_UTF8);
        assert_eq!(payload.content[1].value, html);
    }

    #[test]
    fn test_is_html_requires_literal_true() {
        let builder = MailRequestBuilder::new(dkim(false));
        let mut html_form = form(true, "<b>x</b>");
        html_form.is_html = Some("TRUE".into());

        let payload = builder.build(&html_form).unwrap();
        assert_eq!(payload.content.len(), 1);
        assert_eq!(payload.content[0].value, "<b>x</b>");

        html_form.is_html = None;
        assert_eq!(builder.build(&html_form).unwrap().content.len(), 1);
    }

    #[test]
    fn test_dkim_fields_added_when_enforced() {
        let builder = MailRequestBuilder::new(dkim(true));
        let payload = builder.build(&form(false, "text")).unwrap();

        let personalization = &payload.personalizations[0];
        assert_eq!(personalization.dkim_domain.as_deref(), Some("example.com"));
        assert_eq!(personalization.dkim_selector.as_deref(), Some("mail"));
        assert_eq!(personalization.dkim_private_key.as_deref(), Some("PRIVATE"));

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["personalizations"][0]["dkim_domain"], "example.com");
        assert_eq!(value["personalizations"][0]["dkim_selector"], "mail");
        assert_eq!(value["personalizations"][0]["dkim_private_key"], "PRIVATE");
    }

    #[test]
    fn test_dkim_fields_absent_when_not_enforced() {
        let builder = MailRequestBuilder::new(dkim(false));
        let value = serde_json::to_value(builder.build(&form(false, "text")).unwrap()).unwrap();
        let personalization = value["personalizations"][0].as_object().unwrap();
        assert_eq!(personalization.len(), 1);
        assert!(personalization.contains_key("to"));
    }

    #[test]
    fn test_missing_dkim_reported_before_missing_fields() {
        let builder = MailRequestBuilder::new(dkim(true));
        let incomplete = MailForm {
            from_email: Some("sender@unknown.net".into()),
            ..MailForm::default()
        };

        let err = builder.build(&incomplete).unwrap_err();
        assert!(matches!(err, RelayError::DkimMissing(ref domain) if domain == "unknown.net"));
        assert_eq!(
            err.to_string(),
            "DKIM settings are missing for the domain: unknown.net"
        );
    }

    #[test]
    fn test_missing_fields() {
        let builder = MailRequestBuilder::new(dkim(false));

        for field in ["from_name", "to_email", "to_name", "subject", "content"] {
            let mut incomplete = form(false, "text");
            let slot = match field {
                "from_name" => &mut incomplete.from_name,
                "to_email" => &mut incomplete.to_email,
                "to_name" => &mut incomplete.to_name,
                "subject" => &mut incomplete.subject,
                _ => &mut incomplete.content,
            };
            *slot = Some(String::new());

            assert!(
                matches!(
                    builder.build(&incomplete),
                    Err(RelayError::MissingParameters)
                ),
                "empty {field} accepted"
            );
        }

        // is_html is optional
        let mut no_flag = form(false, "text");
        no_flag.is_html = None;
        assert!(builder.build(&no_flag).is_ok());
    }

    #[test]
    fn test_invalid_sender() {
        let builder = MailRequestBuilder::new(dkim(false));
        let mut bad = form(false, "text");
        bad.from_email = Some("sender.example.com".into());
        assert!(matches!(builder.build(&bad), Err(RelayError::InvalidSender)));

        bad.from_email = None;
        assert!(matches!(builder.build(&bad), Err(RelayError::InvalidSender)));
    }
}
