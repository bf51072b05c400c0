use crate::auth::{AuthOutcome, AuthValidator};
use crate::config::Config;
use crate::errors::RelayError;
use crate::mail::{MailForm, MailRequestBuilder};
use crate::metrics_defs::AUTH_REJECTED;
use crate::upstream::UpstreamSender;
use http::request::Parts;
use http_body_util::{BodyExt, Limited};
use hyper::body::Bytes;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap};
use hyper::{Method, Request, Response, StatusCode};
use shared::counter;
use shared::http::{json_response, text_response};

pub const SENDMAIL_PATH: &str = "/api/v1/sendmail";

const BEARER_PREFIX: &str = "Bearer ";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Largest sendmail form body that is read.
pub const MAX_FORM_BYTES: usize = 2 * 1024 * 1024;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Dispatches requests by method and path.
///
/// Every `/api` request is authenticated before its path is looked at, so an
/// unknown API path answers 404 only to callers holding a valid key.
#[derive(Clone)]
pub struct Router {
    auth: AuthValidator,
    mail: MailRequestBuilder,
    upstream: UpstreamSender,
}

impl Router {
    pub fn new(auth: AuthValidator, mail: MailRequestBuilder, upstream: UpstreamSender) -> Self {
        Self {
            auth,
            mail,
            upstream,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            AuthValidator::from_config(&config.auth),
            MailRequestBuilder::new(config.dkim.clone()),
            UpstreamSender::new(&config.upstream),
        )
    }

    /// Handles one request. Failures are turned into their plain-text responses.
    pub async fn route<B>(&self, req: Request<B>) -> Response<Bytes>
    where
        B: hyper::body::Body,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();

        match self.dispatch(&parts, body).await {
            Ok(response) => response,
            Err(e) => {
                if e.status_code().is_server_error() {
                    tracing::error!(
                        method = %parts.method,
                        path = %parts.uri.path(),
                        error = %e,
                        "Request failed"
                    );
                } else {
                    tracing::debug!(
                        method = %parts.method,
                        path = %parts.uri.path(),
                        error = %e,
                        "Request rejected"
                    );
                }
                e.into_response()
            }
        }
    }

    async fn dispatch<B>(&self, parts: &Parts, body: B) -> Result<Response<Bytes>, RelayError>
    where
        B: hyper::body::Body,
        B::Error: Into<BoxError>,
    {
        if parts.method != Method::GET && parts.method != Method::POST {
            return Err(RelayError::MethodNotAllowed);
        }

        let path = parts.uri.path();
        if path == "/" {
            return Ok(text_response(StatusCode::IM_A_TEAPOT, "I'm a teapot"));
        }

        if !is_api_path(path) {
            return Err(RelayError::NotFound);
        }

        if parts.method != Method::POST {
            return Err(RelayError::PostOnly);
        }

        let token = bearer_token(&parts.headers)?;
        match self.auth.validate(token).await? {
            AuthOutcome::Authenticated { bound_domain } => {
                tracing::debug!(
                    strategy = self.auth.strategy(),
                    bound_domain = ?bound_domain,
                    "API key accepted"
                );
            }
            AuthOutcome::Rejected => {
                counter!(AUTH_REJECTED, "strategy" => self.auth.strategy()).increment(1);
                return Err(RelayError::InvalidApiKey);
            }
        }

        if path == SENDMAIL_PATH {
            self.send_mail(&parts.headers, body).await
        } else {
            Err(RelayError::NotFound)
        }
    }

    async fn send_mail<B>(&self, headers: &HeaderMap, body: B) -> Result<Response<Bytes>, RelayError>
    where
        B: hyper::body::Body,
        B::Error: Into<BoxError>,
    {
        check_form_content_type(headers)?;

        let body = Limited::new(body, MAX_FORM_BYTES)
            .collect()
            .await
            .map_err(|e| RelayError::RequestBodyError(e.to_string()))?
            .to_bytes();

        let form = MailForm::parse(&body);
        let payload = self.mail.build(&form)?;
        let relayed = self.upstream.send(&payload).await?;

        Ok(json_response(StatusCode::OK, serde_json::to_vec(&relayed)?))
    }
}

/// `/api` and everything below it, compared case-insensitively.
pub fn is_api_path(path: &str) -> bool {
    path.get(..4)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("/api"))
        && matches!(path.as_bytes().get(4), None | Some(b'/'))
}

/// Extracts the API key from `Authorization: Bearer <key>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, RelayError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .ok_or(RelayError::MissingAuthHeader)?;

    if token.is_empty() {
        return Err(RelayError::EmptyApiKey);
    }

    Ok(token)
}

// A request without a content type is still parsed as form data.
fn check_form_content_type(headers: &HeaderMap) -> Result<(), RelayError> {
    let Some(value) = headers.get(CONTENT_TYPE) else {
        return Ok(());
    };

    let essence = value
        .to_str()
        .ok()
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .unwrap_or_default();

    if essence.eq_ignore_ascii_case(FORM_URLENCODED) {
        Ok(())
    } else {
        Err(RelayError::UnsupportedBody)
    }
}
