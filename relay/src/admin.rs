use crate::errors::RelayError;
use crate::metrics_defs::ALL_METRICS;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use shared::http::{into_boxed, json_response, make_error_response, text_response};
use std::future::Future;
use std::pin::Pin;

/// Health, readiness and metric catalogue, served on the admin listener.
pub struct AdminService;

impl AdminService {
    fn respond(path: &str) -> Result<Response<Bytes>, RelayError> {
        let response = match path {
            "/health" | "/ready" => text_response(StatusCode::OK, "ok\n"),
            "/metrics" => json_response(StatusCode::OK, serde_json::to_vec(ALL_METRICS)?),
            _ => make_error_response(StatusCode::NOT_FOUND),
        };
        Ok(response)
    }
}

impl Service<Request<Incoming>> for AdminService {
    type Response = Response<BoxBody<Bytes, Self::Error>>;
    type Error = RelayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let result = Self::respond(req.uri().path()).map(into_boxed);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_and_ready() {
        for path in ["/health", "/ready"] {
            let response = AdminService::respond(path).unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.body().as_ref(), b"ok\n");
        }
    }

    #[test]
    fn test_metrics_catalogue() {
        let response = AdminService::respond("/metrics").unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|def| def["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            ["request.duration", "requests.inflight", "auth.rejected", "upstream.status"]
        );
        assert_eq!(body[0]["metric_type"], "Histogram");
    }

    #[test]
    fn test_unknown_path() {
        let response = AdminService::respond("/").unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
