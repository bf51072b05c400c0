mod admin;
pub mod auth;
pub mod config;
pub mod errors;
pub mod html_text;
pub mod key_store;
pub mod mail;
mod metrics_defs;
pub mod router;
pub mod upstream;

#[cfg(test)]
mod testutils;

use crate::admin::AdminService;
use crate::errors::RelayError;
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_INFLIGHT};
use crate::router::Router;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response};
use shared::http::{into_boxed, run_http_service};
use shared::{gauge, histogram};
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

pub use crate::metrics_defs::ALL_METRICS;

/// Validates the configuration, then serves the relay and admin listeners
/// until either of them fails.
pub async fn run(config: config::Config) -> Result<(), RelayError> {
    config.validate()?;

    let router = Router::from_config(&config);
    tracing::info!(
        upstream = %config.upstream.url,
        dkim_enforced = config.dkim.enforce,
        "Starting relay"
    );

    let relay_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        RelayService::new(router),
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService,
    );

    tokio::try_join!(relay_task, admin_task)?;
    Ok(())
}

pub struct RelayService {
    router: Router,
}

impl RelayService {
    pub fn new(router: Router) -> Self {
        Self { router }
    }
}

impl Service<Request<Incoming>> for RelayService {
    type Response = Response<BoxBody<Bytes, Self::Error>>;
    type Error = RelayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let router = self.router.clone();

        Box::pin(async move {
            let start = Instant::now();
            let inflight = InflightGuard::new();

            let response = router.route(req).await;

            drop(inflight);
            histogram!(REQUEST_DURATION, "status" => response.status().as_str().to_owned())
                .record(start.elapsed().as_secs_f64());

            Ok(into_boxed(response))
        })
    }
}

/// Counts a request as in flight until dropped, including when hyper cancels
/// the request future.
struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        gauge!(REQUESTS_INFLIGHT).increment(1);
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(REQUESTS_INFLIGHT).decrement(1);
    }
}
