use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with status.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of requests currently being processed",
};

pub const AUTH_REJECTED: MetricDef = MetricDef {
    name: "auth.rejected",
    metric_type: MetricType::Counter,
    description: "API keys rejected by the validator. Tagged with strategy.",
};

pub const UPSTREAM_RESPONSES: MetricDef = MetricDef {
    name: "upstream.status",
    metric_type: MetricType::Counter,
    description: "Responses received from the mail provider. Tagged with status.",
};

// Served by the admin `/metrics` endpoint; new definitions must be listed here.
pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    REQUESTS_INFLIGHT,
    AUTH_REJECTED,
    UPSTREAM_RESPONSES,
];
