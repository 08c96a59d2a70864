use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUESTS: MetricDef = MetricDef {
    name: "relay.requests",
    metric_type: MetricType::Counter,
    description: "Number of requests handled. Tagged with outcome.",
};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "relay.request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with outcome.",
};

pub const BLOB_UPLOADS: MetricDef = MetricDef {
    name: "relay.blob.uploads",
    metric_type: MetricType::Counter,
    description: "Number of uploads written to the blob store. Tagged with result.",
};

pub const DISPATCH_DURATION: MetricDef = MetricDef {
    name: "relay.dispatch.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of the repository dispatch call in seconds, body read included.",
};

pub const ALL_METRICS: &[MetricDef] = &[REQUESTS, REQUEST_DURATION, BLOB_UPLOADS, DISPATCH_DURATION];
