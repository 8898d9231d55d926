use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref DEVICES_CREATED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "wled_devices_created_total",
        "Total devices registered"
    ))
    .unwrap();
    pub static ref PRESETS_CREATED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "wled_presets_created_total",
        "Total presets created"
    ))
    .unwrap();
    pub static ref STATE_UPDATES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "wled_state_updates_total",
        "Total device state updates applied"
    ))
    .unwrap();
    pub static ref DUPLICATE_CLIENT_ID_TOTAL: Counter = Counter::with_opts(Opts::new(
        "wled_duplicate_client_id_total",
        "Total registrations rejected for a duplicate MQTT client id"
    ))
    .unwrap();
    pub static ref AUTHZ_DENIED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "wled_authz_denied_total",
        "Total requests denied by authorization"
    ))
    .unwrap();
    pub static ref HTTP_REQUEST_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "wled_http_request_duration_seconds",
            "Time taken to serve an HTTP request"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
}

pub fn init_metrics() {
    REGISTRY
        .register(Box::new(DEVICES_CREATED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(PRESETS_CREATED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(STATE_UPDATES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(DUPLICATE_CLIENT_ID_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(AUTHZ_DENIED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))
        .unwrap();
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
