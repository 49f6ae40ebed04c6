/// Prometheus counters for the issuance pipeline.
use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

static ISSUE_DECISIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "coupon_issue_decisions_total",
        "Issuance decisions by outcome",
        &["outcome"]
    )
    .expect("register coupon_issue_decisions_total")
});

static COMPENSATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "coupon_compensations_total",
        "Compensating rollbacks after publish failures, by result",
        &["result"]
    )
    .expect("register coupon_compensations_total")
});

static WRITER_RECORDS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "coupon_writer_records_total",
        "Issuance log records handled by the durable writer, by result",
        &["result"]
    )
    .expect("register coupon_writer_records_total")
});

static RECONCILIATION_RESULTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "coupon_reconciliation_results_total",
        "Reconciliation classifications per event cycle",
        &["class"]
    )
    .expect("register coupon_reconciliation_results_total")
});

pub fn record_decision(outcome: &str) {
    ISSUE_DECISIONS.with_label_values(&[outcome]).inc();
}

pub fn record_compensation(result: &str) {
    COMPENSATIONS.with_label_values(&[result]).inc();
}

pub fn record_writer(result: &str) {
    WRITER_RECORDS.with_label_values(&[result]).inc();
}

pub fn record_reconciliation(class: &str) {
    RECONCILIATION_RESULTS.with_label_values(&[class]).inc();
}

/// Text-format scrape endpoint.
pub async fn metrics_handler() -> HttpResponse {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(format!("encode error: {}", e));
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
