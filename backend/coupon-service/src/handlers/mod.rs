pub mod admin;
pub mod coupons;

use actix_web::{web, HttpResponse};
use serde::Serialize;
use std::sync::Arc;

use crate::kafka::IssuancePublisher;
use crate::store::DecisionStore;

/// Route table for the service.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/coupons/issue", web::post().to(coupons::issue_coupon))
            .route(
                "/coupons/status/{event_id}",
                web::get().to(coupons::event_status),
            )
            .route("/coupons/redeem", web::post().to(coupons::redeem_coupon))
            .route("/admin/events", web::post().to(admin::create_event))
            .route(
                "/admin/events/{event_id}/stock",
                web::post().to(admin::initialize_stock),
            )
            .route(
                "/admin/events/{event_id}/deactivate",
                web::post().to(admin::deactivate_event),
            ),
    )
    .route("/health", web::get().to(health))
    .route("/metrics", web::get().to(crate::metrics::metrics_handler));
}

#[derive(Serialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
enum ComponentStatus {
    Healthy,
    Unhealthy,
}

#[derive(Serialize)]
struct ComponentCheck {
    status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

fn check<E: std::fmt::Display>(result: Result<(), E>) -> ComponentCheck {
    match result {
        Ok(()) => ComponentCheck {
            status: ComponentStatus::Healthy,
            message: None,
        },
        Err(e) => ComponentCheck {
            status: ComponentStatus::Unhealthy,
            message: Some(e.to_string()),
        },
    }
}

/// 200 when both the decision store and the event log producer are
/// reachable; the service cannot issue without either.
pub async fn health(
    store: web::Data<Arc<dyn DecisionStore>>,
    publisher: web::Data<Arc<dyn IssuancePublisher>>,
) -> HttpResponse {
    let store_check = check(store.ping().await);
    let producer_check = check(publisher.check_connectivity().await);

    let healthy = store_check.status == ComponentStatus::Healthy
        && producer_check.status == ComponentStatus::Healthy;

    let body = serde_json::json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "components": {
            "store": store_check,
            "producer": producer_check,
        },
    });

    if healthy {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}
