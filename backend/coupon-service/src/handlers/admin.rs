/// Admin handlers - event lifecycle endpoints.
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use std::sync::Arc;

use crate::db::NewCouponEvent;
use crate::error::Result;
use crate::services::AdminService;

pub async fn create_event(
    admin: web::Data<Arc<AdminService>>,
    req: web::Json<NewCouponEvent>,
) -> Result<HttpResponse> {
    let event = admin.create_event(&req).await?;
    Ok(HttpResponse::Created().json(event))
}

#[derive(Debug, Deserialize)]
pub struct InitializeStockQuery {
    pub initial_stock: i64,
}

/// Idempotent stock seeding: re-running with the same total is a no-op.
pub async fn initialize_stock(
    admin: web::Data<Arc<AdminService>>,
    event_id: web::Path<String>,
    query: web::Query<InitializeStockQuery>,
) -> Result<HttpResponse> {
    let outcome = admin
        .initialize_stock(&event_id, query.initial_stock)
        .await?;
    Ok(HttpResponse::Ok().json(outcome))
}

pub async fn deactivate_event(
    admin: web::Data<Arc<AdminService>>,
    event_id: web::Path<String>,
) -> Result<HttpResponse> {
    admin.deactivate_event(&event_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "event_id": event_id.as_str(),
        "is_active": false,
    })))
}
