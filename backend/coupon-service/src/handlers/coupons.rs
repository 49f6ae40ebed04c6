/// Coupon handlers - the synchronous issuance surface.
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{CouponRepository, RedeemOutcome};
use crate::error::{AppError, Result};
use crate::services::{AdminService, IssuanceService, IssueResult};

#[derive(Debug, Deserialize)]
pub struct IssueCouponRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub event_id: String,
}

#[derive(Debug, Serialize)]
pub struct IssueCouponResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

/// Attempt to issue a coupon.
///
/// Business rejections (duplicate user, sold out) are 200 responses with
/// `success: false`. The HTTP call worked, the answer is no.
pub async fn issue_coupon(
    service: web::Data<Arc<IssuanceService>>,
    req: web::Json<IssueCouponRequest>,
) -> Result<HttpResponse> {
    match service.issue(&req.user_id, &req.event_id).await? {
        IssueResult::Issued {
            coupon_id,
            remaining,
        } => Ok(HttpResponse::Ok().json(IssueCouponResponse {
            success: true,
            coupon_id: Some(coupon_id),
            remaining: Some(remaining),
            reason: None,
        })),
        IssueResult::Rejected(reason) => Ok(HttpResponse::Ok().json(IssueCouponResponse {
            success: false,
            coupon_id: None,
            remaining: None,
            reason: Some(reason.as_str()),
        })),
    }
}

/// Event counters: stock and participants from the in-memory store,
/// issued total from the database.
pub async fn event_status(
    admin: web::Data<Arc<AdminService>>,
    event_id: web::Path<String>,
) -> Result<HttpResponse> {
    let status = admin.get_status(&event_id).await?;
    Ok(HttpResponse::Ok().json(status))
}

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub coupon_id: Uuid,
}

/// Mark a coupon used.
pub async fn redeem_coupon(
    pool: web::Data<PgPool>,
    req: web::Json<RedeemRequest>,
) -> Result<HttpResponse> {
    let repo = CouponRepository::new((**pool).clone());

    match repo.redeem(req.coupon_id).await? {
        RedeemOutcome::Redeemed(coupon) => Ok(HttpResponse::Ok().json(coupon)),
        RedeemOutcome::AlreadyUsed => Err(AppError::Conflict(format!(
            "coupon {} already redeemed",
            req.coupon_id
        ))),
        RedeemOutcome::NotFound => {
            Err(AppError::NotFound(format!("coupon {}", req.coupon_id)))
        }
    }
}
