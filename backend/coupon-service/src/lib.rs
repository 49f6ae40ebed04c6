//! Coupon issuance service.
//!
//! A strictly limited coupon pool issued to a very large concurrent
//! population with an immediate synchronous PASS/FAIL per request. The
//! decision lives in a single indivisible Redis script; durability flows
//! through a Kafka log into Postgres via an idempotent writer.

pub mod config;
pub mod consumers;
pub mod db;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod kafka;
pub mod metrics;
pub mod models;
pub mod services;
pub mod store;
