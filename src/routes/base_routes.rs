use actix_web::{get, web, HttpResponse, Responder};
use std::sync::Arc;

use crate::kiosk::Kiosk;

#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "ok": true,
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[get("/state")]
pub async fn kiosk_state(kiosk: web::Data<Arc<Kiosk>>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "ok": true,
        "state": kiosk.snapshot(),
    }))
}
