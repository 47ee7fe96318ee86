use actix_web::{get, post, web, HttpResponse};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::errors::AppError;
use crate::kiosk::Kiosk;
use crate::settings::PrinterSettings;

pub fn default_printer_settings(config: &Config) -> PrinterSettings {
    PrinterSettings::new(config.printer.host.clone(), config.printer.port.clone())
}

#[get("/printer")]
pub async fn printer_status(
    kiosk: web::Data<Arc<Kiosk>>,
    config: web::Data<Config>,
    db_pool: web::Data<SqlitePool>,
) -> Result<HttpResponse, AppError> {
    let settings = PrinterSettings::load(&db_pool, &default_printer_settings(&config)).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "ok": true,
        "settings": settings,
        "printer": kiosk.printer_details().await,
    })))
}

#[post("/printer/connect")]
pub async fn connect_printer(
    kiosk: web::Data<Arc<Kiosk>>,
    db_pool: web::Data<SqlitePool>,
    body: web::Json<PrinterSettings>,
) -> Result<HttpResponse, AppError> {
    info!("Operator connect to {}:{}", body.host, body.port);
    kiosk.connect_printer(&db_pool, &body).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "ok": true,
        "settings": body.into_inner(),
        "state": kiosk.snapshot().printer,
    })))
}
