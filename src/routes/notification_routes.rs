use actix_web::{get, web, HttpResponse, Responder};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::kiosk::Kiosk;

#[get("/notifications")]
pub async fn list_notifications(kiosk: web::Data<Arc<Kiosk>>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "ok": true,
        "notifications": kiosk.notifier().visible(),
    }))
}

/// Server-sent events, one `data:` frame per new notification
#[get("/notifications/stream")]
pub async fn notification_stream(kiosk: web::Data<Arc<Kiosk>>) -> impl Responder {
    let mut rx = kiosk.notifier().subscribe();

    let stream = async_stream::stream! {
        debug!("Notification stream opened");
        loop {
            match rx.recv().await {
                Ok(notification) => {
                    let json = match serde_json::to_string(&notification) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("Failed to encode notification: {}", e);
                            continue;
                        }
                    };
                    yield Ok::<Bytes, actix_web::Error>(Bytes::from(format!("data: {}\n\n", json)));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Notification stream lagged, {} skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Notification stream closed");
    };

    HttpResponse::Ok()
        .insert_header(("Content-Type", "text/event-stream"))
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(stream)
}
