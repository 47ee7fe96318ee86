use actix_web::{post, web, HttpResponse};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::intake::{AgeBracket, Gender, IntakeEvent};
use crate::kiosk::{EventOutcome, Kiosk};

#[derive(Debug, Deserialize)]
pub struct KeyInput {
    pub key: String,
}

/// Button payload: the 1-based keypad ordinal or the wire code
#[derive(Debug, Deserialize)]
pub struct ChoiceInput {
    pub ordinal: Option<u32>,
    pub code: Option<String>,
}

impl ChoiceInput {
    fn resolve<T>(
        &self,
        from_ordinal: impl Fn(u32) -> Option<T>,
        from_code: impl Fn(&str) -> Option<T>,
    ) -> Result<T, AppError> {
        let choice = match (self.ordinal, self.code.as_deref()) {
            (Some(ordinal), None) => from_ordinal(ordinal),
            (None, Some(code)) => from_code(code),
            _ => {
                return Err(AppError::Input(
                    "exactly one of ordinal or code is required".to_string(),
                ))
            }
        };
        choice.ok_or_else(|| AppError::Input(format!("unknown choice: {:?}", self)))
    }
}

fn outcome_response(outcome: EventOutcome) -> HttpResponse {
    let ok = outcome.submission.as_ref().map_or(true, |s| s.ok);
    HttpResponse::Ok().json(serde_json::json!({
        "ok": ok,
        "outcome": outcome,
    }))
}

#[post("/input/key")]
pub async fn input_key(
    kiosk: web::Data<Arc<Kiosk>>,
    body: web::Json<KeyInput>,
) -> Result<HttpResponse, AppError> {
    let event = IntakeEvent::from_key(&body.key).ok_or_else(|| {
        warn!("Unknown key: {:?}", body.key);
        AppError::UnknownKey(body.key.clone())
    })?;

    Ok(outcome_response(kiosk.handle_event(event).await))
}

#[post("/input/age")]
pub async fn input_age(
    kiosk: web::Data<Arc<Kiosk>>,
    body: web::Json<ChoiceInput>,
) -> Result<HttpResponse, AppError> {
    let bracket = body.resolve(AgeBracket::from_ordinal, AgeBracket::from_code)?;
    info!("Age button: {}", bracket.code());

    Ok(outcome_response(
        kiosk.handle_event(IntakeEvent::SelectAge(bracket)).await,
    ))
}

/// Selects and confirms, like pressing the digit and Enter
#[post("/input/gender")]
pub async fn input_gender(
    kiosk: web::Data<Arc<Kiosk>>,
    body: web::Json<ChoiceInput>,
) -> Result<HttpResponse, AppError> {
    let gender = body.resolve(Gender::from_ordinal, Gender::from_code)?;
    info!("Gender button: {}", gender.code());

    let outcome = kiosk
        .handle_events(&[IntakeEvent::SelectGender(gender), IntakeEvent::Confirm])
        .await;
    Ok(outcome_response(outcome))
}

#[post("/intake/retry")]
pub async fn retry_intake(kiosk: web::Data<Arc<Kiosk>>) -> Result<HttpResponse, AppError> {
    let outcome = kiosk.retry().await?;
    Ok(outcome_response(outcome))
}

#[post("/intake/reset")]
pub async fn reset_intake(kiosk: web::Data<Arc<Kiosk>>) -> Result<HttpResponse, AppError> {
    let state = kiosk.reset()?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "ok": true,
        "state": state,
    })))
}
