// Kiosk context: intake session + busy guard + submission + notifications

use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{error, info, warn};

use crate::device::{ConnectionState, DeviceSession, Endpoint, PrintEvent};
use crate::errors::{AppError, ConnectionError, SubmissionError};
use crate::intake::{IntakeEvent, IntakeSession, RejectReason, Transition};
use crate::notifications::Notifier;
use crate::registration::Entrance;
use crate::settings::PrinterSettings;
use crate::submission::{SubmissionReceipt, Submitter};

const FAILURE_TITLE: &str = "エラー";

#[derive(Debug)]
struct IntakeState {
    session: IntakeSession,
    /// Set while a submission runs; every event is rejected meanwhile
    busy: bool,
}

/// Everything the operator screen shows
#[derive(Debug, Clone, Serialize)]
pub struct KioskSnapshot {
    pub session: IntakeSession,
    pub busy: bool,
    pub entrance: Entrance,
    pub printer: ConnectionState,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<SubmissionReceipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<&'static str>,
}

/// Which printer the kiosk talks to and where
#[derive(Debug, Clone, Serialize)]
pub struct PrinterDetails {
    pub transport: &'static str,
    pub endpoint: Option<Endpoint>,
    pub state: ConnectionState,
}

/// Result of one input: the transition, the submission it triggered, and the new state
#[derive(Debug, Clone, Serialize)]
pub struct EventOutcome {
    pub transition: Transition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission: Option<SubmissionOutcome>,
    pub state: KioskSnapshot,
}

pub struct Kiosk {
    intake: Mutex<IntakeState>,
    submitter: Submitter,
    device: Arc<AsyncMutex<DeviceSession>>,
    printer_state: watch::Receiver<ConnectionState>,
    notifier: Arc<Notifier>,
}

impl Kiosk {
    pub fn new(
        submitter: Submitter,
        device: Arc<AsyncMutex<DeviceSession>>,
        printer_state: watch::Receiver<ConnectionState>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            intake: Mutex::new(IntakeState {
                session: IntakeSession::new(),
                busy: false,
            }),
            submitter,
            device,
            printer_state,
            notifier,
        }
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    fn lock_intake(&self) -> MutexGuard<'_, IntakeState> {
        self.intake.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> KioskSnapshot {
        let intake = self.lock_intake();
        KioskSnapshot {
            session: intake.session.clone(),
            busy: intake.busy,
            entrance: self.submitter.entrance(),
            printer: self.printer_state.borrow().clone(),
        }
    }

    /// Apply one event. Completing the intake runs the submission before returning.
    pub async fn handle_event(self: &Arc<Self>, event: IntakeEvent) -> EventOutcome {
        self.handle_events(&[event]).await
    }

    /// Apply events in order, stopping at the first rejection.
    pub async fn handle_events(self: &Arc<Self>, events: &[IntakeEvent]) -> EventOutcome {
        let (transition, to_submit) = {
            let mut intake = self.lock_intake();
            if intake.busy {
                warn!(?events, "Input ignored: submission in progress");
                (Transition::Rejected(RejectReason::Busy), None)
            } else {
                let mut transition = Transition::Rejected(RejectReason::NotApplicable);
                for event in events {
                    transition = intake.session.submit_event(*event);
                    if transition != Transition::Accepted {
                        break;
                    }
                }
                if transition == Transition::Completed {
                    intake.busy = true;
                    (transition, Some(intake.session.clone()))
                } else {
                    (transition, None)
                }
            }
        };

        let submission = match to_submit {
            Some(session) => Some(self.spawn_submission(session).await),
            None => None,
        };

        EventOutcome {
            transition,
            submission,
            state: self.snapshot(),
        }
    }

    /// Re-run the submission of a retained, completed intake
    pub async fn retry(self: &Arc<Self>) -> Result<EventOutcome, AppError> {
        let session = {
            let mut intake = self.lock_intake();
            if intake.busy {
                return Err(AppError::Input("a submission is already running".to_string()));
            }
            if !intake.session.is_complete() {
                return Err(AppError::Input("no completed intake to retry".to_string()));
            }
            intake.busy = true;
            intake.session.clone()
        };

        info!("Retrying submission");
        let submission = self.spawn_submission(session).await;
        Ok(EventOutcome {
            transition: Transition::Completed,
            submission: Some(submission),
            state: self.snapshot(),
        })
    }

    /// Drop the current intake and start over
    pub fn reset(&self) -> Result<KioskSnapshot, AppError> {
        {
            let mut intake = self.lock_intake();
            if intake.busy {
                return Err(AppError::Input("a submission is already running".to_string()));
            }
            intake.session = IntakeSession::new();
        }
        info!("Intake reset by operator");
        Ok(self.snapshot())
    }

    /// Run the submission on its own task. Dropping the caller's future does not
    /// cancel it, and the busy flag is cleared when the task ends either way.
    async fn spawn_submission(self: &Arc<Self>, session: IntakeSession) -> SubmissionOutcome {
        let kiosk = Arc::clone(self);
        let task = tokio::spawn(async move { kiosk.run_submission(session).await });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Submission task aborted: {}", e);
                self.lock_intake().busy = false;
                self.notifier.error(
                    FAILURE_TITLE,
                    format!("データの送信に失敗しました: {}", e),
                );
                SubmissionOutcome {
                    ok: false,
                    receipt: None,
                    error: Some(e.to_string()),
                    error_type: Some("submission_aborted"),
                }
            }
        }
    }

    async fn run_submission(&self, session: IntakeSession) -> SubmissionOutcome {
        let result = self.submitter.submit(&session, Utc::now()).await;

        let mut intake = self.lock_intake();
        intake.busy = false;
        match result {
            Ok(receipt) => {
                info!(group_id = %receipt.group_id, "Submission finished");
                intake.session = IntakeSession::new();
                SubmissionOutcome {
                    ok: true,
                    receipt: Some(receipt),
                    error: None,
                    error_type: None,
                }
            }
            Err(e) => {
                error!("Submission failed: {}", e);
                self.notifier.error(
                    FAILURE_TITLE,
                    format!("データの送信に失敗しました: {}", failure_reason(&e)),
                );
                SubmissionOutcome {
                    ok: false,
                    receipt: None,
                    error: Some(e.to_string()),
                    error_type: Some(e.error_type()),
                }
            }
        }
    }

    pub async fn printer_details(&self) -> PrinterDetails {
        let device = self.device.lock().await;
        PrinterDetails {
            transport: device.transport_name(),
            endpoint: device.endpoint().cloned(),
            state: device.state(),
        }
    }

    /// Persist the endpoint, then connect to it
    pub async fn connect_printer(
        &self,
        pool: &sqlx::SqlitePool,
        settings: &PrinterSettings,
    ) -> Result<(), AppError> {
        settings.save(pool).await?;
        self.connect_saved(settings).await?;
        Ok(())
    }

    /// Connect without saving; used at startup with the stored endpoint
    pub async fn connect_saved(&self, settings: &PrinterSettings) -> Result<(), ConnectionError> {
        let result = self
            .device
            .lock()
            .await
            .connect(&settings.host, &settings.port)
            .await;

        match &result {
            Ok(()) => {
                self.notifier.success(
                    "接続成功",
                    format!("プリンタに接続しました: {}:{}", settings.host, settings.port),
                );
            }
            Err(e) => {
                self.notifier
                    .error("接続エラー", format!("プリンタに接続できません: {}", e));
            }
        }
        result
    }

    /// Log every print outcome and surface failures to the operator
    pub fn watch_print_events(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<PrintEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let kiosk = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    PrintEvent::Completed { job_id } => info!(job_id, "Print success"),
                    PrintEvent::Failed { job_id, reason } => {
                        error!(job_id, "Print failure: {}", reason);
                        kiosk
                            .notifier
                            .error("印刷エラー", format!("印刷に失敗しました: {}", reason));
                    }
                }
            }
        })
    }
}

/// Operator-facing reason; remote errors show the server's own message
fn failure_reason(e: &SubmissionError) -> String {
    match e {
        SubmissionError::Remote(remote) => remote.message.clone(),
        other => other.to_string(),
    }
}
