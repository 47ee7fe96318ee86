// Submission: validate -> register remotely -> print tickets

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, instrument, warn};

use crate::device::{DeviceSession, JobId};
use crate::errors::SubmissionError;
use crate::intake::IntakeSession;
use crate::notifications::Notifier;
use crate::receipt::{build_sequence, Bitmap, IntakeContext};
use crate::registration::{Entrance, GroupSubmission, RegistrationService};

/// What a finished submission produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionReceipt {
    pub group_id: String,
    pub guest_ids: Vec<String>,
    pub job_id: JobId,
}

pub struct Submitter {
    registration: Arc<dyn RegistrationService>,
    device: Arc<AsyncMutex<DeviceSession>>,
    notifier: Arc<Notifier>,
    entrance: Entrance,
    logo: Option<Bitmap>,
}

impl Submitter {
    pub fn new(
        registration: Arc<dyn RegistrationService>,
        device: Arc<AsyncMutex<DeviceSession>>,
        notifier: Arc<Notifier>,
        entrance: Entrance,
        logo: Option<Bitmap>,
    ) -> Self {
        Self {
            registration,
            device,
            notifier,
            entrance,
            logo,
        }
    }

    pub fn entrance(&self) -> Entrance {
        self.entrance
    }

    /// Register a completed intake and print its tickets.
    ///
    /// A print failure is reported after the group already exists remotely;
    /// nothing is rolled back.
    #[instrument(skip(self, session), fields(members = session.members.len()))]
    pub async fn submit(
        &self,
        session: &IntakeSession,
        issued_at: DateTime<Utc>,
    ) -> Result<SubmissionReceipt, SubmissionError> {
        let members = &session.members;
        if members.is_empty() {
            return Err(SubmissionError::Validation("no members entered".to_string()));
        }
        if members.len() != session.expected_count {
            return Err(SubmissionError::Validation(format!(
                "{} members entered but {} declared",
                members.len(),
                session.expected_count
            )));
        }
        let submission = GroupSubmission::from_members(members, self.entrance, &issued_at)
            .ok_or_else(|| SubmissionError::Validation("representative missing".to_string()))?;
        let representative = members[0];

        if !self.device.lock().await.has_been_established() {
            warn!("Submission refused: printer was never connected");
            return Err(SubmissionError::DeviceNotReady);
        }

        let result = self.registration.register(&submission).await?;
        info!(group_id = %result.group_id, guests = result.guests.len(), "Group registered");
        self.notifier.success("送信成功", "データが送信されました。");

        if result.guests.len() != members.len() {
            error!(
                group_id = %result.group_id,
                "Registration returned {} guests for {} members",
                result.guests.len(),
                members.len()
            );
            return Err(SubmissionError::Validation(format!(
                "server returned {} guest ids for {} members",
                result.guests.len(),
                members.len()
            )));
        }

        let context = IntakeContext {
            entrance: self.entrance,
            issued_at,
            representative,
            member_count: members.len(),
            logo: self.logo.clone(),
        };
        let sequence = build_sequence(&result, &context);

        self.notifier.success("Status", "印刷を始めています...");
        let job_id = self
            .device
            .lock()
            .await
            .render(&sequence)
            .await
            .map_err(|source| SubmissionError::Print {
                group_id: result.group_id.clone(),
                source,
            })?;
        self.notifier.success("成功", "プリンタでの印刷が完了しました。");

        Ok(SubmissionReceipt {
            group_id: result.group_id,
            guest_ids: result.guests.into_iter().map(|g| g.guest_id).collect(),
            job_id,
        })
    }
}
