// Remote registration service client

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::errors::RemoteError;
use crate::intake::{AgeBracket, Gender, MemberRecord};
use crate::receipt::format_timestamp;

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

const GROUPS_PATH: &str = "/groups/";

/// Where this kiosk stands. Fixed per installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Entrance {
    West,
    Front,
    /// Walk-in registration desk; no entrance is recorded remotely
    New,
}

impl Entrance {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "west" => Some(Entrance::West),
            "front" => Some(Entrance::Front),
            "new" => Some(Entrance::New),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Entrance::West => "west",
            Entrance::Front => "front",
            Entrance::New => "new",
        }
    }

    fn wire_entrance(self) -> String {
        match self {
            Entrance::New => String::new(),
            other => other.name().to_string(),
        }
    }

    fn wire_entrance_time(self, at: &DateTime<Utc>) -> String {
        match self {
            Entrance::New => String::new(),
            _ => format_timestamp(at),
        }
    }
}

/// Body of `POST /groups/`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSubmission {
    pub age_range: AgeBracket,
    pub gender: Gender,
    pub member_count: usize,
    pub entrance: String,
    pub entrance_time: String,
    pub guests: Vec<MemberRecord>,
}

impl GroupSubmission {
    /// Returns `None` when there is no representative.
    pub fn from_members(
        members: &[MemberRecord],
        entrance: Entrance,
        at: &DateTime<Utc>,
    ) -> Option<Self> {
        let representative = members.first()?;
        Some(Self {
            age_range: representative.age_range,
            gender: representative.gender,
            member_count: members.len(),
            entrance: entrance.wire_entrance(),
            entrance_time: entrance.wire_entrance_time(at),
            guests: members.to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestTicketId {
    #[serde(rename = "GuestId")]
    pub guest_id: String,
}

/// Registration outcome; guests are in submission order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSubmissionResult {
    pub group_id: String,
    pub guests: Vec<GuestTicketId>,
}

#[derive(Debug, Deserialize)]
struct GroupBody {
    #[serde(rename = "GroupId")]
    group_id: String,
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    group: GroupBody,
    #[serde(default)]
    guests: Vec<GuestTicketId>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Turn a raw HTTP response into a result
pub fn interpret_response(status: u16, body: &str) -> Result<GroupSubmissionResult, RemoteError> {
    if !(200..300).contains(&status) {
        let message = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.error)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("server returned {}", status));
        return Err(RemoteError {
            status: Some(status),
            message,
        });
    }

    let parsed: RegistrationResponse = serde_json::from_str(body).map_err(|e| RemoteError {
        status: Some(status),
        message: format!("invalid response body: {}", e),
    })?;

    Ok(GroupSubmissionResult {
        group_id: parsed.group.group_id,
        guests: parsed.guests,
    })
}

#[async_trait]
pub trait RegistrationService: Send + Sync {
    async fn register(&self, submission: &GroupSubmission)
        -> Result<GroupSubmissionResult, RemoteError>;
}

/// Registration over HTTPS.
/// Clone is cheap - reqwest::Client shares its connection pool.
#[derive(Clone)]
pub struct HttpRegistrationClient {
    client: Client,
    endpoint: String,
}

impl HttpRegistrationClient {
    pub fn new(base_url: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), GROUPS_PATH),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RegistrationService for HttpRegistrationClient {
    async fn register(
        &self,
        submission: &GroupSubmission,
    ) -> Result<GroupSubmissionResult, RemoteError> {
        info!(
            endpoint = %self.endpoint,
            members = submission.member_count,
            "Submitting group"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(submission)
            .send()
            .await
            .map_err(|e| {
                warn!("Registration request failed: {}", e);
                RemoteError {
                    status: None,
                    message: e.to_string(),
                }
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| RemoteError {
            status: Some(status),
            message: e.to_string(),
        })?;

        interpret_response(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot HTTP server: answers a single request and hands back its raw text
    async fn serve_once(status: u16, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    let headers = String::from_utf8_lossy(&request[..end]).to_ascii_lowercase();
                    let length = headers
                        .lines()
                        .find_map(|line| line.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            String::from_utf8(request).unwrap()
        });

        (base_url, server)
    }

    fn request_body(request: &str) -> serde_json::Value {
        let (_, body) = request.split_once("\r\n\r\n").unwrap();
        serde_json::from_str(body).unwrap()
    }

    fn members() -> Vec<MemberRecord> {
        vec![
            MemberRecord {
                age_range: AgeBracket::Thirties,
                gender: Gender::Male,
            },
            MemberRecord {
                age_range: AgeBracket::Elementary,
                gender: Gender::Female,
            },
        ]
    }

    #[test]
    fn test_submission_body() {
        let at = Utc.with_ymd_and_hms(2024, 11, 2, 10, 0, 0).unwrap();
        let submission = GroupSubmission::from_members(&members(), Entrance::Front, &at).unwrap();

        assert_eq!(
            serde_json::to_value(&submission).unwrap(),
            serde_json::json!({
                "ageRange": "30s",
                "gender": "male",
                "memberCount": 2,
                "entrance": "front",
                "entranceTime": "2024-11-02T10:00:00.000Z",
                "guests": [
                    {"ageRange": "30s", "gender": "male"},
                    {"ageRange": "els", "gender": "female"}
                ]
            })
        );
    }

    #[test]
    fn test_new_entrance_sends_empty_fields() {
        let submission =
            GroupSubmission::from_members(&members(), Entrance::New, &Utc::now()).unwrap();
        assert_eq!(submission.entrance, "");
        assert_eq!(submission.entrance_time, "");
    }

    #[test]
    fn test_no_representative() {
        assert!(GroupSubmission::from_members(&[], Entrance::West, &Utc::now()).is_none());
    }

    #[test]
    fn test_success_response() {
        let body = r#"{"group":{"GroupId":"g1"},"guests":[{"GuestId":"u1"},{"GuestId":"u2"}]}"#;
        let result = interpret_response(201, body).unwrap();

        assert_eq!(result.group_id, "g1");
        let ids: Vec<_> = result.guests.iter().map(|g| g.guest_id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u2"]);
    }

    #[test]
    fn test_error_message_from_body() {
        let err = interpret_response(409, r#"{"error":"capacity exceeded"}"#).unwrap_err();
        assert_eq!(err.message, "capacity exceeded");
        assert_eq!(err.status, Some(409));
    }

    #[test]
    fn test_error_without_message_falls_back() {
        let err = interpret_response(500, "<html>oops</html>").unwrap_err();
        assert_eq!(err.message, "server returned 500");

        let err = interpret_response(502, "{}").unwrap_err();
        assert_eq!(err.message, "server returned 502");
    }

    #[test]
    fn test_malformed_success_body() {
        let err = interpret_response(200, r#"{"guests":[]}"#).unwrap_err();
        assert!(err.message.starts_with("invalid response body"));
    }

    #[tokio::test]
    async fn test_register_posts_group_over_http() {
        let (base_url, server) = serve_once(
            201,
            r#"{"group":{"GroupId":"g7"},"guests":[{"GuestId":"u1"},{"GuestId":"u2"}]}"#,
        )
        .await;
        let client = HttpRegistrationClient::new(&base_url).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 11, 2, 10, 0, 0).unwrap();
        let submission = GroupSubmission::from_members(&members(), Entrance::West, &at).unwrap();

        let result = client.register(&submission).await.unwrap();
        assert_eq!(result.group_id, "g7");
        assert_eq!(result.guests.len(), 2);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /groups/ HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("content-type: application/json"));
        let body = request_body(&request);
        assert_eq!(body["memberCount"], 2);
        assert_eq!(body["entrance"], "west");
        assert_eq!(body["guests"][1]["ageRange"], "els");
    }

    #[tokio::test]
    async fn test_register_reads_error_body() {
        let (base_url, server) = serve_once(409, r#"{"error":"capacity exceeded"}"#).await;
        let client = HttpRegistrationClient::new(&base_url).unwrap();
        let submission =
            GroupSubmission::from_members(&members(), Entrance::Front, &Utc::now()).unwrap();

        let err = client.register(&submission).await.unwrap_err();
        assert_eq!(err.status, Some(409));
        assert_eq!(err.message, "capacity exceeded");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_register_unreachable_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = HttpRegistrationClient::new(&base_url).unwrap();
        let submission =
            GroupSubmission::from_members(&members(), Entrance::Front, &Utc::now()).unwrap();

        let err = client.register(&submission).await.unwrap_err();
        assert_eq!(err.status, None);
        assert!(!err.message.is_empty());
    }

    #[test]
    fn test_endpoint_join() {
        let client = HttpRegistrationClient::new("https://example.test/").unwrap();
        assert_eq!(client.endpoint(), "https://example.test/groups/");
    }

    #[test]
    fn test_entrance_parse() {
        assert_eq!(Entrance::parse("West"), Some(Entrance::West));
        assert_eq!(Entrance::parse(" new "), Some(Entrance::New));
        assert_eq!(Entrance::parse("back"), None);
    }
}
