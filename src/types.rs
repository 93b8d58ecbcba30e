use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::driver::DriverError;

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("driver_init: {0}")]
    DriverInit(DriverError),
    #[error("login: {0}")]
    Login(String),
    #[error("navigation: {0}")]
    Navigation(DriverError),
    #[error("page: {0}")]
    Page(DriverError),
    #[error("early_termination")]
    EarlyTermination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Success,
}

/// A candidate we successfully sent an invitation to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub name: String,
    pub profile_url: String,
    pub connection_status: ConnectionStatus,
    pub note_sent: String,
    pub search_url: String,
}

/// One row of a results page, not attempted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub index: usize,
    pub name: String,
    pub profile_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Stopped,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Info,
    Success,
    Error,
    Completed,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub message: String,
    pub status: EventStatus,
    pub data: Option<Lead>,
    pub timestamp: String,
}

#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: &str, password: &str) -> Self {
        Credentials {
            email: email.into(),
            password: password.into(),
        }
    }
}

// keeps passwords out of the option dumps we log at debug level
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"********")
            .finish()
    }
}

/// Body of a gateway start request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub email: String,
    pub password: String,
    pub connect_note: String,
    pub template_name: Option<String>,
    pub search_url: String,
    #[serde(default)]
    pub lead_limit: Option<usize>,
}

#[derive(Debug)]
pub struct SessionOutcome {
    pub id: String,
    pub status: SessionStatus,
    pub leads: Vec<Lead>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lead_serializes_with_snake_case_keys() {
        let lead = Lead {
            name: "Jane Doe".into(),
            profile_url: "https://example.com/in/jane".into(),
            connection_status: ConnectionStatus::Success,
            note_sent: "hi".into(),
            search_url: "https://example.com/search".into(),
        };
        let v = serde_json::to_value(&lead).unwrap();
        assert_eq!(v["profile_url"], "https://example.com/in/jane");
        assert_eq!(v["connection_status"], "success");
        assert_eq!(v["note_sent"], "hi");
    }

    #[test]
    fn event_without_data_serializes_null() {
        let ev = ProgressEvent {
            message: "Crawler completed".into(),
            status: EventStatus::Completed,
            data: None,
            timestamp: "2024-05-01 10:00:00".into(),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert!(v["data"].is_null());
        assert_eq!(v["status"], "completed");
    }

    #[test]
    fn start_request_reads_gateway_body() {
        let body = r#"{
            "email": "a@b.c",
            "password": "pw",
            "connectNote": "Hi [lead_name]",
            "templateName": "founders",
            "searchUrl": "https://example.com/sales/search"
        }"#;
        let req: StartRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.template_name.as_deref(), Some("founders"));
        assert_eq!(req.lead_limit, None);
    }

    #[test]
    fn credentials_debug_hides_password() {
        let c = Credentials::new("me@example.com", "hunter2");
        assert!(!format!("{c:?}").contains("hunter2"));
    }
}
