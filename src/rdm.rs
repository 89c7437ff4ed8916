use std::fmt;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RdmConfig;

const USER_AGENT: &str = concat!("rdmbot/", env!("CARGO_PKG_VERSION"));

/// What an assignment group is told to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Start,
    #[serde(rename = "request")]
    ReQuest,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::ReQuest => "request",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "start" => Some(Self::Start),
            "request" => Some(Self::ReQuest),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RdmError {
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("RDM answered HTTP {0}")]
    Status(StatusCode),
    #[error("RDM rejected the request")]
    Rejected,
    #[error("unexpected RDM payload: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Status {
    pub processing: Processing,
    pub pokemon: Pokemon,
    pub devices: Devices,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Processing {
    pub current: u64,
    pub max: u64,
    pub ignored: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pokemon {
    pub active_iv: u64,
    pub active_total: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Devices {
    pub online: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignmentGroup {
    pub name: String,
    #[serde(default)]
    pub assignments: Value,
}

impl AssignmentGroup {
    /// Short human summary of the group's assignments, at most 100 chars.
    pub fn summary(&self) -> String {
        let text = match &self.assignments {
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", "),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        text.chars().take(100).collect()
    }
}

/// The device-management service as seen by the bot.
#[async_trait::async_trait]
pub trait DeviceApi: Send + Sync {
    async fn get_status(&self) -> Result<Status, RdmError>;
    async fn get_assignment_groups(&self) -> Result<Vec<AssignmentGroup>, RdmError>;
    async fn assignment_group(&self, name: &str, re_quest: bool) -> Result<(), RdmError>;
    async fn reload_instances(&self) -> Result<(), RdmError>;
    async fn clear_all_quests(&self) -> Result<(), RdmError>;
}

pub struct RdmClient {
    client: Client,
    endpoint: String,
    username: String,
    password: String,
}

impl RdmClient {
    pub fn new(config: &RdmConfig) -> Self {
        Self {
            client: Client::new(),
            endpoint: config.api_endpoint.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }

    async fn call(&self, path: &str, params: &[(&str, String)]) -> Result<reqwest::Response, RdmError> {
        let response = self
            .client
            .get(format!("{}{path}", self.endpoint))
            .basic_auth(&self.username, Some(&self.password))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .query(params)
            .send()
            .await?;
        tracing::info!("RDM GET {path} -> {}", response.status());
        Ok(response)
    }

    async fn get_data<T: DeserializeOwned>(&self, flag: &str, key: &str) -> Result<T, RdmError> {
        let response = self.call("/api/get_data", &[(flag, "true".into())]).await?;
        if response.status() != StatusCode::OK {
            return Err(RdmError::Status(response.status()));
        }
        let body: Value = response.json().await?;
        tracing::debug!("RDM {flag}: {body}");
        if body["status"] != "ok" {
            return Err(RdmError::Rejected);
        }
        serde_json::from_value(body["data"][key].clone())
            .map_err(|e| RdmError::Decode(format!("{key}: {e}")))
    }

    async fn set_data(&self, params: &[(&str, String)]) -> Result<(), RdmError> {
        let response = self.call("/api/set_data", params).await?;
        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(RdmError::Status(status)),
        }
    }
}

#[async_trait::async_trait]
impl DeviceApi for RdmClient {
    async fn get_status(&self) -> Result<Status, RdmError> {
        self.get_data("show_status", "status").await
    }

    async fn get_assignment_groups(&self) -> Result<Vec<AssignmentGroup>, RdmError> {
        self.get_data("show_assignmentgroups", "assignmentgroups")
            .await
    }

    async fn assignment_group(&self, name: &str, re_quest: bool) -> Result<(), RdmError> {
        self.set_data(&[
            ("assignmentgroup_name", name.to_string()),
            ("assignmentgroup_re_quest", re_quest.to_string()),
            ("assignmentgroup_start", (!re_quest).to_string()),
        ])
        .await
    }

    async fn reload_instances(&self) -> Result<(), RdmError> {
        self.set_data(&[("reload_instances", "true".into())]).await
    }

    async fn clear_all_quests(&self) -> Result<(), RdmError> {
        self.set_data(&[("clear_all_quests", "true".into())]).await
    }
}


#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn client(server: &MockServer) -> RdmClient {
        RdmClient::new(&RdmConfig {
            api_endpoint: server.base_url(),
            username: "admin".into(),
            password: "secret".into(),
        })
    }

    #[tokio::test]
    async fn test_get_status_parses_payload() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/get_data")
                .query_param("show_status", "true")
                .header_exists("authorization");
            then.status(200).json_body(json!({
                "status": "ok",
                "data": {"status": {
                    "processing": {"current": 2, "max": 8, "ignored": 1, "total": 11},
                    "pokemon": {"active_iv": 10, "active_total": 20},
                    "devices": {"online": 4, "total": 5}
                }}
            }));
        });

        let status = client(&server).get_status().await.unwrap();
        assert_eq!(mock.calls(), 1);
        assert_eq!(status.processing.total, 11);
        assert_eq!(status.devices.online, 4);
    }

    #[tokio::test]
    async fn test_get_data_not_ok_is_rejected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/get_data");
            then.status(200).json_body(json!({"status": "error"}));
        });
        let err = client(&server).get_assignment_groups().await.unwrap_err();
        assert!(matches!(err, RdmError::Rejected));
    }

    #[tokio::test]
    async fn test_assignment_group_sends_flags() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/set_data")
                .query_param("assignmentgroup_name", "North")
                .query_param("assignmentgroup_re_quest", "true")
                .query_param("assignmentgroup_start", "false");
            then.status(200);
        });
        client(&server).assignment_group("North", true).await.unwrap();
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_set_data_http_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/set_data");
            then.status(500);
        });
        let err = client(&server).reload_instances().await.unwrap_err();
        assert!(matches!(err, RdmError::Status(s) if s == StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn test_assignment_summary_truncates() {
        let group = AssignmentGroup {
            name: "g".into(),
            assignments: json!(["a".repeat(80), "b".repeat(80)]),
        };
        assert_eq!(group.summary().chars().count(), 100);
        assert!(group.summary().starts_with("aaa"));
    }

    #[test]
    fn test_action_round_trips_through_strings() {
        assert_eq!(Action::parse("request"), Some(Action::ReQuest));
        assert_eq!(Action::ReQuest.as_str(), "request");
        assert_eq!(Action::parse("cancel"), None);
    }
}
