use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

/// One calendar entry as published by the events feed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedEntry {
    pub name: String,
    #[serde(rename = "type", alias = "eventType")]
    pub kind: String,
    #[serde(alias = "hasQuests")]
    pub has_quests: bool,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

#[async_trait::async_trait]
pub trait EventFeed: Send + Sync {
    /// Raw entries; validation happens per entry so one bad row can't sink the pass.
    async fn fetch(&self) -> Result<Vec<Value>>;
}

pub struct HttpEventFeed {
    client: Client,
    url: String,
}

impl HttpEventFeed {
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl EventFeed for HttpEventFeed {
    async fn fetch(&self) -> Result<Vec<Value>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("Failed to fetch events feed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Events feed error ({status})");
        }

        let entries: Vec<Value> = response
            .json()
            .await
            .context("Failed to parse events feed")?;
        tracing::info!("Fetched {} feed entries from {}", entries.len(), self.url);
        Ok(entries)
    }
}

/// Keeps well-formed entries, logging and dropping the rest.
pub fn parse_entries(raw: Vec<Value>) -> Vec<FeedEntry> {
    raw.into_iter()
        .filter_map(|value| match serde_json::from_value::<FeedEntry>(value) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("Skipping malformed feed entry: {e}");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_entries_skips_malformed_rows() {
        let entries = parse_entries(vec![
            json!({"name": "Raid Day", "type": "community", "has_quests": true,
                   "start": "2024-01-01T10:00", "end": null}),
            json!({"type": "community"}),
            json!("garbage"),
            json!({"name": "Spotlight", "eventType": "spotlight-hour", "hasQuests": false}),
            json!({"name": "Unknown quests", "type": "community", "start": "2024-01-01T10:00"}),
        ]);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].start.as_deref(), Some("2024-01-01T10:00"));
        assert_eq!(entries[0].end, None);
        assert_eq!(entries[1].kind, "spotlight-hour");
        assert!(!entries[1].has_quests);
        assert!(entries.iter().all(|e| e.name != "Unknown quests"));
    }

    #[tokio::test]
    async fn test_fetch_reports_http_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/events.json");
            then.status(503);
        });
        let feed = HttpEventFeed::new(&server.url("/events.json"));
        assert!(feed.fetch().await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_returns_raw_rows() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/events.json");
            then.status(200).json_body(json!([{"name": "a"}, {"name": "b"}]));
        });
        let feed = HttpEventFeed::new(&server.url("/events.json"));
        assert_eq!(feed.fetch().await.unwrap().len(), 2);
    }
}
