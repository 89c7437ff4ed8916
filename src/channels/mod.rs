pub mod gateway;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::scheduler::JobError;

/// Identifies one bot message on the chat platform. Menus edit it in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle {
    pub channel_id: String,
    pub message_id: String,
}

impl MessageHandle {
    pub fn key(&self) -> String {
        format!("{}:{}", self.channel_id, self.message_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Secondary,
    Success,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub label: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub default: bool,
}

impl SelectOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            description: None,
            default: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Component {
    Select {
        custom_id: String,
        placeholder: String,
        min_values: usize,
        max_values: usize,
        options: Vec<SelectOption>,
    },
    Button {
        custom_id: String,
        label: String,
        style: ButtonStyle,
    },
}

impl Component {
    pub fn button(custom_id: &str, label: &str, style: ButtonStyle) -> Self {
        Self::Button {
            custom_id: custom_id.into(),
            label: label.into(),
            style,
        }
    }
}

/// Message body: text plus rows of interactive components.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Render {
    pub content: String,
    #[serde(default)]
    pub components: Vec<Vec<Component>>,
    #[serde(default)]
    pub hidden: bool,
}

impl Render {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_row(mut self, row: Vec<Component>) -> Self {
        self.components.push(row);
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }
}

/// A click or select submitted on one of our messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub handle: MessageHandle,
    pub custom_id: String,
    #[serde(default)]
    pub selected_options: Vec<String>,
}

#[async_trait::async_trait]
pub trait ChatSurface: Send + Sync {
    async fn send(&self, channel_id: &str, render: &Render) -> Result<MessageHandle>;
    async fn edit(&self, handle: &MessageHandle, render: &Render) -> Result<()>;
    /// Registers for the next interaction on `handle`. Must be called before
    /// the render that invites it, or a quick click can arrive unheard.
    fn subscribe(&self, handle: &MessageHandle) -> oneshot::Receiver<Interaction>;
}

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("no interaction within {0:?}")]
    IdleTimeout(Duration),
    #[error("unexpected menu value '{0}'")]
    UnexpectedValue(String),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Surface(#[from] anyhow::Error),
}

/// Render/await primitive shared by every interactive flow.
#[derive(Clone)]
pub struct Conversation {
    surface: Arc<dyn ChatSurface>,
    idle_timeout: Duration,
}

impl Conversation {
    pub fn new(surface: Arc<dyn ChatSurface>, idle_timeout: Duration) -> Self {
        Self {
            surface,
            idle_timeout,
        }
    }

    pub fn surface(&self) -> &Arc<dyn ChatSurface> {
        &self.surface
    }

    pub async fn show(&self, handle: &MessageHandle, render: &Render) -> Result<(), FlowError> {
        self.surface.edit(handle, render).await?;
        Ok(())
    }

    pub async fn prompt(
        &self,
        handle: &MessageHandle,
        render: &Render,
    ) -> Result<Interaction, FlowError> {
        let waiter = self.surface.subscribe(handle);
        self.show(handle, render).await?;
        match tokio::time::timeout(self.idle_timeout, waiter).await {
            Ok(Ok(interaction)) => Ok(interaction),
            Ok(Err(_)) => Err(FlowError::Surface(anyhow::anyhow!(
                "Interaction waiter for {} was replaced",
                handle.key()
            ))),
            Err(_) => {
                tracing::info!("Menu {} idle, dropping it", handle.key());
                Err(FlowError::IdleTimeout(self.idle_timeout))
            }
        }
    }
}
