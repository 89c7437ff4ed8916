use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde::Deserialize;

use crate::channels::{
    ButtonStyle, ChatSurface, Component, Conversation, FlowError, Interaction, MessageHandle,
    Render,
};
use crate::config::Config;
use crate::events::EventIngestor;
use crate::menus::{Choice, PaginatedSelector};
use crate::messages;
use crate::rdm::{Action, DeviceApi, RdmError};
use crate::scheduler::{Job, JobRunner, JobStore, JobTask};
use crate::wizard::{self, ActionWizard};

pub const STATUS_REFRESH: &str = "status_refresh";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Command {
    #[serde(rename = "rdm-status")]
    Status,
    #[serde(rename = "rdm-reload")]
    Reload,
    #[serde(rename = "rdm-clear")]
    Clear,
    #[serde(rename = "rdm-jobs")]
    Jobs,
    #[serde(rename = "rdm-assignment-group")]
    AssignmentGroup,
}

/// Slash-command handlers and the runner for scheduled jobs.
pub struct Bot {
    config: Arc<Config>,
    rdm: Arc<dyn DeviceApi>,
    jobs: Arc<JobStore>,
    conversation: Conversation,
    ingestor: Option<EventIngestor>,
}

impl Bot {
    pub fn new(
        config: Arc<Config>,
        rdm: Arc<dyn DeviceApi>,
        jobs: Arc<JobStore>,
        conversation: Conversation,
        ingestor: Option<EventIngestor>,
    ) -> Self {
        Self {
            config,
            rdm,
            jobs,
            conversation,
            ingestor,
        }
    }

    fn surface(&self) -> &Arc<dyn ChatSurface> {
        self.conversation.surface()
    }

    fn reply(&self, content: impl Into<String>) -> Render {
        Render::text(content).hidden(self.config.bot.hide_bot_message)
    }

    pub async fn handle_command(&self, command: Command, channel_id: &str) -> Result<()> {
        tracing::info!("Command {command:?} in channel {channel_id}");
        match command {
            Command::Status => {
                let render = self.status_render().await;
                self.surface().send(channel_id, &render).await?;
            }
            Command::Reload => {
                let text = match self.rdm.reload_instances().await {
                    Ok(()) => "Instances reloaded!".to_string(),
                    Err(RdmError::Transport(e)) => format!("Instances reload failed!\nError: {e}"),
                    Err(e) => {
                        tracing::warn!("Reload failed: {e}");
                        "Instances reload failed!".to_string()
                    }
                };
                self.surface().send(channel_id, &self.reply(text)).await?;
            }
            Command::Clear => {
                let text = match self.rdm.clear_all_quests().await {
                    Ok(()) => "Quests cleaned!".to_string(),
                    Err(RdmError::Transport(e)) => format!("Quests cleanup failed!\nError: {e}"),
                    Err(e) => {
                        tracing::warn!("Quest cleanup failed: {e}");
                        "Quests cleanup failed!".to_string()
                    }
                };
                self.surface().send(channel_id, &self.reply(text)).await?;
            }
            Command::Jobs => self.jobs_menu(channel_id).await?,
            Command::AssignmentGroup => self.assignment_group_menu(channel_id).await?,
        }
        Ok(())
    }

    async fn status_render(&self) -> Render {
        let status = self.rdm.get_status().await;
        self.reply(messages::status_message(&status)).with_row(vec![Component::button(
            STATUS_REFRESH,
            "Refresh",
            ButtonStyle::Primary,
        )])
    }

    /// Handles interactions no open menu is waiting for. Returns whether the
    /// interaction was recognized.
    pub async fn handle_unsolicited(&self, interaction: &Interaction) -> Result<bool> {
        if interaction.custom_id != STATUS_REFRESH {
            return Ok(false);
        }
        let render = self.status_render().await;
        self.surface().edit(&interaction.handle, &render).await?;
        Ok(true)
    }

    async fn jobs_menu(&self, channel_id: &str) -> Result<()> {
        let jobs = self.jobs.list();
        if jobs.is_empty() {
            self.surface()
                .send(channel_id, &self.reply("No jobs scheduled."))
                .await?;
            return Ok(());
        }

        let tz = self.config.locale.timezone;
        let fmt = self.config.locale.datetime_format();
        let names: HashMap<String, String> =
            jobs.iter().map(|j| (j.id.clone(), j.name.clone())).collect();
        let choices: Vec<Choice> = jobs
            .iter()
            .map(|job| {
                let next = job
                    .next_run_time
                    .map(|t| t.with_timezone(&tz).format(&fmt).to_string())
                    .unwrap_or_else(|| "paused".to_string());
                Choice::new(&job.name, &job.id).describe(next)
            })
            .collect();

        let handle = self.surface().send(channel_id, &self.reply("Jobs")).await?;
        let result = self.remove_jobs(&handle, &choices, &names).await;
        self.finish_flow(&handle, result).await
    }

    async fn remove_jobs(
        &self,
        handle: &MessageHandle,
        choices: &[Choice],
        names: &HashMap<String, String>,
    ) -> Result<(), FlowError> {
        let (_, selected) = PaginatedSelector::new(&self.conversation, "jobs_list")
            .run(handle, choices, "Select jobs to remove", "...")
            .await?;
        if selected.is_empty() {
            return self.conversation.show(handle, &Render::text("Aborted.")).await;
        }

        let mut removed = Vec::new();
        for id in &selected {
            self.jobs.remove(id);
            if let Some(name) = names.get(id) {
                removed.push(format!("**- {name}**"));
            }
        }
        let text = format!("Removed scheduled jobs:\n{}", removed.join("\n"));
        self.conversation.show(handle, &Render::text(text)).await
    }

    async fn assignment_group_menu(&self, channel_id: &str) -> Result<()> {
        let groups = match self.rdm.get_assignment_groups().await {
            Ok(groups) => groups,
            Err(e) => {
                tracing::error!("Assignment groups fetch failed: {e}");
                let text = format!("Assignment groups fetch failed!\nError: {e}");
                self.surface().send(channel_id, &self.reply(text)).await?;
                return Ok(());
            }
        };
        if groups.is_empty() {
            let text = "There's no assignment groups in this RDM instance.";
            self.surface().send(channel_id, &self.reply(text)).await?;
            return Ok(());
        }

        let targets: Vec<Choice> = groups
            .iter()
            .map(|g| Choice::new(&g.name, &g.name).describe(g.summary()))
            .collect();
        let handle = self
            .surface()
            .send(channel_id, &self.reply("Assignment groups"))
            .await?;
        let outcome = ActionWizard::new(&self.conversation, &*self.rdm, &self.jobs, &self.config)
            .run(&handle, &targets, Utc::now())
            .await
            .map(|outcome| tracing::info!("Assignment group wizard: {outcome:?}"));
        self.finish_flow(&handle, outcome).await
    }

    /// Closes a menu that ended early so its components stop accepting
    /// clicks; an idle one is marked as timed out, anything else as aborted.
    async fn finish_flow(&self, handle: &MessageHandle, result: Result<(), FlowError>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(FlowError::IdleTimeout(_)) => {
                self.conversation
                    .show(handle, &Render::text("Timed out."))
                    .await?;
                Ok(())
            }
            Err(e) => {
                tracing::error!("Menu {} failed: {e}", handle.key());
                if let Err(close) = self.conversation.show(handle, &Render::text("Aborted.")).await {
                    tracing::warn!("Could not close menu {}: {close}", handle.key());
                }
                Err(e.into())
            }
        }
    }

    async fn notify(&self, channel: Option<&str>, text: &str) -> Result<()> {
        match channel {
            Some(channel_id) => {
                self.surface()
                    .send(channel_id, &Render::text(text))
                    .await?;
            }
            None => tracing::debug!("No channel configured for: {text}"),
        }
        Ok(())
    }

    async fn run_scheduled_action(&self, groups: &[String], action: Action) -> Result<()> {
        let result = wizard::execute_assignment_groups(&*self.rdm, groups, action).await;
        let channels = &self.config.channels;
        let report = messages::action_report(
            &self.config.messages,
            "Scheduled",
            action,
            groups,
            result.is_ok(),
        );
        self.notify(channels.tech_channel.as_deref(), &report).await?;
        if result.is_ok() {
            let announcement = messages::user_announcement(&self.config.messages, action, groups);
            self.notify(channels.user_channel.as_deref(), &announcement)
                .await?;
        }
        Ok(result?)
    }

    /// One ingestion pass with its reports posted to the configured channels.
    pub async fn ingest_events(&self) -> Result<()> {
        let Some(ingestor) = &self.ingestor else {
            return Ok(());
        };
        let plan = ingestor.run(Utc::now()).await?;
        let channels = &self.config.channels;
        for text in [&plan.tech_message, &plan.filtered_tech_message].into_iter().flatten() {
            self.notify(channels.tech_channel.as_deref(), text).await?;
        }
        if let Some(text) = &plan.user_message {
            self.notify(channels.user_channel.as_deref(), text).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl JobRunner for Bot {
    async fn run_job(&self, job: &Job) -> Result<()> {
        match &job.task {
            JobTask::AssignmentGroup { groups, action } => {
                self.run_scheduled_action(groups, *action).await
            }
            JobTask::RefreshEvents => self.ingest_events().await,
        }
    }
}
