use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::channels::{ButtonStyle, Component, Conversation, FlowError, MessageHandle, Render};
use crate::config::Config;
use crate::menus::{Choice, DateTimePicker, PaginatedSelector};
use crate::messages;
use crate::rdm::{Action, DeviceApi, RdmError};
use crate::scheduler::{JobSpec, JobStore, JobTask, Trigger};

pub const CANCEL: &str = "cancel";
pub const INSTANT: &str = "instant";
pub const SCHEDULE: &str = "schedule";

/// Every target that failed during one run of an action.
#[derive(Debug, thiserror::Error)]
#[error("{} of {} targets failed", .failures.len(), .attempted)]
pub struct ActionError {
    pub attempted: usize,
    pub failures: Vec<(String, RdmError)>,
}

/// Applies `action` to each group in order. Every group is attempted even
/// after a failure; the run fails if any group did.
pub async fn execute_assignment_groups(
    rdm: &dyn DeviceApi,
    groups: &[String],
    action: Action,
) -> Result<(), ActionError> {
    let mut failures = Vec::new();
    for group in groups {
        match rdm.assignment_group(group, action == Action::ReQuest).await {
            Ok(()) => tracing::info!("Assignment group {group}: {action} ok"),
            Err(e) => {
                tracing::error!("Assignment group {group}: {action} failed: {e}");
                failures.push((group.clone(), e));
            }
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(ActionError {
            attempted: groups.len(),
            failures,
        })
    }
}

#[derive(Debug)]
pub enum WizardOutcome {
    Aborted,
    Executed {
        groups: Vec<String>,
        action: Action,
        result: Result<(), ActionError>,
    },
    Scheduled {
        job_id: String,
        name: String,
        at: DateTime<Tz>,
    },
}

/// Targets -> action -> instant or scheduled, on a single message.
pub struct ActionWizard<'a> {
    conversation: &'a Conversation,
    rdm: &'a dyn DeviceApi,
    jobs: &'a JobStore,
    config: &'a Config,
}

impl<'a> ActionWizard<'a> {
    pub fn new(
        conversation: &'a Conversation,
        rdm: &'a dyn DeviceApi,
        jobs: &'a JobStore,
        config: &'a Config,
    ) -> Self {
        Self {
            conversation,
            rdm,
            jobs,
            config,
        }
    }

    pub async fn run(
        &self,
        handle: &MessageHandle,
        targets: &[Choice],
        now: DateTime<Utc>,
    ) -> Result<WizardOutcome, FlowError> {
        let (_, selected) = PaginatedSelector::new(self.conversation, "assignment_groups")
            .run(handle, targets, "Select assignment groups", "...")
            .await?;
        let groups = in_target_order(targets, &selected);
        if groups.is_empty() {
            return self.abort(handle).await;
        }

        let mut summary = format!("Target groups: {}", groups.join(", "));
        let action = match self.forced_action(&groups) {
            Some(action) => action,
            None => {
                let row = vec![
                    Component::button("start", "Start", ButtonStyle::Success),
                    Component::button("request", "ReQuest", ButtonStyle::Primary),
                    Component::button(CANCEL, "Cancel", ButtonStyle::Secondary),
                ];
                let ctx = self
                    .conversation
                    .prompt(handle, &Render::text(summary.clone()).with_row(row))
                    .await?;
                match Action::parse(&ctx.custom_id) {
                    Some(action) => action,
                    None if ctx.custom_id == CANCEL => return self.abort(handle).await,
                    None => return Err(FlowError::UnexpectedValue(ctx.custom_id)),
                }
            }
        };

        summary.push_str(&format!(" Action: {action}"));
        let row = vec![
            Component::button(SCHEDULE, "Schedule", ButtonStyle::Primary),
            Component::button(INSTANT, "Instant", ButtonStyle::Primary),
            Component::button(CANCEL, "Cancel", ButtonStyle::Secondary),
        ];
        let timing = self
            .conversation
            .prompt(handle, &Render::text(summary).with_row(row))
            .await?;

        match timing.custom_id.as_str() {
            INSTANT => {
                let result = execute_assignment_groups(self.rdm, &groups, action).await;
                let text = messages::action_report(
                    &self.config.messages,
                    "Instant",
                    action,
                    &groups,
                    result.is_ok(),
                );
                self.conversation.show(handle, &Render::text(text)).await?;
                Ok(WizardOutcome::Executed {
                    groups,
                    action,
                    result,
                })
            }
            SCHEDULE => self.schedule(handle, groups, action, now).await,
            CANCEL => self.abort(handle).await,
            other => Err(FlowError::UnexpectedValue(other.to_string())),
        }
    }

    async fn schedule(
        &self,
        handle: &MessageHandle,
        groups: Vec<String>,
        action: Action,
        now: DateTime<Utc>,
    ) -> Result<WizardOutcome, FlowError> {
        let (_, picked) = DateTimePicker::new(self.conversation, &self.config.locale)
            .run(handle, now)
            .await?;

        let name = format!("{action} {}", groups.join(", "));
        let job_id = self.jobs.add(
            JobSpec {
                id: None,
                name: name.clone(),
                task: JobTask::AssignmentGroup { groups, action },
                trigger: Trigger::At(picked.utc),
                replace_existing: false,
            },
            now,
        )?;

        let fmt = self.config.locale.datetime_format();
        let text = format!(
            "New job **{name}** added. Will be fired at **{}**",
            picked.local.format(&fmt)
        );
        self.conversation.show(handle, &Render::text(text)).await?;
        Ok(WizardOutcome::Scheduled {
            job_id,
            name,
            at: picked.local,
        })
    }

    /// IV-only selections can only start, quest-only ones only re-quest.
    fn forced_action(&self, groups: &[String]) -> Option<Action> {
        let all_in = |set: &[String]| groups.iter().all(|g| set.contains(g));
        if all_in(&self.config.groups.iv_only) {
            Some(Action::Start)
        } else if all_in(&self.config.groups.quest_only) {
            Some(Action::ReQuest)
        } else {
            None
        }
    }

    async fn abort(&self, handle: &MessageHandle) -> Result<WizardOutcome, FlowError> {
        self.conversation
            .show(handle, &Render::text("Aborted."))
            .await?;
        Ok(WizardOutcome::Aborted)
    }
}

fn in_target_order(targets: &[Choice], selected: &BTreeSet<String>) -> Vec<String> {
    targets
        .iter()
        .filter(|c| selected.contains(&c.value))
        .map(|c| c.value.clone())
        .collect()
}
