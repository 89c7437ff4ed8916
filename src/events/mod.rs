//! Turns the public events calendar into quest-rescan jobs.
//!
//! Each pass fetches the feed, splits every allowed entry into start/end
//! events, accepts those with quests inside the configured hour window and
//! lead time, and schedules a re-quest (plus an optional IV start) for each.
//! Dates already handled, accepted or not, are remembered in the
//! [`PastEventStore`] and never scheduled again.

pub mod feed;
pub mod store;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::config::Config;
use crate::messages;
use crate::rdm::Action;
use crate::scheduler::{JobSpec, JobStore, JobTask, Trigger};
use feed::{EventFeed, FeedEntry};
pub use store::{PastEventRecord, PastEventStore};

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Boundary {
    Start,
    End,
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::End => "end",
        })
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub name: String,
    pub kind: String,
    pub has_quests: bool,
    pub boundary: Boundary,
    /// Timestamp exactly as the feed wrote it; the dedup key.
    pub date: String,
    pub instant: DateTime<Tz>,
    pub accepted_hours: bool,
    pub accepted_lead_time: bool,
}

impl Event {
    pub fn is_accepted(&self) -> bool {
        self.has_quests && self.accepted_hours && self.accepted_lead_time
    }

    fn rejection_reason(&self) -> String {
        let mut reasons = Vec::new();
        if !self.has_quests {
            reasons.push("no quests");
        }
        if !self.accepted_hours {
            reasons.push("outside hours");
        }
        if !self.accepted_lead_time {
            reasons.push("too soon");
        }
        reasons.join(", ")
    }
}

/// Reads feed timestamps; zone-less ones are taken as local to `tz`.
pub fn parse_feed_time(raw: &str, tz: Tz) -> Option<DateTime<Tz>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&tz));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| tz.from_local_datetime(&naive).earliest())
}

pub fn materialize(entries: &[FeedEntry], config: &Config, now: DateTime<Utc>) -> Vec<Event> {
    let events_cfg = &config.events;
    let tz = config.locale.timezone;
    let min_lead = Duration::minutes(events_cfg.min_lead_time_minutes);

    let mut events = Vec::new();
    for entry in entries {
        if !events_cfg.allowed_types.contains(&entry.kind) {
            continue;
        }
        for (boundary, raw) in [(Boundary::Start, &entry.start), (Boundary::End, &entry.end)] {
            let Some(raw) = raw else {
                continue;
            };
            let Some(instant) = parse_feed_time(raw, tz) else {
                tracing::warn!("Skipping {} {boundary}: bad timestamp '{raw}'", entry.name);
                continue;
            };
            let hour = instant.hour();
            events.push(Event {
                name: entry.name.clone(),
                kind: entry.kind.clone(),
                has_quests: entry.has_quests,
                boundary,
                date: raw.clone(),
                instant,
                accepted_hours: (events_cfg.min_hour..=events_cfg.max_hour).contains(&hour),
                accepted_lead_time: instant.with_timezone(&Utc) - now > min_lead,
            });
        }
    }
    events
}

/// One event per date, a start beating an end that shares its timestamp.
fn prefer_start(mut events: Vec<Event>) -> Vec<Event> {
    events.sort_by_key(|e| e.boundary);
    let mut seen = HashSet::new();
    events.retain(|e| seen.insert(e.date.clone()));
    events.sort_by_key(|e| e.instant);
    events
}

/// Outcome of one ingestion pass, before any side effect.
#[derive(Debug, Default)]
pub struct Plan {
    pub record: PastEventRecord,
    pub accepted: Vec<Event>,
    pub filtered: Vec<Event>,
    pub jobs: Vec<JobSpec>,
    pub tech_message: Option<String>,
    pub user_message: Option<String>,
    pub filtered_tech_message: Option<String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty() && self.filtered.is_empty()
    }
}

pub fn plan(
    past: &PastEventRecord,
    entries: &[FeedEntry],
    config: &Config,
    now: DateTime<Utc>,
) -> Plan {
    let (accepted, filtered): (Vec<Event>, Vec<Event>) = materialize(entries, config, now)
        .into_iter()
        .partition(Event::is_accepted);

    let mut accepted = prefer_start(accepted);
    let mut filtered = prefer_start(filtered);
    accepted.retain(|e| !past.contains(&e.date));
    filtered.retain(|e| !past.contains(&e.date));

    let mut record = past.clone();
    let mut jobs = Vec::new();
    let events_cfg = &config.events;
    let offset = Duration::minutes(events_cfg.execution_offset_minutes);
    for event in &accepted {
        let at = event.instant.with_timezone(&Utc);
        jobs.push(JobSpec {
            id: Some(format!("{}-1", event.date)),
            name: format!("{} ({}): request", event.name, event.boundary),
            task: JobTask::AssignmentGroup {
                groups: events_cfg.quest_instances.clone(),
                action: Action::ReQuest,
            },
            trigger: Trigger::At(at),
            replace_existing: true,
        });
        if !events_cfg.iv_instances.is_empty() {
            jobs.push(JobSpec {
                id: Some(format!("{}-2", event.date)),
                name: format!("{} ({}): start", event.name, event.boundary),
                task: JobTask::AssignmentGroup {
                    groups: events_cfg.iv_instances.clone(),
                    action: Action::Start,
                },
                trigger: Trigger::At(at + offset),
                replace_existing: true,
            });
        }
        record.accepted.insert(event.date.clone());
    }
    for event in &filtered {
        record.filtered.insert(event.date.clone());
    }

    let msgs = &config.messages;
    let fmt = config.locale.datetime_format();
    Plan {
        tech_message: join_lines(&accepted, &msgs.event_tech, &fmt),
        user_message: join_lines(&accepted, &msgs.event_user, &fmt),
        filtered_tech_message: join_lines(&filtered, &msgs.event_filtered, &fmt),
        record,
        accepted,
        filtered,
        jobs,
    }
}

fn join_lines(events: &[Event], template: &str, fmt: &str) -> Option<String> {
    if events.is_empty() {
        return None;
    }
    let lines: Vec<String> = events
        .iter()
        .map(|e| {
            let boundary = e.boundary.to_string();
            let date = e.instant.format(fmt).to_string();
            let reason = e.rejection_reason();
            messages::render(
                template,
                &[
                    ("name", e.name.as_str()),
                    ("type", e.kind.as_str()),
                    ("boundary", boundary.as_str()),
                    ("date", date.as_str()),
                    ("reason", reason.as_str()),
                ],
            )
        })
        .collect();
    Some(lines.join("\n"))
}

pub struct EventIngestor {
    config: Arc<Config>,
    feed: Arc<dyn EventFeed>,
    store: PastEventStore,
    jobs: Arc<JobStore>,
}

impl EventIngestor {
    pub fn new(
        config: Arc<Config>,
        feed: Arc<dyn EventFeed>,
        store: PastEventStore,
        jobs: Arc<JobStore>,
    ) -> Self {
        Self {
            config,
            feed,
            store,
            jobs,
        }
    }

    /// Fetches and classifies without touching jobs or the past-events file.
    pub async fn dry_run(&self, now: DateTime<Utc>) -> Result<Plan> {
        let past = self.store.load()?;
        let entries = feed::parse_entries(self.feed.fetch().await?);
        Ok(plan(&past, &entries, &self.config, now))
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<Plan> {
        let plan = self.dry_run(now).await?;
        if plan.is_empty() {
            tracing::info!("Event ingestion: nothing new");
            return Ok(plan);
        }

        for spec in &plan.jobs {
            self.jobs.add(spec.clone(), now)?;
        }
        self.store.save(&plan.record)?;
        tracing::info!(
            "Event ingestion: {} accepted, {} filtered, {} jobs, saved to {}",
            plan.accepted.len(),
            plan.filtered.len(),
            plan.jobs.len(),
            self.store.path().display()
        );
        Ok(plan)
    }
}
