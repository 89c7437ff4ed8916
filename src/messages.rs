use crate::config::MessagesConfig;
use crate::rdm::{Action, RdmError, Status};

/// Fills `{key}` placeholders; unknown placeholders are left as written.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match vars.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Tech-channel line for an action run. `kind` is `Instant` or `Scheduled`.
pub fn action_report(
    messages: &MessagesConfig,
    kind: &str,
    action: Action,
    groups: &[String],
    ok: bool,
) -> String {
    let template = if ok {
        &messages.tech_success
    } else {
        &messages.tech_fail
    };
    render(
        template,
        &[
            ("action", action.as_str()),
            ("type", kind),
            ("assignments_groups", &groups.join(", ")),
        ],
    )
}

/// User-channel announcement after a scheduled action went through.
pub fn user_announcement(messages: &MessagesConfig, action: Action, groups: &[String]) -> String {
    let template = match action {
        Action::ReQuest => &messages.user_request,
        Action::Start => &messages.user_start,
    };
    render(
        template,
        &[
            ("action", action.as_str()),
            ("type", "Scheduled"),
            ("assignments_groups", &groups.join(", ")),
        ],
    )
}

pub fn status_message(status: &Result<Status, RdmError>) -> String {
    match status {
        Ok(s) => format!(
            "**Processing** {}/{} ({} ignored, {} total)\n**Pokemon** {}/{}\n**Devices** {}/{}",
            s.processing.current,
            s.processing.max,
            s.processing.ignored,
            s.processing.total,
            s.pokemon.active_iv,
            s.pokemon.active_total,
            s.devices.online,
            s.devices.total
        ),
        Err(RdmError::Transport(e)) => format!("Status fetch failed!\nError: {e}"),
        Err(_) => "Status fetch failed!".to_string(),
    }
}
