use std::collections::BTreeSet;

use crate::channels::{
    Component, Conversation, FlowError, Interaction, MessageHandle, Render, SelectOption,
};

/// Raw choices per page; the remaining select slots hold navigation entries.
pub const PAGE_SIZE: usize = 23;

pub const NEXT: &str = "button_next";
pub const PREVIOUS: &str = "button_previous";
pub const CLOSE: &str = "button_close";

const SENTINELS: [&str; 3] = [NEXT, PREVIOUS, CLOSE];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub label: String,
    pub value: String,
    pub description: Option<String>,
}

impl Choice {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            description: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Step {
    Render,
    Done,
}

/// Page cursor and accumulated selection of one open menu.
pub struct SelectionSession<'a> {
    pages: Vec<&'a [Choice]>,
    current: usize,
    accumulated: BTreeSet<String>,
    remember: bool,
}

impl<'a> SelectionSession<'a> {
    pub fn new(choices: &'a [Choice], remember: bool) -> Self {
        Self {
            pages: choices.chunks(PAGE_SIZE).collect(),
            current: 0,
            accumulated: BTreeSet::new(),
            remember,
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn current_page(&self) -> usize {
        self.current
    }

    pub fn accumulated(&self) -> &BTreeSet<String> {
        &self.accumulated
    }

    fn slice(&self) -> &'a [Choice] {
        self.pages.get(self.current).copied().unwrap_or(&[])
    }

    /// Options for the current page, navigation entries included.
    pub fn options(&self) -> Vec<SelectOption> {
        let mut options = Vec::with_capacity(PAGE_SIZE + 2);
        if self.current > 0 {
            options.push(control(PREVIOUS, "Previous page...", "Show previous page"));
        }
        options.extend(self.slice().iter().map(|c| SelectOption {
            label: c.label.clone(),
            value: c.value.clone(),
            description: c.description.clone(),
            default: self.accumulated.contains(&c.value),
        }));
        if self.current + 1 < self.pages.len() {
            options.push(control(NEXT, "Next page...", "Show next page"));
        } else {
            options.push(control(CLOSE, "Save & Close", "Save & Close selection"));
        }
        options
    }

    fn apply(&mut self, selected: &[String]) -> Step {
        if self.remember {
            self.accumulated.extend(selected.iter().cloned());
        } else {
            self.accumulated = selected.iter().cloned().collect();
        }
        for sentinel in SENTINELS {
            self.accumulated.remove(sentinel);
        }

        let chose = |sentinel: &str| selected.iter().any(|v| v == sentinel);
        if chose(NEXT) {
            self.current += 1;
        } else if chose(PREVIOUS) {
            self.current = self.current.saturating_sub(1);
        } else {
            return Step::Done;
        }

        if self.slice().is_empty() {
            Step::Done
        } else {
            Step::Render
        }
    }

    fn render(&self, content: String, placeholder: &str, custom_id: &str) -> Render {
        let options = self.options();
        Render::text(content).with_row(vec![Component::Select {
            custom_id: custom_id.to_string(),
            placeholder: placeholder.to_string(),
            min_values: 1,
            max_values: options.len(),
            options,
        }])
    }
}

fn control(value: &str, label: &str, description: &str) -> SelectOption {
    SelectOption {
        label: label.into(),
        value: value.into(),
        description: Some(description.into()),
        default: false,
    }
}

/// Multi-select menu over `choices`, paged [`PAGE_SIZE`] at a time.
pub struct PaginatedSelector<'c> {
    conversation: &'c Conversation,
    custom_id: String,
    remember: bool,
}

impl<'c> PaginatedSelector<'c> {
    pub fn new(conversation: &'c Conversation, custom_id: &str) -> Self {
        Self {
            conversation,
            custom_id: custom_id.to_string(),
            remember: true,
        }
    }

    pub fn remember(mut self, remember: bool) -> Self {
        self.remember = remember;
        self
    }

    /// Runs the menu on `handle` until the operator closes it. Returns the
    /// closing interaction and every value selected along the way.
    pub async fn run(
        &self,
        handle: &MessageHandle,
        choices: &[Choice],
        prompt: &str,
        placeholder: &str,
    ) -> Result<(Interaction, BTreeSet<String>), FlowError> {
        let mut session = SelectionSession::new(choices, self.remember);
        let mut render = session.render(prompt.to_string(), placeholder, &self.custom_id);

        loop {
            let interaction = self.conversation.prompt(handle, &render).await?;
            match session.apply(&interaction.selected_options) {
                Step::Done => return Ok((interaction, session.accumulated)),
                Step::Render => {
                    let selected = session
                        .accumulated
                        .iter()
                        .map(String::as_str)
                        .collect::<Vec<_>>()
                        .join(", ");
                    render =
                        session.render(format!("Selected: {selected}"), placeholder, &self.custom_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::testing::*;

    fn choices(n: usize) -> Vec<Choice> {
        (0..n)
            .map(|i| Choice::new(format!("Item {i}"), format!("v{i}")))
            .collect()
    }

    fn values(options: &[SelectOption]) -> Vec<&str> {
        options.iter().map(|o| o.value.as_str()).collect()
    }

    fn select_options(render: &Render) -> Vec<SelectOption> {
        match &render.components[0][0] {
            Component::Select { options, .. } => options.clone(),
            other => panic!("expected select, got {other:?}"),
        }
    }

    #[test]
    fn test_page_count_is_ceil_of_page_size() {
        assert_eq!(SelectionSession::new(&choices(1), true).page_count(), 1);
        assert_eq!(SelectionSession::new(&choices(23), true).page_count(), 1);
        assert_eq!(SelectionSession::new(&choices(24), true).page_count(), 2);
        assert_eq!(SelectionSession::new(&choices(70), true).page_count(), 4);
    }

    #[test]
    fn test_single_page_has_only_close() {
        let items = choices(23);
        let session = SelectionSession::new(&items, true);
        let options = session.options();
        assert_eq!(options.len(), 24);
        assert_eq!(options.last().unwrap().value, CLOSE);
        assert!(!values(&options).contains(&PREVIOUS));
    }

    #[test]
    fn test_navigation_controls_per_page() {
        let items = choices(50);
        let mut session = SelectionSession::new(&items, true);
        let first = session.options();
        assert_eq!(first.first().unwrap().value, "v0");
        assert_eq!(first.last().unwrap().value, NEXT);

        assert_eq!(session.apply(&[NEXT.to_string()]), Step::Render);
        let middle = session.options();
        assert_eq!(middle.first().unwrap().value, PREVIOUS);
        assert_eq!(middle.last().unwrap().value, NEXT);
        assert_eq!(middle.len(), PAGE_SIZE + 2);

        assert_eq!(session.apply(&[NEXT.to_string()]), Step::Render);
        let last = session.options();
        assert_eq!(values(&last), ["button_previous", "v46", "v47", "v48", "v49", "button_close"]);
    }

    #[test]
    fn test_previous_clamps_at_first_page() {
        let items = choices(30);
        let mut session = SelectionSession::new(&items, true);
        assert_eq!(session.apply(&[PREVIOUS.to_string()]), Step::Render);
        assert_eq!(session.current_page(), 0);
    }

    #[test]
    fn test_forget_mode_keeps_only_last_submit() {
        let items = choices(30);
        let mut session = SelectionSession::new(&items, false);
        session.apply(&["v1".to_string(), NEXT.to_string()]);
        session.apply(&["v25".to_string(), CLOSE.to_string()]);
        assert_eq!(session.accumulated().iter().collect::<Vec<_>>(), ["v25"]);
    }

    #[tokio::test]
    async fn test_selection_survives_paging_back_and_forth() {
        let surface = ScriptedSurface::new(&[
            ("menu", &["v1", "v2", NEXT]),
            ("menu", &["v30", PREVIOUS]),
            ("menu", &["v1", CLOSE]),
        ]);
        let conv = conversation(surface.clone());
        let items = choices(40);
        let (last, selected) = PaginatedSelector::new(&conv, "menu")
            .run(&handle(), &items, "Pick", "...")
            .await
            .unwrap();

        assert_eq!(last.selected_options, ["v1", CLOSE]);
        assert_eq!(
            selected.into_iter().collect::<Vec<_>>(),
            ["v1", "v2", "v30"]
        );

        let renders = surface.renders.lock().unwrap().clone();
        assert_eq!(renders.len(), 3);
        assert_eq!(renders[0].content, "Pick");
        assert_eq!(renders[1].content, "Selected: v1, v2");
        assert_eq!(renders[2].content, "Selected: v1, v2, v30");
        // back on page 0, earlier picks are pre-selected
        let defaults: Vec<_> = select_options(&renders[2])
            .into_iter()
            .filter(|o| o.default)
            .map(|o| o.value)
            .collect();
        assert_eq!(defaults, ["v1", "v2"]);
    }

    #[tokio::test]
    async fn test_bare_submit_closes_menu() {
        let surface = ScriptedSurface::new(&[("menu", &["v3"])]);
        let conv = conversation(surface);
        let items = choices(5);
        let (_, selected) = PaginatedSelector::new(&conv, "menu")
            .run(&handle(), &items, "Pick", "...")
            .await
            .unwrap();
        assert!(selected.contains("v3"));
        assert_eq!(selected.len(), 1);
    }
}
