//! behave output parsing.
//!
//! behave's JSON formatter (`--format json`) writes one document describing
//! every feature, its scenarios and their steps. The same document serves
//! discovery (run with `--dry-run`) and results.
//!
//! ```json
//! [{
//!   "keyword": "Feature", "name": "Login", "location": "features/login.feature:1",
//!   "elements": [{
//!     "type": "scenario", "name": "wrong password",
//!     "location": "features/login.feature:6", "status": "failed",
//!     "steps": [{
//!       "keyword": "Then", "name": "I see an error",
//!       "location": "features/login.feature:9",
//!       "result": {"status": "failed", "error_message": "Assertion Failed: ..."}
//!     }]
//!   }]
//! }]
//! ```
//!
//! Scenario ids are their `file:line` locations, which behave accepts back as
//! run targets.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use super::{
    Decoration, FrameworkResult, ReportSource, ResultEvent, SuiteNode, TestLeaf, TestNode,
    TestOutputParser, TestState, into_root,
};
use crate::util::{
    concat_non_empty, concat_non_empty_opt, distinct_by_last, file_name, first_line,
    resolve_path, split_on_last,
};

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    name: Option<String>,
    location: String,
    #[serde(default)]
    elements: Option<Vec<Element>>,
}

#[derive(Debug, Deserialize)]
struct Element {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    keyword: Option<String>,
    #[serde(default)]
    name: Option<String>,
    location: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    steps: Option<Vec<Step>>,
}

#[derive(Debug, Deserialize)]
struct Step {
    #[serde(default)]
    keyword: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    result: Option<StepResult>,
}

#[derive(Debug, Deserialize)]
struct StepResult {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error_message: Option<ErrorMessage>,
}

/// Older behave versions write the error as a list of lines.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorMessage {
    Text(String),
    Lines(Vec<String>),
}

impl ErrorMessage {
    fn to_text(&self) -> String {
        match self {
            ErrorMessage::Text(text) => text.clone(),
            ErrorMessage::Lines(lines) => lines.join("\n"),
        }
    }
}

impl Element {
    fn is_background(&self) -> bool {
        let kind = self.kind.as_deref().or(self.keyword.as_deref());
        kind.is_some_and(|kind| kind.eq_ignore_ascii_case("background"))
    }

    fn steps(&self) -> &[Step] {
        self.steps.as_deref().unwrap_or_default()
    }

    /// The element's own status, or the first decisive step status.
    fn status(&self) -> Option<&str> {
        if let Some(status) = self.status.as_deref() {
            return Some(status);
        }
        let statuses: Vec<&str> = self
            .steps()
            .iter()
            .filter_map(|step| step.result.as_ref()?.status.as_deref())
            .collect();
        statuses
            .iter()
            .find(|status| map_status(status) != Some(TestState::Passed))
            .or(statuses.first())
            .copied()
    }
}

/// Maps behave's status vocabulary onto the canonical states.
///
/// ```
/// use testlens::framework::TestState;
/// use testlens::framework::behave::map_status;
///
/// assert_eq!(map_status("undefined"), Some(TestState::Failed));
/// assert_eq!(map_status("untested"), Some(TestState::Skipped));
/// assert_eq!(map_status("executing"), None);
/// ```
pub fn map_status(status: &str) -> Option<TestState> {
    match status {
        "passed" => Some(TestState::Passed),
        "failed" | "error" | "hook_error" | "undefined" => Some(TestState::Failed),
        "skipped" | "untested" => Some(TestState::Skipped),
        _ => None,
    }
}

/// Output parser for behave.
#[derive(Debug, Clone, Default)]
pub struct BehaveParser;

impl BehaveParser {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TestOutputParser for BehaveParser {
    fn name(&self) -> &'static str {
        "behave"
    }

    async fn discover(&self, source: &ReportSource, cwd: &Path) -> Option<TestNode> {
        let features = read_features(source).await?;
        into_root(self.name(), self.name(), build_tree(&features, cwd))
    }

    async fn results(&self, source: &ReportSource, _cwd: &Path) -> Vec<ResultEvent> {
        match read_features(source).await {
            Some(features) => collect_results(&features),
            None => Vec::new(),
        }
    }
}

async fn read_features(source: &ReportSource) -> Option<Vec<Feature>> {
    let json = match source.read_text().await {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("behave report unavailable: {}", e);
            return None;
        }
    };
    match parse_report(&json) {
        Ok(features) => Some(features),
        Err(e) => {
            tracing::warn!("Failed to parse behave report {}: {}", source.origin(), e);
            None
        }
    }
}

fn parse_report(json: &str) -> FrameworkResult<Vec<Feature>> {
    let json = json.trim();
    if json.is_empty() {
        return Ok(Vec::new());
    }
    let features: Option<Vec<Feature>> = serde_json::from_str(json)?;
    Ok(features.unwrap_or_default())
}

/// Parses a behave JSON report into feature suites with scenario tests.
pub fn parse_discovery(json: &str, cwd: &Path) -> FrameworkResult<Vec<TestNode>> {
    Ok(build_tree(&parse_report(json)?, cwd))
}

/// Parses a behave JSON report into result events, one per scenario.
pub fn parse_results(json: &str) -> FrameworkResult<Vec<ResultEvent>> {
    Ok(collect_results(&parse_report(json)?))
}

fn build_tree(features: &[Feature], cwd: &Path) -> Vec<TestNode> {
    features
        .iter()
        .map(|feature| {
            let (feature_file, line) = split_location(&feature.location);
            let path = resolve_path(cwd, feature_file);
            let label = non_blank(feature.name.as_deref()).unwrap_or(file_name(feature_file));

            let mut suite = SuiteNode::new(feature_file, label).with_file(path.clone());
            if let Some(line) = line {
                suite = suite.with_line(line);
            }
            if let Some(name) = &feature.name {
                suite = suite.with_tooltip(name.as_str());
            }

            for element in scenarios(feature) {
                if suite.children.iter().any(|child| child.id() == element.location) {
                    continue;
                }
                let (_, line) = split_location(&element.location);
                let label = non_blank(element.name.as_deref()).unwrap_or(&element.location);
                let mut test = TestLeaf::new(element.location.as_str(), label)
                    .with_file(path.clone())
                    .with_tooltip(element.location.as_str());
                if let Some(line) = line {
                    test = test.with_line(line);
                }
                suite.children.push(test.into());
            }
            suite.into()
        })
        .collect()
}

fn collect_results(features: &[Feature]) -> Vec<ResultEvent> {
    let events = features
        .iter()
        .flat_map(scenarios)
        .filter_map(|element| {
            let status = element.status()?;
            let Some(state) = map_status(status) else {
                tracing::debug!("Dropping {} with status {:?}", element.location, status);
                return None;
            };

            let failing: Vec<&Step> = element
                .steps()
                .iter()
                .filter(|step| step_state(step) == Some(TestState::Failed))
                .collect();
            let message = concat_non_empty_opt("\n", failing.iter().map(|step| step_message(step)));
            let decorations = failing.iter().filter_map(|step| step_decoration(step)).collect();

            Some(
                ResultEvent::new(element.location.as_str(), state)
                    .with_message(message)
                    .with_decorations(decorations),
            )
        })
        .collect();
    distinct_by_last(events, |event: &ResultEvent| event.test.clone())
}

fn scenarios(feature: &Feature) -> impl Iterator<Item = &Element> {
    feature
        .elements
        .iter()
        .flatten()
        .filter(|element| !element.is_background())
}

fn step_state(step: &Step) -> Option<TestState> {
    map_status(step.result.as_ref()?.status.as_deref()?)
}

fn step_error(step: &Step) -> Option<String> {
    step.result.as_ref()?.error_message.as_ref().map(ErrorMessage::to_text)
}

fn step_message(step: &Step) -> String {
    let title = concat_non_empty(
        " ",
        [
            step.keyword.as_deref().unwrap_or_default().trim(),
            step.name.as_deref().unwrap_or_default().trim(),
        ],
    );
    concat_non_empty("\n", [title, step_error(step).unwrap_or_default()])
}

fn step_decoration(step: &Step) -> Option<Decoration> {
    let (_, line) = split_location(step.location.as_deref()?);
    let error = step_error(step);
    let message = error
        .as_deref()
        .and_then(first_line)
        .or(step.name.as_deref())?;
    Some(Decoration {
        line: line?.saturating_sub(1),
        message: message.to_string(),
    })
}

/// Splits `file:line`; a location without a numeric line is all file.
fn split_location(location: &str) -> (&str, Option<u32>) {
    match split_on_last(location, ":") {
        Some((file, line)) => match line.parse() {
            Ok(line) => (file, Some(line)),
            Err(_) => (location, None),
        },
        None => (location, None),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}
