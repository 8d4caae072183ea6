//! unittest output parsing.
//!
//! The unittest companion script prints discovered test ids after a marker
//! line, and reports each executed test on a control line mixed into the
//! regular test output.
//!
//! # Discovery Output
//!
//! ```text
//! ... import warnings, banner noise ...
//! ==DISCOVERED TESTS==
//! pkg.mod.TestCase1.test_a
//! pkg.mod.TestCase1.test_b
//! ```
//!
//! Each id is split at its last dot into a suite id and a test label; tests
//! sharing a suite id become siblings of one suite.
//!
//! # Result Lines
//!
//! ```text
//! TEST_EXECUTION_RESULT:<passed|failed|skipped>:<test id>[:<base64 message>]
//! ```
//!
//! The message is base64 encoded by the producer because tracebacks contain
//! both colons and newlines.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;

use super::{
    ReportSource, ResultEvent, SuiteNode, TestLeaf, TestNode, TestOutputParser, TestState,
    into_root,
};
use crate::disambiguate::disambiguate_nodes;
use crate::util::{
    decode_base64_message, distinct_by_last, group_by, resolve_path, split_on_last,
    text_after_last,
};

/// Marker printed right before the list of discovered test ids.
pub const DISCOVERY_MARKER: &str = "==DISCOVERED TESTS==";

/// Prefix of every result control line.
pub const RESULT_PREFIX: &str = "TEST_EXECUTION_RESULT";

/// Separator of unittest's dotted ids.
pub const ID_SEPARATOR: &str = ".";

/// Output parser for Python's unittest.
#[derive(Debug, Clone, Default)]
pub struct UnittestParser;

impl UnittestParser {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TestOutputParser for UnittestParser {
    fn name(&self) -> &'static str {
        "unittest"
    }

    async fn discover(&self, source: &ReportSource, cwd: &Path) -> Option<TestNode> {
        let output = match source.read_text().await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!("unittest discovery output unavailable: {}", e);
                return None;
            }
        };

        let mut suites = parse_test_suites(&output, cwd);
        disambiguate_nodes(&mut suites, ID_SEPARATOR);
        into_root(self.name(), self.name(), suites)
    }

    async fn results(&self, source: &ReportSource, _cwd: &Path) -> Vec<ResultEvent> {
        match source.read_text().await {
            Ok(output) => parse_test_states(&output),
            Err(e) => {
                tracing::warn!("unittest run output unavailable: {}", e);
                Vec::new()
            }
        }
    }
}

/// Builds one suite per distinct suite id found after the discovery marker.
///
/// Lines without a dot cannot be split into suite and test and are skipped.
pub fn parse_test_suites(output: &str, cwd: &Path) -> Vec<TestNode> {
    let mut seen = HashSet::new();
    let tests = text_after_last(output, DISCOVERY_MARKER)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(*line))
        .filter_map(|line| match split_on_last(line, ID_SEPARATOR) {
            Some((suite_id, label)) if !suite_id.is_empty() && !label.is_empty() => {
                Some((suite_id, label, line))
            }
            _ => {
                tracing::debug!("Skipping unsplittable unittest id: {}", line);
                None
            }
        });

    group_by(tests, |(suite_id, _, _)| *suite_id)
        .into_iter()
        .map(|(suite_id, tests)| {
            let file = suite_file(suite_id, cwd);
            let label = split_on_last(suite_id, ID_SEPARATOR).map_or(suite_id, |(_, last)| last);

            let mut suite = SuiteNode::new(suite_id, label).with_tooltip(suite_id);
            if let Some(file) = &file {
                suite = suite.with_file(file.clone());
            }
            for (_, test_label, test_id) in tests {
                let mut test = TestLeaf::new(test_id, test_label).with_tooltip(test_id);
                if let Some(file) = &file {
                    test = test.with_file(file.clone());
                }
                suite = suite.with_child(test);
            }
            suite.into()
        })
        .collect()
}

/// Module file of a suite id: every segment but the last, as a `.py` path.
///
/// A bare class name has no module and therefore no file.
fn suite_file(suite_id: &str, cwd: &Path) -> Option<std::path::PathBuf> {
    let (module, _) = split_on_last(suite_id, ID_SEPARATOR)?;
    let relative = format!("{}.py", module.replace(ID_SEPARATOR, "/"));
    Some(resolve_path(cwd, relative))
}

/// Extracts result events from run output.
///
/// Lines without the result prefix are noise. When a test is reported more
/// than once, the last report wins.
pub fn parse_test_states(output: &str) -> Vec<ResultEvent> {
    let events = output.lines().filter_map(parse_state_line).collect();
    distinct_by_last(events, |event: &ResultEvent| event.test.clone())
}

fn parse_state_line(line: &str) -> Option<ResultEvent> {
    let start = line.find(RESULT_PREFIX)?;
    let mut fields = line[start..].trim().split(':').skip(1);

    let state = TestState::from_keyword(fields.next()?.trim())?;
    let test_id = fields.next()?.trim();
    if test_id.is_empty() {
        return None;
    }
    let message = fields
        .next()
        .map(str::trim)
        .filter(|payload| !payload.is_empty())
        .and_then(decode_base64_message);

    Some(ResultEvent::new(test_id, state).with_message(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;

    fn cwd() -> &'static Path {
        Path::new("/proj")
    }

    #[test]
    fn test_discovery_end_to_end() {
        let output = "pkg.mod.TestCase1.test_a\npkg.mod.TestCase1.test_b";
        let suites = parse_test_suites(output, cwd());

        assert_eq!(suites.len(), 1);
        let TestNode::Suite(suite) = &suites[0] else {
            panic!("expected a suite");
        };
        assert_eq!(suite.id, "pkg.mod.TestCase1");
        assert_eq!(suite.label, "TestCase1");
        assert_eq!(suite.file.as_deref(), Some(Path::new("/proj/pkg/mod.py")));

        let labels: Vec<_> = suite.children.iter().map(|c| c.label()).collect();
        assert_eq!(labels, vec!["test_a", "test_b"]);
        let ids: Vec<_> = suite.children.iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec!["pkg.mod.TestCase1.test_a", "pkg.mod.TestCase1.test_b"]);
    }

    #[test]
    fn test_discovery_uses_text_after_last_marker() {
        let output = format!(
            "ImportWarning: noisy\n{m}\nold.Case.test_x\n{m}\n\n  app.Case.test_y  \n\n",
            m = DISCOVERY_MARKER
        );
        let suites = parse_test_suites(&output, cwd());
        assert_eq!(suites.len(), 1);
        assert_eq!(suites[0].id(), "app.Case");
        assert_eq!(suites[0].children()[0].id(), "app.Case.test_y");
    }

    #[test]
    fn test_discovery_groups_siblings_and_drops_bare_ids() {
        let output = "a.B.t1\nnodot\nc.D.t1\na.B.t2\nc.D.t2\na.B.t1";
        let suites = parse_test_suites(output, cwd());

        let shape: Vec<_> = suites
            .iter()
            .map(|s| (s.id(), s.children().iter().map(|c| c.id()).collect::<Vec<_>>()))
            .collect();
        assert_eq!(
            shape,
            vec![
                ("a.B", vec!["a.B.t1", "a.B.t2"]),
                ("c.D", vec!["c.D.t1", "c.D.t2"]),
            ]
        );
    }

    #[test]
    fn test_discovery_bare_class_has_no_file() {
        let suites = parse_test_suites("TestCase.test_a", cwd());
        assert_eq!(suites[0].label(), "TestCase");
        assert_eq!(suites[0].file(), None);
    }

    #[test]
    fn test_discovery_every_test_parent_is_prefix() {
        let output = "x.y.Z.t\nx.y.t2\nq.W.e.r";
        for suite in parse_test_suites(output, cwd()) {
            for test in suite.children() {
                let (parent, _) = split_on_last(test.id(), ".").unwrap();
                assert_eq!(parent, suite.id());
            }
        }
    }

    #[test]
    fn test_states_end_to_end() {
        let output = format!(
            "{p}:passed:pkg.mod.TestCase1.test_a\n{p}:failed:pkg.mod.TestCase1.test_b:{msg}",
            p = RESULT_PREFIX,
            msg = BASE64.encode("boom")
        );
        let events = parse_test_states(&output);

        assert_eq!(
            events,
            vec![
                ResultEvent::new("pkg.mod.TestCase1.test_a", TestState::Passed),
                ResultEvent::new("pkg.mod.TestCase1.test_b", TestState::Failed)
                    .with_message(Some("boom".to_string())),
            ]
        );
    }

    #[test]
    fn test_states_message_fidelity() {
        let original = "Traceback (most recent call last):\n  a:b:c\nAssertionError: ü != u";
        let output = format!("{}:failed:a.B.t:{}", RESULT_PREFIX, BASE64.encode(original));
        let events = parse_test_states(&output);
        assert_eq!(events[0].message.as_deref(), Some(original));
    }

    #[test]
    fn test_states_ignore_noise_and_unknown_states() {
        let output = format!(
            "Ran 3 tests in 0.001s\ngarbage line without colons\n\
             {p}:errored:a.B.t1\n{p}:passed\n{p}:skipped:a.B.t2\n.F.",
            p = RESULT_PREFIX
        );
        let events = parse_test_states(&output);
        assert_eq!(events, vec![ResultEvent::new("a.B.t2", TestState::Skipped)]);
    }

    #[test]
    fn test_states_prefix_after_noise_on_same_line() {
        let output = format!("..{}:passed:a.B.t1", RESULT_PREFIX);
        let events = parse_test_states(&output);
        assert_eq!(events, vec![ResultEvent::new("a.B.t1", TestState::Passed)]);
    }

    #[test]
    fn test_states_last_write_wins() {
        let output = format!(
            "{p}:failed:a.B.t1\n{p}:passed:a.B.t2\n{p}:passed:a.B.t1",
            p = RESULT_PREFIX
        );
        let events = parse_test_states(&output);
        assert_eq!(
            events,
            vec![
                ResultEvent::new("a.B.t2", TestState::Passed),
                ResultEvent::new("a.B.t1", TestState::Passed),
            ]
        );
    }

    #[test]
    fn test_states_duplicate_lines_collapse() {
        let line = format!("{}:passed:a.B.t1\n", RESULT_PREFIX);
        let events = parse_test_states(&line.repeat(5));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_states_bad_payload_keeps_event() {
        let output = format!("{}:failed:a.B.t1:%%%", RESULT_PREFIX);
        let events = parse_test_states(&output);
        assert_eq!(events, vec![ResultEvent::new("a.B.t1", TestState::Failed)]);
    }

    #[tokio::test]
    async fn test_discover_disambiguates_suites() {
        let output = format!("{}\napp.web.Login.test_a\napp.api.Login.test_a", DISCOVERY_MARKER);
        let root = UnittestParser::new()
            .discover(&ReportSource::Text(output), cwd())
            .await
            .unwrap();

        assert_eq!(root.label(), "unittest");
        assert_eq!(root.find("app.web.Login").and_then(|n| n.description()), Some("web"));
        assert_eq!(root.find("app.api.Login").and_then(|n| n.description()), Some("api"));
    }

    #[tokio::test]
    async fn test_discover_nothing_is_none() {
        let source = ReportSource::Text(format!("{}\n\n", DISCOVERY_MARKER));
        assert!(UnittestParser::new().discover(&source, cwd()).await.is_none());
    }

    #[tokio::test]
    async fn test_missing_file_yields_nothing() {
        let source = ReportSource::File("/nonexistent/unittest.out".into());
        let parser = UnittestParser::new();
        assert!(parser.discover(&source, cwd()).await.is_none());
        assert!(parser.results(&source, cwd()).await.is_empty());
    }
}
