//! pytest output parsing.
//!
//! Discovery reads a JSON block printed by the pytest collection plugin
//! between two marker lines. Results come from pytest's JUnit XML report
//! (`--junitxml`).
//!
//! # Discovery Output
//!
//! ```text
//! ============================= test session starts ==============================
//! ==DISCOVERED TESTS BEGIN==
//! {"tests": [{"id": "tests/test_math.py::TestOps::test_add", "line": 12}],
//!  "errors": [{"file": "tests/test_broken.py", "message": "ImportError: ..."}]}
//! ==DISCOVERED TESTS END==
//! ```
//!
//! # Test ID Format
//!
//! Node ids in the tree use the resolved file in place of pytest's relative
//! path, so that they match the ids recovered from the JUnit report:
//!
//! ```text
//! /proj/tests/test_math.py                      module suite
//! /proj/tests/test_math.py::TestOps             class suite
//! /proj/tests/test_math.py::TestOps::test_add   test
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use super::{
    Decoration, FrameworkResult, ReportSource, ResultEvent, SuiteNode, TestLeaf, TestNode,
    TestOutputParser, into_root,
};
use crate::config::PytestConfig;
use crate::disambiguate::disambiguate_nodes;
use crate::report::junit::{JunitCase, JunitReport};
use crate::report::junit_adapter::{DottedModuleMatcher, IdContext};
use crate::util::{
    distinct_by_last, file_name, resolve_path, resolve_path_string, split_on_first,
    split_on_last, text_between,
};

pub const DISCOVERY_BEGIN_MARKER: &str = "==DISCOVERED TESTS BEGIN==";
pub const DISCOVERY_END_MARKER: &str = "==DISCOVERED TESTS END==";

/// Separator of pytest node id parts.
const NODE_SEPARATOR: &str = "::";

/// Separator used to disambiguate module suites by their directories.
pub const PATH_SEPARATOR: &str = "/";

/// `path:line: message` lines of a short traceback. A match never spans
/// lines.
static TRACEBACK_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?P<path>[^\s:][^:\n]*):(?P<line>\d+): (?P<message>[^\n]+?)[ \t]*$")
        .expect("traceback pattern is valid")
});

/// The JSON block printed by the collection plugin.
#[derive(Debug, Default, Deserialize)]
struct DiscoveryBlock {
    #[serde(default)]
    tests: Option<Vec<DiscoveredTest>>,
    #[serde(default)]
    errors: Option<Vec<CollectionError>>,
}

#[derive(Debug, Deserialize)]
struct DiscoveredTest {
    id: String,
    #[serde(default)]
    line: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CollectionError {
    file: String,
    #[serde(default)]
    message: Option<String>,
}

/// Output parser for pytest.
///
/// # Configuration
///
/// See [`PytestConfig`] for the options:
/// - `junit_id`: how test ids are rebuilt from `<testcase>` attributes
/// - `extension_segment`: whether a classname may spell out the file
///   extension as its own segment
pub struct PytestParser {
    config: PytestConfig,
}

impl PytestParser {
    pub fn new(config: PytestConfig) -> Self {
        Self { config }
    }

    /// Parses JUnit XML into result events.
    ///
    /// Test cases whose id cannot be rebuilt are dropped.
    pub fn parse_junit(&self, xml: &str, origin: &str, cwd: &Path) -> Vec<ResultEvent> {
        let Some(report) = JunitReport::parse_lenient(xml, origin) else {
            return Vec::new();
        };

        let matcher = DottedModuleMatcher {
            extension_segment: self.config.extension_segment,
        };
        let ctx = IdContext {
            cwd,
            app: report.name.as_deref(),
            matcher: &matcher,
        };

        let events = report
            .cases()
            .filter_map(|(suite, case)| {
                let Some(id) = self.config.junit_id.to_test_id(&ctx, suite, case) else {
                    tracing::debug!(
                        "Dropping unmappable testcase {:?} (classname {:?}, file {:?})",
                        case.name,
                        case.classname,
                        case.file
                    );
                    return None;
                };
                Some(case.to_event(id).with_decorations(failure_decorations(case, cwd)))
            })
            .collect();

        distinct_by_last(events, |event: &ResultEvent| event.test.clone())
    }
}

#[async_trait]
impl TestOutputParser for PytestParser {
    fn name(&self) -> &'static str {
        "pytest"
    }

    async fn discover(&self, source: &ReportSource, cwd: &Path) -> Option<TestNode> {
        let output = match source.read_text().await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!("pytest discovery output unavailable: {}", e);
                return None;
            }
        };

        match parse_discovery_output(&output, cwd) {
            Ok(nodes) => into_root(self.name(), self.name(), nodes),
            Err(e) => {
                tracing::warn!("Failed to parse pytest discovery output: {}", e);
                None
            }
        }
    }

    async fn results(&self, source: &ReportSource, cwd: &Path) -> Vec<ResultEvent> {
        match source.read_text().await {
            Ok(xml) => self.parse_junit(&xml, &source.origin(), cwd),
            Err(e) => {
                tracing::warn!("pytest JUnit report unavailable: {}", e);
                Vec::new()
            }
        }
    }
}

/// Builds module suites, nested class suites and tests from the discovery
/// block, followed by one pseudo-test per collection error.
///
/// Output without the marker pair holds no tests.
pub fn parse_discovery_output(output: &str, cwd: &Path) -> FrameworkResult<Vec<TestNode>> {
    let Some(block) = text_between(output, DISCOVERY_BEGIN_MARKER, DISCOVERY_END_MARKER) else {
        tracing::debug!("No pytest discovery block found");
        return Ok(Vec::new());
    };
    let block = block.trim();
    if block.is_empty() {
        return Ok(Vec::new());
    }

    let discovered: DiscoveryBlock = serde_json::from_str(block)?;

    let mut modules: Vec<SuiteNode> = Vec::new();
    let mut module_index: HashMap<String, usize> = HashMap::new();

    for test in discovered.tests.unwrap_or_default() {
        let Some((file, path)) = split_on_first(&test.id, NODE_SEPARATOR) else {
            tracing::debug!("Skipping pytest id without a test part: {}", test.id);
            continue;
        };
        if file.is_empty() || path.is_empty() {
            continue;
        }

        let file_path = resolve_path(cwd, file);
        let module_id = file_path.to_string_lossy().into_owned();
        let index = *module_index.entry(module_id.clone()).or_insert_with(|| {
            modules.push(
                SuiteNode::new(module_id.as_str(), file_name(file)).with_file(file_path.clone()),
            );
            modules.len() - 1
        });

        let (classes, label) = split_node_path(path);
        let mut parent = &mut modules[index];
        let mut class_id = module_id.clone();
        for class in classes {
            class_id = format!("{}{}{}", class_id, NODE_SEPARATOR, class);
            parent = child_suite(parent, &class_id, class, &file_path);
        }

        let mut leaf = TestLeaf::new(format!("{}{}{}", module_id, NODE_SEPARATOR, path), label)
            .with_file(file_path.clone());
        if let Some(line) = test.line {
            leaf = leaf.with_line(line);
        }
        parent.children.push(leaf.into());
    }

    let mut errors = Vec::new();
    for error in discovered.errors.unwrap_or_default() {
        let file_path = resolve_path(cwd, &error.file);
        let module_id = resolve_path_string(cwd, &error.file);
        let label = format!("Error in {}", file_name(&error.file));
        let message = error.message.unwrap_or_default();

        match module_index.get(&module_id) {
            Some(&index) => {
                let id = format!("{}{}Error", module_id, NODE_SEPARATOR);
                modules[index].children.push(
                    TestLeaf::new(id, label)
                        .with_file(file_path)
                        .with_error(message)
                        .into(),
                );
            }
            None => errors.push(
                TestLeaf::new(module_id, label)
                    .with_file(file_path)
                    .with_error(message)
                    .into(),
            ),
        }
    }

    let mut nodes: Vec<TestNode> = modules.into_iter().map(TestNode::from).collect();
    nodes.extend(errors);
    disambiguate_nodes(&mut nodes, PATH_SEPARATOR);
    Ok(nodes)
}

/// Splits the part of a node id after the file into class names and the
/// test label. Parameter brackets may contain `::` and are kept whole.
fn split_node_path(path: &str) -> (Vec<&str>, &str) {
    let cut = path.find('[').unwrap_or(path.len());
    match split_on_last(&path[..cut], NODE_SEPARATOR) {
        Some((classes, _)) => {
            let label = &path[classes.len() + NODE_SEPARATOR.len()..];
            (classes.split(NODE_SEPARATOR).collect(), label)
        }
        None => (Vec::new(), path),
    }
}

/// Returns the child suite with `id`, creating it if needed.
fn child_suite<'a>(
    parent: &'a mut SuiteNode,
    id: &str,
    label: &str,
    file: &Path,
) -> &'a mut SuiteNode {
    let index = match parent
        .children
        .iter()
        .position(|child| child.is_suite() && child.id() == id)
    {
        Some(index) => index,
        None => {
            parent
                .children
                .push(SuiteNode::new(id, label).with_file(file.to_path_buf()).into());
            parent.children.len() - 1
        }
    };
    match &mut parent.children[index] {
        TestNode::Suite(suite) => suite,
        TestNode::Test(_) => unreachable!("position only matches suites"),
    }
}

/// Extracts `path:line: message` traceback entries pointing into the test's
/// own file. Lines are converted to zero-based.
fn failure_decorations(case: &JunitCase, cwd: &Path) -> Vec<Decoration> {
    let detail = case.error.as_ref().or(case.failure.as_ref());
    let (Some(file), Some(detail)) = (case.file.as_deref(), detail) else {
        return Vec::new();
    };
    let test_file: PathBuf = resolve_path(cwd, file);

    TRACEBACK_LINE
        .captures_iter(&detail.text)
        .filter(|caps| resolve_path(cwd, &caps["path"]) == test_file)
        .filter_map(|caps| {
            let line: u32 = caps["line"].parse().ok()?;
            Some(Decoration {
                line: line.saturating_sub(1),
                message: caps["message"].to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::junit_adapter::JunitFormat;

    fn cwd() -> &'static Path {
        Path::new("/proj")
    }

    fn discovery(json: &str) -> String {
        format!(
            "collecting ...\n{}\n{}\n{}\n1 test collected",
            DISCOVERY_BEGIN_MARKER, json, DISCOVERY_END_MARKER
        )
    }

    #[test]
    fn test_discovery_builds_modules_classes_and_tests() {
        let output = discovery(
            r#"{"tests": [
                {"id": "tests/test_math.py::test_add", "line": 3},
                {"id": "tests/test_math.py::TestOps::test_sub", "line": 10},
                {"id": "tests/test_math.py::TestOps::TestNested::test_mul", "line": null}
            ], "errors": null}"#,
        );
        let nodes = parse_discovery_output(&output, cwd()).unwrap();
        assert_eq!(nodes.len(), 1);

        let module = &nodes[0];
        assert_eq!(module.id(), "/proj/tests/test_math.py");
        assert_eq!(module.label(), "test_math.py");
        assert_eq!(module.file(), Some(Path::new("/proj/tests/test_math.py")));

        let add = module.find("/proj/tests/test_math.py::test_add").unwrap();
        assert_eq!(add.label(), "test_add");
        assert_eq!(add.line(), Some(3));

        let ops = module.find("/proj/tests/test_math.py::TestOps").unwrap();
        assert!(ops.is_suite());
        assert_eq!(ops.label(), "TestOps");

        let mul = module
            .find("/proj/tests/test_math.py::TestOps::TestNested::test_mul")
            .unwrap();
        assert_eq!(mul.label(), "test_mul");
        assert_eq!(mul.line(), None);
        assert_eq!(module.test_count(), 3);
    }

    #[test]
    fn test_discovery_parametrized_label_keeps_brackets() {
        let output = discovery(r#"{"tests": [{"id": "t.py::test_p[a::b-1]"}]}"#);
        let nodes = parse_discovery_output(&output, cwd()).unwrap();
        let leaf = &nodes[0].children()[0];
        assert_eq!(leaf.label(), "test_p[a::b-1]");
        assert_eq!(leaf.id(), "/proj/t.py::test_p[a::b-1]");
    }

    #[test]
    fn test_discovery_errors_become_pseudo_tests() {
        let output = discovery(
            r#"{"tests": [{"id": "a/test_ok.py::test_x"}],
                "errors": [
                    {"file": "a/test_broken.py", "message": "ImportError: nope"},
                    {"file": "a/test_ok.py", "message": "warning turned error"}
                ]}"#,
        );
        let nodes = parse_discovery_output(&output, cwd()).unwrap();
        assert_eq!(nodes.len(), 2);

        let TestNode::Test(broken) = &nodes[1] else {
            panic!("expected a pseudo-test");
        };
        assert_eq!(broken.id, "/proj/a/test_broken.py");
        assert_eq!(broken.label, "Error in test_broken.py");
        assert_eq!(broken.error.as_deref(), Some("ImportError: nope"));
        assert_eq!(broken.description, None);

        let inner = nodes[0].find("/proj/a/test_ok.py::Error").unwrap();
        assert_eq!(inner.label(), "Error in test_ok.py");
    }

    #[test]
    fn test_discovery_disambiguates_modules_by_directory() {
        let output = discovery(
            r#"{"tests": [
                {"id": "web/test_api.py::test_a"},
                {"id": "cli/test_api.py::test_a"},
                {"id": "test_other.py::test_b"}
            ]}"#,
        );
        let nodes = parse_discovery_output(&output, cwd()).unwrap();
        let descriptions: Vec<_> = nodes.iter().map(|n| n.description()).collect();
        assert_eq!(descriptions, vec![Some("web"), Some("cli"), None]);
    }

    #[test]
    fn test_discovery_without_markers_is_empty() {
        let nodes = parse_discovery_output("no tests ran in 0.01s", cwd()).unwrap();
        assert!(nodes.is_empty());
    }

    #[test]
    fn test_discovery_invalid_json_is_error() {
        assert!(parse_discovery_output(&discovery("{not json"), cwd()).is_err());
    }

    const REPORT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<testsuites>
  <testsuite name="pytest" tests="3">
    <testcase classname="tests.test_math" file="tests/test_math.py" line="2" name="test_add"/>
    <testcase classname="tests.test_math.TestOps" file="tests/test_math.py" line="9" name="test_sub">
      <failure message="assert 1 == 0">def test_sub():
&gt;       assert 1 == 0
E       assert 1 == 0

tests/test_math.py:11: AssertionError</failure>
    </testcase>
    <testcase classname="elsewhere.test_math" file="tests/test_math.py" name="test_lost"/>
  </testsuite>
</testsuites>"#;

    #[test]
    fn test_results_from_junit() {
        let parser = PytestParser::new(PytestConfig::default());
        let events = parser.parse_junit(REPORT, "junit.xml", cwd());

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].test, "/proj/tests/test_math.py::test_add");
        assert_eq!(events[0].state, crate::framework::TestState::Passed);

        let sub = &events[1];
        assert_eq!(sub.test, "/proj/tests/test_math.py::TestOps::test_sub");
        assert_eq!(sub.state, crate::framework::TestState::Failed);
        assert!(sub.message.as_deref().unwrap().starts_with("assert 1 == 0\ndef test_sub():"));
        assert_eq!(
            sub.decorations,
            vec![Decoration {
                line: 10,
                message: "AssertionError".to_string(),
            }]
        );
    }

    #[test]
    fn test_results_default_id_format() {
        let parser = PytestParser::new(PytestConfig {
            junit_id: JunitFormat::Default,
            ..Default::default()
        });
        let events = parser.parse_junit(REPORT, "junit.xml", cwd());
        let ids: Vec<_> = events.iter().map(|e| e.test.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "tests.test_math::test_add",
                "tests.test_math.TestOps::test_sub",
                "elsewhere.test_math::test_lost",
            ]
        );
    }

    #[test]
    fn test_results_malformed_report_is_empty() {
        let parser = PytestParser::new(PytestConfig::default());
        assert!(parser.parse_junit("<testsuite><oops", "junit.xml", cwd()).is_empty());
    }

    #[test]
    fn test_decorations_ignore_other_files() {
        let case = JunitCase {
            name: "t".to_string(),
            file: Some("tests/test_a.py".to_string()),
            failure: Some(crate::report::junit::CaseDetail {
                message: None,
                text: "lib/helper.py:4: in helper\ntests/test_a.py:20: ValueError".to_string(),
            }),
            ..Default::default()
        };
        let decorations = failure_decorations(&case, cwd());
        assert_eq!(
            decorations,
            vec![Decoration {
                line: 19,
                message: "ValueError".to_string(),
            }]
        );
    }

    #[test]
    fn test_decorations_after_assertion_lines() {
        let case = JunitCase {
            name: "test_a".to_string(),
            file: Some("tests/test_a.py".to_string()),
            failure: Some(crate::report::junit::CaseDetail {
                message: Some("assert 1 == 0".to_string()),
                text: "E       assert 1 == 0\n\ntests/test_a.py:11: AssertionError".to_string(),
            }),
            ..Default::default()
        };
        assert_eq!(
            failure_decorations(&case, cwd()),
            vec![Decoration {
                line: 10,
                message: "AssertionError".to_string(),
            }]
        );

        // the entry directly follows a line without a colon
        let case = JunitCase {
            failure: Some(crate::report::junit::CaseDetail {
                message: None,
                text: "    raise ValueError\ntests/test_a.py:4: ValueError".to_string(),
            }),
            ..case
        };
        assert_eq!(
            failure_decorations(&case, cwd()),
            vec![Decoration {
                line: 3,
                message: "ValueError".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_results_from_report_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("junit.xml");
        std::fs::write(&path, REPORT).unwrap();

        let parser = PytestParser::new(PytestConfig::default());
        let events = parser.results(&ReportSource::File(path), cwd()).await;
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_discover_wraps_in_root() {
        let output = discovery(r#"{"tests": [{"id": "test_x.py::test_a"}]}"#);
        let parser = PytestParser::new(PytestConfig::default());
        let root = parser
            .discover(&ReportSource::Text(output), cwd())
            .await
            .unwrap();
        assert_eq!(root.id(), "pytest");
        assert_eq!(root.test_count(), 1);
    }
}
