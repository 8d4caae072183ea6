//! Canonical test tree, result events, and the per-framework parser trait.
//!
//! Every supported framework reports tests in its own dialect: dotted ids on
//! stdout, JUnit XML, JSON side-channel reports, or `::`-joined listing lines.
//! This module defines the one shape they are all normalized into.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       TestOutputParser                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  discover(source, cwd) ──► Option<TestNode>  ──► disambiguate    │
//! │                                                                  │
//! │  results(source, cwd)  ──► Vec<ResultEvent>                      │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Built-in Frameworks
//!
//! | Implementation | Discovery input | Results input |
//! |----------------|-----------------|---------------|
//! | [`unittest::UnittestParser`] | dotted ids after a marker | `TEST_EXECUTION_RESULT` lines |
//! | [`pytest::PytestParser`] | JSON block between markers | JUnit XML file |
//! | [`behave::BehaveParser`] | JSON report file | JSON report file |
//! | [`testplan::TestplanParser`] | JSON report or `::` listing | directory of JUnit XML files |
//!
//! Parsers never fail past their boundary. Unreadable or malformed input is
//! logged and turned into an absent tree or an empty event list, so that one
//! broken framework cannot take the others down with it.

pub mod behave;
pub mod pytest;
pub mod testplan;
pub mod unittest;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result type for the strict, internal layer of the parsers.
pub type FrameworkResult<T> = Result<T, FrameworkError>;

/// Errors raised while reading or decoding a framework report.
///
/// These never escape the public [`TestOutputParser`] methods; they are
/// logged and the affected input is treated as empty.
#[derive(Debug, thiserror::Error)]
pub enum FrameworkError {
    /// The report did not have the expected structure.
    #[error("Failed to parse test output: {0}")]
    ParseError(String),

    /// The report was not well-formed XML.
    #[error("Invalid XML report: {0}")]
    Xml(#[from] quick_xml::Error),

    /// An XML attribute could not be read.
    #[error("Invalid XML attribute: {0}")]
    XmlAttribute(#[from] quick_xml::events::attributes::AttrError),

    /// The report was not valid JSON for the expected schema.
    #[error("Invalid JSON report: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error reading report files or directories.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A node of the discovered test tree.
///
/// Suites group other nodes; tests are always leaves. Ids are unique within
/// one tree and are the only handle used to run a node or to map a
/// [`ResultEvent`] back onto it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TestNode {
    Suite(SuiteNode),
    Test(TestLeaf),
}

/// A grouping node: module, class, feature, app, or suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteNode {
    pub id: String,
    pub label: String,

    /// Disambiguating prefix or framework-supplied short description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,

    /// Absolute source file, resolved against the run's working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,

    #[serde(default)]
    pub children: Vec<TestNode>,
}

/// A single runnable test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestLeaf {
    pub id: String,
    pub label: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,

    /// Set on pseudo-tests standing in for a collection error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SuiteNode {
    /// Creates a suite with no children.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: None,
            tooltip: None,
            file: None,
            line: None,
            children: Vec::new(),
        }
    }

    /// Sets the source file path.
    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Sets the source line number.
    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// Sets the tooltip text.
    pub fn with_tooltip(mut self, tooltip: impl Into<String>) -> Self {
        self.tooltip = Some(tooltip.into());
        self
    }

    /// Sets the short description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Appends a child node.
    pub fn with_child(mut self, child: impl Into<TestNode>) -> Self {
        self.children.push(child.into());
        self
    }

    /// Replaces the children.
    pub fn with_children(mut self, children: Vec<TestNode>) -> Self {
        self.children = children;
        self
    }
}

impl TestLeaf {
    /// Creates a test leaf.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: None,
            tooltip: None,
            file: None,
            line: None,
            error: None,
        }
    }

    /// Sets the source file path.
    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Sets the source line number.
    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// Sets the tooltip text.
    pub fn with_tooltip(mut self, tooltip: impl Into<String>) -> Self {
        self.tooltip = Some(tooltip.into());
        self
    }

    /// Sets the short description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Marks this leaf as a collection error carrying `message`.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }
}

impl From<SuiteNode> for TestNode {
    fn from(suite: SuiteNode) -> Self {
        TestNode::Suite(suite)
    }
}

impl From<TestLeaf> for TestNode {
    fn from(test: TestLeaf) -> Self {
        TestNode::Test(test)
    }
}

impl TestNode {
    pub fn id(&self) -> &str {
        match self {
            TestNode::Suite(s) => &s.id,
            TestNode::Test(t) => &t.id,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            TestNode::Suite(s) => &s.label,
            TestNode::Test(t) => &t.label,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            TestNode::Suite(s) => s.description.as_deref(),
            TestNode::Test(t) => t.description.as_deref(),
        }
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        let description = Some(description.into());
        match self {
            TestNode::Suite(s) => s.description = description,
            TestNode::Test(t) => t.description = description,
        }
    }

    pub fn file(&self) -> Option<&Path> {
        match self {
            TestNode::Suite(s) => s.file.as_deref(),
            TestNode::Test(t) => t.file.as_deref(),
        }
    }

    pub fn line(&self) -> Option<u32> {
        match self {
            TestNode::Suite(s) => s.line,
            TestNode::Test(t) => t.line,
        }
    }

    /// Children of a suite; tests have none.
    pub fn children(&self) -> &[TestNode] {
        match self {
            TestNode::Suite(s) => &s.children,
            TestNode::Test(_) => &[],
        }
    }

    pub fn is_suite(&self) -> bool {
        matches!(self, TestNode::Suite(_))
    }

    /// Visits this node and all of its descendants in pre-order.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a TestNode)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    /// Mutable pre-order traversal.
    pub fn walk_mut(&mut self, visit: &mut impl FnMut(&mut TestNode)) {
        visit(self);
        if let TestNode::Suite(suite) = self {
            for child in &mut suite.children {
                child.walk_mut(visit);
            }
        }
    }

    /// Number of test leaves under (and including) this node.
    pub fn test_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |node| {
            if !node.is_suite() {
                count += 1;
            }
        });
        count
    }

    /// Finds a node by id anywhere in this subtree.
    pub fn find(&self, id: &str) -> Option<&TestNode> {
        if self.id() == id {
            return Some(self);
        }
        self.children().iter().find_map(|child| child.find(id))
    }

    /// Recursively drops suites that contain no test.
    ///
    /// Returns `false` when this node itself should be dropped by its parent.
    pub fn prune_empty_suites(&mut self) -> bool {
        match self {
            TestNode::Test(_) => true,
            TestNode::Suite(suite) => {
                suite.children.retain_mut(TestNode::prune_empty_suites);
                !suite.children.is_empty()
            }
        }
    }
}

/// Wraps top-level suites in a root node.
///
/// Returns `None` when no suite survives pruning: "no tests found" is a
/// normal outcome, distinct from a parse failure.
pub fn into_root(
    id: impl Into<String>,
    label: impl Into<String>,
    children: Vec<TestNode>,
) -> Option<TestNode> {
    let mut root = TestNode::Suite(SuiteNode::new(id, label).with_children(children));
    if root.prune_empty_suites() {
        Some(root)
    } else {
        None
    }
}

/// Canonical test state, the only vocabulary parsers may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestState {
    Passed,
    Failed,
    Skipped,
}

impl TestState {
    /// Parses a canonical keyword (`passed`, `failed`, `skipped`).
    ///
    /// Anything else, including framework-specific extensions, is `None`.
    ///
    /// ```
    /// use testlens::framework::TestState;
    ///
    /// assert_eq!(TestState::from_keyword("failed"), Some(TestState::Failed));
    /// assert_eq!(TestState::from_keyword("errored"), None);
    /// ```
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "passed" => Some(TestState::Passed),
            "failed" => Some(TestState::Failed),
            "skipped" => Some(TestState::Skipped),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TestState::Passed => "passed",
            TestState::Failed => "failed",
            TestState::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for TestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source line highlighted alongside a failed result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decoration {
    /// Zero-based line number.
    pub line: u32,
    pub message: String,
}

/// The outcome of one test in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEvent {
    /// Id of the [`TestNode`] this result belongs to.
    pub test: String,

    pub state: TestState,

    /// Captured output followed by failure detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decorations: Vec<Decoration>,
}

impl ResultEvent {
    pub fn new(test: impl Into<String>, state: TestState) -> Self {
        Self {
            test: test.into(),
            state,
            message: None,
            decorations: Vec::new(),
        }
    }

    /// Sets the message; `None` leaves it absent.
    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }

    pub fn with_decorations(mut self, decorations: Vec<Decoration>) -> Self {
        self.decorations = decorations;
        self
    }
}

/// Where a parser reads its input from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportSource {
    /// Captured stdout/stderr, already decoded.
    Text(String),

    /// A single report file.
    File(PathBuf),

    /// A directory holding one report per partition.
    Directory(PathBuf),
}

impl ReportSource {
    /// Human readable origin used in log messages.
    pub fn origin(&self) -> String {
        match self {
            ReportSource::Text(_) => "<stdin>".to_string(),
            ReportSource::File(path) | ReportSource::Directory(path) => {
                path.display().to_string()
            }
        }
    }

    /// Reads the source as a single string.
    ///
    /// A directory is rejected: callers that accept several reports use
    /// [`read_all`](Self::read_all).
    pub async fn read_text(&self) -> FrameworkResult<String> {
        match self {
            ReportSource::Text(text) => Ok(text.clone()),
            ReportSource::File(path) => Ok(tokio::fs::read_to_string(path).await?),
            ReportSource::Directory(path) => Err(FrameworkError::ParseError(format!(
                "Expected a report file, got directory {}",
                path.display()
            ))),
        }
    }

    /// Reads every report this source refers to, paired with its path.
    ///
    /// Directory entries are read concurrently; only files with the given
    /// `extension` are considered and the result is sorted by path.
    pub async fn read_all(&self, extension: &str) -> FrameworkResult<Vec<(PathBuf, String)>> {
        match self {
            ReportSource::Text(text) => Ok(vec![(PathBuf::new(), text.clone())]),
            ReportSource::File(path) => {
                let content = tokio::fs::read_to_string(path).await?;
                Ok(vec![(path.clone(), content)])
            }
            ReportSource::Directory(dir) => {
                let mut paths = Vec::new();
                let mut entries = tokio::fs::read_dir(dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    if path.extension().is_some_and(|ext| ext == extension) {
                        paths.push(path);
                    }
                }
                paths.sort();

                let reads = paths.into_iter().map(|path| async move {
                    let content = tokio::fs::read_to_string(&path).await;
                    (path, content)
                });

                let mut reports = Vec::new();
                for (path, content) in futures::future::join_all(reads).await {
                    match content {
                        Ok(content) => reports.push((path, content)),
                        Err(e) => {
                            tracing::warn!("Skipping unreadable report {}: {}", path.display(), e)
                        }
                    }
                }
                Ok(reports)
            }
        }
    }
}

/// One framework's discovery and result parsing.
///
/// Implementations are selected by configuration (see
/// [`FrameworkConfig::parser`](crate::config::FrameworkConfig::parser)).
/// Both methods are infallible by contract: failures are logged and mapped to
/// "nothing found".
#[async_trait]
pub trait TestOutputParser: Send + Sync {
    /// Short framework name, also used as the root node label.
    fn name(&self) -> &'static str;

    /// Builds the disambiguated test tree, or `None` when no tests were found.
    async fn discover(&self, source: &ReportSource, cwd: &Path) -> Option<TestNode>;

    /// Parses the results of one run.
    async fn results(&self, source: &ReportSource, cwd: &Path) -> Vec<ResultEvent>;
}
