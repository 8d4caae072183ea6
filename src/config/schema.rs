//! Configuration schema definitions for testlens.
//!
//! This module defines all configuration types that can be deserialized from
//! TOML configuration files. The framework is selected with a tagged enum.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── Settings               - Working directory used to resolve paths
//! └── FrameworkConfig        - Tagged enum selecting the output parser
//!     ├── Unittest           - dotted ids and TEST_EXECUTION_RESULT lines
//!     ├── Pytest             - JSON discovery block and JUnit XML results
//!     ├── Behave             - behave JSON report
//!     └── Testplan           - JSON report or pattern listing, XML results
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::framework::TestOutputParser;
use crate::framework::behave::BehaveParser;
use crate::framework::pytest::PytestParser;
use crate::framework::testplan::{Listing, TestplanParser};
use crate::framework::unittest::UnittestParser;
use crate::report::junit_adapter::JunitFormat;

/// Root configuration structure for testlens.
///
/// # TOML Structure
///
/// ```toml
/// [settings]
/// cwd = "/path/to/project"
///
/// [framework]
/// type = "pytest"
/// junit_id = "pytest"
/// ```
///
/// # Example
///
/// ```
/// use testlens::config::{Config, FrameworkConfig};
///
/// let config: Config = toml::from_str(r#"
///     [framework]
///     type = "unittest"
/// "#).unwrap();
/// assert!(matches!(config.framework, FrameworkConfig::Unittest));
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// General settings (optional, has defaults).
    #[serde(default)]
    pub settings: Settings,

    /// The framework whose output is parsed.
    pub framework: FrameworkConfig,
}

/// General settings shared by all frameworks.
///
/// | Field | Default |
/// |-------|---------|
/// | `cwd` | None (current directory) |
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    /// Working directory of the test run.
    ///
    /// Relative paths reported by a framework are resolved against it. A
    /// relative `cwd` is itself resolved against the current directory.
    pub cwd: Option<PathBuf>,
}

impl Settings {
    /// Returns the absolute working directory.
    pub fn resolve_cwd(&self) -> std::io::Result<PathBuf> {
        let current = std::env::current_dir()?;
        Ok(match &self.cwd {
            Some(cwd) => crate::util::resolve_path(&current, cwd),
            None => current,
        })
    }
}

/// Test framework selection.
///
/// The `type` field determines which parser reads the framework's output.
///
/// # Example
///
/// ```toml
/// [framework]
/// type = "testplan"
/// listing = "pattern"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FrameworkConfig {
    /// Python unittest with the result-line companion script.
    Unittest,

    /// pytest with the discovery plugin and `--junitxml`.
    Pytest(PytestConfig),

    /// behave with `--format json`.
    Behave,

    /// testplan multitests.
    Testplan(TestplanConfig),
}

impl FrameworkConfig {
    /// Builds the output parser for this framework.
    pub fn parser(&self) -> Box<dyn TestOutputParser> {
        match self {
            FrameworkConfig::Unittest => Box::new(UnittestParser::new()),
            FrameworkConfig::Pytest(config) => Box::new(PytestParser::new(config.clone())),
            FrameworkConfig::Behave => Box::new(BehaveParser::new()),
            FrameworkConfig::Testplan(config) => Box::new(TestplanParser::new(config.clone())),
        }
    }
}

/// Configuration for pytest output.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `junit_id` | `"pytest"` |
/// | `extension_segment` | `true` |
///
/// # Example
///
/// ```toml
/// [framework]
/// type = "pytest"
/// junit_id = "default"
/// extension_segment = false
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PytestConfig {
    /// How `<testcase>` attributes are turned back into test ids.
    ///
    /// Default: `"pytest"`
    #[serde(default, alias = "junit_format")]
    pub junit_id: JunitFormat,

    /// Whether a classname may carry the file extension as its own dot
    /// segment after the module name (`test_api.tavern.yaml`).
    ///
    /// Default: `true`
    #[serde(default = "default_true")]
    pub extension_segment: bool,
}

impl Default for PytestConfig {
    fn default() -> Self {
        Self {
            junit_id: JunitFormat::default(),
            extension_segment: true,
        }
    }
}

/// Configuration for testplan output.
///
/// | Field | Default |
/// |-------|---------|
/// | `listing` | `"json"` |
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TestplanConfig {
    /// Discovery input: the JSON report (`"json"`) or the `--list` pattern
    /// output (`"pattern"`).
    #[serde(default)]
    pub listing: Listing,
}

fn default_true() -> bool {
    true
}
