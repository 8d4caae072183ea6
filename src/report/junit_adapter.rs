//! JUnit XML test ID adapters.
//!
//! Different test frameworks store test identity differently in JUnit XML.
//! This module converts the `<testcase>` attributes back into the id the
//! framework's discovery phase produced, so results land on the right node.
//!
//! # The Problem
//!
//! pytest discovery ids look like:
//! ```text
//! /proj/libs/api/test_list.py::TestList::test_foo
//! ```
//!
//! But pytest's JUnit XML only gives a dotted classname plus the file:
//! ```xml
//! <testcase classname="libs.api.test_list.TestList" file="libs/api/test_list.py" name="test_foo" />
//! ```
//!
//! The classname has to be walked against the file path to find where the
//! module ends and the class qualifiers begin.
//!
//! # Supported Formats
//!
//! | Format | JUnit input | Test id |
//! |--------|-------------|---------|
//! | pytest | `classname="a.test_b.Case"`, `file="a/test_b.py"`, `name="t"` | `<cwd>/a/test_b.py::Case::t` |
//! | testplan | `<testsuites name="App">`, `<testsuite name="Suite">`, `name="t"` | `App::Suite::t` |
//! | default | `classname="a.B"`, `name="t"` | `a.B::t` |

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::junit::{JunitCase, JunitSuite};
use crate::util::{concat_non_empty, file_name, resolve_path_string, split_on_last};

/// Specifies how to convert JUnit XML attributes to test IDs.
///
/// # Example
///
/// ```toml
/// [framework]
/// type = "pytest"
/// junit_format = "pytest"
/// ```
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JunitFormat {
    /// pytest format: resolved `file`, then classname qualifiers past the
    /// module, then `name`, joined with `::`.
    #[default]
    Pytest,

    /// testplan format: `app::suite::name`.
    Testplan,

    /// Default format: `classname::name`, or just `name` without classname.
    Default,
}

/// Everything an id conversion may need besides the test case itself.
pub struct IdContext<'a> {
    /// Working directory the report's relative paths are resolved against.
    pub cwd: &'a Path,

    /// Application name: `<testsuites name>` or the report file's stem.
    pub app: Option<&'a str>,

    /// Matcher used to split pytest classnames.
    pub matcher: &'a dyn ModuleMatcher,
}

impl JunitFormat {
    /// Converts a test case to a test id.
    ///
    /// Returns `None` when the case cannot be mapped; such results are
    /// dropped by the caller rather than guessed at.
    pub fn to_test_id(
        &self,
        ctx: &IdContext<'_>,
        suite: &JunitSuite,
        case: &JunitCase,
    ) -> Option<String> {
        if case.name.is_empty() {
            return None;
        }
        match self {
            JunitFormat::Pytest => {
                let file = case.file.as_deref()?;
                let classname = case.classname.as_deref().unwrap_or_default();
                let position = ctx.matcher.match_module(classname, file)?;
                let qualifiers = classname[position..]
                    .split('.')
                    .filter(|segment| !segment.is_empty())
                    .collect::<Vec<_>>()
                    .join("::");
                Some(concat_non_empty(
                    "::",
                    [
                        resolve_path_string(ctx.cwd, file).as_str(),
                        qualifiers.as_str(),
                        case.name.as_str(),
                    ],
                ))
            }
            JunitFormat::Testplan => {
                let app = ctx.app?;
                let suite = suite.name.as_deref()?;
                Some(format!("{}::{}::{}", app, suite, case.name))
            }
            JunitFormat::Default => Some(concat_non_empty(
                "::",
                [
                    case.classname.as_deref().unwrap_or_default(),
                    case.name.as_str(),
                ],
            )),
        }
    }
}

/// Locates the end of the module part of a dotted JUnit classname.
///
/// Returns the byte offset at which class qualifiers start (the length of
/// `classname` when there are none), or `None` if the classname does not
/// follow the file's path.
pub trait ModuleMatcher: Send + Sync {
    fn match_module(&self, classname: &str, file: &str) -> Option<usize>;
}

/// The matcher for pytest's dotted classnames.
///
/// Every directory of `file` must appear as one dot segment, in order,
/// followed by the file stem. With `extension_segment`, the stem may also be
/// followed by the file extension as its own segment, which is how plugins
/// such as tavern name their items (`test_api.tavern.yaml`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DottedModuleMatcher {
    pub extension_segment: bool,
}

impl Default for DottedModuleMatcher {
    fn default() -> Self {
        Self {
            extension_segment: true,
        }
    }
}

impl ModuleMatcher for DottedModuleMatcher {
    fn match_module(&self, classname: &str, file: &str) -> Option<usize> {
        let base = file_name(file);
        let directory = &file[..file.len() - base.len()];

        let mut position = 0;
        for folder in directory
            .split(['/', '\\'])
            .filter(|folder| !folder.is_empty() && *folder != ".")
        {
            position = consume_segment(classname, position, folder)?;
        }

        let stem = match split_on_last(base, ".") {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => base,
        };

        if self.extension_segment
            && stem != base
            && let Some(after) = consume_segment(classname, position, base)
        {
            return Some(after);
        }

        consume_segment(classname, position, stem)
    }
}

/// Consumes `segment` at `position`, plus the dot that follows it.
fn consume_segment(classname: &str, position: usize, segment: &str) -> Option<usize> {
    let rest = classname.get(position..)?;
    let after = rest.strip_prefix(segment)?;
    if after.is_empty() {
        Some(classname.len())
    } else if after.starts_with('.') {
        Some(position + segment.len() + 1)
    } else {
        None
    }
}
