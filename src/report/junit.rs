//! JUnit XML report reading.
//!
//! Reads the JUnit schema emitted by pytest (`--junitxml`), testplan
//! (`--xml <dir>`) and most other xUnit-style runners:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <testsuites>
//!   <testsuite name="pytest" tests="3" failures="1" errors="0" skipped="1">
//!     <testcase classname="tests.test_math" file="tests/test_math.py" name="test_add"/>
//!     <testcase classname="tests.test_math" file="tests/test_math.py" name="test_sub">
//!       <failure message="assert 1 == 0">tests/test_math.py:7: AssertionError</failure>
//!       <system-out>captured</system-out>
//!     </testcase>
//!     <testcase classname="tests.test_math" file="tests/test_math.py" name="test_mul">
//!       <skipped message="not ready"/>
//!     </testcase>
//!   </testsuite>
//! </testsuites>
//! ```
//!
//! Older producers write a bare `<testsuite>` root instead of wrapping it in
//! `<testsuites>`. Both shapes are normalized into one [`JunitReport`] while
//! reading, so nothing downstream needs to care which one it got.

use std::borrow::Cow;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::framework::{FrameworkError, FrameworkResult, ResultEvent, TestState};
use crate::util::concat_non_empty_opt;

const TAG_REPORT: &[u8] = b"testsuites";
const TAG_TEST_SUITE: &[u8] = b"testsuite";
const TAG_TEST_CASE: &[u8] = b"testcase";
const TAG_FAILURE: &[u8] = b"failure";
const TAG_ERROR: &[u8] = b"error";
const TAG_SKIPPED: &[u8] = b"skipped";
const TAG_SYSTEM_OUT: &[u8] = b"system-out";
const TAG_SYSTEM_ERR: &[u8] = b"system-err";

/// Line separator used when building result messages.
pub const MESSAGE_SEPARATOR: &str = "\n";

/// A parsed report, always in the wrapped (`<testsuites>`) shape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JunitReport {
    /// `name` attribute of `<testsuites>`, absent for bare `<testsuite>` roots.
    pub name: Option<String>,
    pub suites: Vec<JunitSuite>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JunitSuite {
    pub name: Option<String>,
    pub cases: Vec<JunitCase>,
}

/// One `<testcase>` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JunitCase {
    pub name: String,
    pub classname: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub failure: Option<CaseDetail>,
    pub error: Option<CaseDetail>,
    pub skipped: Option<CaseDetail>,
    pub system_out: Option<String>,
    pub system_err: Option<String>,
}

/// Body of a `<failure>`, `<error>` or `<skipped>` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseDetail {
    pub message: Option<String>,
    pub text: String,
}

impl JunitCase {
    /// Canonical state: error, then failure, then skipped, otherwise passed.
    pub fn state(&self) -> TestState {
        if self.error.is_some() || self.failure.is_some() {
            TestState::Failed
        } else if self.skipped.is_some() {
            TestState::Skipped
        } else {
            TestState::Passed
        }
    }

    /// The detail element that decided [`state`](Self::state), if any.
    pub fn detail(&self) -> Option<&CaseDetail> {
        self.error
            .as_ref()
            .or(self.failure.as_ref())
            .or(self.skipped.as_ref())
    }

    /// Captured output followed by the detail's message attribute and body.
    pub fn message(&self) -> Option<String> {
        let detail = self.detail();
        concat_non_empty_opt(
            MESSAGE_SEPARATOR,
            [
                self.system_out.as_deref().unwrap_or_default(),
                self.system_err.as_deref().unwrap_or_default(),
                detail
                    .and_then(|d| d.message.as_deref())
                    .unwrap_or_default(),
                detail.map(|d| d.text.as_str()).unwrap_or_default(),
            ],
        )
    }

    /// Builds the result event for this case under the given test id.
    pub fn to_event(&self, test_id: impl Into<String>) -> ResultEvent {
        ResultEvent::new(test_id, self.state()).with_message(self.message())
    }
}

impl JunitReport {
    /// Parses a JUnit XML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the XML is malformed or the root element is
    /// neither `<testsuites>` nor `<testsuite>`.
    pub fn parse(xml: &str) -> FrameworkResult<Self> {
        let mut reader = Reader::from_str(xml);

        let mut builder = ReportBuilder::default();
        loop {
            match reader.read_event()? {
                Event::Start(e) => builder.open(&e)?,
                Event::Empty(e) => {
                    let name = e.name();
                    builder.open(&e)?;
                    builder.close(name.as_ref());
                }
                Event::End(e) => builder.close(e.name().as_ref()),
                Event::Text(e) => builder.text(&e.unescape()?),
                Event::CData(e) => builder.text(&String::from_utf8_lossy(&e.into_inner())),
                Event::Eof => break,
                _ => {}
            }
        }

        builder.finish()
    }

    /// Parses a report, logging and returning `None` on failure.
    pub fn parse_lenient(xml: &str, origin: &str) -> Option<Self> {
        match Self::parse(xml) {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!("Ignoring unreadable JUnit report {}: {}", origin, e);
                None
            }
        }
    }

    /// Iterates over every test case together with its enclosing suite.
    pub fn cases(&self) -> impl Iterator<Item = (&JunitSuite, &JunitCase)> {
        self.suites
            .iter()
            .flat_map(|suite| suite.cases.iter().map(move |case| (suite, case)))
    }
}

/// Where character data inside a test case is collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextTarget {
    Failure,
    Error,
    Skipped,
    SystemOut,
    SystemErr,
}

#[derive(Debug, Default)]
struct ReportBuilder {
    report: Option<JunitReport>,
    open_suites: Vec<JunitSuite>,
    current_case: Option<JunitCase>,
    text_target: Option<TextTarget>,
    text: String,
}

impl ReportBuilder {
    fn open(&mut self, e: &BytesStart<'_>) -> FrameworkResult<()> {
        let tag = e.name();
        let tag = tag.as_ref();

        if self.report.is_none() {
            // The root decides the schema shape; a bare <testsuite> is wrapped here.
            match tag {
                TAG_REPORT => {
                    self.report = Some(JunitReport {
                        name: attr(e, "name")?,
                        suites: Vec::new(),
                    });
                    return Ok(());
                }
                TAG_TEST_SUITE => self.report = Some(JunitReport::default()),
                other => {
                    return Err(FrameworkError::ParseError(format!(
                        "expected <testsuites> or <testsuite> root, found <{}>",
                        String::from_utf8_lossy(other)
                    )));
                }
            }
        }

        match tag {
            TAG_TEST_SUITE => self.open_suites.push(JunitSuite {
                name: attr(e, "name")?,
                cases: Vec::new(),
            }),
            TAG_TEST_CASE => {
                self.current_case = Some(JunitCase {
                    name: attr(e, "name")?.unwrap_or_default(),
                    classname: attr(e, "classname")?,
                    file: attr(e, "file")?,
                    line: attr(e, "line")?.and_then(|l| l.parse().ok()),
                    ..Default::default()
                });
            }
            TAG_FAILURE | TAG_ERROR | TAG_SKIPPED => {
                let Some(case) = self.current_case.as_mut() else {
                    return Ok(());
                };
                let detail = Some(CaseDetail {
                    message: attr(e, "message")?,
                    text: String::new(),
                });
                let target = match tag {
                    TAG_FAILURE => {
                        case.failure = detail;
                        TextTarget::Failure
                    }
                    TAG_ERROR => {
                        case.error = detail;
                        TextTarget::Error
                    }
                    _ => {
                        case.skipped = detail;
                        TextTarget::Skipped
                    }
                };
                self.start_text(target);
            }
            TAG_SYSTEM_OUT if self.current_case.is_some() => {
                self.start_text(TextTarget::SystemOut)
            }
            TAG_SYSTEM_ERR if self.current_case.is_some() => {
                self.start_text(TextTarget::SystemErr)
            }
            _ => {}
        }

        Ok(())
    }

    fn close(&mut self, tag: &[u8]) {
        match tag {
            TAG_FAILURE | TAG_ERROR | TAG_SKIPPED | TAG_SYSTEM_OUT | TAG_SYSTEM_ERR => {
                self.flush_text()
            }
            TAG_TEST_CASE => {
                if let Some(case) = self.current_case.take() {
                    if self.open_suites.is_empty() {
                        // testcase directly under <testsuites>
                        self.open_suites.push(JunitSuite::default());
                    }
                    if let Some(suite) = self.open_suites.last_mut() {
                        suite.cases.push(case);
                    }
                }
            }
            TAG_TEST_SUITE => {
                if let (Some(suite), Some(report)) = (self.open_suites.pop(), self.report.as_mut())
                {
                    report.suites.push(suite);
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, content: &str) {
        if self.text_target.is_some() {
            self.text.push_str(content);
        }
    }

    fn start_text(&mut self, target: TextTarget) {
        self.text_target = Some(target);
        self.text.clear();
    }

    fn flush_text(&mut self) {
        let Some(target) = self.text_target.take() else {
            return;
        };
        let text = std::mem::take(&mut self.text);
        let Some(case) = self.current_case.as_mut() else {
            return;
        };
        match target {
            TextTarget::Failure => set_detail_text(&mut case.failure, text),
            TextTarget::Error => set_detail_text(&mut case.error, text),
            TextTarget::Skipped => set_detail_text(&mut case.skipped, text),
            TextTarget::SystemOut => case.system_out = Some(text),
            TextTarget::SystemErr => case.system_err = Some(text),
        }
    }

    fn finish(mut self) -> FrameworkResult<JunitReport> {
        let mut report = self.report.take().ok_or_else(|| {
            FrameworkError::ParseError("no <testsuites> or <testsuite> root element".to_string())
        })?;
        // tolerate truncated reports: keep whatever suites were left open
        while let Some(suite) = self.open_suites.pop() {
            report.suites.push(suite);
        }
        Ok(report)
    }
}

fn set_detail_text(detail: &mut Option<CaseDetail>, text: String) {
    if let Some(detail) = detail {
        detail.text = text;
    }
}

fn attr(e: &BytesStart<'_>, name: &str) -> FrameworkResult<Option<String>> {
    match e.try_get_attribute(name)? {
        Some(attribute) => {
            let value: Cow<'_, str> = attribute.unescape_value()?;
            Ok(Some(value.into_owned()))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WRAPPED: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<testsuites name="run">
  <testsuite name="pytest" errors="1" failures="1" skipped="1" tests="4">
    <testcase classname="tests.test_math" file="tests/test_math.py" line="3" name="test_add" time="0.001"/>
    <testcase classname="tests.test_math.TestOps" file="tests/test_math.py" name="test_sub">
      <failure message="assert 1 == 0">tests/test_math.py:7: AssertionError</failure>
      <system-out>printed &amp; captured</system-out>
      <system-err>warned</system-err>
    </testcase>
    <testcase classname="tests.test_math" file="tests/test_math.py" name="test_mul">
      <skipped message="not ready" type="pytest.skip"/>
    </testcase>
    <testcase classname="tests.test_math" file="tests/test_math.py" name="test_div">
      <error message="fixture exploded"><![CDATA[Traceback <most recent call last>]]></error>
    </testcase>
  </testsuite>
</testsuites>"#;

    const BARE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<testsuite name="pytest" errors="1" failures="1" skipped="1" tests="4">
    <testcase classname="tests.test_math" file="tests/test_math.py" line="3" name="test_add" time="0.001"/>
    <testcase classname="tests.test_math.TestOps" file="tests/test_math.py" name="test_sub">
      <failure message="assert 1 == 0">tests/test_math.py:7: AssertionError</failure>
      <system-out>printed &amp; captured</system-out>
      <system-err>warned</system-err>
    </testcase>
    <testcase classname="tests.test_math" file="tests/test_math.py" name="test_mul">
      <skipped message="not ready" type="pytest.skip"/>
    </testcase>
    <testcase classname="tests.test_math" file="tests/test_math.py" name="test_div">
      <error message="fixture exploded"><![CDATA[Traceback <most recent call last>]]></error>
    </testcase>
</testsuite>"#;

    #[test]
    fn test_parse_wrapped_report() {
        let report = JunitReport::parse(WRAPPED).unwrap();
        assert_eq!(report.name.as_deref(), Some("run"));
        assert_eq!(report.suites.len(), 1);
        assert_eq!(report.suites[0].name.as_deref(), Some("pytest"));
        assert_eq!(report.suites[0].cases.len(), 4);

        let add = &report.suites[0].cases[0];
        assert_eq!(add.name, "test_add");
        assert_eq!(add.classname.as_deref(), Some("tests.test_math"));
        assert_eq!(add.file.as_deref(), Some("tests/test_math.py"));
        assert_eq!(add.line, Some(3));
        assert_eq!(add.state(), TestState::Passed);
        assert_eq!(add.message(), None);
    }

    #[test]
    fn test_bare_and_wrapped_are_equivalent() {
        let wrapped = JunitReport::parse(WRAPPED).unwrap();
        let bare = JunitReport::parse(BARE).unwrap();
        assert_eq!(wrapped.suites, bare.suites);
        assert_eq!(bare.name, None);
    }

    #[test]
    fn test_failure_message_order() {
        let report = JunitReport::parse(WRAPPED).unwrap();
        let sub = &report.suites[0].cases[1];
        assert_eq!(sub.state(), TestState::Failed);
        assert_eq!(
            sub.message().as_deref(),
            Some("printed & captured\nwarned\nassert 1 == 0\ntests/test_math.py:7: AssertionError")
        );
    }

    #[test]
    fn test_skipped_and_error_states() {
        let report = JunitReport::parse(WRAPPED).unwrap();
        let mul = &report.suites[0].cases[2];
        assert_eq!(mul.state(), TestState::Skipped);
        assert_eq!(mul.message().as_deref(), Some("not ready"));

        let div = &report.suites[0].cases[3];
        assert_eq!(div.state(), TestState::Failed);
        assert_eq!(
            div.message().as_deref(),
            Some("fixture exploded\nTraceback <most recent call last>")
        );
    }

    #[test]
    fn test_error_takes_precedence_over_skipped() {
        let xml = r#"<testsuite><testcase name="t"><skipped/><error message="boom"/></testcase></testsuite>"#;
        let report = JunitReport::parse(xml).unwrap();
        let case = &report.suites[0].cases[0];
        assert_eq!(case.state(), TestState::Failed);
        assert_eq!(case.message().as_deref(), Some("boom"));
    }

    #[test]
    fn test_multiple_suites() {
        let xml = r#"<testsuites>
            <testsuite name="a"><testcase name="t1"/></testsuite>
            <testsuite name="b"><testcase name="t2"/><testcase name="t3"/></testsuite>
        </testsuites>"#;
        let report = JunitReport::parse(xml).unwrap();
        let names: Vec<_> = report.cases().map(|(s, c)| (s.name.clone(), c.name.clone())).collect();
        assert_eq!(
            names,
            vec![
                (Some("a".to_string()), "t1".to_string()),
                (Some("b".to_string()), "t2".to_string()),
                (Some("b".to_string()), "t3".to_string()),
            ]
        );
    }

    #[test]
    fn test_unknown_root_is_error() {
        assert!(JunitReport::parse("<html><body/></html>").is_err());
    }

    #[test]
    fn test_empty_document_is_error() {
        assert!(JunitReport::parse("").is_err());
        assert!(JunitReport::parse_lenient("", "stdin").is_none());
    }

    #[test]
    fn test_malformed_xml_is_error() {
        assert!(JunitReport::parse("<testsuite><testcase name=\"a\"></testsuite>").is_err());
    }

    #[test]
    fn test_empty_suite_has_no_cases() {
        let report = JunitReport::parse(r#"<testsuites><testsuite name="x"/></testsuites>"#).unwrap();
        assert_eq!(report.suites.len(), 1);
        assert!(report.suites[0].cases.is_empty());
    }

    #[test]
    fn test_captured_text_keeps_its_whitespace() {
        let xml = "<testsuite><testcase name=\"t\">\n  <failure>    indented line\n  second\n</failure>\n  <system-out>  out  </system-out>\n</testcase></testsuite>";
        let report = JunitReport::parse(xml).unwrap();
        let case = &report.suites[0].cases[0];
        assert_eq!(
            case.failure.as_ref().map(|f| f.text.as_str()),
            Some("    indented line\n  second\n")
        );
        assert_eq!(case.system_out.as_deref(), Some("  out  "));
    }

    #[test]
    fn test_to_event() {
        let report = JunitReport::parse(WRAPPED).unwrap();
        let event = report.suites[0].cases[2].to_event("id");
        assert_eq!(event.test, "id");
        assert_eq!(event.state, TestState::Skipped);
        assert_eq!(event.message.as_deref(), Some("not ready"));
    }
}
