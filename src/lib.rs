//! testlens: normalizes test framework output.
//!
//! This crate turns what test frameworks print or write (dotted test ids,
//! control lines, JUnit XML, JSON reports, pattern listings) into one
//! canonical test tree and one flat list of result events.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Framework**: The canonical model and one parser per framework
//!   (unittest, pytest, behave, testplan)
//! - **Report**: JUnit XML reading and test id reconstruction
//! - **Disambiguate**: Descriptions for nodes sharing a label
//! - **Config**: TOML configuration selecting the framework
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use testlens::config::load_config;
//! use testlens::framework::ReportSource;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(Path::new("testlens.toml"))?;
//!     let parser = config.framework.parser();
//!     let source = ReportSource::File("junit.xml".into());
//!     let events = parser.results(&source, Path::new("/proj")).await;
//!     println!("{} results", events.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod disambiguate;
pub mod framework;
pub mod report;
pub mod util;

// Re-export commonly used types
pub use config::{Config, load_config};
pub use framework::{ReportSource, ResultEvent, TestNode, TestOutputParser, TestState};
pub use report::Summary;
