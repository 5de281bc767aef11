use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{ClientError, ClientResult};
use crate::fragment::{LiveFragment, Registry};
use crate::rpc::{FragmentView, PageView};
use crate::scenarios::{ArgumentSerialization, ExceptionResult, ResultSerialization};

pub type FragmentFactory = fn() -> Arc<dyn LiveFragment>;

const DOCTYPE: &str = "<!DOCTYPE html>";

/// The page that lists every scenario.
///
/// Rendering builds a fresh instance of each fragment and registers it, so
/// every page view owns its own objects.
pub struct LivePage {
    fragments: Vec<FragmentFactory>,
}

impl Default for LivePage {
    fn default() -> Self {
        Self::new(vec![
            argument_serialization,
            result_serialization,
            exception_result,
        ])
    }
}

fn argument_serialization() -> Arc<dyn LiveFragment> {
    Arc::new(ArgumentSerialization)
}

fn result_serialization() -> Arc<dyn LiveFragment> {
    Arc::new(ResultSerialization)
}

fn exception_result() -> Arc<dyn LiveFragment> {
    Arc::new(ExceptionResult)
}

impl LivePage {
    pub fn new(fragments: Vec<FragmentFactory>) -> Self {
        Self { fragments }
    }

    pub fn with_fragment(mut self, factory: FragmentFactory) -> Self {
        self.fragments.push(factory);
        self
    }

    pub fn render(&self) -> (Registry, PageView) {
        let mut registry = Registry::new();
        for factory in &self.fragments {
            registry.insert(factory());
        }

        let fragments = registry.views();
        let markup = render_markup(&fragments);
        (registry, PageView { markup, fragments })
    }
}

fn render_markup(fragments: &[FragmentView]) -> String {
    let mut tests: Vec<&str> = Vec::new();
    for control in fragments.iter().flat_map(|f| &f.controls) {
        let name = control.test.name();
        if !tests.contains(&name) {
            tests.push(name);
        }
    }
    let tests = serde_json::to_string(&tests).unwrap_or_else(|_| "[]".to_string());

    let mut out = String::new();
    out.push_str(DOCTYPE);
    out.push_str("\n<html>\n<head>\n");
    out.push_str(&format!(
        "<script type=\"application/json\" id=\"live-tests\">{tests}</script>\n"
    ));
    out.push_str("</head>\n<body>\n");
    for fragment in fragments {
        out.push_str(&format!(
            "<div data-live-id=\"{}\" data-fragment=\"{}\">\n",
            fragment.object_id,
            escape(&fragment.name)
        ));
        for control in &fragment.controls {
            out.push_str(&format!(
                "<form action=\"#\" data-test=\"{}\"><input type=\"submit\" value=\"{}\"/></form>\n",
                control.test.name(),
                escape(&control.label)
            ));
        }
        out.push_str("</div>\n");
    }
    out.push_str("</body>\n</html>\n");
    out
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// What the user sees after triggering a control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    Success,
    Failure(String),
}

impl Alert {
    pub fn from_result<T>(result: &ClientResult<T>) -> Self {
        match result {
            Ok(_) => Alert::Success,
            Err(err) => Alert::Failure(err.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Alert::Success)
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alert::Success => f.write_str("Success!"),
            Alert::Failure(err) => write!(f, "Failure: {err}"),
        }
    }
}

/// Await a remote call and turn its outcome into an alert.
pub async fn test<F>(deferred: F) -> Alert
where
    F: Future<Output = ClientResult<Value>>,
{
    let result = deferred.await;
    match &result {
        Ok(_) => log::info!("Test passed"),
        Err(err) => log::warn!("Test failed: {err}"),
    }
    Alert::from_result(&result)
}

pub fn fail(msg: impl Into<String>) -> ClientError {
    ClientError::TestFailure(msg.into())
}

pub fn assert_equals(a: &Value, b: &Value) -> ClientResult<()> {
    if a != b {
        return Err(fail(format!("{a} != {b}")));
    }
    Ok(())
}
