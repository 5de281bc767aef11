//! The three bridge scenarios.
//!
//! Each scenario is a [`LiveFragment`] living on the server plus the
//! [`ClientTest`]s its controls fire from the client side.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::client::ClientHandle;
use crate::error::{CallError, ClientResult};
use crate::fragment::{CallResult, LiveFragment};
use crate::page::{assert_equals, fail};
use crate::rpc::{Control, ObjectId};

pub const HELLO: &str = "Hello world";
pub const EXCEPTION_MESSAGE: &str = "This exception should appear on the client.";

/// The five arguments every serialization call sends:
/// integer, float, text, mixed sequence, text mapping.
pub fn sample_args() -> Vec<Value> {
    vec![
        json!(1),
        json!(1.5),
        json!(HELLO),
        sample_list(),
        sample_object(),
    ]
}

fn sample_list() -> Value {
    json!([1, 1.5, HELLO])
}

fn sample_object() -> Value {
    json!({"hello world": "object value"})
}

fn five_args(method: &str, args: Vec<Value>) -> Result<[Value; 5], CallError> {
    <[Value; 5]>::try_from(args).map_err(|args| CallError::BadArguments {
        method: method.to_string(),
        expected: 5,
        given: args.len(),
    })
}

fn one_arg(method: &str, args: Vec<Value>) -> Result<Value, CallError> {
    let [arg] = <[Value; 1]>::try_from(args).map_err(|args| CallError::BadArguments {
        method: method.to_string(),
        expected: 1,
        given: args.len(),
    })?;
    Ok(arg)
}

fn check_equal(what: &str, actual: &Value, expected: &Value) -> Result<(), CallError> {
    if actual != expected {
        return Err(CallError::Assertion(format!("{what}: {actual} != {expected}")));
    }
    Ok(())
}

fn check_text<'a>(what: &str, value: &'a Value) -> Result<&'a str, CallError> {
    value
        .as_str()
        .ok_or_else(|| CallError::Assertion(format!("{what} is not text: {value}")))
}

fn check_integer(what: &str, value: &Value) -> Result<(), CallError> {
    if !(value.is_i64() || value.is_u64()) {
        return Err(CallError::Assertion(format!("{what} is not an integer: {value}")));
    }
    Ok(())
}

fn check_float(what: &str, value: &Value) -> Result<(), CallError> {
    if !value.is_f64() {
        return Err(CallError::Assertion(format!("{what} is not a float: {value}")));
    }
    Ok(())
}

fn unknown_method(fragment: &str, method: &str) -> CallError {
    CallError::MethodNotAllowed {
        fragment: fragment.to_string(),
        method: method.to_string(),
    }
}

/// Verifies on the server that client arguments arrive intact.
#[derive(Debug, Default)]
pub struct ArgumentSerialization;

impl ArgumentSerialization {
    fn test(&self, args: Vec<Value>) -> CallResult {
        let [i, f, s, l, d] = five_args("test", args)?;

        check_integer("integer", &i)?;
        check_equal("integer", &i, &json!(1))?;
        check_float("float", &f)?;
        check_equal("float", &f, &json!(1.5))?;
        check_text("string", &s)?;
        check_equal("string", &s, &json!(HELLO))?;

        let third = l.get(2).unwrap_or(&Value::Null);
        check_text("list[2]", third)?;
        check_equal("list", &l, &sample_list())?;

        check_equal("object", &d, &sample_object())?;
        for value in d.as_object().into_iter().flat_map(|map| map.values()) {
            check_text("object value", value)?;
        }

        Ok(Value::Null)
    }
}

#[async_trait]
impl LiveFragment for ArgumentSerialization {
    fn name(&self) -> &'static str {
        "ArgumentSerialization"
    }

    fn allowed_methods(&self) -> &'static [&'static str] {
        &["test"]
    }

    fn controls(&self) -> Vec<Control> {
        vec![Control {
            label: "Test Client To Server Argument Serialization".into(),
            test: ClientTest::ArgumentSerialization,
        }]
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> CallResult {
        match method {
            "test" => self.test(args),
            _ => Err(unknown_method(self.name(), method)),
        }
    }
}

/// Hands the five arguments straight back so the client can check them.
#[derive(Debug, Default)]
pub struct ResultSerialization;

#[async_trait]
impl LiveFragment for ResultSerialization {
    fn name(&self) -> &'static str {
        "ResultSerialization"
    }

    fn allowed_methods(&self) -> &'static [&'static str] {
        &["test"]
    }

    fn controls(&self) -> Vec<Control> {
        vec![Control {
            label: "Test Client To Server Result Serialization".into(),
            test: ClientTest::ResultSerialization,
        }]
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> CallResult {
        match method {
            "test" => Ok(Value::Array(five_args(method, args)?.into())),
            _ => Err(unknown_method(self.name(), method)),
        }
    }
}

/// Fails on purpose, either right away or through its pending result.
#[derive(Debug, Default)]
pub struct ExceptionResult;

fn message_of(arg: Value) -> String {
    match arg {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[async_trait]
impl LiveFragment for ExceptionResult {
    fn name(&self) -> &'static str {
        "ExceptionResult"
    }

    fn allowed_methods(&self) -> &'static [&'static str] {
        &["testSync", "testAsync"]
    }

    fn controls(&self) -> Vec<Control> {
        vec![
            Control {
                label: "Test Client To Server Synchronous Exception Result".into(),
                test: ClientTest::ExceptionResultSync,
            },
            Control {
                label: "Test Client To Server Asynchronous Exception Result".into(),
                test: ClientTest::ExceptionResultAsync,
            },
        ]
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> CallResult {
        match method {
            "testSync" => Err(CallError::Raised(message_of(one_arg(method, args)?))),
            "testAsync" => {
                let message = message_of(one_arg(method, args)?);
                tokio::task::yield_now().await;
                Err(CallError::Raised(message))
            }
            _ => Err(unknown_method(self.name(), method)),
        }
    }
}

/// Client-side test functions bound to rendered controls.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClientTest {
    ArgumentSerialization,
    ResultSerialization,
    ExceptionResultSync,
    ExceptionResultAsync,
}

impl ClientTest {
    pub const ALL: [ClientTest; 4] = [
        ClientTest::ArgumentSerialization,
        ClientTest::ResultSerialization,
        ClientTest::ExceptionResultSync,
        ClientTest::ExceptionResultAsync,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ClientTest::ArgumentSerialization => "argument_serialization",
            ClientTest::ResultSerialization => "result_serialization",
            ClientTest::ExceptionResultSync => "exception_result_sync",
            ClientTest::ExceptionResultAsync => "exception_result_async",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|test| test.name() == name)
    }

    /// Fire the remote call for this test against `object_id`.
    pub async fn run(self, client: &ClientHandle, object_id: ObjectId) -> ClientResult<Value> {
        match self {
            ClientTest::ArgumentSerialization => {
                client.remote_call(object_id, "test", sample_args()).await
            }
            ClientTest::ResultSerialization => {
                let result = client.remote_call(object_id, "test", sample_args()).await?;
                check_result(&result)?;
                Ok(result)
            }
            ClientTest::ExceptionResultSync => {
                expect_failure(client, object_id, "testSync", EXCEPTION_MESSAGE)
                    .await
                    .map(Value::String)
            }
            ClientTest::ExceptionResultAsync => {
                expect_failure(client, object_id, "testAsync", EXCEPTION_MESSAGE)
                    .await
                    .map(Value::String)
            }
        }
    }
}

fn check_result(result: &Value) -> ClientResult<()> {
    assert_equals(&result[0], &json!(1))?;
    assert_equals(&result[1], &json!(1.5))?;
    assert_equals(&result[2], &json!(HELLO))?;
    assert_equals(&result[3][0], &json!(1))?;
    assert_equals(&result[3][1], &json!(1.5))?;
    assert_equals(&result[3][2], &json!(HELLO))?;
    assert_equals(&result[4]["hello world"], &json!("object value"))
}

/// Call a method that must fail and check the error text names `message`.
///
/// Returns the error text on the expected failure path.
pub async fn expect_failure(
    client: &ClientHandle,
    object_id: ObjectId,
    method: &str,
    message: &str,
) -> ClientResult<String> {
    match client.remote_call(object_id, method, vec![json!(message)]).await {
        Ok(result) => Err(fail(format!("Erroneously received a result: {result}"))),
        Err(err) => {
            let text = err.to_string();
            if text.contains(message) {
                Ok(text)
            } else {
                Err(fail(format!(
                    "Did not find expected message in error message: {text}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::task::{Context, Poll, Waker};

    fn poll_once<F: Future + Unpin>(fut: &mut F) -> Poll<F::Output> {
        let mut cx = Context::from_waker(Waker::noop());
        std::pin::Pin::new(fut).poll(&mut cx)
    }

    #[tokio::test]
    async fn canonical_arguments_pass() {
        let result = ArgumentSerialization.call("test", sample_args()).await;
        assert_eq!(result, Ok(Value::Null));
    }

    #[tokio::test]
    async fn integer_sent_as_float_is_caught() {
        let mut args = sample_args();
        args[0] = json!(1.0);
        let err = ArgumentSerialization.call("test", args).await.unwrap_err();
        assert!(matches!(err, CallError::Assertion(ref m) if m.contains("integer")));
    }

    #[tokio::test]
    async fn non_text_list_element_is_caught() {
        let mut args = sample_args();
        args[3] = json!([1, 1.5, 7]);
        let err = ArgumentSerialization.call("test", args).await.unwrap_err();
        assert_eq!(err, CallError::Assertion("list[2] is not text: 7".into()));
    }

    #[tokio::test]
    async fn changed_mapping_is_caught() {
        let mut args = sample_args();
        args[4] = json!({"hello world": "other value"});
        let err = ArgumentSerialization.call("test", args).await.unwrap_err();
        assert!(matches!(err, CallError::Assertion(ref m) if m.starts_with("object")));
    }

    #[tokio::test]
    async fn wrong_arity_is_bad_arguments() {
        let err = ResultSerialization
            .call("test", vec![json!(1)])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CallError::BadArguments {
                method: "test".into(),
                expected: 5,
                given: 1
            }
        );
    }

    #[tokio::test]
    async fn result_echoes_arguments() {
        let value = ResultSerialization.call("test", sample_args()).await.unwrap();
        assert_eq!(value, Value::Array(sample_args()));
        check_result(&value).unwrap();
    }

    #[test]
    fn sync_failure_is_ready_on_first_poll() {
        let fragment = ExceptionResult;
        let mut fut = fragment.call("testSync", vec![json!("boom")]);
        match poll_once(&mut fut) {
            Poll::Ready(Err(CallError::Raised(m))) => assert_eq!(m, "boom"),
            other => panic!("unexpected poll result: {other:?}"),
        }
    }

    #[test]
    fn async_failure_suspends_first() {
        let fragment = ExceptionResult;
        let mut fut = fragment.call("testAsync", vec![json!("later")]);
        assert!(poll_once(&mut fut).is_pending());
        match poll_once(&mut fut) {
            Poll::Ready(Err(CallError::Raised(m))) => assert_eq!(m, "later"),
            other => panic!("unexpected poll result: {other:?}"),
        }
    }

    #[test]
    fn client_test_names_round_trip() {
        for test in ClientTest::ALL {
            assert_eq!(ClientTest::from_name(test.name()), Some(test));
            let json = serde_json::to_string(&test).unwrap();
            assert_eq!(json, format!("\"{}\"", test.name()));
        }
        assert_eq!(ClientTest::from_name("nope"), None);
    }

    #[test]
    fn result_check_rejects_float_for_integer() {
        let mut value = Value::Array(sample_args());
        value[0] = json!(1.0);
        let err = check_result(&value).unwrap_err();
        assert_eq!(err.to_string(), "Test Failure: 1.0 != 1");
    }
}
