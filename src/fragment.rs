use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CallError;
use crate::rpc::{Control, FragmentView, ObjectId};

pub type CallResult = Result<Value, CallError>;

/// A page fragment whose methods can be called from the client.
///
/// Only methods listed by [`allowed_methods`](LiveFragment::allowed_methods)
/// are reachable; the [`Registry`] refuses everything else before
/// [`call`](LiveFragment::call) runs.
#[async_trait]
pub trait LiveFragment: Send + Sync {
    /// Stable name, used for lookups and in the rendered markup.
    fn name(&self) -> &'static str;

    fn allowed_methods(&self) -> &'static [&'static str];

    /// Controls rendered for this fragment, in page order.
    fn controls(&self) -> Vec<Control>;

    /// Handle a remote call.
    ///
    /// Returning `Err` before the first `.await` is a synchronous failure;
    /// returning it after one is a failure of the pending result.
    async fn call(&self, method: &str, args: Vec<Value>) -> CallResult;
}

/// Objects rendered into one page view, looked up by id on every call.
#[derive(Default, Clone)]
pub struct Registry {
    objects: BTreeMap<ObjectId, Arc<dyn LiveFragment>>,
    next_id: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fragment and hand back its fresh id.
    pub fn insert(&mut self, fragment: Arc<dyn LiveFragment>) -> ObjectId {
        self.next_id += 1;
        let id = ObjectId(self.next_id);
        self.objects.insert(id, fragment);
        id
    }

    pub fn get(&self, id: ObjectId) -> Option<Arc<dyn LiveFragment>> {
        self.objects.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Descriptors of every registered fragment, in id order.
    pub fn views(&self) -> Vec<FragmentView> {
        self.objects
            .iter()
            .map(|(id, fragment)| FragmentView {
                object_id: *id,
                name: fragment.name().to_string(),
                controls: fragment.controls(),
            })
            .collect()
    }

    /// Resolve the target and check the method before handing out the call.
    pub fn resolve(
        &self,
        id: ObjectId,
        method: &str,
    ) -> Result<Arc<dyn LiveFragment>, CallError> {
        let fragment = self.get(id).ok_or(CallError::NoSuchObject(id))?;
        if !fragment.allowed_methods().contains(&method) {
            return Err(CallError::MethodNotAllowed {
                fragment: fragment.name().to_string(),
                method: method.to_string(),
            });
        }
        Ok(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    #[derive(Default)]
    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LiveFragment for Echo {
        fn name(&self) -> &'static str {
            "Echo"
        }

        fn allowed_methods(&self) -> &'static [&'static str] {
            &["echo"]
        }

        fn controls(&self) -> Vec<Control> {
            Vec::new()
        }

        async fn call(&self, _method: &str, args: Vec<Value>) -> CallResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Array(args))
        }
    }

    #[tokio::test]
    async fn ids_are_sequential() {
        let mut registry = Registry::new();
        let a = registry.insert(Arc::new(Echo::default()));
        let b = registry.insert(Arc::new(Echo::default()));
        assert_eq!(a, ObjectId(1));
        assert_eq!(b, ObjectId(2));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.views()[1].object_id, b);
    }

    #[tokio::test]
    async fn resolved_fragment_runs_allowed_method() {
        let mut registry = Registry::new();
        let id = registry.insert(Arc::new(Echo::default()));
        let fragment = registry.resolve(id, "echo").unwrap();
        let value = fragment.call("echo", vec![json!(1)]).await.unwrap();
        assert_eq!(value, json!([1]));
    }

    #[test]
    fn unknown_object_is_refused() {
        let registry = Registry::new();
        let err = registry.resolve(ObjectId(7), "echo").err().unwrap();
        assert_eq!(err, CallError::NoSuchObject(ObjectId(7)));
    }

    #[test]
    fn disallowed_method_never_runs() {
        let echo = Arc::new(Echo::default());
        let mut registry = Registry::new();
        let id = registry.insert(echo.clone());

        let err = registry.resolve(id, "drop_tables").err().unwrap();
        assert!(matches!(err, CallError::MethodNotAllowed { .. }));
        assert_eq!(echo.calls.load(Ordering::SeqCst), 0);
    }
}
