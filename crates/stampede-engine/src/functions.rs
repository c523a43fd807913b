//! Caller-registered functions invoked by `function` steps.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// A named async function a flow can call.
///
/// Returning `Err` fails the step with a `custom` error carrying the message.
#[async_trait]
pub trait StepFunction: Send + Sync {
    async fn call(&self, args: Value) -> Result<Value, String>;
}

type BoxedFuture = Pin<Box<dyn Future<Output = Result<Value, String>> + Send>>;

struct FnStep<F>(F);

#[async_trait]
impl<F> StepFunction for FnStep<F>
where
    F: Fn(Value) -> BoxedFuture + Send + Sync,
{
    async fn call(&self, args: Value) -> Result<Value, String> {
        (self.0)(args).await
    }
}

/// Registry of [`StepFunction`]s by name. Cloning shares the registered functions.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn StepFunction>>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

impl FunctionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `function` under `name`, replacing any previous registration.
    pub fn register(&mut self, name: impl Into<String>, function: Arc<dyn StepFunction>) {
        self.functions.insert(name.into(), function);
    }

    /// Registers an async closure.
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let boxed = move |args: Value| -> BoxedFuture { Box::pin(f(args)) };
        self.register(name, Arc::new(FnStep(boxed)));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StepFunction>> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_registered_closure_receives_args() {
        let mut registry = FunctionRegistry::new();
        registry.register_fn("double", |args: Value| async move {
            let n = args["n"].as_i64().ok_or("missing n")?;
            Ok(json!(n * 2))
        });

        let f = registry.get("double").unwrap();
        assert_eq!(f.call(json!({ "n": 21 })).await, Ok(json!(42)));
        assert_eq!(f.call(json!({})).await, Err("missing n".to_string()));
        assert!(registry.get("missing").is_none());
    }
}
