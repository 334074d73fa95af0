//! Operation handler and description provider traits.
//!
//! Handlers are registered by name as `Arc<dyn OperationHandler>` values.
//! Small handlers can be written as closures with [`handler_fn`] and
//! [`query_fn`].

use crate::channel::ResultChannel;
use crate::context::OperationContext;
use opkernel_core::{ModelNode, Operation, Result};
use std::sync::Arc;

/// The unit of business logic behind an operation name.
///
/// Contract: either mutate the context's sub-model and `complete` with a
/// compensating operation, or `fail`. Only a successful completion is
/// committed to the live model, so a failing handler leaves no trace in it.
#[async_trait::async_trait]
pub trait OperationHandler: Send + Sync {
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel);

    /// Read-only handlers run concurrently against a snapshot instead of on
    /// the writer lane.
    fn is_read_only(&self) -> bool {
        false
    }
}

/// Locale-aware description document for introspection.
pub trait DescriptionProvider: Send + Sync {
    fn description(&self, locale: Option<&str>) -> ModelNode;
}

/// A fixed description, the same for every locale.
#[derive(Clone, Debug)]
pub struct StaticDescription(ModelNode);

impl StaticDescription {
    pub fn new(text: &str) -> Self {
        Self(ModelNode::new_object().with("description", text))
    }

    pub fn from_model(description: ModelNode) -> Self {
        Self(description)
    }

    pub fn shared(text: &str) -> Arc<dyn DescriptionProvider> {
        Arc::new(Self::new(text))
    }
}

impl DescriptionProvider for StaticDescription {
    fn description(&self, _locale: Option<&str>) -> ModelNode {
        self.0.clone()
    }
}

// ---------------------------------------------------------------------------
// Closure handlers
// ---------------------------------------------------------------------------

struct FnHandler<F> {
    f: F,
}

#[async_trait::async_trait]
impl<F> OperationHandler for FnHandler<F>
where
    F: Fn(&mut OperationContext, &Operation) -> Result<ModelNode> + Send + Sync,
{
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel) {
        results.report((self.f)(ctx, operation));
    }
}

/// Wrap a synchronous closure returning the compensating operation.
pub fn handler_fn<F>(f: F) -> Arc<dyn OperationHandler>
where
    F: Fn(&mut OperationContext, &Operation) -> Result<ModelNode> + Send + Sync + 'static,
{
    Arc::new(FnHandler { f })
}

struct QueryFn<F> {
    f: F,
}

#[async_trait::async_trait]
impl<F> OperationHandler for QueryFn<F>
where
    F: Fn(&OperationContext, &Operation) -> Result<ModelNode> + Send + Sync,
{
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel) {
        match (self.f)(ctx, operation) {
            Ok(result) => results.complete_with_result(result, ModelNode::Undefined),
            Err(e) => results.fail(e),
        }
    }

    fn is_read_only(&self) -> bool {
        true
    }
}

/// Wrap a read-only closure returning the query result.
pub fn query_fn<F>(f: F) -> Arc<dyn OperationHandler>
where
    F: Fn(&OperationContext, &Operation) -> Result<ModelNode> + Send + Sync + 'static,
{
    Arc::new(QueryFn { f })
}
