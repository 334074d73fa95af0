//! Tests for opkernel-controller: registry resolution, dispatch, commit and
//! rollback, cancellation, global operations, history and persistence

use opkernel_controller::*;
use opkernel_core::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

// ===========================================================================
// Fixtures
// ===========================================================================

fn addr(text: &str) -> PathAddress {
    text.parse().unwrap()
}

fn req(op: &str, address: &str) -> ModelNode {
    operation_for(op, &addr(address))
}

fn desc(text: &str) -> Arc<dyn DescriptionProvider> {
    StaticDescription::shared(text)
}

struct TestService;

#[async_trait::async_trait]
impl Service for TestService {
    fn status(&self) -> ModelNode {
        ModelNode::from("up")
    }
}

struct FailingService;

#[async_trait::async_trait]
impl Service for FailingService {
    async fn start(&self) -> std::result::Result<(), ServiceError> {
        Err(ServiceError::failed("port in use"))
    }
}

/// Sleeps before touching the model.
struct SlowHandler;

#[async_trait::async_trait]
impl OperationHandler for SlowHandler {
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel) {
        tokio::time::sleep(Duration::from_millis(300)).await;
        ctx.sub_model_mut().set("slow", true);
        results.complete(operation.compensating("noop"));
    }
}

/// Marks mutation, signals, then keeps working.
struct MutateThenWait {
    mutated: Arc<Notify>,
}

#[async_trait::async_trait]
impl OperationHandler for MutateThenWait {
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel) {
        ctx.sub_model_mut().set("committed", true);
        self.mutated.notify_one();
        tokio::time::sleep(Duration::from_millis(100)).await;
        results.complete(operation.compensating("noop"));
    }
}

/// Installs a service, then fails.
struct InstallThenFail;

#[async_trait::async_trait]
impl OperationHandler for InstallThenFail {
    async fn execute(&self, ctx: &mut OperationContext, _operation: &Operation, results: ResultChannel) {
        if let Some(target) = ctx.service_target() {
            if let Err(e) = target.install("test.service", Arc::new(TestService)).await {
                return results.fail(OperationError::service_install(e.to_string()));
            }
        }
        ctx.sub_model_mut().set("installed", true);
        results.fail(OperationError::handler_failure("second step failed"));
    }
}

/// Installs a service whose start fails.
struct InstallBroken;

#[async_trait::async_trait]
impl OperationHandler for InstallBroken {
    async fn execute(&self, ctx: &mut OperationContext, _operation: &Operation, results: ResultChannel) {
        if let Some(target) = ctx.service_target() {
            if let Err(e) = target.install("broken.service", Arc::new(FailingService)).await {
                return results.fail(OperationError::service_install(e.to_string()));
            }
        }
        results.complete(ModelNode::Undefined);
    }
}

/// Reports whether a service target was offered.
struct ProbeRuntime;

#[async_trait::async_trait]
impl OperationHandler for ProbeRuntime {
    async fn execute(&self, ctx: &mut OperationContext, _operation: &Operation, results: ResultChannel) {
        let runtime = ctx.service_target().is_some();
        results.complete_with_result(ModelNode::Boolean(runtime), ModelNode::Undefined);
    }
}

/// Never reports.
struct Forgetful;

#[async_trait::async_trait]
impl OperationHandler for Forgetful {
    async fn execute(&self, ctx: &mut OperationContext, _operation: &Operation, results: ResultChannel) {
        ctx.sub_model_mut().set("forgotten", true);
        drop(results);
    }
}

/// Installs a service, then panics.
struct InstallThenPanic;

#[async_trait::async_trait]
impl OperationHandler for InstallThenPanic {
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel) {
        if let Some(target) = ctx.service_target() {
            if let Err(e) = target.install("doomed.service", Arc::new(TestService)).await {
                return results.fail(OperationError::service_install(e.to_string()));
            }
        }
        ctx.sub_model_mut().set("half-done", true);
        let size = operation.get("size").and_then(|v| v.as_i64().ok()).unwrap();
        results.complete(ModelNode::from(size));
    }
}

fn registry_with(mutated: Arc<Notify>) -> ResourceRegistry {
    let mut registry = ResourceRegistry::new();
    register_global_operations(registry.root_mut()).unwrap();

    let things = registry.root_mut().register_child(PathElement::wildcard("thing")).unwrap();
    things
        .register_operation(
            ADD,
            handler_fn(|ctx, op| {
                if ctx.sub_model().is_defined() {
                    return Err(OperationError::handler_failure("already exists"));
                }
                let mut model = ModelNode::new_object();
                if let Some(size) = op.get("size").filter(|v| v.is_defined()) {
                    model.set("size", size.as_i64()?);
                }
                *ctx.sub_model_mut() = model;
                Ok(op.compensating(REMOVE))
            }),
            desc("add a thing"),
            false,
        )
        .unwrap();
    things
        .register_operation(
            REMOVE,
            handler_fn(|ctx, op| {
                let previous = ctx.sub_model().clone();
                if !previous.is_defined() {
                    return Err(OperationError::AddressNotFound(op.address().clone()));
                }
                let mut add = op.compensating(ADD);
                if let Some(size) = previous.get("size") {
                    add.set("size", size.clone());
                }
                *ctx.sub_model_mut() = ModelNode::Undefined;
                Ok(add)
            }),
            desc("remove a thing"),
            false,
        )
        .unwrap();
    things
        .register_operation(
            "append",
            handler_fn(|ctx, op| {
                let value = op.require(VALUE)?.clone();
                ctx.sub_model_mut().entry("items").push(value);
                Ok(ModelNode::Undefined)
            }),
            desc("append an item"),
            false,
        )
        .unwrap();
    things
        .register_operation(
            "explode",
            handler_fn(|ctx, _op| {
                ctx.sub_model_mut().set("size", 999);
                Err(OperationError::handler_failure("boom"))
            }),
            desc("mutate, then fail"),
            false,
        )
        .unwrap();
    things
        .register_operation(
            "observe",
            handler_fn(|ctx, _op| {
                ctx.sub_model_mut().set("status", "up");
                Ok(ModelNode::Undefined)
            }),
            desc("record runtime status"),
            false,
        )
        .unwrap();
    things.register_operation("slow", Arc::new(SlowHandler), desc("slow"), false).unwrap();
    things
        .register_operation("mutate-then-wait", Arc::new(MutateThenWait { mutated }), desc("mutate"), false)
        .unwrap();
    things.register_operation("install-then-fail", Arc::new(InstallThenFail), desc("install"), false).unwrap();
    things.register_operation("install-broken", Arc::new(InstallBroken), desc("install"), false).unwrap();
    things.register_operation("probe-runtime", Arc::new(ProbeRuntime), desc("probe"), false).unwrap();
    things.register_operation("forget", Arc::new(Forgetful), desc("forget"), false).unwrap();
    things.register_operation("crash", Arc::new(InstallThenPanic), desc("crash"), false).unwrap();
    things
        .register_operation(
            "whoami",
            query_fn(|_ctx, _op| Ok(ModelNode::from("wildcard"))),
            desc("which registration"),
            false,
        )
        .unwrap();

    things
        .register_attribute(
            "size",
            None,
            Some(Arc::new(WriteAttributeHandler::typed(ModelType::Int))),
            Storage::Configuration,
        )
        .unwrap();
    things
        .register_attribute("flag", None, Some(BooleanWriteAttributeHandler::shared()), Storage::Configuration)
        .unwrap();
    things.register_attribute("label", None, None, Storage::Configuration).unwrap();
    things
        .register_attribute(
            "status",
            Some(query_fn(|ctx, _op| {
                Ok(ctx.sub_model().get("status").cloned().unwrap_or_else(|| ModelNode::from("down")))
            })),
            None,
            Storage::Runtime,
        )
        .unwrap();

    let parts = things.register_child(PathElement::wildcard("part")).unwrap();
    parts
        .register_operation(
            ADD,
            handler_fn(|ctx, op| {
                *ctx.sub_model_mut() = ModelNode::new_object();
                Ok(op.compensating(REMOVE))
            }),
            desc("add a part"),
            false,
        )
        .unwrap();
    parts
        .register_operation(
            REMOVE,
            handler_fn(|ctx, op| {
                *ctx.sub_model_mut() = ModelNode::Undefined;
                Ok(op.compensating(ADD))
            }),
            desc("remove a part"),
            false,
        )
        .unwrap();

    let special = registry
        .root_mut()
        .register_child(PathElement::new("thing", "special"))
        .unwrap();
    special
        .register_operation(
            "whoami",
            query_fn(|_ctx, _op| Ok(ModelNode::from("concrete"))),
            desc("which registration"),
            false,
        )
        .unwrap();

    registry
}

fn registry() -> ResourceRegistry {
    registry_with(Arc::new(Notify::new()))
}

fn start() -> ModelController {
    ModelController::builder(registry()).start()
}

async fn add_thing(controller: &ModelController, name: &str, size: i64) {
    let request = req(ADD, &format!("/thing={}", name)).with("size", size);
    let state = controller.execute_and_wait(request).await;
    assert!(state.is_success(), "add failed: {:?}", state);
}

// ===========================================================================
// Registry
// ===========================================================================

#[test]
fn concrete_registration_beats_wildcard() {
    let registry = registry();
    let special = registry.resolve(&addr("/thing=special")).unwrap();
    let other = registry.resolve(&addr("/thing=other")).unwrap();
    assert_eq!(special.address(), &addr("/thing=special"));
    assert_eq!(other.address().to_string(), "/thing=*");
}

#[test]
fn resolve_unknown_type_fails() {
    let registry = registry();
    assert!(matches!(
        registry.resolve(&addr("/widget=a")),
        Err(OperationError::AddressNotFound(_))
    ));
}

#[test]
fn inherited_operations_reach_descendants() {
    let registry = registry();
    let entry = registry.operation(&addr("/thing=a"), READ_RESOURCE).unwrap();
    assert!(entry.inherited);
    let names = registry.operation_names_at(&addr("/thing=a")).unwrap();
    assert!(names.contains(&"append".to_string()));
    assert!(names.contains(&WRITE_ATTRIBUTE.to_string()));
}

#[test]
fn non_inherited_operations_stay_put() {
    let mut registry = ResourceRegistry::new();
    registry
        .root_mut()
        .register_operation("local", query_fn(|_, _| Ok(ModelNode::Undefined)), desc("local"), false)
        .unwrap();
    registry.root_mut().register_child(PathElement::wildcard("thing")).unwrap();
    assert!(registry.operation(&PathAddress::root(), "local").is_ok());
    assert!(matches!(
        registry.operation(&addr("/thing=a"), "local"),
        Err(OperationError::UnknownOperation { .. })
    ));
}

#[test]
fn duplicate_registrations_are_rejected() {
    let mut registry = registry();
    let root = registry.root_mut();
    assert!(matches!(
        root.register_operation(READ_RESOURCE, query_fn(|_, _| Ok(ModelNode::Undefined)), desc("dup"), true),
        Err(RegistrationError::DuplicateOperation { .. })
    ));
    assert!(matches!(
        root.register_child(PathElement::wildcard("thing")),
        Err(RegistrationError::DuplicateChild { .. })
    ));
    let things = root.child_mut(&PathElement::wildcard("thing")).unwrap();
    assert!(matches!(
        things.register_attribute("size", None, None, Storage::Runtime),
        Err(RegistrationError::DuplicateAttribute { .. })
    ));
}

#[test]
fn describe_lists_children_and_attributes() {
    let registry = registry();
    let tree = registry.root().describe();
    let thing = tree.get("children").and_then(|c| c.get("thing=*")).unwrap();
    assert_eq!(
        thing.get("attributes").and_then(|a| a.get("status")).and_then(|s| s.get("storage")),
        Some(&ModelNode::from("runtime"))
    );
    assert!(tree.get("children").and_then(|c| c.get("thing=special")).is_some());
}

// ===========================================================================
// Dispatch failures
// ===========================================================================

#[tokio::test]
async fn malformed_request_fails_without_handler() {
    let controller = start();
    let state = controller.execute_and_wait(ModelNode::from(json!({"address": []}))).await;
    assert!(matches!(state, OperationState::Failed(OperationError::Malformed(_))));

    let state = controller.execute_and_wait(req(ADD, "/thing=*")).await;
    assert!(matches!(state, OperationState::Failed(OperationError::Malformed(_))));
}

#[tokio::test]
async fn unknown_operation_leaves_model_unchanged() {
    let controller = start();
    add_thing(&controller, "a", 1).await;
    let before = controller.read_model().await;

    let state = controller.execute_and_wait(req("frobnicate", "/thing=a")).await;
    assert!(matches!(state, OperationState::Failed(OperationError::UnknownOperation { .. })));
    assert_eq!(controller.read_model().await, before);
}

#[tokio::test]
async fn unknown_address_fails() {
    let controller = start();
    let state = controller.execute_and_wait(req(ADD, "/widget=a")).await;
    assert!(matches!(state, OperationState::Failed(OperationError::AddressNotFound(_))));
}

#[tokio::test]
async fn concrete_handler_is_dispatched() {
    let controller = start();
    let special = controller.execute_and_wait(req("whoami", "/thing=special")).await;
    let other = controller.execute_and_wait(req("whoami", "/thing=other")).await;
    assert_eq!(special.result(), Some(&ModelNode::from("concrete")));
    assert_eq!(other.result(), Some(&ModelNode::from("wildcard")));
}

// ===========================================================================
// Commit and compensation
// ===========================================================================

#[tokio::test]
async fn compensating_operation_restores_state() {
    let controller = start();
    let before = controller.read_model().await;

    let state = controller.execute_and_wait(req(ADD, "/thing=a").with("size", 4)).await;
    let compensating = state.compensating().cloned().unwrap();
    assert_eq!(controller.read_model_at(&addr("/thing=a")).await.get("size"), Some(&ModelNode::Int(4)));

    let removed = controller.execute_and_wait(compensating).await;
    assert!(removed.is_success());
    assert_eq!(controller.read_model().await, before);

    // and back again
    let readd = controller.execute_and_wait(removed.compensating().cloned().unwrap()).await;
    assert!(readd.is_success());
    assert_eq!(controller.read_model_at(&addr("/thing=a")).await.get("size"), Some(&ModelNode::Int(4)));
}

#[tokio::test]
async fn failed_handler_leaves_model_unchanged() {
    let controller = start();
    add_thing(&controller, "a", 1).await;
    let before = controller.read_model().await;

    let state = controller.execute_and_wait(req("explode", "/thing=a")).await;
    assert_eq!(state, OperationState::Failed(OperationError::handler_failure("boom")));
    assert_eq!(controller.read_model().await, before);
}

#[tokio::test]
async fn dropped_channel_is_contract_failure() {
    let controller = start();
    add_thing(&controller, "a", 1).await;
    let before = controller.read_model().await;

    let state = controller.execute_and_wait(req("forget", "/thing=a")).await;
    assert!(matches!(state, OperationState::Failed(OperationError::Contract(_))));
    assert_eq!(controller.read_model().await, before);
}

#[tokio::test]
async fn panicking_handler_fails_and_writer_keeps_running() {
    let services = Arc::new(InMemoryServiceContainer::new());
    let controller = ModelController::builder(registry()).services(services.clone()).start();
    add_thing(&controller, "a", 1).await;
    let before = controller.read_model().await;

    let state = controller.execute_and_wait(req("crash", "/thing=a")).await;
    match state {
        OperationState::Failed(OperationError::Contract(message)) => assert!(message.contains("panicked")),
        other => panic!("unexpected state {:?}", other),
    }
    assert_eq!(controller.read_model().await, before);
    assert!(!services.contains(&ServiceName::new("doomed.service")));

    // the writer lane survives and keeps committing
    add_thing(&controller, "b", 2).await;
    assert_eq!(
        controller.read_model_at(&addr("/thing=b")).await.get("size"),
        Some(&ModelNode::Int(2))
    );
}

#[tokio::test]
async fn child_add_requires_parent_resource() {
    let controller = start();
    let empty = controller.read_model().await;

    let state = controller.execute_and_wait(req(ADD, "/thing=a/part=p")).await;
    assert_eq!(
        state,
        OperationState::Failed(OperationError::AddressNotFound(addr("/thing=a")))
    );
    assert_eq!(controller.read_model().await, empty);

    add_thing(&controller, "a", 1).await;
    let parent_only = controller.read_model().await;
    let added = controller.execute_and_wait(req(ADD, "/thing=a/part=p")).await;
    assert!(added.is_success(), "add failed: {:?}", added);
    assert!(controller.read_model_at(&addr("/thing=a/part=p")).await.is_defined());

    let undo = controller.execute_and_wait(added.compensating().cloned().unwrap()).await;
    assert!(undo.is_success());
    assert_eq!(controller.read_model().await, parent_only);
}

#[tokio::test]
async fn writes_apply_in_submission_order() {
    let controller = start();
    add_thing(&controller, "a", 1).await;

    let mut tokens = Vec::new();
    for i in 0..50i64 {
        tokens.push(controller.execute(req("append", "/thing=a").with(VALUE, i)).await);
    }
    let states = futures::future::join_all(tokens.iter().map(|t| t.wait())).await;
    assert!(states.iter().all(OperationState::is_success));

    let items = controller.read_model_at(&addr("/thing=a")).await;
    let expected: Vec<ModelNode> = (0..50i64).map(ModelNode::Int).collect();
    assert_eq!(items.get("items").and_then(ModelNode::as_list), Some(expected.as_slice()));
}

#[tokio::test]
async fn concurrent_reads_see_committed_state() {
    let controller = start();
    add_thing(&controller, "a", 2).await;

    let reads = (0..20).map(|_| {
        let controller = controller.clone();
        async move {
            controller
                .execute_and_wait(req(READ_ATTRIBUTE, "/thing=a").with(NAME, "size"))
                .await
        }
    });
    for state in futures::future::join_all(reads).await {
        assert_eq!(state.result(), Some(&ModelNode::Int(2)));
    }
}

// ===========================================================================
// Cancellation
// ===========================================================================

#[tokio::test]
async fn cancel_before_mutation_is_cancelled() {
    let controller = start();
    add_thing(&controller, "a", 1).await;
    let before = controller.read_model().await;

    let token = controller.execute(req("slow", "/thing=a")).await;
    token.cancel();
    assert_eq!(token.wait().await, OperationState::Cancelled);
    assert_eq!(controller.read_model().await, before);
    assert!(token.is_cancel_requested());
}

#[tokio::test]
async fn cancel_of_queued_operation_skips_it() {
    let controller = start();
    add_thing(&controller, "a", 1).await;

    let first = controller.execute(req("slow", "/thing=a")).await;
    let second = controller.execute(req("append", "/thing=a").with(VALUE, "late")).await;
    second.cancel();

    assert!(first.wait().await.is_success());
    assert_eq!(second.wait().await, OperationState::Cancelled);
    assert!(!controller.read_model_at(&addr("/thing=a")).await.has_defined("items"));
}

#[tokio::test]
async fn cancel_after_mutation_is_ignored() {
    let mutated = Arc::new(Notify::new());
    let controller = ModelController::builder(registry_with(mutated.clone())).start();
    add_thing(&controller, "a", 1).await;

    let token = controller.execute(req("mutate-then-wait", "/thing=a")).await;
    mutated.notified().await;
    token.cancel();

    assert!(token.wait().await.is_success());
    assert_eq!(
        controller.read_model_at(&addr("/thing=a")).await.get("committed"),
        Some(&ModelNode::Boolean(true))
    );
}

#[tokio::test]
async fn state_is_pending_until_complete() {
    let controller = start();
    add_thing(&controller, "a", 1).await;
    let token = controller.execute(req("slow", "/thing=a")).await;
    assert_eq!(token.state(), OperationState::Pending);
    assert!(token.wait().await.is_success());
    assert!(token.state().is_terminal());
}

// ===========================================================================
// Services
// ===========================================================================

#[tokio::test]
async fn failed_operation_rolls_back_services() {
    let services = Arc::new(InMemoryServiceContainer::new());
    let controller = ModelController::builder(registry()).services(services.clone()).start();
    add_thing(&controller, "a", 1).await;

    let state = controller.execute_and_wait(req("install-then-fail", "/thing=a")).await;
    assert!(matches!(state, OperationState::Failed(OperationError::HandlerFailure(_))));
    assert!(!services.contains(&ServiceName::new("test.service")));
    assert!(!controller.read_model_at(&addr("/thing=a")).await.has_defined("installed"));
}

#[tokio::test]
async fn service_start_failure_fails_operation() {
    let services = Arc::new(InMemoryServiceContainer::new());
    let controller = ModelController::builder(registry()).services(services.clone()).start();
    add_thing(&controller, "a", 1).await;

    let state = controller.execute_and_wait(req("install-broken", "/thing=a")).await;
    match state {
        OperationState::Failed(OperationError::ServiceInstall(message)) => assert!(message.contains("port in use")),
        other => panic!("unexpected state {:?}", other),
    }
    assert!(services.names().is_empty());
}

#[tokio::test]
async fn service_target_rollback_restores_removed_service() {
    let services: Arc<dyn ServiceContainer> = Arc::new(InMemoryServiceContainer::new());
    services.install(ServiceName::new("keep.me"), Arc::new(TestService)).await.unwrap();

    let mut registry = registry();
    let things = registry.root_mut().child_mut(&PathElement::wildcard("thing")).unwrap();
    struct RemoveThenFail;
    #[async_trait::async_trait]
    impl OperationHandler for RemoveThenFail {
        async fn execute(&self, ctx: &mut OperationContext, _op: &Operation, results: ResultChannel) {
            if let Some(target) = ctx.service_target() {
                let _ = target.remove(&ServiceName::new("keep.me")).await;
            }
            results.fail(OperationError::handler_failure("nope"));
        }
    }
    things.register_operation("remove-then-fail", Arc::new(RemoveThenFail), desc("x"), false).unwrap();

    let controller = ModelController::builder(registry).services(services.clone()).start();
    add_thing(&controller, "a", 1).await;
    let state = controller.execute_and_wait(req("remove-then-fail", "/thing=a")).await;
    assert!(!state.is_success());
    assert!(services.contains(&ServiceName::new("keep.me")));
}

#[tokio::test]
async fn admin_only_mode_has_no_service_target() {
    let runtime = start();
    add_thing(&runtime, "a", 1).await;
    let state = runtime.execute_and_wait(req("probe-runtime", "/thing=a")).await;
    assert_eq!(state.result(), Some(&ModelNode::Boolean(true)));

    let admin = ModelController::builder(registry()).mode(ControllerMode::AdminOnly).start();
    assert_eq!(admin.mode(), ControllerMode::AdminOnly);
    add_thing(&admin, "a", 1).await;
    let state = admin.execute_and_wait(req("probe-runtime", "/thing=a")).await;
    assert_eq!(state.result(), Some(&ModelNode::Boolean(false)));

    // handlers that need services simply skip them
    let state = admin.execute_and_wait(req("install-broken", "/thing=a")).await;
    assert!(state.is_success());
}

// ===========================================================================
// Global operations
// ===========================================================================

#[tokio::test]
async fn read_resource_collapses_children_unless_recursive() {
    let controller = start();
    add_thing(&controller, "a", 1).await;

    let shallow = controller.execute_and_wait(req(READ_RESOURCE, "/")).await;
    assert_eq!(
        shallow.result().and_then(|r| r.get("thing")).and_then(|t| t.get("a")),
        Some(&ModelNode::Undefined)
    );

    let deep = controller
        .execute_and_wait(req(READ_RESOURCE, "/").with(RECURSIVE, true))
        .await;
    assert_eq!(
        deep.result().and_then(|r| r.get("thing")).and_then(|t| t.get("a")).and_then(|a| a.get("size")),
        Some(&ModelNode::Int(1))
    );
}

#[tokio::test]
async fn read_resource_of_missing_resource_fails() {
    let controller = start();
    let state = controller.execute_and_wait(req(READ_RESOURCE, "/thing=ghost")).await;
    assert!(matches!(state, OperationState::Failed(OperationError::AddressNotFound(_))));
}

#[tokio::test]
async fn read_resource_can_include_runtime_attributes() {
    let controller = start();
    add_thing(&controller, "a", 1).await;
    let state = controller
        .execute_and_wait(req(READ_RESOURCE, "/thing=a").with("include-runtime", true))
        .await;
    assert_eq!(state.result().and_then(|r| r.get("status")), Some(&ModelNode::from("down")));
}

#[tokio::test]
async fn read_resource_rejects_non_boolean_flags() {
    let controller = start();
    add_thing(&controller, "a", 1).await;
    for flag in [RECURSIVE, "include-runtime"] {
        let state = controller
            .execute_and_wait(req(READ_RESOURCE, "/thing=a").with(flag, "sometimes"))
            .await;
        assert!(
            matches!(state, OperationState::Failed(OperationError::TypeMismatch { .. })),
            "{} accepted a non-boolean: {:?}",
            flag,
            state
        );
    }
}

#[tokio::test]
async fn write_attribute_compensation_restores_previous_value() {
    let controller = start();
    add_thing(&controller, "a", 3).await;
    let before = controller.read_model().await;

    let state = controller
        .execute_and_wait(req(WRITE_ATTRIBUTE, "/thing=a").with(NAME, "size").with(VALUE, "7"))
        .await;
    assert!(state.is_success());
    assert_eq!(controller.read_model_at(&addr("/thing=a")).await.get("size"), Some(&ModelNode::Int(7)));

    let compensating = state.compensating().cloned().unwrap();
    assert_eq!(compensating.get(OP), Some(&ModelNode::from(WRITE_ATTRIBUTE)));
    assert_eq!(compensating.get(NAME), Some(&ModelNode::from("size")));
    assert_eq!(compensating.get(VALUE), Some(&ModelNode::Int(3)));

    assert!(controller.execute_and_wait(compensating).await.is_success());
    assert_eq!(controller.read_model().await, before);
}

#[tokio::test]
async fn write_attribute_on_unset_attribute_compensates_with_undefined() {
    let controller = start();
    add_thing(&controller, "a", 3).await;
    let before = controller.read_model().await;

    let state = controller
        .execute_and_wait(req(WRITE_ATTRIBUTE, "/thing=a").with(NAME, "flag").with(VALUE, "true"))
        .await;
    let compensating = state.compensating().cloned().unwrap();
    assert_eq!(compensating.get(VALUE), Some(&ModelNode::Undefined));
    assert_eq!(controller.read_model_at(&addr("/thing=a")).await.get("flag"), Some(&ModelNode::Boolean(true)));

    assert!(controller.execute_and_wait(compensating).await.is_success());
    assert_eq!(controller.read_model().await, before);
}

#[tokio::test]
async fn write_attribute_rejections() {
    let controller = start();
    add_thing(&controller, "a", 3).await;
    let before = controller.read_model().await;

    let unknown = controller
        .execute_and_wait(req(WRITE_ATTRIBUTE, "/thing=a").with(NAME, "colour").with(VALUE, "red"))
        .await;
    assert!(matches!(unknown, OperationState::Failed(OperationError::UnknownAttribute { .. })));

    let read_only = controller
        .execute_and_wait(req(WRITE_ATTRIBUTE, "/thing=a").with(NAME, "label").with(VALUE, "x"))
        .await;
    assert!(matches!(read_only, OperationState::Failed(OperationError::Unsupported(_))));

    let not_bool = controller
        .execute_and_wait(req(WRITE_ATTRIBUTE, "/thing=a").with(NAME, "flag").with(VALUE, "maybe"))
        .await;
    assert!(matches!(not_bool, OperationState::Failed(OperationError::TypeMismatch { .. })));

    let not_int = controller
        .execute_and_wait(req(WRITE_ATTRIBUTE, "/thing=a").with(NAME, "size").with(VALUE, "big"))
        .await;
    assert!(matches!(not_int, OperationState::Failed(OperationError::TypeMismatch { .. })));

    assert_eq!(controller.read_model().await, before);
}

#[tokio::test]
async fn read_attribute_uses_read_handler_or_model() {
    let controller = start();
    add_thing(&controller, "a", 3).await;

    let size = controller
        .execute_and_wait(req(READ_ATTRIBUTE, "/thing=a").with(NAME, "size"))
        .await;
    assert_eq!(size.result(), Some(&ModelNode::Int(3)));

    let status = controller
        .execute_and_wait(req(READ_ATTRIBUTE, "/thing=a").with(NAME, "status"))
        .await;
    assert_eq!(status.result(), Some(&ModelNode::from("down")));

    let unknown = controller
        .execute_and_wait(req(READ_ATTRIBUTE, "/thing=a").with(NAME, "colour"))
        .await;
    assert!(matches!(unknown, OperationState::Failed(OperationError::UnknownAttribute { .. })));
}

#[tokio::test]
async fn introspection_operations() {
    let controller = start();
    add_thing(&controller, "a", 1).await;
    add_thing(&controller, "b", 2).await;

    let children = controller
        .execute_and_wait(req(READ_CHILDREN_NAMES, "/").with(CHILD_TYPE, "thing"))
        .await;
    assert_eq!(
        children.result(),
        Some(&ModelNode::List(vec!["a".into(), "b".into()]))
    );

    let names = controller.execute_and_wait(req(READ_OPERATION_NAMES, "/thing=a")).await;
    let names = names.result().and_then(ModelNode::as_list).unwrap();
    assert!(names.contains(&ModelNode::from("append")));
    assert!(names.contains(&ModelNode::from(READ_RESOURCE)));

    let description = controller
        .execute_and_wait(req(READ_OPERATION_DESCRIPTION, "/thing=a").with(NAME, "append"))
        .await;
    assert_eq!(
        description.result().and_then(|d| d.get("description")),
        Some(&ModelNode::from("append an item"))
    );

    let bad_type = controller
        .execute_and_wait(req(READ_CHILDREN_NAMES, "/").with(CHILD_TYPE, "widget"))
        .await;
    assert!(!bad_type.is_success());
}

// ===========================================================================
// History, undo, boot
// ===========================================================================

#[tokio::test]
async fn undo_last_walks_history_backwards() {
    let controller = start();
    add_thing(&controller, "a", 1).await;
    let after_add = controller.read_model().await;
    let state = controller
        .execute_and_wait(req(WRITE_ATTRIBUTE, "/thing=a").with(NAME, "size").with(VALUE, 5))
        .await;
    assert!(state.is_success());
    assert_eq!(controller.history().len(), 2);

    assert!(controller.undo_last().await.unwrap().is_success());
    assert_eq!(controller.read_model().await, after_add);
    assert_eq!(controller.history().len(), 1);

    assert!(controller.undo_last().await.unwrap().is_success());
    assert!(!controller.read_model().await.has_defined("thing"));
    assert!(controller.undo_last().await.is_none());
}

#[tokio::test]
async fn undo_without_compensation_is_unsupported() {
    let controller = start();
    add_thing(&controller, "a", 1).await;
    controller
        .execute_and_wait(req("append", "/thing=a").with(VALUE, "x"))
        .await;

    let state = controller.undo_last().await.unwrap();
    assert!(matches!(state, OperationState::Failed(OperationError::Unsupported(_))));
    assert_eq!(controller.history().len(), 2);
}

#[tokio::test]
async fn history_is_bounded() {
    let config = ControllerConfig {
        history_limit: 3,
        ..ControllerConfig::default()
    };
    let controller = ModelController::builder(registry()).config(config).start();
    for name in ["a", "b", "c", "d", "e"] {
        add_thing(&controller, name, 1).await;
    }
    let history = controller.history();
    assert_eq!(history.len(), 3);
    assert_eq!(
        history[0].operation.get(OP_ADDR),
        Some(&addr("/thing=c").to_model())
    );
}

#[tokio::test]
async fn reads_are_not_recorded() {
    let controller = start();
    add_thing(&controller, "a", 1).await;
    controller.execute_and_wait(req(READ_RESOURCE, "/thing=a")).await;
    assert_eq!(controller.history().len(), 1);
}

#[tokio::test]
async fn boot_stops_at_first_failure() {
    let controller = start();
    let operations = vec![
        req(ADD, "/thing=a"),
        req(ADD, "/thing=a"),
        req(ADD, "/thing=b"),
    ];
    let err = controller.boot(operations).await.unwrap_err();
    assert_eq!(err.index, 1);
    assert_eq!(err.operation, ADD);
    let model = controller.read_model().await;
    assert!(model.get("thing").and_then(|t| t.get("a")).is_some());
    assert!(model.get("thing").and_then(|t| t.get("b")).is_none());
}

#[tokio::test]
async fn boot_applies_everything() {
    let controller = start();
    let applied = controller
        .boot(vec![req(ADD, "/thing=a"), req(ADD, "/thing=b").with("size", 2)])
        .await
        .unwrap();
    assert_eq!(applied, 2);
}

// ===========================================================================
// Persistence
// ===========================================================================

#[tokio::test]
async fn commits_persist_configuration_view() {
    let dir = tempfile::tempdir().unwrap();
    let persister = JsonFilePersister::new(dir.path().join("model.json"));
    let controller = ModelController::builder(registry())
        .persister(Arc::new(persister.clone()))
        .start();

    add_thing(&controller, "a", 3).await;
    controller.execute_and_wait(req("observe", "/thing=a")).await;

    // the live model keeps the runtime attribute
    assert!(controller.read_model_at(&addr("/thing=a")).await.has_defined("status"));

    let stored = persister.load().unwrap().unwrap();
    let thing = stored.get("thing").and_then(|t| t.get("a")).unwrap();
    assert_eq!(thing.get("size"), Some(&ModelNode::Int(3)));
    assert!(thing.get("status").is_none());
}

#[tokio::test]
async fn failed_operations_are_not_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let persister = JsonFilePersister::new(dir.path().join("model.json"));
    let controller = ModelController::builder(registry())
        .persister(Arc::new(persister.clone()))
        .start();

    controller.execute_and_wait(req("explode", "/thing=a")).await;
    assert!(persister.load().unwrap().is_none());
}

#[test]
fn configuration_view_keeps_unregistered_keys() {
    let registry = registry();
    let model = ModelNode::from(json!({
        "thing": {"a": {"size": 1, "status": "up", "notes": "kept"}},
        "other": true
    }));
    let view = configuration_view(&registry, &model);
    assert_eq!(
        view,
        ModelNode::from(json!({
            "thing": {"a": {"size": 1, "notes": "kept"}},
            "other": true
        }))
    );
}
