//! Deployment scanner subsystem - `/subsystem=deployment-scanner`
//!
//! Named scanners live at `scanner=*` below the subsystem. An enabled scanner
//! is backed by a `deployment-scanner.<name>` service in runtime mode.

use crate::common::{
    add_operation_from, add_request, optional_string, parameters, require_absent, require_resource,
    service_failure, subsystem, subsystem_address, SubsystemAdd, SubsystemRemove,
};
use opkernel_controller::{
    query_fn, Extension, OperationContext, OperationHandler, RegistrationError, RegistryNode, ResultChannel, Service,
    ServiceError, ServiceName, StaticDescription, Storage, WriteAttributeHandler,
};
use opkernel_core::{operation_for, ModelNode, ModelType, Operation, OperationError, PathElement, Result, ADD, REMOVE};
use std::sync::Arc;
use tracing::{debug, info};

pub const DEPLOYMENT_SCANNER: &str = "deployment-scanner";
pub const SCANNER: &str = "scanner";

pub const PATH: &str = "path";
pub const RELATIVE_TO: &str = "relative-to";
pub const SCAN_INTERVAL: &str = "scan-interval";
pub const SCAN_ENABLED: &str = "scan-enabled";
pub const RUNNING: &str = "running";

pub const ENABLE: &str = "enable";
pub const DISABLE: &str = "disable";

const SCANNER_PARAMETERS: &[&str] = &[PATH, RELATIVE_TO, SCAN_INTERVAL, SCAN_ENABLED];

pub fn scanner_service(name: &str) -> ServiceName {
    ServiceName::new(DEPLOYMENT_SCANNER).append(name)
}

fn scanner_name(ctx: &OperationContext) -> Result<String> {
    ctx.address()
        .last()
        .map(|element| element.value().to_string())
        .ok_or_else(|| OperationError::malformed("scanner address has no name"))
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct DeploymentScannerService {
    path: String,
    relative_to: Option<String>,
    scan_interval: i64,
}

impl DeploymentScannerService {
    /// Build from a scanner's model node.
    pub fn from_model(model: &ModelNode) -> Result<Self> {
        Ok(Self {
            path: model.require(PATH)?.as_string()?,
            relative_to: model.get(RELATIVE_TO).filter(|v| v.is_defined()).map(ModelNode::as_string).transpose()?,
            scan_interval: model.get(SCAN_INTERVAL).map(ModelNode::as_i64).transpose()?.unwrap_or(0),
        })
    }

    /// The directory scanned, with `relative-to` prepended when set.
    pub fn resolved_path(&self) -> String {
        match &self.relative_to {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), self.path),
            None => self.path.clone(),
        }
    }
}

#[async_trait::async_trait]
impl Service for DeploymentScannerService {
    async fn start(&self) -> std::result::Result<(), ServiceError> {
        if self.scan_interval < 0 {
            return Err(ServiceError::failed(format!("negative scan interval {}", self.scan_interval)));
        }
        info!("Scanning {} every {}ms", self.resolved_path(), self.scan_interval);
        Ok(())
    }

    async fn stop(&self) {
        info!("Stopped scanning {}", self.resolved_path());
    }

    fn status(&self) -> ModelNode {
        ModelNode::new_object()
            .with(PATH, self.resolved_path())
            .with(SCAN_INTERVAL, self.scan_interval)
    }
}

// ---------------------------------------------------------------------------
// Extension
// ---------------------------------------------------------------------------

pub struct DeploymentScannerExtension;

impl Extension for DeploymentScannerExtension {
    fn name(&self) -> &str {
        DEPLOYMENT_SCANNER
    }

    fn initialize(&self, root: &mut RegistryNode) -> std::result::Result<(), RegistrationError> {
        debug!("Initializing deployment scanner extension");
        let subsystem = root.register_child(PathElement::new("subsystem", DEPLOYMENT_SCANNER))?;
        subsystem.register_operation(
            ADD,
            Arc::new(SubsystemAdd),
            StaticDescription::shared("Add the deployment scanner subsystem"),
            false,
        )?;
        subsystem.register_operation(
            REMOVE,
            SubsystemRemove::shared(&[SCANNER]),
            StaticDescription::shared("Remove the deployment scanner subsystem"),
            false,
        )?;

        let scanners = subsystem.register_child(PathElement::wildcard(SCANNER))?;
        scanners.register_operation(ADD, Arc::new(ScannerAdd), StaticDescription::shared("Add a deployment scanner"), false)?;
        scanners.register_operation(
            REMOVE,
            Arc::new(ScannerRemove),
            StaticDescription::shared("Remove a deployment scanner"),
            false,
        )?;
        scanners.register_operation(
            ENABLE,
            Arc::new(ScannerToggle { enable: true }),
            StaticDescription::shared("Enable scanning"),
            false,
        )?;
        scanners.register_operation(
            DISABLE,
            Arc::new(ScannerToggle { enable: false }),
            StaticDescription::shared("Disable scanning"),
            false,
        )?;

        scanners.register_attribute(PATH, None, Some(WriteAttributeHandler::shared()), Storage::Configuration)?;
        scanners.register_attribute(RELATIVE_TO, None, Some(WriteAttributeHandler::shared()), Storage::Configuration)?;
        scanners.register_attribute(
            SCAN_INTERVAL,
            None,
            Some(Arc::new(WriteAttributeHandler::typed(ModelType::Int))),
            Storage::Configuration,
        )?;
        scanners.register_attribute(SCAN_ENABLED, None, None, Storage::Configuration)?;
        scanners.register_attribute(
            RUNNING,
            Some(query_fn(|ctx, _op| {
                let name = scanner_name(ctx)?;
                Ok(ModelNode::Boolean(ctx.service(&scanner_service(&name)).is_some()))
            })),
            None,
            Storage::Runtime,
        )?;
        Ok(())
    }

    fn startup_operations(&self, model: &ModelNode) -> Vec<ModelNode> {
        let Some(node) = subsystem(model, DEPLOYMENT_SCANNER) else {
            return Vec::new();
        };
        let address = subsystem_address(DEPLOYMENT_SCANNER);
        let mut operations = vec![operation_for(ADD, &address)];
        if let Some(scanners) = node.get(SCANNER) {
            for name in scanners.keys() {
                if let Some(scanner) = scanners.get(name).filter(|s| s.is_defined()) {
                    let scanner_address = address.append(PathElement::new(SCANNER, name));
                    operations.push(add_request(&scanner_address, scanner, SCANNER_PARAMETERS));
                }
            }
        }
        operations
    }
}

// ---------------------------------------------------------------------------
// Scanner handlers
// ---------------------------------------------------------------------------

struct ScannerAdd;

#[async_trait::async_trait]
impl OperationHandler for ScannerAdd {
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel) {
        if let Err(e) = require_absent(ctx) {
            return results.fail(e);
        }
        let model = match build_scanner(operation) {
            Ok(model) => model,
            Err(e) => return results.fail(e),
        };
        let name = match scanner_name(ctx) {
            Ok(name) => name,
            Err(e) => return results.fail(e),
        };
        let enabled = model.get(SCAN_ENABLED).and_then(|v| v.as_bool().ok()).unwrap_or(true);

        if enabled {
            if let Some(target) = ctx.service_target() {
                let service = match DeploymentScannerService::from_model(&model) {
                    Ok(service) => Arc::new(service),
                    Err(e) => return results.fail(e),
                };
                if let Err(e) = target.install(scanner_service(&name), service).await {
                    return results.fail(service_failure(e));
                }
            }
        }

        *ctx.sub_model_mut() = model;
        results.complete(operation.compensating(REMOVE));
    }
}

/// Validated scanner model from an `add` request. `path` is required;
/// `scan-interval` defaults to 0 and `scan-enabled` to true.
fn build_scanner(operation: &Operation) -> Result<ModelNode> {
    let mut model = parameters(operation.request(), SCANNER_PARAMETERS)?;
    model.set(PATH, operation.require(PATH)?.as_string()?);
    if let Some(relative_to) = optional_string(operation, RELATIVE_TO)? {
        model.set(RELATIVE_TO, relative_to);
    }
    let interval = model.get(SCAN_INTERVAL).map(ModelNode::as_i64).transpose()?.unwrap_or(0);
    model.set(SCAN_INTERVAL, interval);
    let enabled = model.get(SCAN_ENABLED).map(ModelNode::as_bool).transpose()?.unwrap_or(true);
    model.set(SCAN_ENABLED, enabled);
    Ok(model)
}

struct ScannerRemove;

#[async_trait::async_trait]
impl OperationHandler for ScannerRemove {
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel) {
        if let Err(e) = require_resource(ctx) {
            return results.fail(e);
        }
        let name = match scanner_name(ctx) {
            Ok(name) => name,
            Err(e) => return results.fail(e),
        };
        let compensating = add_operation_from(operation, ctx.sub_model(), SCANNER_PARAMETERS);

        if let Some(target) = ctx.service_target() {
            let service = scanner_service(&name);
            if target.contains(&service) {
                if let Err(e) = target.remove(&service).await {
                    return results.fail(service_failure(e));
                }
            }
        }

        *ctx.sub_model_mut() = ModelNode::Undefined;
        results.complete(compensating);
    }
}

/// `enable` / `disable`. The compensation is the opposite toggle when the
/// state changed, and the same no-op toggle when it did not.
struct ScannerToggle {
    enable: bool,
}

impl ScannerToggle {
    fn operation_name(enable: bool) -> &'static str {
        if enable {
            ENABLE
        } else {
            DISABLE
        }
    }
}

#[async_trait::async_trait]
impl OperationHandler for ScannerToggle {
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel) {
        if let Err(e) = require_resource(ctx) {
            return results.fail(e);
        }
        let name = match scanner_name(ctx) {
            Ok(name) => name,
            Err(e) => return results.fail(e),
        };
        let was_enabled = ctx
            .sub_model()
            .get(SCAN_ENABLED)
            .and_then(|v| v.as_bool().ok())
            .unwrap_or(true);
        if was_enabled == self.enable {
            return results.complete(operation.compensating(Self::operation_name(self.enable)));
        }

        if self.enable {
            let service = match DeploymentScannerService::from_model(ctx.sub_model()) {
                Ok(service) => Arc::new(service),
                Err(e) => return results.fail(e),
            };
            if let Some(target) = ctx.service_target() {
                if let Err(e) = target.replace(scanner_service(&name), service).await {
                    return results.fail(service_failure(e));
                }
            }
        } else if let Some(target) = ctx.service_target() {
            let service = scanner_service(&name);
            if target.contains(&service) {
                if let Err(e) = target.remove(&service).await {
                    return results.fail(service_failure(e));
                }
            }
        }

        ctx.sub_model_mut().set(SCAN_ENABLED, self.enable);
        results.complete(operation.compensating(Self::operation_name(!self.enable)));
    }
}
