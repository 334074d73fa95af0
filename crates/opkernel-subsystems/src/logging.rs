//! Logging subsystem - `/subsystem=logging`
//!
//! Holds the root logger definition. In runtime mode the root logger is
//! backed by a service under `logging.root-logger`.

use crate::common::{require_resource, service_failure, subsystem, subsystem_address, SubsystemAdd, SubsystemRemove};
use opkernel_controller::{
    Extension, OperationContext, OperationHandler, RegistrationError, RegistryNode, ResultChannel, Service,
    ServiceError, ServiceName, StaticDescription, Storage,
};
use opkernel_core::{operation_for, ModelNode, ModelType, Operation, OperationError, PathElement, Result, ADD, REMOVE};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

pub const SUBSYSTEM: &str = "subsystem";
pub const LOGGING: &str = "logging";

pub const ROOT_LOGGER: &str = "root-logger";
pub const LEVEL: &str = "level";
pub const HANDLERS: &str = "handlers";

pub const SET_ROOT_LOGGER: &str = "set-root-logger";
pub const REMOVE_ROOT_LOGGER: &str = "remove-root-logger";

pub fn root_logger_service() -> ServiceName {
    ServiceName::new(LOGGING).append(ROOT_LOGGER)
}

// ---------------------------------------------------------------------------
// Levels
// ---------------------------------------------------------------------------

/// Log level names accepted by `set-root-logger`, including the
/// `java.util.logging` spellings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    All,
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Off,
}

impl FromStr for LogLevel {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALL" => Ok(Self::All),
            "TRACE" | "FINEST" | "FINER" => Ok(Self::Trace),
            "DEBUG" | "FINE" => Ok(Self::Debug),
            "INFO" | "CONFIG" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "ERROR" | "SEVERE" => Ok(Self::Error),
            "FATAL" => Ok(Self::Fatal),
            "OFF" => Ok(Self::Off),
            _ => Err(OperationError::handler_failure(format!("unknown log level '{}'", s))),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::All => "ALL",
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
            Self::Off => "OFF",
        };
        write!(f, "{}", name)
    }
}

// ---------------------------------------------------------------------------
// Root logger service
// ---------------------------------------------------------------------------

pub struct RootLoggerService {
    level: LogLevel,
    handlers: ModelNode,
}

impl RootLoggerService {
    pub fn new(level: LogLevel, handlers: ModelNode) -> Self {
        Self { level, handlers }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }
}

#[async_trait::async_trait]
impl Service for RootLoggerService {
    async fn start(&self) -> std::result::Result<(), ServiceError> {
        info!("Root logger active at {}", self.level);
        Ok(())
    }

    async fn stop(&self) {
        info!("Root logger stopped");
    }

    fn status(&self) -> ModelNode {
        ModelNode::new_object()
            .with(LEVEL, self.level.to_string())
            .with(HANDLERS, self.handlers.clone())
    }
}

// ---------------------------------------------------------------------------
// Extension
// ---------------------------------------------------------------------------

pub struct LoggingExtension;

impl Extension for LoggingExtension {
    fn name(&self) -> &str {
        LOGGING
    }

    fn initialize(&self, root: &mut RegistryNode) -> std::result::Result<(), RegistrationError> {
        let subsystem = root.register_child(PathElement::new(SUBSYSTEM, LOGGING))?;
        subsystem.register_operation(
            ADD,
            Arc::new(SubsystemAdd),
            StaticDescription::shared("Add the logging subsystem"),
            false,
        )?;
        subsystem.register_operation(
            REMOVE,
            SubsystemRemove::shared(&[ROOT_LOGGER]),
            StaticDescription::shared("Remove the logging subsystem"),
            false,
        )?;
        subsystem.register_operation(
            SET_ROOT_LOGGER,
            Arc::new(SetRootLogger),
            StaticDescription::shared("Define the root logger level and handlers"),
            false,
        )?;
        subsystem.register_operation(
            REMOVE_ROOT_LOGGER,
            Arc::new(RemoveRootLogger),
            StaticDescription::shared("Remove the root logger definition"),
            false,
        )?;
        subsystem.register_attribute(ROOT_LOGGER, None, None, Storage::ConfigurationAndRuntime)?;
        Ok(())
    }

    fn startup_operations(&self, model: &ModelNode) -> Vec<ModelNode> {
        let Some(node) = subsystem(model, LOGGING) else {
            return Vec::new();
        };
        let address = subsystem_address(LOGGING);
        let mut operations = vec![operation_for(ADD, &address)];
        if let Some(root_logger) = node.get(ROOT_LOGGER).filter(|v| v.is_defined()) {
            let mut set = operation_for(SET_ROOT_LOGGER, &address);
            for key in [LEVEL, HANDLERS] {
                if let Some(value) = root_logger.get(key).filter(|v| v.is_defined()) {
                    set.set(key, value.clone());
                }
            }
            operations.push(set);
        }
        operations
    }
}

/// Compensation restoring whatever root logger was there before.
fn restore_root_logger(operation: &Operation, previous: Option<&ModelNode>) -> ModelNode {
    match previous.filter(|p| p.is_defined()) {
        Some(previous) => {
            let mut op = operation.compensating(SET_ROOT_LOGGER);
            for key in [LEVEL, HANDLERS] {
                if let Some(value) = previous.get(key).filter(|v| v.is_defined()) {
                    op.set(key, value.clone());
                }
            }
            op
        }
        None => operation.compensating(REMOVE_ROOT_LOGGER),
    }
}

struct SetRootLogger;

#[async_trait::async_trait]
impl OperationHandler for SetRootLogger {
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel) {
        if let Err(e) = require_resource(ctx) {
            return results.fail(e);
        }
        let level = match operation.require(LEVEL).and_then(ModelNode::as_string) {
            Ok(level) => level,
            Err(e) => return results.fail(e),
        };
        let parsed = match level.parse::<LogLevel>() {
            Ok(parsed) => parsed,
            Err(e) => return results.fail(e),
        };
        let handlers = operation.get(HANDLERS).cloned().unwrap_or_default();
        if handlers.is_defined() && handlers.as_list().is_none() {
            return results.fail(OperationError::type_mismatch(ModelType::List, &handlers));
        }
        let compensating = restore_root_logger(operation, ctx.sub_model().get(ROOT_LOGGER));

        if let Some(target) = ctx.service_target() {
            let service = Arc::new(RootLoggerService::new(parsed, handlers.clone()));
            if let Err(e) = target.replace(root_logger_service(), service).await {
                return results.fail(service_failure(e));
            }
        }

        let mut root_logger = ModelNode::new_object().with(LEVEL, level);
        if handlers.is_defined() {
            root_logger.set(HANDLERS, handlers);
        }
        ctx.sub_model_mut().set(ROOT_LOGGER, root_logger);
        results.complete(compensating);
    }
}

struct RemoveRootLogger;

#[async_trait::async_trait]
impl OperationHandler for RemoveRootLogger {
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel) {
        if let Err(e) = require_resource(ctx) {
            return results.fail(e);
        }
        let previous = ctx.sub_model().get(ROOT_LOGGER).cloned();
        let compensating = restore_root_logger(operation, previous.as_ref());
        if previous.is_none() {
            return results.complete(compensating);
        }

        if let Some(target) = ctx.service_target() {
            let name = root_logger_service();
            if target.contains(&name) {
                if let Err(e) = target.remove(&name).await {
                    return results.fail(service_failure(e));
                }
            }
        }
        ctx.sub_model_mut().remove(ROOT_LOGGER);
        results.complete(compensating);
    }
}
