//! Consumer of `OperatorAPI` operator commands.
//!
//! The body of such a command is a base64 encoded JSON [`Command`], or a
//! `{"commands": [...]}` batch. Each decoded command goes through the worker
//! pool; once all of them finished, the outcome is written back to the
//! command object's status.

use crate::command::{Command, Commands};
use crate::dispatch::{JobResult, WorkerPool};
use crate::error::ControllerError;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use crds::operator_command::{OPERATOR_API_COMMAND_TYPE, OPERATOR_EXECUTER};
use crds::{OperatorCommand, OperatorCommandStatus, OperatorCommandStatusError};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Message stored when more than one command of a batch failed
pub const MULTIPLE_ERRORS: &str = "Failed with multiple errors";

/// Writes the outcome of an operator command back to the cluster
#[async_trait::async_trait]
pub trait CommandStatusReporter: Send + Sync {
    async fn report(&self, command: &OperatorCommand, status: OperatorCommandStatus) -> Result<(), ControllerError>;
}

/// Final status of a command started at `started_at` that produced `errors`
pub fn completed_status(started_at: DateTime<Utc>, errors: &[String]) -> OperatorCommandStatus {
    let mut status = OperatorCommandStatus {
        executer: Some(OPERATOR_EXECUTER.to_string()),
        started: true,
        started_at: Some(started_at),
        completed: true,
        completed_at: Some(Utc::now()),
        ..Default::default()
    };
    match errors {
        [] => {}
        [only] => {
            status.error = Some(OperatorCommandStatusError {
                message: only.clone(),
                ..Default::default()
            });
        }
        many => {
            status.error = Some(OperatorCommandStatusError {
                message: MULTIPLE_ERRORS.to_string(),
                ..Default::default()
            });
            status.payload = serde_json::to_vec(many).ok().map(|raw| STANDARD.encode(raw));
        }
    }
    status
}

/// Patches the `status` subresource with a JSON merge patch
#[derive(Clone)]
pub struct KubeStatusReporter {
    client: Client,
}

impl KubeStatusReporter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl CommandStatusReporter for KubeStatusReporter {
    async fn report(&self, command: &OperatorCommand, status: OperatorCommandStatus) -> Result<(), ControllerError> {
        let namespace = command.namespace().unwrap_or_default();
        let api: Api<OperatorCommand> = Api::namespaced(self.client.clone(), &namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(&command.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!("Patched status of command {}/{}", namespace, command.name_any());
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Body {
    Batch(Commands),
    Single(Command),
}

/// Commands carried by the body of an operator command
pub fn decode_body(command: &OperatorCommand) -> Result<Vec<Command>, ControllerError> {
    let encoded = command
        .spec
        .body
        .as_deref()
        .filter(|b| !b.is_empty())
        .ok_or_else(|| ControllerError::Serialization("operator command has no body".to_string()))?;
    let raw = STANDARD
        .decode(encoded)
        .map_err(|e| ControllerError::Serialization(format!("body is not base64: {}", e)))?;
    let commands = match serde_json::from_slice(&raw)? {
        Body::Batch(batch) => batch.commands,
        Body::Single(single) => vec![single],
    };
    Ok(commands)
}

pub struct OperatorCommandsHandler {
    pool: WorkerPool,
    reporter: Arc<dyn CommandStatusReporter>,
}

impl OperatorCommandsHandler {
    pub fn new(pool: WorkerPool, reporter: Arc<dyn CommandStatusReporter>) -> Self {
        Self { pool, reporter }
    }

    /// Consume `commands` until the watcher goes away or `cancel` fires
    pub async fn run(self, mut commands: mpsc::UnboundedReceiver<OperatorCommand>, cancel: CancellationToken) {
        info!("Starting operator commands handler");
        loop {
            let command = tokio::select! {
                () = cancel.cancelled() => break,
                command = commands.recv() => command,
            };
            let Some(command) = command else {
                break;
            };
            if command.spec.command_type != OPERATOR_API_COMMAND_TYPE {
                debug!("Ignoring command {} of type {}", command.name_any(), command.spec.command_type);
                continue;
            }
            self.invoke(command).await;
        }
        debug!("Operator commands handler stopped");
    }

    async fn invoke(&self, command: OperatorCommand) {
        let started_at = Utc::now();
        let decoded = match decode_body(&command) {
            Ok(decoded) => decoded,
            Err(e) => {
                error!("Cannot decode command {}: {}", command.name_any(), e);
                report(self.reporter.as_ref(), &command, completed_status(started_at, &[e.to_string()])).await;
                return;
            }
        };

        let mut pending: Vec<oneshot::Receiver<JobResult>> = Vec::with_capacity(decoded.len());
        let mut errors = Vec::new();
        for cmd in decoded {
            info!("Invoking {} for {} from command {}", cmd.name, cmd.wlid, command.name_any());
            match self.pool.submit_with_report(cmd).await {
                Ok(done) => pending.push(done),
                Err(e) => {
                    errors.push(e.to_string());
                    break;
                }
            }
        }

        let reporter = Arc::clone(&self.reporter);
        tokio::spawn(async move {
            for done in pending {
                match done.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => errors.push(e),
                    Err(_) => errors.push(ControllerError::PoolClosed.to_string()),
                }
            }
            report(reporter.as_ref(), &command, completed_status(started_at, &errors)).await;
        });
    }
}

async fn report(reporter: &dyn CommandStatusReporter, command: &OperatorCommand, status: OperatorCommandStatus) {
    if let Err(e) = reporter.report(command, status).await {
        error!("Failed to report status of command {}: {}", command.name_any(), e);
    }
}
