// Archivo: slicer.rs
// Propósito: conducir la lista de ítems por el pipeline de pasos, en slices
// o ítem por ítem, acumulando éxitos y fallos.
use crate::config::BatchConfig;
use crate::errors::{BatchError, Result};
use crate::normalizer::{Command, MultiRequest, Normalized, Request};
use crate::step::{BatchCommand, PipelineStep, RandDraw, StepContext, StepExecutor, SubmissionBackend};
use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use submission_domain::{IdentifierResolver, InvalidReason, ItemId, ItemRef};
use uuid::Uuid;

/// Resultado por ítem en modo ítem por ítem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemReport {
    /// `(OK)` o `(FAIL)`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemReport {
    pub fn ok() -> Self {
        Self { status: "(OK)".into(), error: None }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self { status: "(FAIL)".into(), error: Some(reason.into()) }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Resultado de un lote.
///
/// `success` y las claves de `failure` son disjuntos y juntos cubren
/// `submitted`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub count: usize,
    pub submitted: Vec<ItemId>,
    pub success: Vec<ItemId>,
    pub failure: IndexMap<ItemId, String>,
    pub invalid: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub reports: IndexMap<ItemId, ItemReport>,
}

impl BatchResult {
    pub fn is_consistent(&self) -> bool {
        let disjoint = self.success.iter().all(|id| !self.failure.contains_key(id));
        let covered = self.submitted
                          .iter()
                          .all(|id| self.success.contains(id) || self.failure.contains_key(id));
        disjoint && covered
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressData {
    pub count: usize,
    pub submitted: Vec<ItemId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<Vec<ItemId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<IndexMap<ItemId, String>>,
}

/// Mensaje emitido después de cada ejecución de paso.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub manifest_id: Uuid,
    pub job_id: Uuid,
    pub step: PipelineStep,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub data: ProgressData,
}

pub type ProgressSink = dyn Fn(&ProgressMessage) + Send + Sync;

pub struct BatchSlicer {
    executor: StepExecutor,
    resolver: Arc<dyn IdentifierResolver>,
}

struct Run<'a> {
    manifest_id: Uuid,
    command: BatchCommand,
    count: usize,
    no_raise: bool,
    progress: Option<&'a ProgressSink>,
}

impl BatchSlicer {
    pub fn new(executor: StepExecutor, resolver: Arc<dyn IdentifierResolver>) -> Self {
        Self { executor, resolver }
    }

    /// Slicer con muestras aleatorias reales y la banda de fallos de `config`.
    pub fn from_config(config: &BatchConfig,
                       backend: Arc<dyn SubmissionBackend>,
                       resolver: Arc<dyn IdentifierResolver>)
                       -> Self {
        Self::new(StepExecutor::new(backend, Arc::new(RandDraw), config.fault()), resolver)
    }

    /// Ejecuta el pipeline completo para una solicitud normalizada.
    ///
    /// Una solicitud simple se procesa ítem por ítem y nunca propaga fallos
    /// de paso. Una solicitud compuesta se procesa por slices; con
    /// `no_raise` desactivado, el primer fallo sistémico de un paso se
    /// propaga.
    pub fn run(&self, request: &Normalized, no_raise: bool, progress: Option<&ProgressSink>) -> Result<BatchResult> {
        let run = Run { manifest_id: request.manifest_id(),
                        command: batch_command(request.command())?,
                        count: request.count(),
                        no_raise,
                        progress };
        let result = match request {
            Normalized::Single(r) => self.item_by_item(&run, r)?,
            Normalized::Multi(m) => self.by_slices(&run, m)?,
        };
        log::info!("lote {}: {} enviados, {} éxitos, {} fallos, {} inválidos",
                   run.manifest_id,
                   result.submitted.len(),
                   result.success.len(),
                   result.failure.len(),
                   result.invalid.len());
        Ok(result)
    }

    fn item_by_item(&self, run: &Run<'_>, request: &Request) -> Result<BatchResult> {
        let mut result = BatchResult { count: run.count, ..BatchResult::default() };
        let (ids, invalid) = self.resolve(request.items());
        result.invalid = invalid;
        let ctx = StepContext { manifest_id: run.manifest_id, job_id: request.job_id(), command: run.command };
        for id in ids {
            result.submitted.push(id.clone());
            let single = [id.clone()];
            let mut failed = None;
            for step in PipelineStep::ALL {
                let start = Utc::now();
                let outcome = self.executor.execute(step, &ctx, &single, true)?;
                let reason = outcome.get(&id).cloned();
                self.emit(run,
                          &ctx,
                          step,
                          start,
                          single.to_vec(),
                          if reason.is_none() { single.to_vec() } else { Vec::new() },
                          outcome);
                if let Some(reason) = reason {
                    failed = Some(reason);
                    break;
                }
            }
            match failed {
                Some(reason) => {
                    result.failure.insert(id.clone(), reason.clone());
                    result.reports.insert(id, ItemReport::fail(reason));
                }
                None => {
                    result.success.push(id.clone());
                    result.reports.insert(id, ItemReport::ok());
                }
            }
        }
        Ok(result)
    }

    fn by_slices(&self, run: &Run<'_>, request: &MultiRequest) -> Result<BatchResult> {
        let items: Vec<ItemRef> = request.parts.iter().flat_map(|p| p.items().iter().cloned()).collect();
        let (ids, invalid) = self.resolve(&items);
        let mut failure: IndexMap<ItemId, String> = IndexMap::new();
        let slice = request.slice_size.max(1);
        for (n, chunk) in ids.chunks(slice).enumerate() {
            let job_id = request.parts.get(n).map(|p| p.job_id()).unwrap_or(request.job_id);
            let ctx = StepContext { manifest_id: run.manifest_id, job_id, command: run.command };
            let mut alive: IndexSet<ItemId> = chunk.iter().cloned().collect();
            for step in PipelineStep::ALL {
                if alive.is_empty() {
                    break;
                }
                let members: Vec<ItemId> = alive.iter().cloned().collect();
                let start = Utc::now();
                let failed = match self.executor.execute(step, &ctx, &members, run.no_raise) {
                    Ok(failed) => failed,
                    Err(e) => {
                        self.emit(run, &ctx, step, start, members, Vec::new(), IndexMap::new());
                        return Err(e);
                    }
                };
                for id in failed.keys() {
                    alive.shift_remove(id);
                }
                self.emit(run, &ctx, step, start, members, alive.iter().cloned().collect(), failed.clone());
                failure.extend(failed);
            }
        }
        let success = ids.iter().filter(|id| !failure.contains_key(*id)).cloned().collect();
        Ok(BatchResult { count: run.count, submitted: ids, success, failure, invalid, reports: IndexMap::new() })
    }

    /// Resuelve en paralelo conservando el orden de entrada. Los duplicados
    /// de un id ya visto se omiten.
    fn resolve(&self, items: &[ItemRef]) -> (Vec<ItemId>, Vec<String>) {
        let resolved: Vec<std::result::Result<ItemId, InvalidReason>> =
            items.par_iter().map(|item| self.resolver.resolve(item)).collect();
        let mut ids: IndexSet<ItemId> = IndexSet::new();
        let mut invalid = Vec::new();
        for (item, outcome) in items.iter().zip(resolved) {
            match outcome {
                Ok(id) => {
                    if !ids.insert(id.clone()) {
                        log::debug!("ítem duplicado omitido: {}", id);
                    }
                }
                Err(reason) => invalid.push(format!("{}: {}", item.describe(), reason)),
            }
        }
        (ids.into_iter().collect(), invalid)
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(&self,
            run: &Run<'_>,
            ctx: &StepContext,
            step: PipelineStep,
            start: DateTime<Utc>,
            submitted: Vec<ItemId>,
            success: Vec<ItemId>,
            failure: IndexMap<ItemId, String>) {
        let sink = match run.progress {
            Some(sink) => sink,
            None => return,
        };
        let end = Utc::now();
        let message = ProgressMessage { manifest_id: ctx.manifest_id,
                                        job_id: ctx.job_id,
                                        step,
                                        start_time: start,
                                        end_time: end,
                                        duration_ms: (end - start).num_milliseconds().max(0),
                                        data: ProgressData { count: run.count,
                                                             submitted,
                                                             success: Some(success),
                                                             failure: if failure.is_empty() {
                                                                 None
                                                             } else {
                                                                 Some(failure)
                                                             } } };
        sink(&message);
    }
}

fn batch_command(command: Command) -> Result<BatchCommand> {
    match command {
        Command::Create => Ok(BatchCommand::Create),
        Command::Update => Ok(BatchCommand::Update),
        other => Err(BatchError::Validation(format!("{:?} no es una operación de lote", other))),
    }
}
