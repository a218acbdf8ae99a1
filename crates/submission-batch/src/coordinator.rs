// Archivo: coordinator.rs
// Propósito: fachada sin estado para llamadores externos: `batch_create`,
// `batch_update` y los comandos de control sobre lotes de workflows.
use crate::config::BatchConfig;
use crate::errors::{BatchError, Result};
use crate::normalizer::{post_flight, pre_flight, CallInput, CallOutcome, Command, FlightContext, Request, Response,
                        ResponseStatus};
use crate::slicer::{BatchSlicer, ProgressSink};
use flow::bulk::BulkCoordinator;
use flow::domain::{StepStatus, WorkflowKind, WorkflowRecord};
use flow::errors::FlowError;
use flow::repository::WorkflowRepository;
use serde_json::json;
use std::sync::Arc;
use submission_domain::{Manifest, ManifestLoader};
use uuid::Uuid;

/// Opciones de una llamada de lote.
#[derive(Clone)]
pub struct BatchOptions {
    /// Reemplaza al tamaño de slice configurado como base del clamp.
    pub batch_size: Option<usize>,
    /// Convierte los fallos sistémicos de un paso en fallos por ítem.
    pub no_raise: bool,
    pub extended: bool,
    pub progress: Option<Arc<ProgressSink>>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self { batch_size: None, no_raise: true, extended: false, progress: None }
    }
}

impl BatchOptions {
    pub fn with_progress(mut self, sink: Arc<ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }
}

/// Destino de un comando de control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Lote registrado para el manifiesto.
    Manifest(Uuid),
    /// Id de un registro de workflow.
    Job(Uuid),
}

#[derive(Debug, Clone)]
pub enum ControlCommand {
    Start { kind: WorkflowKind, manifest: Manifest },
    Pause(Target),
    Resume(Target),
    Restart(Target),
    Cancel(Target),
    List(Target),
}

pub struct SubmissionCoordinator<R>
    where R: WorkflowRepository
{
    config: BatchConfig,
    slicer: BatchSlicer,
    bulk: Arc<BulkCoordinator<R>>,
    loader: Arc<dyn ManifestLoader>,
}

impl<R> SubmissionCoordinator<R> where R: WorkflowRepository
{
    pub fn new(config: BatchConfig,
               slicer: BatchSlicer,
               bulk: Arc<BulkCoordinator<R>>,
               loader: Arc<dyn ManifestLoader>)
               -> Self {
        Self { config, slicer, bulk, loader }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn bulk(&self) -> &Arc<BulkCoordinator<R>> {
        &self.bulk
    }

    pub fn batch_create(&self, manifest: &Manifest, options: BatchOptions) -> Result<Response> {
        self.batch(Command::Create, manifest, options)
    }

    pub fn batch_update(&self, manifest: &Manifest, options: BatchOptions) -> Result<Response> {
        self.batch(Command::Update, manifest, options)
    }

    /// Lote a partir de una entrada arbitraria (ítems sueltos, JSON o una
    /// solicitud ya normalizada). El comando por defecto es `create`.
    pub fn call(&self, input: CallInput, options: BatchOptions) -> Result<Response> {
        let input = input.with_overrides(options.batch_size,
                                         options.extended || self.config.extended,
                                         Command::Create)?;
        self.execute(input, options)
    }

    fn batch(&self, command: Command, manifest: &Manifest, options: BatchOptions) -> Result<Response> {
        let items = manifest.items(self.loader.as_ref())?.to_vec();
        self.call(Request::new(command, manifest.id(), items).into(), options)
    }

    fn execute(&self, input: CallInput, options: BatchOptions) -> Result<Response> {
        let normalized = pre_flight(input, Command::Create, &self.config.policy())?;
        let ctx = normalized.context();
        log::info!("lote {} ({:?}): {} ítems, slice {:?}",
                   ctx.manifest_id,
                   normalized.command(),
                   normalized.count(),
                   normalized.slice_size());
        match self.slicer.run(&normalized, options.no_raise, options.progress.as_deref()) {
            Ok(result) => Ok(post_flight(&ctx, CallOutcome::Batch(result))),
            Err(e) if options.no_raise && !is_precondition(&e) => Ok(post_flight(&ctx, CallOutcome::Raised(e))),
            Err(e) => Err(e),
        }
    }

    /// Ejecuta un comando de control. Los destinos inexistentes o inválidos
    /// son errores; una transición inadmisible es una respuesta `rejected`.
    pub fn command(&self, command: ControlCommand) -> Result<Response> {
        let ctx = self.flight_for(&command)?;
        let outcome = match command {
            ControlCommand::Start { kind, manifest } => self.start(kind, manifest),
            ControlCommand::Pause(target) => self.bulk_command(target, |b, id| b.pause(id)),
            ControlCommand::Resume(target) => self.bulk_command(target, |b, id| b.resume(id)),
            ControlCommand::Restart(target) => self.bulk_command(target, |b, id| b.restart(id)),
            ControlCommand::Cancel(target) => self.cancel(target),
            ControlCommand::List(target) => self.list(target),
        };
        match outcome {
            Ok(outcome) => Ok(post_flight(&ctx, outcome)),
            Err(e) if is_precondition(&e) => Err(e),
            Err(e) => Ok(post_flight(&ctx, CallOutcome::Raised(e))),
        }
    }

    fn start(&self, kind: WorkflowKind, manifest: Manifest) -> Result<CallOutcome> {
        if !kind.is_bulk() {
            return Err(BatchError::Validation(format!("{} no es una operación masiva", kind.as_str())));
        }
        let record = WorkflowRecord::new_bulk(kind, Uuid::new_v4(), manifest.id());
        let id = self.bulk.create_bulk(record, manifest)?;
        let status = self.bulk.run(&id)?;
        self.status_outcome(&id, status)
    }

    fn bulk_command<F>(&self, target: Target, run: F) -> Result<CallOutcome>
        where F: FnOnce(&BulkCoordinator<R>, &Uuid) -> flow::errors::Result<StepStatus>
    {
        let id = self.bulk_target(target)?;
        let status = run(self.bulk.as_ref(), &id)?;
        self.status_outcome(&id, status)
    }

    fn cancel(&self, target: Target) -> Result<CallOutcome> {
        let id = match target {
            Target::Manifest(_) => self.bulk_target(target)?,
            Target::Job(id) => id,
        };
        let record = self.bulk.engine().get(&id)?;
        let status = if record.kind.is_bulk() {
            self.bulk.cancel(&id)?
        } else {
            self.bulk.engine().cancel(&id)?
        };
        match status {
            StepStatus::Rejected => Ok(CallOutcome::Rejected(format!("{} no admite cancelación en estado {}",
                                                                     id, record.state))),
            _ => Ok(CallOutcome::Payload(json!({ "id": id, "record": self.bulk.engine().get(&id)? }))),
        }
    }

    fn list(&self, target: Target) -> Result<CallOutcome> {
        let records: Vec<WorkflowRecord> = match target {
            Target::Manifest(_) => {
                let bulk_id = self.bulk_target(target)?;
                let mut records = vec![self.bulk.engine().get(&bulk_id)?];
                records.extend(self.bulk.engine().children(&bulk_id)?);
                records
            }
            Target::Job(id) => vec![self.bulk.engine().get(&id)?],
        };
        Ok(CallOutcome::Payload(serde_json::to_value(records)?))
    }

    fn bulk_target(&self, target: Target) -> Result<Uuid> {
        match target {
            Target::Job(id) => Ok(id),
            Target::Manifest(manifest_id) => self.bulk
                                                 .bulk_for_manifest(&manifest_id)?
                                                 .ok_or_else(|| {
                                                     BatchError::Validation(format!("no hay lote registrado para el manifiesto {}",
                                                                                    manifest_id))
                                                 }),
        }
    }

    fn status_outcome(&self, bulk_id: &Uuid, status: StepStatus) -> Result<CallOutcome> {
        match status {
            StepStatus::Rejected => {
                let state = self.bulk.engine().get(bulk_id)?.state;
                Ok(CallOutcome::Rejected(format!("el lote {} no admite el comando en estado {}", bulk_id, state)))
            }
            StepStatus::Failed => {
                let summary = self.bulk.summary(bulk_id)?;
                let mut response = Response::new(ResponseStatus::Failed, serde_json::to_value(&summary)?);
                response.error = Some(format!("la secuencia del lote {} no tuvo trabajo que hacer", bulk_id));
                Ok(CallOutcome::Response(response))
            }
            _ => Ok(CallOutcome::Payload(serde_json::to_value(self.bulk.summary(bulk_id)?)?)),
        }
    }

    fn flight_for(&self, command: &ControlCommand) -> Result<FlightContext> {
        let manifest_id = match command {
            ControlCommand::Start { manifest, .. } => manifest.id(),
            ControlCommand::Pause(t)
            | ControlCommand::Resume(t)
            | ControlCommand::Restart(t)
            | ControlCommand::Cancel(t)
            | ControlCommand::List(t) => match t {
                Target::Manifest(id) => *id,
                Target::Job(id) => self.bulk.engine().get(id)?.manifest_id.unwrap_or(*id),
            },
        };
        Ok(FlightContext::new(manifest_id, self.config.extended))
    }
}

/// Errores del llamador: se propagan en lugar de convertirse en respuesta.
fn is_precondition(error: &BatchError) -> bool {
    matches!(error,
             BatchError::Validation(_)
             | BatchError::Domain(_)
             | BatchError::Flow(FlowError::NotFound(_))
             | BatchError::Flow(FlowError::InvalidArgument(_)))
}
