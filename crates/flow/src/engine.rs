// Archivo: engine.rs
// Propósito: implementar `WorkflowEngine`, la máquina de estados persistente
// que aplica las tablas de transición y encadena pasos asíncronos mediante
// continuaciones serializables.
//
// Ningún método bloquea esperando a un paso: cada paso se despacha a un
// worker externo y el progreso se reanuda cuando ese worker invoca
// `complete` con la continuación que viajó en el trabajo.
use crate::continuation::{Continuation, NextStep};
use crate::domain::{ActionRecord, ActionState, ActionType, Job, JobHandle, RemoteRecord, StepStatus, WorkflowKind,
                    WorkflowRecord, WorkflowState};
use crate::errors::{FlowError, Result};
use crate::repository::{JobDispatcher, WorkflowRepository};
use crate::state_table;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Configuración del motor.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Reintentos de compare-and-set cuando otra escritura gana la carrera.
    pub cas_retries: usize,
    /// Repositorio considerado local por la política por defecto.
    pub local_repository: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { cas_retries: 3, local_repository: "local".into() }
    }
}

impl EngineConfig {
    /// Lee `FLOW_CAS_RETRIES` y `FLOW_LOCAL_REPOSITORY` (cargando `.env` si
    /// existe). Las variables ausentes toman el valor por defecto.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut cfg = Self::default();
        if let Ok(raw) = std::env::var("FLOW_CAS_RETRIES") {
            cfg.cas_retries = raw.trim()
                                 .parse()
                                 .map_err(|_| FlowError::InvalidArgument(format!("FLOW_CAS_RETRIES inválido: {}", raw)))?;
        }
        if let Ok(raw) = std::env::var("FLOW_LOCAL_REPOSITORY") {
            if !raw.trim().is_empty() {
                cfg.local_repository = raw.trim().to_string();
            }
        }
        Ok(cfg)
    }
}

/// Política que decide si un registro se queda en el repositorio local
/// (sólo indexado) o se encola al repositorio remoto.
pub trait TargetPolicy: Send + Sync {
    fn is_local_target(&self, record: &WorkflowRecord) -> bool;
}

impl<F> TargetPolicy for F where F: Fn(&WorkflowRecord) -> bool + Send + Sync
{
    fn is_local_target(&self, record: &WorkflowRecord) -> bool {
        self(record)
    }
}

/// Local cuando no hay descriptor remoto o cuando apunta al repositorio local.
#[derive(Debug, Clone)]
pub struct LocalRepositoryPolicy {
    pub local_repository: String,
}

impl TargetPolicy for LocalRepositoryPolicy {
    fn is_local_target(&self, record: &WorkflowRecord) -> bool {
        match &record.remote {
            None => true,
            Some(remote) => remote.repository == self.local_repository,
        }
    }
}

/// Máquina de estados de registros de workflow.
pub struct WorkflowEngine<R>
    where R: WorkflowRepository
{
    repo: Arc<R>,
    dispatcher: Arc<dyn JobDispatcher>,
    policy: Arc<dyn TargetPolicy>,
    config: EngineConfig,
}

impl<R> WorkflowEngine<R> where R: WorkflowRepository
{
    pub fn new(repo: Arc<R>, dispatcher: Arc<dyn JobDispatcher>, config: EngineConfig) -> Self {
        let policy = Arc::new(LocalRepositoryPolicy { local_repository: config.local_repository.clone() });
        Self { repo, dispatcher, policy, config }
    }

    /// Reemplaza la política de destino local/remoto.
    pub fn with_policy(mut self, policy: Arc<dyn TargetPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn repo(&self) -> &Arc<R> {
        &self.repo
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_local_target(&self, record: &WorkflowRecord) -> bool {
        self.policy.is_local_target(record)
    }

    /// Persiste un registro nuevo. Debe estar en `started`.
    pub fn create(&self, record: WorkflowRecord) -> Result<Uuid> {
        if record.state != WorkflowState::Started {
            return Err(FlowError::InvalidArgument(format!("un registro nuevo debe estar en started, no en {}",
                                                          record.state)));
        }
        let kind = record.kind;
        let id = self.repo.create_record(record)?;
        log::info!("workflow {} creado ({})", id, kind);
        Ok(id)
    }

    pub fn get(&self, id: &Uuid) -> Result<WorkflowRecord> {
        self.repo.get_record(id)
    }

    /// Registros hijos de un lote (excluye al registro masivo).
    pub fn children(&self, bulk_id: &Uuid) -> Result<Vec<WorkflowRecord>> {
        Ok(self.repo
               .list_by_bulk(bulk_id)?
               .into_iter()
               .filter(|r| r.id != *bulk_id)
               .collect())
    }

    /// Intenta la transición a `to`. Devuelve el estado previo si se aplicó
    /// y `None` si la tabla no la admite desde el estado actual. Una
    /// transición rechazada nunca es un error.
    pub fn transition_to(&self, id: &Uuid, to: WorkflowState) -> Result<Option<WorkflowState>> {
        for _ in 0..=self.config.cas_retries {
            let record = self.repo.get_record(id)?;
            let from = record.state;
            if !state_table::is_member(record.kind, from) {
                return Err(FlowError::Invariant(format!("workflow {} en estado {} ajeno a la tabla {}",
                                                        id, from, record.kind)));
            }
            if matches!(from, WorkflowState::Indexed | WorkflowState::Approved) && self.is_local_target(&record) {
                log::warn!("transición rechazada para {}: {} es final para un destino local", id, from);
                return Ok(None);
            }
            if !state_table::can_transition(record.kind, from, to) {
                log::warn!("transición rechazada para {} ({}): {} -> {}", id, record.kind, from, to);
                return Ok(None);
            }
            if self.repo.compare_and_set_state(id, from, to)? {
                log::debug!("workflow {}: {} -> {}", id, from, to);
                return Ok(Some(from));
            }
        }
        log::warn!("transición a {} para {} perdió la carrera {} veces", to, id, self.config.cas_retries + 1);
        Ok(None)
    }

    /// Restaura `prev` sin validar contra la tabla. Sólo se usa cuando la
    /// secuencia de un paso falla después de un `transition_to` exitoso.
    pub fn revert_to(&self, id: &Uuid, prev: WorkflowState) -> Result<()> {
        self.repo.force_state(id, prev)?;
        log::info!("workflow {} revertido a {}", id, prev);
        Ok(())
    }

    /// Lanza el pipeline completo según el tipo del registro.
    pub fn launch(&self, id: &Uuid) -> Result<StepStatus> {
        let mut record = self.repo.get_record(id)?;
        let steps: Vec<NextStep> = match record.kind {
            WorkflowKind::Create | WorkflowKind::Edit => {
                vec![NextStep::Upload, NextStep::Promote, NextStep::Index, NextStep::Submit]
            }
            WorkflowKind::Remove => {
                if record.remote.is_some() && !self.is_local_target(&record) {
                    vec![NextStep::Unrecord, NextStep::Unindex, NextStep::Unstore]
                } else {
                    vec![NextStep::Unindex, NextStep::Unstore]
                }
            }
            WorkflowKind::Review => Vec::new(),
            kind => {
                return Err(FlowError::InvalidArgument(format!("{} se lanza con BulkCoordinator::run", kind)));
            }
        };
        record.launched = true;
        self.repo.update_record(&record)?;
        let outcome = match Continuation::chain(*id, &steps) {
            Some(chain) => self.run_continuation(chain, None),
            None => self.begin_review(id),
        };
        if outcome.is_err() {
            let mut record = self.repo.get_record(id)?;
            record.launched = false;
            self.repo.update_record(&record)?;
        }
        outcome
    }

    /// Devuelve un registro abortado o cancelado a `started` para poder
    /// relanzarlo. Limpia el motivo y la continuación estacionada.
    pub fn reset(&self, id: &Uuid) -> Result<WorkflowState> {
        let mut record = self.repo.get_record(id)?;
        let prev = record.state;
        if !matches!(prev, WorkflowState::Aborted | WorkflowState::Canceled) {
            return Err(FlowError::InvalidArgument(format!("sólo se reinician registros abortados o cancelados, {} está en {}",
                                                          id, prev)));
        }
        record.parked = None;
        record.detail = None;
        record.launched = false;
        self.repo.update_record(&record)?;
        self.repo.force_state(id, WorkflowState::Started)?;
        log::info!("workflow {} reiniciado desde {}", id, prev);
        Ok(prev)
    }

    // ----- pasos -----

    pub fn upload(&self, id: &Uuid, then: Option<Continuation>) -> Result<StepStatus> {
        self.start_step(id, WorkflowState::Uploading, ActionType::Upload, NextStep::UploadDone, then)
    }

    /// Promueve el archivo de staging al almacenamiento. La acción generada
    /// es la `store_action` del registro (Store o Update).
    pub fn promote(&self, id: &Uuid, then: Option<Continuation>) -> Result<StepStatus> {
        let action = self.store_action(id)?;
        self.start_step(id, WorkflowState::Storing, action, NextStep::PromoteDone, then)
    }

    pub fn index(&self, id: &Uuid, then: Option<Continuation>) -> Result<StepStatus> {
        self.start_step(id, WorkflowState::Indexing, ActionType::Index, NextStep::IndexDone, then)
    }

    pub fn submit(&self, id: &Uuid, then: Option<Continuation>) -> Result<StepStatus> {
        self.start_step(id, WorkflowState::Submitting, ActionType::Queue, NextStep::SubmitDone, then)
    }

    pub fn unrecord(&self, id: &Uuid, then: Option<Continuation>) -> Result<StepStatus> {
        self.start_step(id, WorkflowState::Unrecording, ActionType::UnRecord, NextStep::UnrecordDone, then)
    }

    pub fn unindex(&self, id: &Uuid, then: Option<Continuation>) -> Result<StepStatus> {
        self.start_step(id, WorkflowState::Unindexing, ActionType::UnIndex, NextStep::UnindexDone, then)
    }

    pub fn unstore(&self, id: &Uuid, then: Option<Continuation>) -> Result<StepStatus> {
        let action = self.store_action(id)?;
        self.start_step(id, WorkflowState::Unstoring, action, NextStep::UnstoreDone, then)
    }

    pub fn begin_review(&self, id: &Uuid) -> Result<StepStatus> {
        self.settle(id, WorkflowState::Reviewing)
    }

    /// Aprueba una revisión; los destinos remotos continúan con `submit`.
    pub fn approve(&self, id: &Uuid) -> Result<StepStatus> {
        if self.transition_to(id, WorkflowState::Approved)?.is_none() {
            return Ok(StepStatus::Rejected);
        }
        let record = self.repo.get_record(id)?;
        if self.is_local_target(&record) {
            Ok(StepStatus::Completed { state: WorkflowState::Approved })
        } else {
            self.submit(id, None)
        }
    }

    pub fn reject(&self, id: &Uuid, reason: Option<&str>) -> Result<StepStatus> {
        let status = self.settle(id, WorkflowState::Rejected)?;
        if status.is_accepted() {
            let mut record = self.repo.get_record(id)?;
            record.detail = reason.map(str::to_string);
            self.repo.update_record(&record)?;
        }
        Ok(status)
    }

    /// Cancela el registro. Rechazado si el estado actual no admite
    /// `canceling` o si el registro ya terminó (`indexed`/`approved` con
    /// destino local); no interrumpe trabajo en vuelo.
    pub fn cancel(&self, id: &Uuid) -> Result<StepStatus> {
        if self.transition_to(id, WorkflowState::Canceling)?.is_none() {
            return Ok(StepStatus::Rejected);
        }
        let mut record = self.repo.get_record(id)?;
        record.parked = None;
        self.repo.update_record(&record)?;
        match self.transition_to(id, WorkflowState::Canceled)? {
            Some(_) => {
                log::info!("workflow {} cancelado", id);
                Ok(StepStatus::Completed { state: WorkflowState::Canceled })
            }
            None => {
                let record = self.repo.get_record(id)?;
                Ok(StepStatus::Completed { state: record.state })
            }
        }
    }

    /// Lleva el registro a `aborted` guardando el motivo.
    pub fn abort(&self, id: &Uuid, reason: &str) -> Result<bool> {
        let mut record = self.repo.get_record(id)?;
        record.detail = Some(reason.to_string());
        record.parked = None;
        self.repo.update_record(&record)?;
        let aborted = self.transition_to(id, WorkflowState::Aborted)?.is_some();
        if aborted {
            log::warn!("workflow {} abortado: {}", id, reason);
        }
        Ok(aborted)
    }

    // ----- callbacks -----

    pub fn upload_cb(&self, id: &Uuid, action_id: &Uuid, then: Option<Continuation>) -> Result<StepStatus> {
        self.finish_step(id, action_id, &[ActionType::Upload], None, then, |record, action| {
                if let Some(staged) = action.result.get("staged_file") {
                    record.staged_file = Some(serde_json::from_value(staged.clone())?);
                }
                record.last_saved = Some(Utc::now());
                Ok(())
            })
    }

    pub fn promote_cb(&self, id: &Uuid, action_id: &Uuid, then: Option<Continuation>) -> Result<StepStatus> {
        self.finish_step(id, action_id, &[ActionType::Store, ActionType::Update], None, then, |record, _| {
                record.last_saved = Some(Utc::now());
                Ok(())
            })
    }

    /// Aterriza en `indexed`. Los destinos locales terminan aquí y descartan
    /// la continuación interna (el envío remoto).
    pub fn index_cb(&self, id: &Uuid, action_id: &Uuid, then: Option<Continuation>) -> Result<StepStatus> {
        let record = self.repo.get_record(id)?;
        let then = if self.is_local_target(&record) { None } else { then };
        self.finish_step(id,
                         action_id,
                         &[ActionType::Index],
                         Some(WorkflowState::Indexed),
                         then,
                         |record, _| {
                             record.last_indexed = Some(Utc::now());
                             Ok(())
                         })
    }

    pub fn submit_cb(&self, id: &Uuid, action_id: &Uuid, then: Option<Continuation>) -> Result<StepStatus> {
        self.finish_step(id,
                         action_id,
                         &[ActionType::Queue],
                         Some(WorkflowState::Submitted),
                         then,
                         |record, action| {
                             let remote_id = action.result
                                                   .get("remote_id")
                                                   .and_then(|v| v.as_str())
                                                   .map(str::to_string);
                             let remote = record.remote.get_or_insert_with(|| RemoteRecord { repository: "remote".into(),
                                                                                            remote_id: None });
                             remote.remote_id = remote_id;
                             record.last_submitted = Some(Utc::now());
                             Ok(())
                         })
    }

    pub fn unrecord_cb(&self, id: &Uuid, action_id: &Uuid, then: Option<Continuation>) -> Result<StepStatus> {
        self.finish_step(id, action_id, &[ActionType::UnRecord], None, then, |record, _| {
                if let Some(remote) = record.remote.as_mut() {
                    remote.remote_id = None;
                }
                Ok(())
            })
    }

    pub fn unindex_cb(&self, id: &Uuid, action_id: &Uuid, then: Option<Continuation>) -> Result<StepStatus> {
        self.finish_step(id, action_id, &[ActionType::UnIndex], None, then, |record, _| {
                record.last_indexed = None;
                Ok(())
            })
    }

    pub fn unstore_cb(&self, id: &Uuid, action_id: &Uuid, then: Option<Continuation>) -> Result<StepStatus> {
        self.finish_step(id,
                         action_id,
                         &[ActionType::UnStore],
                         Some(WorkflowState::Removed),
                         then,
                         |record, _| {
                             record.staged_file = None;
                             Ok(())
                         })
    }

    // ----- continuaciones -----

    /// Único punto de despacho de continuaciones: resuelve `next_step` al
    /// paso o callback correspondiente del registro destino.
    pub fn run_continuation(&self, continuation: Continuation, action_id: Option<Uuid>) -> Result<StepStatus> {
        let (target, step, then) = continuation.split();
        let action = || {
            action_id.ok_or_else(|| FlowError::Invariant(format!("el callback {} requiere un id de acción", step)))
        };
        match step {
            NextStep::Upload => self.upload(&target, then),
            NextStep::Promote => self.promote(&target, then),
            NextStep::Index => self.index(&target, then),
            NextStep::Submit => self.submit(&target, then),
            NextStep::Unrecord => self.unrecord(&target, then),
            NextStep::Unindex => self.unindex(&target, then),
            NextStep::Unstore => self.unstore(&target, then),
            NextStep::UploadDone => self.upload_cb(&target, &action()?, then),
            NextStep::PromoteDone => self.promote_cb(&target, &action()?, then),
            NextStep::IndexDone => self.index_cb(&target, &action()?, then),
            NextStep::SubmitDone => self.submit_cb(&target, &action()?, then),
            NextStep::UnrecordDone => self.unrecord_cb(&target, &action()?, then),
            NextStep::UnindexDone => self.unindex_cb(&target, &action()?, then),
            NextStep::UnstoreDone => self.unstore_cb(&target, &action()?, then),
        }
    }

    /// Punto de entrada de los workers: entrega el resultado de la acción
    /// `action_id` al callback de la continuación y refresca el lote padre.
    pub fn complete(&self, action_id: &Uuid, continuation: Continuation) -> Result<StepStatus> {
        if !continuation.next_step.is_callback() {
            return Err(FlowError::Invariant(format!("{} no es un callback de finalización", continuation.next_step)));
        }
        let target = continuation.target_id;
        let status = self.run_continuation(continuation, Some(*action_id))?;
        let record = self.repo.get_record(&target)?;
        if let Some(bulk_id) = record.parent_bulk_id() {
            self.refresh_cohort(&bulk_id)?;
        }
        Ok(status)
    }

    /// Reanuda la continuación estacionada de un hijo de lote.
    pub fn resume_parked(&self, id: &Uuid) -> Result<StepStatus> {
        let mut record = self.repo.get_record(id)?;
        let next = match record.parked.take() {
            Some(next) => next,
            None => return Ok(StepStatus::Rejected),
        };
        self.repo.update_record(&record)?;
        log::info!("workflow {} reanuda {}", id, next.next_step);
        self.run_continuation(next, None)
    }

    /// Completa un lote `running` cuyos hijos están todos en reposo.
    pub fn refresh_cohort(&self, bulk_id: &Uuid) -> Result<Option<WorkflowState>> {
        let parent = match self.repo.find_record(bulk_id)? {
            Some(p) => p,
            None => return Ok(None),
        };
        if parent.state != WorkflowState::Running {
            return Ok(None);
        }
        let children = self.children(bulk_id)?;
        if !children.iter().all(|c| c.is_settled()) {
            return Ok(None);
        }
        match self.transition_to(bulk_id, WorkflowState::Completed)? {
            Some(_) => {
                log::info!("lote {} completado ({} registros)", bulk_id, children.len());
                Ok(Some(WorkflowState::Completed))
            }
            None => Ok(None),
        }
    }

    // ----- internos -----

    fn store_action(&self, id: &Uuid) -> Result<ActionType> {
        let record = self.repo.get_record(id)?;
        record.store_action
              .or_else(|| record.kind.storage_action())
              .ok_or_else(|| FlowError::Invariant(format!("{} no define acción de almacenamiento", record.kind)))
    }

    fn settle(&self, id: &Uuid, to: WorkflowState) -> Result<StepStatus> {
        match self.transition_to(id, to)? {
            Some(_) => Ok(StepStatus::Completed { state: to }),
            None => Ok(StepStatus::Rejected),
        }
    }

    /// (a) transición, (b) registro del callback en la continuación del
    /// trabajo, (c) despacho sin bloquear. Si el despacho falla se revierte.
    fn start_step(&self,
                  id: &Uuid,
                  to: WorkflowState,
                  action_type: ActionType,
                  callback: NextStep,
                  then: Option<Continuation>)
                  -> Result<StepStatus> {
        let prev = match self.transition_to(id, to)? {
            Some(prev) => prev,
            None => return Ok(StepStatus::Rejected),
        };
        let record = self.repo.get_record(id)?;
        match self.dispatch(&record, action_type, callback, then) {
            Ok(handle) => {
                log::info!("workflow {}: {} despachado (job {})", id, action_type, handle.job_id);
                Ok(StepStatus::Dispatched { handle })
            }
            Err(e) => {
                log::error!("workflow {}: fallo al despachar {}: {}", id, action_type, e);
                self.revert_to(id, prev)?;
                Err(e)
            }
        }
    }

    fn dispatch(&self,
                record: &WorkflowRecord,
                action_type: ActionType,
                callback: NextStep,
                then: Option<Continuation>)
                -> Result<JobHandle> {
        let action = ActionRecord::new(action_type, record.id, record.bulk_id);
        let action_id = self.repo.create_action(action)?;
        let job = Job { id: Uuid::new_v4(),
                        action_id,
                        action_type,
                        workflow_id: record.id,
                        attrs: json!({
                            "kind": record.kind,
                            "item_id": record.item_id,
                            "submission_id": record.submission_id,
                        }),
                        continuation: Continuation::new(record.id, callback).then(then),
                        created_at: Utc::now() };
        match self.dispatcher.dispatch(job) {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.repo
                    .finish_action(&action_id, ActionState::Failed, serde_json::Value::Null, Some(e.to_string()))?;
                Err(e)
            }
        }
    }

    fn load_action(&self, id: &Uuid, action_id: &Uuid, expected: &[ActionType]) -> Result<ActionRecord> {
        let action = self.repo
                         .find_action(action_id)?
                         .ok_or_else(|| FlowError::Invariant(format!("falta el registro de acción {}", action_id)))?;
        if action.workflow_id != *id {
            return Err(FlowError::Invariant(format!("la acción {} pertenece a {}, no a {}",
                                                    action_id, action.workflow_id, id)));
        }
        if !expected.contains(&action.action_type) {
            return Err(FlowError::Invariant(format!("acción {} de tipo inesperado {}", action_id, action.action_type)));
        }
        if action.state == ActionState::Pending {
            return Err(FlowError::Invariant(format!("la acción {} sigue pendiente", action_id)));
        }
        if !self.repo.acknowledge_action(action_id)? {
            return Err(FlowError::Invariant(format!("el callback de la acción {} ya fue entregado", action_id)));
        }
        Ok(action)
    }

    fn finish_step<F>(&self,
                      id: &Uuid,
                      action_id: &Uuid,
                      expected: &[ActionType],
                      landing: Option<WorkflowState>,
                      then: Option<Continuation>,
                      apply: F)
                      -> Result<StepStatus>
        where F: FnOnce(&mut WorkflowRecord, &ActionRecord) -> Result<()>
    {
        let action = self.load_action(id, action_id, expected)?;
        if action.state == ActionState::Failed {
            let reason = action.error
                               .clone()
                               .unwrap_or_else(|| format!("{} falló", action.action_type));
            self.abort(id, &reason)?;
            return Ok(StepStatus::Failed);
        }
        let mut record = self.repo.get_record(id)?;
        apply(&mut record, &action)?;
        self.repo.update_record(&record)?;
        if let Some(target) = landing {
            if self.transition_to(id, target)?.is_none() {
                return Ok(StepStatus::Rejected);
            }
        }
        self.proceed(id, then)
    }

    fn proceed(&self, id: &Uuid, then: Option<Continuation>) -> Result<StepStatus> {
        let next = match then {
            Some(next) => next,
            None => {
                let record = self.repo.get_record(id)?;
                return Ok(StepStatus::Completed { state: record.state });
            }
        };
        if let Some(status) = self.checkpoint(id, &next)? {
            return Ok(status);
        }
        self.run_continuation(next, None)
    }

    /// Punto de control entre pasos para hijos de un lote: estaciona la
    /// continuación si el lote está en pausa y cancela si el lote se canceló.
    fn checkpoint(&self, id: &Uuid, next: &Continuation) -> Result<Option<StepStatus>> {
        let mut record = self.repo.get_record(id)?;
        let parent_id = match record.parent_bulk_id() {
            Some(p) => p,
            None => return Ok(None),
        };
        let parent = match self.repo.find_record(&parent_id)? {
            Some(p) => p,
            None => return Ok(None),
        };
        match parent.state {
            WorkflowState::Pausing | WorkflowState::Paused => {
                record.parked = Some(next.clone());
                self.repo.update_record(&record)?;
                // el lote pudo reanudarse antes de que `parked` quedara escrito
                let parent = self.repo.get_record(&parent_id)?;
                if matches!(parent.state, WorkflowState::Pausing | WorkflowState::Paused) {
                    log::info!("workflow {} estaciona {} (lote {} en pausa)", id, next.next_step, parent_id);
                    return Ok(Some(StepStatus::Parked));
                }
                let mut record = self.repo.get_record(id)?;
                if record.parked.take().is_none() {
                    // otra reanudación ya tomó la continuación
                    return Ok(Some(StepStatus::Parked));
                }
                self.repo.update_record(&record)?;
                log::info!("workflow {} retoma {} (lote {} pasó a {})", id, next.next_step, parent_id, parent.state);
                self.checkpoint(id, next)
            }
            WorkflowState::Canceling | WorkflowState::Canceled => {
                let status = self.cancel(id)?;
                if status.is_rejected() {
                    Ok(None)
                } else {
                    Ok(Some(status))
                }
            }
            _ => Ok(None),
        }
    }
}
