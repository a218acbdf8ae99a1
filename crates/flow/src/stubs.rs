// Archivo: stubs.rs
// Propósito: implementaciones en memoria para pruebas y wiring rápido.
//
// Incluye un repositorio en memoria (`InMemoryWorkflowRepository`), una cola
// de trabajos (`InMemoryJobQueue`) y servicios simulados (`StubServices`)
// con fallos configurables. No son durables; se usan en demos y pruebas.
use crate::domain::{ActionRecord, ActionState, ActionType, Job, JobHandle, StagedFile, WorkflowRecord, WorkflowState};
use crate::errors::{FlowError, Result};
use crate::repository::{JobDispatcher, WorkflowRepository};
use crate::services::{IndexService, ObjectStore, RemoteQueue, ServiceResult};
use chrono::Utc;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Repositorio en memoria. Conserva el orden de inserción de registros y
/// acciones para que los listados sean deterministas.
pub struct InMemoryWorkflowRepository {
    records: Mutex<IndexMap<Uuid, WorkflowRecord>>,
    actions: Mutex<IndexMap<Uuid, ActionRecord>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self { records: Mutex::new(IndexMap::new()),
               actions: Mutex::new(IndexMap::new()) }
    }

    /// Helper para mapear `Mutex::lock()` en un `Result` con
    /// `FlowError::Storage`.
    fn lock<'a, T>(&'a self, m: &'a Mutex<T>) -> std::result::Result<MutexGuard<'a, T>, FlowError> {
        m.lock().map_err(|e| FlowError::Storage(format!("mutex poisoned: {:?}", e)))
    }

    fn filter_records<F>(&self, pred: F) -> Result<Vec<WorkflowRecord>>
        where F: Fn(&WorkflowRecord) -> bool
    {
        let records = self.lock(&self.records)?;
        Ok(records.values().filter(|r| pred(r)).cloned().collect())
    }
}

impl Default for InMemoryWorkflowRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowRepository for InMemoryWorkflowRepository {
    fn create_record(&self, record: WorkflowRecord) -> Result<Uuid> {
        let mut records = self.lock(&self.records)?;
        if records.contains_key(&record.id) {
            return Err(FlowError::Conflict(format!("workflow {} ya existe", record.id)));
        }
        let id = record.id;
        records.insert(id, record);
        Ok(id)
    }

    fn find_record(&self, id: &Uuid) -> Result<Option<WorkflowRecord>> {
        Ok(self.lock(&self.records)?.get(id).cloned())
    }

    fn update_record(&self, record: &WorkflowRecord) -> Result<()> {
        let mut records = self.lock(&self.records)?;
        let stored = records.get_mut(&record.id)
                            .ok_or_else(|| FlowError::NotFound(format!("workflow {}", record.id)))?;
        let state = stored.state;
        *stored = record.clone();
        stored.state = state;
        Ok(())
    }

    fn compare_and_set_state(&self, id: &Uuid, expected: WorkflowState, new: WorkflowState) -> Result<bool> {
        let mut records = self.lock(&self.records)?;
        let stored = records.get_mut(id)
                            .ok_or_else(|| FlowError::NotFound(format!("workflow {}", id)))?;
        if stored.state != expected {
            return Ok(false);
        }
        stored.state = new;
        Ok(true)
    }

    fn force_state(&self, id: &Uuid, state: WorkflowState) -> Result<()> {
        let mut records = self.lock(&self.records)?;
        let stored = records.get_mut(id)
                            .ok_or_else(|| FlowError::NotFound(format!("workflow {}", id)))?;
        stored.state = state;
        Ok(())
    }

    fn list_by_bulk(&self, bulk_id: &Uuid) -> Result<Vec<WorkflowRecord>> {
        self.filter_records(|r| r.bulk_id == Some(*bulk_id))
    }

    fn list_by_manifest(&self, manifest_id: &Uuid) -> Result<Vec<WorkflowRecord>> {
        self.filter_records(|r| r.manifest_id == Some(*manifest_id))
    }

    fn list_records(&self) -> Result<Vec<WorkflowRecord>> {
        self.filter_records(|_| true)
    }

    fn create_action(&self, action: ActionRecord) -> Result<Uuid> {
        let id = action.id;
        self.lock(&self.actions)?.insert(id, action);
        Ok(id)
    }

    fn find_action(&self, id: &Uuid) -> Result<Option<ActionRecord>> {
        Ok(self.lock(&self.actions)?.get(id).cloned())
    }

    fn find_actions(&self, bulk_id: &Uuid, action_type: ActionType) -> Result<Vec<ActionRecord>> {
        let actions = self.lock(&self.actions)?;
        Ok(actions.values()
                  .filter(|a| a.bulk_id == Some(*bulk_id) && a.action_type == action_type)
                  .cloned()
                  .collect())
    }

    fn actions_for(&self, workflow_id: &Uuid) -> Result<Vec<ActionRecord>> {
        let actions = self.lock(&self.actions)?;
        Ok(actions.values()
                  .filter(|a| a.workflow_id == *workflow_id)
                  .cloned()
                  .collect())
    }

    fn finish_action(&self, id: &Uuid, state: ActionState, result: JsonValue, error: Option<String>) -> Result<bool> {
        let mut actions = self.lock(&self.actions)?;
        let action = actions.get_mut(id)
                            .ok_or_else(|| FlowError::NotFound(format!("acción {}", id)))?;
        if action.state != ActionState::Pending {
            return Ok(false);
        }
        action.state = state;
        action.result = result;
        action.error = error;
        action.finished_at = Some(Utc::now());
        Ok(true)
    }

    fn acknowledge_action(&self, id: &Uuid) -> Result<bool> {
        let mut actions = self.lock(&self.actions)?;
        let action = actions.get_mut(id)
                            .ok_or_else(|| FlowError::NotFound(format!("acción {}", id)))?;
        if action.acknowledged {
            return Ok(false);
        }
        action.acknowledged = true;
        Ok(true)
    }
}

/// Cola FIFO de trabajos. Implementa `JobDispatcher`; los workers la vacían
/// con `claim`.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    queue: Mutex<VecDeque<Job>>,
    reject_dispatch: AtomicBool,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, job: Job) {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).push_back(job);
    }

    /// Reclama el siguiente trabajo disponible, si existe.
    pub fn claim(&self) -> Option<Job> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Simula una cola caída: los despachos siguientes fallan.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.reject_dispatch.store(unavailable, Ordering::SeqCst);
    }
}

impl JobDispatcher for InMemoryJobQueue {
    fn dispatch(&self, job: Job) -> Result<JobHandle> {
        if self.reject_dispatch.load(Ordering::SeqCst) {
            return Err(FlowError::Storage("cola de trabajos no disponible".into()));
        }
        let handle = JobHandle { job_id: job.id, action_id: job.action_id };
        self.enqueue(job);
        Ok(handle)
    }
}

/// Servicios simulados de almacenamiento, índice y cola remota.
///
/// Las acciones tienen éxito salvo que se configure un fallo con `fail_on`
/// (por registro) o `fail_always` (por tipo de acción).
#[derive(Debug, Default)]
pub struct StubServices {
    failures: Mutex<HashSet<(Option<Uuid>, ActionType)>>,
    calls: Mutex<Vec<(Uuid, ActionType)>>,
}

impl StubServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, workflow_id: Uuid, action: ActionType) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((Some(workflow_id), action));
    }

    pub fn fail_always(&self, action: ActionType) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((None, action));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Acciones ejecutadas, en orden.
    pub fn calls(&self) -> Vec<(Uuid, ActionType)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls_of(&self, action: ActionType) -> usize {
        self.calls().iter().filter(|(_, a)| *a == action).count()
    }

    fn run(&self, record: &WorkflowRecord, action: ActionType) -> ServiceResult<()> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((record.id, action));
        let failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        if failures.contains(&(Some(record.id), action)) || failures.contains(&(None, action)) {
            return Err(format!("{} falló para {}", action, record.item_id.as_deref().unwrap_or("registro")));
        }
        Ok(())
    }
}

impl ObjectStore for StubServices {
    fn stage(&self, record: &WorkflowRecord) -> ServiceResult<StagedFile> {
        self.run(record, ActionType::Upload)?;
        let name = record.item_id.clone().unwrap_or_else(|| record.id.to_string());
        Ok(StagedFile { key: format!("staging/{}/{}", record.submission_id, name),
                        size: name.len() as u64,
                        checksum: None })
    }

    fn store(&self, record: &WorkflowRecord, replace: bool) -> ServiceResult<()> {
        self.run(record, if replace { ActionType::Update } else { ActionType::Store })
    }

    fn unstore(&self, record: &WorkflowRecord) -> ServiceResult<()> {
        self.run(record, ActionType::UnStore)
    }
}

impl IndexService for StubServices {
    fn index(&self, record: &WorkflowRecord) -> ServiceResult<()> {
        self.run(record, ActionType::Index)
    }

    fn unindex(&self, record: &WorkflowRecord) -> ServiceResult<()> {
        self.run(record, ActionType::UnIndex)
    }
}

impl RemoteQueue for StubServices {
    fn enqueue(&self, record: &WorkflowRecord) -> ServiceResult<String> {
        self.run(record, ActionType::Queue)?;
        Ok(format!("remote-{}", record.id.simple()))
    }

    fn withdraw(&self, record: &WorkflowRecord) -> ServiceResult<()> {
        self.run(record, ActionType::UnRecord)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WorkflowKind;

    #[test]
    fn update_never_touches_state() {
        let repo = InMemoryWorkflowRepository::new();
        let mut record = WorkflowRecord::new(WorkflowKind::Create, Uuid::new_v4());
        let id = repo.create_record(record.clone()).expect("create");
        record.state = WorkflowState::Submitted;
        record.detail = Some("x".into());
        repo.update_record(&record).expect("update");
        let stored = repo.get_record(&id).expect("get");
        assert_eq!(stored.state, WorkflowState::Started);
        assert_eq!(stored.detail.as_deref(), Some("x"));
    }

    #[test]
    fn cas_only_applies_on_expected_state() {
        let repo = InMemoryWorkflowRepository::new();
        let id = repo.create_record(WorkflowRecord::new(WorkflowKind::Create, Uuid::new_v4()))
                     .expect("create");
        assert!(!repo.compare_and_set_state(&id, WorkflowState::Uploading, WorkflowState::Storing)
                     .expect("cas"));
        assert!(repo.compare_and_set_state(&id, WorkflowState::Started, WorkflowState::Uploading)
                    .expect("cas"));
    }

    #[test]
    fn actions_finish_and_acknowledge_once() {
        let repo = InMemoryWorkflowRepository::new();
        let action = ActionRecord::new(ActionType::Upload, Uuid::new_v4(), None);
        let id = repo.create_action(action).expect("create");
        assert!(repo.finish_action(&id, ActionState::Succeeded, JsonValue::Null, None).expect("finish"));
        assert!(!repo.finish_action(&id, ActionState::Failed, JsonValue::Null, None).expect("finish again"));
        assert!(repo.acknowledge_action(&id).expect("ack"));
        assert!(!repo.acknowledge_action(&id).expect("ack again"));
    }

    #[test]
    fn unavailable_queue_rejects_dispatch() {
        let queue = InMemoryJobQueue::new();
        queue.set_unavailable(true);
        let id = Uuid::new_v4();
        let job = Job { id: Uuid::new_v4(),
                        action_id: Uuid::new_v4(),
                        action_type: ActionType::Upload,
                        workflow_id: id,
                        attrs: JsonValue::Null,
                        continuation: crate::continuation::Continuation::new(id,
                                                                             crate::continuation::NextStep::UploadDone),
                        created_at: Utc::now() };
        assert!(queue.dispatch(job).is_err());
        assert!(queue.is_empty());
    }
}
