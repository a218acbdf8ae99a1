// Archivo: services.rs
// Propósito: colaboradores opacos invocados por las acciones (almacenamiento,
// índice de búsqueda y cola del repositorio remoto) y el `ActionPerformer`
// que enruta cada tipo de acción hacia ellos.
use crate::domain::{ActionType, Job, StagedFile, WorkflowRecord};
use crate::repository::ActionPerformer;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

pub type ServiceResult<T> = std::result::Result<T, String>;

/// Almacenamiento de archivos: staging y promoción a almacenamiento final.
pub trait ObjectStore: Send + Sync {
    fn stage(&self, record: &WorkflowRecord) -> ServiceResult<StagedFile>;
    fn store(&self, record: &WorkflowRecord, replace: bool) -> ServiceResult<()>;
    fn unstore(&self, record: &WorkflowRecord) -> ServiceResult<()>;
}

/// Servicio de búsqueda/índice.
pub trait IndexService: Send + Sync {
    fn index(&self, record: &WorkflowRecord) -> ServiceResult<()>;
    fn unindex(&self, record: &WorkflowRecord) -> ServiceResult<()>;
}

/// Cola de envío al repositorio remoto.
pub trait RemoteQueue: Send + Sync {
    /// Encola el registro y devuelve el id remoto asignado.
    fn enqueue(&self, record: &WorkflowRecord) -> ServiceResult<String>;
    fn withdraw(&self, record: &WorkflowRecord) -> ServiceResult<()>;
}

/// `ActionPerformer` que delega en los tres colaboradores.
pub struct ServicePerformer {
    store: Arc<dyn ObjectStore>,
    index: Arc<dyn IndexService>,
    remote: Arc<dyn RemoteQueue>,
}

impl ServicePerformer {
    pub fn new(store: Arc<dyn ObjectStore>, index: Arc<dyn IndexService>, remote: Arc<dyn RemoteQueue>) -> Self {
        Self { store, index, remote }
    }
}

impl ActionPerformer for ServicePerformer {
    fn perform(&self, job: &Job, record: &WorkflowRecord) -> std::result::Result<JsonValue, String> {
        log::debug!("ejecutando {} para workflow {}", job.action_type, record.id);
        match job.action_type {
            ActionType::Upload => {
                let staged = self.store.stage(record)?;
                serde_json::to_value(&staged).map(|v| json!({ "staged_file": v }))
                                             .map_err(|e| e.to_string())
            }
            ActionType::Store => self.store.store(record, false).map(|_| JsonValue::Null),
            ActionType::Update => self.store.store(record, true).map(|_| JsonValue::Null),
            ActionType::UnStore => self.store.unstore(record).map(|_| JsonValue::Null),
            ActionType::Index => self.index.index(record).map(|_| JsonValue::Null),
            ActionType::UnIndex => self.index.unindex(record).map(|_| JsonValue::Null),
            ActionType::Queue => self.remote.enqueue(record).map(|remote_id| json!({ "remote_id": remote_id })),
            ActionType::UnRecord => self.remote.withdraw(record).map(|_| JsonValue::Null),
        }
    }
}
