// Archivo: domain.rs
// Propósito: tipos persistentes del motor: registros de workflow, registros
// de acción y trabajos despachados a workers externos.
use crate::continuation::Continuation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Tipo de workflow. Cada tipo declara su propia tabla de estados
/// (ver `state_table`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Create,
    Edit,
    Remove,
    Review,
    BulkCreate,
    BulkEdit,
    BulkRemove,
}

impl WorkflowKind {
    pub fn is_bulk(&self) -> bool {
        matches!(self, WorkflowKind::BulkCreate | WorkflowKind::BulkEdit | WorkflowKind::BulkRemove)
    }

    /// Tipo de los registros hijos que genera una operación masiva.
    pub fn child_kind(&self) -> Option<WorkflowKind> {
        match self {
            WorkflowKind::BulkCreate => Some(WorkflowKind::Create),
            WorkflowKind::BulkEdit => Some(WorkflowKind::Edit),
            WorkflowKind::BulkRemove => Some(WorkflowKind::Remove),
            _ => None,
        }
    }

    /// Acción de almacenamiento por defecto: Store para crear, Update para
    /// editar, UnStore para eliminar.
    pub fn storage_action(&self) -> Option<ActionType> {
        match self {
            WorkflowKind::Create | WorkflowKind::BulkCreate => Some(ActionType::Store),
            WorkflowKind::Edit | WorkflowKind::BulkEdit => Some(ActionType::Update),
            WorkflowKind::Remove | WorkflowKind::BulkRemove => Some(ActionType::UnStore),
            WorkflowKind::Review => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::Create => "create",
            WorkflowKind::Edit => "edit",
            WorkflowKind::Remove => "remove",
            WorkflowKind::Review => "review",
            WorkflowKind::BulkCreate => "bulk_create",
            WorkflowKind::BulkEdit => "bulk_edit",
            WorkflowKind::BulkRemove => "bulk_remove",
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(WorkflowKind::Create),
            "edit" => Ok(WorkflowKind::Edit),
            "remove" => Ok(WorkflowKind::Remove),
            "review" => Ok(WorkflowKind::Review),
            "bulk_create" => Ok(WorkflowKind::BulkCreate),
            "bulk_edit" => Ok(WorkflowKind::BulkEdit),
            "bulk_remove" => Ok(WorkflowKind::BulkRemove),
            other => Err(format!("tipo de workflow desconocido: {}", other)),
        }
    }
}

/// Unión de los estados de todas las tablas. Qué estados son válidos para
/// un registro concreto lo decide `state_table::states(kind)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Started,
    Uploading,
    Storing,
    Indexing,
    Indexed,
    Submitting,
    Submitted,
    Unrecording,
    Unindexing,
    Unstoring,
    Removed,
    Reviewing,
    Approved,
    Rejected,
    Running,
    Pausing,
    Paused,
    Resuming,
    Restarting,
    Completed,
    Canceling,
    Canceled,
    Aborted,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Started => "started",
            WorkflowState::Uploading => "uploading",
            WorkflowState::Storing => "storing",
            WorkflowState::Indexing => "indexing",
            WorkflowState::Indexed => "indexed",
            WorkflowState::Submitting => "submitting",
            WorkflowState::Submitted => "submitted",
            WorkflowState::Unrecording => "unrecording",
            WorkflowState::Unindexing => "unindexing",
            WorkflowState::Unstoring => "unstoring",
            WorkflowState::Removed => "removed",
            WorkflowState::Reviewing => "reviewing",
            WorkflowState::Approved => "approved",
            WorkflowState::Rejected => "rejected",
            WorkflowState::Running => "running",
            WorkflowState::Pausing => "pausing",
            WorkflowState::Paused => "paused",
            WorkflowState::Resuming => "resuming",
            WorkflowState::Restarting => "restarting",
            WorkflowState::Completed => "completed",
            WorkflowState::Canceling => "canceling",
            WorkflowState::Canceled => "canceled",
            WorkflowState::Aborted => "aborted",
        }
    }

    /// Estados de reposo: un registro en uno de ellos no tiene trabajo en
    /// vuelo. `indexed` y `approved` son finales para destinos locales.
    pub fn is_terminal(&self) -> bool {
        matches!(self,
                 WorkflowState::Indexed
                 | WorkflowState::Submitted
                 | WorkflowState::Removed
                 | WorkflowState::Approved
                 | WorkflowState::Rejected
                 | WorkflowState::Completed
                 | WorkflowState::Canceled
                 | WorkflowState::Aborted)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor del archivo subido a staging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedFile {
    pub key: String,
    pub size: u64,
    pub checksum: Option<String>,
}

/// Descriptor del registro asociado en un repositorio remoto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Nombre del repositorio destino.
    pub repository: String,
    /// Id asignado por el repositorio remoto, una vez encolado.
    pub remote_id: Option<String>,
}

/// Registro persistente de la máquina de estados de un envío.
///
/// El campo `state` sólo cambia mediante compare-and-set en el repositorio
/// (`transition_to`) o restauración explícita (`revert_to`);
/// `WorkflowRepository::update_record` nunca lo sobrescribe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: Uuid,
    pub kind: WorkflowKind,
    pub state: WorkflowState,
    pub submission_id: Uuid,
    /// Enlaza registros hermanos. Un registro masivo usa su propio id.
    pub bulk_id: Option<Uuid>,
    pub manifest_id: Option<Uuid>,
    /// Id canónico del ítem que envía este registro (registros simples).
    pub item_id: Option<String>,
    /// Acción que genera el paso de almacenamiento (Store/Update/UnStore).
    pub store_action: Option<ActionType>,
    pub staged_file: Option<StagedFile>,
    pub remote: Option<RemoteRecord>,
    /// Continuación estacionada mientras el lote padre está en pausa.
    pub parked: Option<Continuation>,
    /// Indica si el pipeline ya se lanzó al menos una vez.
    pub launched: bool,
    /// Último motivo de fallo o aborto.
    pub detail: Option<String>,
    /// Ítems del manifiesto que no se pudieron resolver (registros masivos).
    #[serde(default)]
    pub invalid_items: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_saved: Option<DateTime<Utc>>,
    pub last_submitted: Option<DateTime<Utc>>,
    pub last_indexed: Option<DateTime<Utc>>,
}

impl WorkflowRecord {
    /// Crea un registro nuevo en el estado inicial `started`.
    pub fn new(kind: WorkflowKind, submission_id: Uuid) -> Self {
        Self { id: Uuid::new_v4(),
               kind,
               state: WorkflowState::Started,
               submission_id,
               bulk_id: None,
               manifest_id: None,
               item_id: None,
               store_action: kind.storage_action(),
               staged_file: None,
               remote: None,
               parked: None,
               launched: false,
               detail: None,
               invalid_items: Vec::new(),
               created_at: Utc::now(),
               last_saved: None,
               last_submitted: None,
               last_indexed: None }
    }

    /// Crea un registro masivo cuyo `bulk_id` es su propio id.
    pub fn new_bulk(kind: WorkflowKind, submission_id: Uuid, manifest_id: Uuid) -> Self {
        let mut record = Self::new(kind, submission_id);
        record.bulk_id = Some(record.id);
        record.manifest_id = Some(manifest_id);
        record
    }

    pub fn with_item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    pub fn with_bulk(mut self, bulk_id: Uuid) -> Self {
        self.bulk_id = Some(bulk_id);
        self
    }

    pub fn with_manifest(mut self, manifest_id: Uuid) -> Self {
        self.manifest_id = Some(manifest_id);
        self
    }

    pub fn with_remote(mut self, repository: impl Into<String>, remote_id: Option<String>) -> Self {
        self.remote = Some(RemoteRecord { repository: repository.into(), remote_id });
        self
    }

    pub fn with_store_action(mut self, action: ActionType) -> Self {
        self.store_action = Some(action);
        self
    }

    /// Hijo de un lote: tiene `bulk_id` y no es el registro masivo.
    pub fn parent_bulk_id(&self) -> Option<Uuid> {
        self.bulk_id.filter(|b| *b != self.id)
    }

    /// En reposo y sin continuación estacionada.
    pub fn is_settled(&self) -> bool {
        self.state.is_terminal() && self.parked.is_none()
    }
}

/// Tipo de paso asíncrono ejecutado por un worker externo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    Upload,
    Store,
    Update,
    Index,
    Queue,
    UnStore,
    UnIndex,
    UnRecord,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionType::Upload => "Upload",
            ActionType::Store => "Store",
            ActionType::Update => "Update",
            ActionType::Index => "Index",
            ActionType::Queue => "Queue",
            ActionType::UnStore => "UnStore",
            ActionType::UnIndex => "UnIndex",
            ActionType::UnRecord => "UnRecord",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Pending,
    Succeeded,
    Failed,
}

/// Registro hijo que representa la ejecución de un paso asíncrono. Se crea
/// justo antes del despacho y sólo lo consulta el callback de ese paso.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: Uuid,
    pub action_type: ActionType,
    pub workflow_id: Uuid,
    pub bulk_id: Option<Uuid>,
    pub state: ActionState,
    /// Resultado opaco devuelto por el worker (descriptores derivados).
    pub result: JsonValue,
    pub error: Option<String>,
    /// Marcado cuando el callback consumió el resultado (entrega única).
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ActionRecord {
    pub fn new(action_type: ActionType, workflow_id: Uuid, bulk_id: Option<Uuid>) -> Self {
        Self { id: Uuid::new_v4(),
               action_type,
               workflow_id,
               bulk_id,
               state: ActionState::Pending,
               result: JsonValue::Null,
               error: None,
               acknowledged: false,
               created_at: Utc::now(),
               finished_at: None }
    }
}

/// Unidad de trabajo despachada a un worker. Toda la identidad de la
/// continuación viaja serializada aquí, nunca como referencia en memoria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub action_id: Uuid,
    pub action_type: ActionType,
    pub workflow_id: Uuid,
    pub attrs: JsonValue,
    pub continuation: Continuation,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub action_id: Uuid,
}

/// Resultado de invocar un paso o un callback.
///
/// - `Rejected`: la tabla no admitía la transición; nada ocurrió.
/// - `Failed`: el paso corrió y falló; el registro quedó abortado o revertido.
/// - `Dispatched`: aceptado y en vuelo.
/// - `Parked`: aceptado pero estacionado hasta reanudar el lote.
/// - `Completed`: aceptado y sin más pasos pendientes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Rejected,
    Failed,
    Dispatched { handle: JobHandle },
    Parked,
    Completed { state: WorkflowState },
}

impl StepStatus {
    pub fn is_rejected(&self) -> bool {
        matches!(self, StepStatus::Rejected)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepStatus::Failed)
    }

    pub fn is_accepted(&self) -> bool {
        !self.is_rejected() && !self.is_failed()
    }
}
