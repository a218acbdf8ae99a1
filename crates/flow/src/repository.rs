// Archivo: repository.rs
// Propósito: definir los contratos con los colaboradores externos del motor:
// persistencia de registros (`WorkflowRepository`), despacho de trabajos
// (`JobDispatcher`) y ejecución de acciones (`ActionPerformer`).
use crate::domain::{ActionRecord, ActionState, ActionType, Job, JobHandle, WorkflowRecord, WorkflowState};
use crate::errors::{FlowError, Result};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Contrato de persistencia de registros de workflow y de acción.
///
/// El repositorio concreto debe garantizar que `compare_and_set_state` sea
/// atómico (lectura-modificación-escritura) respecto de cualquier otra
/// escritura del campo `state`.
pub trait WorkflowRepository: Send + Sync {
    /// Inserta un registro nuevo y devuelve su id.
    fn create_record(&self, record: WorkflowRecord) -> Result<Uuid>;

    fn find_record(&self, id: &Uuid) -> Result<Option<WorkflowRecord>>;

    /// Como `find_record`, pero la ausencia es `FlowError::NotFound`.
    fn get_record(&self, id: &Uuid) -> Result<WorkflowRecord> {
        self.find_record(id)?
            .ok_or_else(|| FlowError::NotFound(format!("workflow {}", id)))
    }

    /// Actualiza todos los campos salvo `state`, que conserva el valor
    /// almacenado.
    fn update_record(&self, record: &WorkflowRecord) -> Result<()>;

    /// Cambia `state` a `new` sólo si el valor actual es `expected`.
    fn compare_and_set_state(&self, id: &Uuid, expected: WorkflowState, new: WorkflowState) -> Result<bool>;

    /// Escribe `state` sin validar. Reservado para `revert_to`.
    fn force_state(&self, id: &Uuid, state: WorkflowState) -> Result<()>;

    /// Registros cuyo `bulk_id` es `bulk_id` (incluye al registro masivo).
    fn list_by_bulk(&self, bulk_id: &Uuid) -> Result<Vec<WorkflowRecord>>;

    fn list_by_manifest(&self, manifest_id: &Uuid) -> Result<Vec<WorkflowRecord>>;

    fn list_records(&self) -> Result<Vec<WorkflowRecord>>;

    fn create_action(&self, action: ActionRecord) -> Result<Uuid>;

    fn find_action(&self, id: &Uuid) -> Result<Option<ActionRecord>>;

    /// Acciones de un lote por tipo, ordenadas por creación.
    fn find_actions(&self, bulk_id: &Uuid, action_type: ActionType) -> Result<Vec<ActionRecord>>;

    fn actions_for(&self, workflow_id: &Uuid) -> Result<Vec<ActionRecord>>;

    /// Finaliza una acción `pending`. Devuelve `false` si ya estaba
    /// finalizada (la acción se entrega como mucho una vez).
    fn finish_action(&self, id: &Uuid, state: ActionState, result: JsonValue, error: Option<String>) -> Result<bool>;

    /// Marca el resultado como consumido por su callback. Devuelve `false`
    /// si ya había sido consumido.
    fn acknowledge_action(&self, id: &Uuid) -> Result<bool>;
}

/// Despachador de trabajos en segundo plano. `dispatch` encola y retorna de
/// inmediato; el worker invoca luego `WorkflowEngine::complete` una sola vez
/// por trabajo.
pub trait JobDispatcher: Send + Sync {
    fn dispatch(&self, job: Job) -> Result<JobHandle>;
}

/// Ejecuta la acción de un trabajo contra los servicios reales (staging,
/// almacenamiento, índice, cola remota). `Err` lleva el motivo del fallo.
pub trait ActionPerformer: Send + Sync {
    fn perform(&self, job: &Job, record: &WorkflowRecord) -> std::result::Result<JsonValue, String>;
}
