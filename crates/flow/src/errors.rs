// Archivo: errors.rs
// Propósito: definir los errores del motor de workflows y el alias Result<T>
// usado por las APIs del crate.
use thiserror::Error;
/// Errores comunes del dominio de workflows.
///
/// Una transición rechazada por la tabla de estados NO es un error: se
/// señala con `Ok(None)` / `StepStatus::Rejected`. Los errores de este enum
/// son fallos de almacenamiento o violaciones de invariantes.
#[derive(Error, Debug)]
pub enum FlowError {
  /// Entidad no encontrada (registro de workflow o de acción).
  #[error("No encontrado: {0}")]
  NotFound(String),
  /// Conflicto de concurrencia (por ejemplo, una acción ya finalizada).
  #[error("Conflicto: {0}")]
  Conflict(String),
  /// Error genérico de almacenamiento (BD, colas, etc.).
  #[error("Error de almacenamiento: {0}")]
  Storage(String),
  /// Violación de invariante estructural; nunca se absorbe.
  #[error("Invariante violada: {0}")]
  Invariant(String),
  /// Argumento inválido del llamador (precondición).
  #[error("Argumento inválido: {0}")]
  InvalidArgument(String),
  /// Errores de serialización de continuaciones o payloads.
  #[error("Error de serialización: {0}")]
  Serialization(#[from] serde_json::Error),
  /// Errores del dominio de ítems/manifiestos.
  #[error("Error de dominio: {0}")]
  Domain(#[from] submission_domain::DomainError),
  /// Otro tipo de error.
  #[error("Otro: {0}")]
  Other(String),
}
/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, FlowError>;
