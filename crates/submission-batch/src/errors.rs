use thiserror::Error;

// Errores del motor de lotes.
//
// Los fallos operativos por ítem no llegan aquí cuando `no_raise` está
// activo: se convierten en entradas del mapa de fallos. Este enum cubre los
// fallos que se propagan (pasos en contexto autoritativo, precondiciones y
// errores de las capas inferiores).
#[derive(Error, Debug)]
pub enum BatchError {
  /// Errores originados por el motor de workflows.
  #[error("Error de flujo: {0}")]
  Flow(#[from] flow::errors::FlowError),

  /// Errores del dominio de ítems y manifiestos.
  #[error("Error de dominio: {0}")]
  Domain(#[from] submission_domain::DomainError),

  /// Fallo de un paso del pipeline para todo el conjunto invocado.
  #[error("Fallo en el paso {step}: {reason}")]
  Step { step: String, reason: String },

  /// Precondición inválida (opciones, configuración, destino de un comando).
  #[error("Error de validacion: {0}")]
  Validation(String),

  #[error("Error de serializacion: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("Otro error: {0}")]
  Other(String),
}

pub type Result<T> = std::result::Result<T, BatchError>;
