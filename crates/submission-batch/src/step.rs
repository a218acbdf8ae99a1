// Archivo: step.rs
// Propósito: pasos del pipeline de envío y el `StepExecutor`, que ejecuta un
// paso para un ítem o una slice con inyección de fallos y latencia simulada.
use crate::errors::{BatchError, Result};
use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use submission_domain::{ItemId, ItemStatus, ItemStore};
use uuid::Uuid;

/// Pasos del pipeline, en orden fijo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    PersistIntent,
    StageUpload,
    Promote,
    Index,
}

impl PipelineStep {
    pub const ALL: [PipelineStep; 4] =
        [PipelineStep::PersistIntent, PipelineStep::StageUpload, PipelineStep::Promote, PipelineStep::Index];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::PersistIntent => "persist_intent",
            PipelineStep::StageUpload => "stage_upload",
            PipelineStep::Promote => "promote",
            PipelineStep::Index => "index",
        }
    }

    /// Etiqueta descriptiva para diagnósticos y progreso.
    pub fn label(&self) -> &'static str {
        match self {
            PipelineStep::PersistIntent => "registrar intención de envío",
            PipelineStep::StageUpload => "subir a staging",
            PipelineStep::Promote => "promover a almacenamiento",
            PipelineStep::Index => "indexar",
        }
    }

    /// Contexto que antecede al motivo de cada fallo del paso.
    pub fn failure_context(&self) -> &'static str {
        match self {
            PipelineStep::PersistIntent => "no se pudo registrar la intención de envío",
            PipelineStep::StageUpload => "no se pudo subir el archivo a staging",
            PipelineStep::Promote => "no se pudo promover el archivo",
            PipelineStep::Index => "no se pudo indexar el ítem",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operación de lote a la que pertenece una ejecución.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchCommand {
    Create,
    Update,
}

/// Identidad de una ejecución de paso.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepContext {
    pub manifest_id: Uuid,
    pub job_id: Uuid,
    pub command: BatchCommand,
}

/// Servicios reales detrás de los pasos. `Ok` lleva los fallos por ítem
/// (vacío si todos tuvieron éxito); `Err` es un fallo sistémico del paso
/// para todo el conjunto.
pub trait SubmissionBackend: Send + Sync {
    fn run_step(&self, step: PipelineStep, ctx: &StepContext, ids: &[ItemId]) -> Result<IndexMap<ItemId, String>>;

    /// Registra un fallo que no provino del propio backend (fallo sistémico
    /// o simulado).
    fn record_failure(&self, _step: PipelineStep, _ctx: &StepContext, _id: &ItemId, _reason: &str) -> Result<()> {
        Ok(())
    }
}

/// Backend por defecto: registra cada resultado en un `ItemStore`. Permite
/// configurar fallos por ítem y caídas por paso.
pub struct RecordingBackend {
    store: Arc<dyn ItemStore>,
    failures: IndexMap<(PipelineStep, ItemId), String>,
    outages: IndexMap<PipelineStep, String>,
}

impl RecordingBackend {
    pub fn new(store: Arc<dyn ItemStore>) -> Self {
        Self { store, failures: IndexMap::new(), outages: IndexMap::new() }
    }

    pub fn with_failure(mut self, step: PipelineStep, id: impl Into<ItemId>, reason: impl Into<String>) -> Self {
        self.failures.insert((step, id.into()), reason.into());
        self
    }

    pub fn with_outage(mut self, step: PipelineStep, reason: impl Into<String>) -> Self {
        self.outages.insert(step, reason.into());
        self
    }
}

impl SubmissionBackend for RecordingBackend {
    fn run_step(&self, step: PipelineStep, ctx: &StepContext, ids: &[ItemId]) -> Result<IndexMap<ItemId, String>> {
        if let Some(reason) = self.outages.get(&step) {
            return Err(BatchError::Step { step: step.as_str().into(), reason: reason.clone() });
        }
        let mut failed = IndexMap::new();
        for id in ids {
            match self.failures.get(&(step, id.clone())) {
                Some(reason) => {
                    self.record_failure(step, ctx, id, reason)?;
                    failed.insert(id.clone(), reason.clone());
                }
                None => {
                    self.store
                        .record_status(&ctx.manifest_id, id, ItemStatus::Ok { step: step.as_str().into() })?;
                }
            }
        }
        Ok(failed)
    }

    fn record_failure(&self, step: PipelineStep, ctx: &StepContext, id: &ItemId, reason: &str) -> Result<()> {
        self.store.record_status(&ctx.manifest_id,
                                 id,
                                 ItemStatus::Failed { step: step.as_str().into(), reason: reason.into() })?;
        Ok(())
    }
}

/// Muestra uniforme en `[0, 1)`.
pub trait Draw: Send + Sync {
    fn sample(&self) -> f64;
}

/// Muestras de `rand::thread_rng`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandDraw;

impl Draw for RandDraw {
    fn sample(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Secuencia fija de muestras; al agotarse devuelve `fallback`.
#[derive(Debug)]
pub struct SequenceDraw {
    values: Mutex<VecDeque<f64>>,
    fallback: f64,
}

impl SequenceDraw {
    pub fn new(values: impl IntoIterator<Item = f64>, fallback: f64) -> Self {
        Self { values: Mutex::new(values.into_iter().collect()), fallback }
    }

    pub fn constant(value: f64) -> Self {
        Self::new(Vec::new(), value)
    }
}

impl Draw for SequenceDraw {
    fn sample(&self) -> f64 {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(self.fallback)
    }
}

/// Banda de fallos simulados `[failure_floor, failure_rate)` y cota de
/// latencia.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FaultConfig {
    pub failure_floor: f64,
    pub failure_rate: f64,
    pub max_latency_ms: u64,
}

/// Ejecuta un paso sobre un conjunto de ids.
pub struct StepExecutor {
    backend: Arc<dyn SubmissionBackend>,
    draw: Arc<dyn Draw>,
    fault: FaultConfig,
}

impl StepExecutor {
    pub fn new(backend: Arc<dyn SubmissionBackend>, draw: Arc<dyn Draw>, fault: FaultConfig) -> Self {
        Self { backend, draw, fault }
    }

    /// Ejecuta `step` para `ids` y devuelve los fallos por id.
    ///
    /// Se toma una muestra por ejecución: si cae en la banda de fallos, el
    /// paso falla para todo el conjunto. Con `no_raise` los fallos
    /// sistémicos se convierten en una entrada por id con el mismo motivo;
    /// sin `no_raise` se propagan como `BatchError`.
    pub fn execute(&self,
                   step: PipelineStep,
                   ctx: &StepContext,
                   ids: &[ItemId],
                   no_raise: bool)
                   -> Result<IndexMap<ItemId, String>> {
        let outcome = if self.injects_fault() {
            Err(BatchError::Step { step: step.as_str().into(), reason: "fallo simulado".into() })
        } else {
            self.backend.run_step(step, ctx, ids)
        };
        self.simulate_latency();
        match outcome {
            Ok(failed) => Ok(failed.into_iter()
                                   .map(|(id, reason)| (id, format!("{}: {}", step.failure_context(), reason)))
                                   .collect()),
            Err(e) if no_raise => {
                let reason = Self::failure_reason(step, &e);
                log::warn!("paso {} falló para {} ítems: {}", step, ids.len(), reason);
                let mut failed = IndexMap::with_capacity(ids.len());
                for id in ids {
                    self.backend.record_failure(step, ctx, id, &reason)?;
                    failed.insert(id.clone(), reason.clone());
                }
                Ok(failed)
            }
            Err(e) => Err(e),
        }
    }

    /// Motivo uniforme de un fallo sistémico del paso.
    pub fn failure_reason(step: PipelineStep, error: &BatchError) -> String {
        match error {
            BatchError::Step { reason, .. } => format!("{}: {}", step.failure_context(), reason),
            other => format!("{}: {}", step.failure_context(), other),
        }
    }

    fn injects_fault(&self) -> bool {
        if self.fault.failure_rate <= 0.0 {
            return false;
        }
        let x = self.draw.sample();
        x >= self.fault.failure_floor && x < self.fault.failure_rate
    }

    fn simulate_latency(&self) {
        if self.fault.max_latency_ms == 0 {
            return;
        }
        let ms = (self.draw.sample() * self.fault.max_latency_ms as f64) as u64;
        std::thread::sleep(Duration::from_millis(ms.min(self.fault.max_latency_ms)));
    }
}
