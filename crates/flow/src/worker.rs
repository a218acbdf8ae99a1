// Archivo: worker.rs
// Propósito: worker que reclama trabajos despachados, ejecuta la acción,
// finaliza el registro de acción y entrega la continuación al motor.
use crate::domain::{ActionState, Job, StepStatus};
use crate::engine::WorkflowEngine;
use crate::errors::Result;
use crate::repository::{ActionPerformer, WorkflowRepository};
use crate::stubs::InMemoryJobQueue;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Origen de trabajos para un worker.
pub trait JobSource: Send + Sync {
    fn claim(&self) -> Option<Job>;
}

impl JobSource for InMemoryJobQueue {
    fn claim(&self) -> Option<Job> {
        InMemoryJobQueue::claim(self)
    }
}

pub struct Worker<R>
    where R: WorkflowRepository
{
    engine: Arc<WorkflowEngine<R>>,
    source: Arc<dyn JobSource>,
    performer: Arc<dyn ActionPerformer>,
}

impl<R> Worker<R> where R: WorkflowRepository
{
    pub fn new(engine: Arc<WorkflowEngine<R>>, source: Arc<dyn JobSource>, performer: Arc<dyn ActionPerformer>) -> Self {
        Self { engine, source, performer }
    }

    /// Ejecuta un trabajo. La acción se finaliza una sola vez: si ya estaba
    /// finalizada el trabajo se descarta sin invocar el callback.
    pub fn process(&self, job: Job) -> Result<StepStatus> {
        let record = self.engine.repo().get_record(&job.workflow_id)?;
        let (state, result, error) = match self.performer.perform(&job, &record) {
            Ok(value) => (ActionState::Succeeded, value, None),
            Err(reason) => {
                log::warn!("acción {} ({}) falló: {}", job.action_id, job.action_type, reason);
                (ActionState::Failed, JsonValue::Null, Some(reason))
            }
        };
        if !self.engine
                 .repo()
                 .finish_action(&job.action_id, state, result, error)?
        {
            log::warn!("acción {} ya finalizada; se descarta el trabajo {}", job.action_id, job.id);
            return Ok(StepStatus::Rejected);
        }
        self.engine.complete(&job.action_id, job.continuation)
    }

    /// Procesa un trabajo si hay alguno disponible.
    pub fn run_once(&self) -> Result<Option<StepStatus>> {
        match self.source.claim() {
            Some(job) => self.process(job).map(Some),
            None => Ok(None),
        }
    }

    /// Procesa trabajos hasta vaciar la cola (incluidos los que se
    /// encadenan durante el drenado). Devuelve cuántos procesó.
    pub fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        while self.run_once()?.is_some() {
            processed += 1;
        }
        Ok(processed)
    }
}

/// Lanza el worker en el runtime de tokio. Cada `poll` drena la cola en un
/// hilo bloqueante; termina cuando `shutdown` pasa a `true` o se cierra.
pub fn spawn_worker<R>(worker: Arc<Worker<R>>, poll: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()>
    where R: WorkflowRepository + 'static
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let w = worker.clone();
                    match tokio::task::spawn_blocking(move || w.drain()).await {
                        Ok(Ok(0)) => {}
                        Ok(Ok(n)) => log::debug!("worker procesó {} trabajos", n),
                        Ok(Err(e)) => log::error!("worker: {}", e),
                        Err(e) => log::error!("worker: tarea bloqueante interrumpida: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("worker detenido");
                        break;
                    }
                }
            }
        }
    })
}
