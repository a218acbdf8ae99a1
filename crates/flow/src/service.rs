// Archivo: service.rs
// Propósito: implementar `FlowService`, la capa que arma motor, coordinador
// de lotes y worker sobre un mismo repositorio. Es el punto de entrada de
// capas superiores (binario, coordinador de envíos).
use crate::bulk::BulkCoordinator;
use crate::domain::{StepStatus, WorkflowRecord};
use crate::engine::{EngineConfig, WorkflowEngine};
use crate::errors::Result;
use crate::repository::{ActionPerformer, JobDispatcher, WorkflowRepository};
use crate::services::ServicePerformer;
use crate::stubs::{InMemoryJobQueue, InMemoryWorkflowRepository, StubServices};
use crate::worker::{JobSource, Worker};
use std::sync::Arc;
use submission_domain::{DefaultResolver, IdentifierResolver, ManifestLoader};
use uuid::Uuid;

/// Servicio de alto nivel sobre registros de workflow.
pub struct FlowService<R>
    where R: WorkflowRepository
{
    engine: Arc<WorkflowEngine<R>>,
    bulk: Arc<BulkCoordinator<R>>,
    worker: Arc<Worker<R>>,
}

impl<R> FlowService<R> where R: WorkflowRepository
{
    pub fn new(repo: Arc<R>,
               dispatcher: Arc<dyn JobDispatcher>,
               source: Arc<dyn JobSource>,
               performer: Arc<dyn ActionPerformer>,
               resolver: Arc<dyn IdentifierResolver>,
               loader: Arc<dyn ManifestLoader>,
               config: EngineConfig)
               -> Self {
        let engine = Arc::new(WorkflowEngine::new(repo, dispatcher, config));
        let bulk = Arc::new(BulkCoordinator::new(engine.clone(), resolver, loader));
        let worker = Arc::new(Worker::new(engine.clone(), source, performer));
        Self { engine, bulk, worker }
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine<R>> {
        &self.engine
    }

    pub fn bulk(&self) -> &Arc<BulkCoordinator<R>> {
        &self.bulk
    }

    pub fn worker(&self) -> &Arc<Worker<R>> {
        &self.worker
    }

    /// Crea un registro simple y lanza su pipeline.
    pub fn submit_record(&self, record: WorkflowRecord) -> Result<(Uuid, StepStatus)> {
        let id = self.engine.create(record)?;
        let status = self.engine.launch(&id)?;
        Ok((id, status))
    }

    /// Procesa la cola de trabajos hasta vaciarla.
    pub fn drain(&self) -> Result<usize> {
        self.worker.drain()
    }
}

/// Armado completo en memoria: repositorio, cola y servicios simulados.
pub struct InMemoryFlow {
    pub service: FlowService<InMemoryWorkflowRepository>,
    pub repo: Arc<InMemoryWorkflowRepository>,
    pub queue: Arc<InMemoryJobQueue>,
    pub services: Arc<StubServices>,
}

impl FlowService<InMemoryWorkflowRepository> {
    pub fn in_memory(config: EngineConfig, loader: Arc<dyn ManifestLoader>) -> InMemoryFlow {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let services = Arc::new(StubServices::new());
        let performer = Arc::new(ServicePerformer::new(services.clone(), services.clone(), services.clone()));
        let service = FlowService::new(repo.clone(),
                                       queue.clone(),
                                       queue.clone(),
                                       performer,
                                       Arc::new(DefaultResolver::new()),
                                       loader,
                                       config);
        InMemoryFlow { service, repo, queue, services }
    }
}
