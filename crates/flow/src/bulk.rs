// Archivo: bulk.rs
// Propósito: operaciones masivas. Un registro masivo gobierna una cohorte de
// registros hijos (uno por ítem resoluble del manifiesto) y expone los
// comandos run / pause / resume / restart / cancel.
//
// Cada comando sigue el mismo patrón: transición al estado transitorio,
// secuencia de la estrategia del tipo, reversión si la secuencia no hizo
// nada o falló, y callback de finalización.
use crate::domain::{ActionType, StepStatus, WorkflowKind, WorkflowRecord, WorkflowState};
use crate::engine::WorkflowEngine;
use crate::errors::{FlowError, Result};
use crate::repository::WorkflowRepository;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use submission_domain::{IdentifierResolver, InvalidReason, ItemId, ItemRef, Manifest, ManifestLoader};
use uuid::Uuid;

/// Vista de una cohorte que reciben las estrategias. Es object-safe para
/// que las secuencias por defecto no dependan del repositorio concreto.
pub trait Cohort {
    fn bulk(&self) -> &WorkflowRecord;
    fn children(&self) -> Result<Vec<WorkflowRecord>>;
    /// Ítems del manifiesto, cargados una sola vez.
    fn items(&self) -> Result<Vec<ItemRef>>;
    fn resolve(&self, item: &ItemRef) -> std::result::Result<ItemId, InvalidReason>;
    fn note_invalid(&self, invalid: Vec<String>) -> Result<()>;
    fn spawn_child(&self, item_id: &ItemId, store_action: ActionType) -> Result<Uuid>;
    fn launch(&self, child_id: &Uuid) -> Result<StepStatus>;
    fn resume_parked(&self, child_id: &Uuid) -> Result<StepStatus>;
    fn reset(&self, child_id: &Uuid) -> Result<()>;
}

/// Comportamiento de un tipo de operación masiva.
pub trait BulkStrategy: Send + Sync {
    fn kind(&self) -> WorkflowKind;

    fn child_kind(&self) -> WorkflowKind;

    /// Acción de almacenamiento que generan los hijos.
    fn generated_action(&self) -> ActionType;

    /// Resuelve el manifiesto, crea un hijo por ítem resoluble y lo lanza.
    /// `false` si ningún ítem es resoluble.
    fn run_sequence(&self, cohort: &dyn Cohort) -> Result<bool> {
        let items = cohort.items()?;
        let mut seen = HashSet::new();
        let mut valid = Vec::new();
        let mut invalid = Vec::new();
        for item in &items {
            match cohort.resolve(item) {
                Ok(id) => {
                    if seen.insert(id.clone()) {
                        valid.push(id);
                    }
                }
                Err(reason) => invalid.push(format!("{}: {}", item.describe(), reason)),
            }
        }
        if !invalid.is_empty() {
            log::warn!("lote {}: {} ítems inválidos", cohort.bulk().id, invalid.len());
            cohort.note_invalid(invalid)?;
        }
        if valid.is_empty() {
            return Ok(false);
        }
        // una ejecución revertida puede haber dejado hijos creados
        let existing: HashSet<String> = cohort.children()?.into_iter().filter_map(|c| c.item_id).collect();
        for id in valid.iter().filter(|id| !existing.contains(id.as_str())) {
            cohort.spawn_child(id, self.generated_action())?;
        }
        for child in cohort.children()? {
            if child.launched || child.state != WorkflowState::Started {
                continue;
            }
            // un hijo que no pudo despacharse queda sin lanzar; `resume` lo reintenta
            if let Err(e) = cohort.launch(&child.id) {
                log::error!("lote {}: no se pudo lanzar {}: {}", cohort.bulk().id, child.id, e);
            }
        }
        Ok(true)
    }

    /// `false` si ningún hijo sigue activo.
    fn pause_sequence(&self, cohort: &dyn Cohort) -> Result<bool> {
        Ok(cohort.children()?.iter().any(|c| !c.is_settled()))
    }

    /// Reanuda continuaciones estacionadas y lanza hijos nunca lanzados.
    /// Con todos los hijos en reposo devuelve `true` sin tocar nada.
    fn resume_sequence(&self, cohort: &dyn Cohort) -> Result<bool> {
        let children = cohort.children()?;
        if children.iter().all(|c| c.is_settled()) {
            return Ok(!children.is_empty());
        }
        let mut touched = false;
        for child in children {
            if child.parked.is_some() {
                cohort.resume_parked(&child.id)?;
                touched = true;
            } else if !child.launched && child.state == WorkflowState::Started {
                cohort.launch(&child.id)?;
                touched = true;
            }
        }
        Ok(touched)
    }

    /// Devuelve a `started` los hijos abortados o cancelados y los relanza.
    fn restart_sequence(&self, cohort: &dyn Cohort) -> Result<bool> {
        let retry: Vec<Uuid> = cohort.children()?
                                     .into_iter()
                                     .filter(|c| matches!(c.state, WorkflowState::Aborted | WorkflowState::Canceled))
                                     .map(|c| c.id)
                                     .collect();
        for id in &retry {
            cohort.reset(id)?;
            cohort.launch(id)?;
        }
        Ok(!retry.is_empty())
    }
}

pub struct BulkCreateStrategy;
pub struct BulkEditStrategy;
pub struct BulkRemoveStrategy;

impl BulkStrategy for BulkCreateStrategy {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::BulkCreate
    }

    fn child_kind(&self) -> WorkflowKind {
        WorkflowKind::Create
    }

    fn generated_action(&self) -> ActionType {
        ActionType::Store
    }
}

impl BulkStrategy for BulkEditStrategy {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::BulkEdit
    }

    fn child_kind(&self) -> WorkflowKind {
        WorkflowKind::Edit
    }

    fn generated_action(&self) -> ActionType {
        ActionType::Update
    }
}

impl BulkStrategy for BulkRemoveStrategy {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::BulkRemove
    }

    fn child_kind(&self) -> WorkflowKind {
        WorkflowKind::Remove
    }

    fn generated_action(&self) -> ActionType {
        ActionType::UnStore
    }
}

static BULK_CREATE: BulkCreateStrategy = BulkCreateStrategy;
static BULK_EDIT: BulkEditStrategy = BulkEditStrategy;
static BULK_REMOVE: BulkRemoveStrategy = BulkRemoveStrategy;

/// Estrategia para un tipo masivo; `None` para tipos simples.
pub fn strategy_for(kind: WorkflowKind) -> Option<&'static dyn BulkStrategy> {
    match kind {
        WorkflowKind::BulkCreate => Some(&BULK_CREATE),
        WorkflowKind::BulkEdit => Some(&BULK_EDIT),
        WorkflowKind::BulkRemove => Some(&BULK_REMOVE),
        _ => None,
    }
}

/// Resumen de un lote para listados.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkSummary {
    pub bulk_id: Uuid,
    pub kind: WorkflowKind,
    pub state: WorkflowState,
    pub children: usize,
    pub parked: usize,
    pub by_state: BTreeMap<String, usize>,
    pub invalid_items: Vec<String>,
}

/// Coordinador de operaciones masivas.
pub struct BulkCoordinator<R>
    where R: WorkflowRepository
{
    engine: Arc<WorkflowEngine<R>>,
    resolver: Arc<dyn IdentifierResolver>,
    loader: Arc<dyn ManifestLoader>,
    manifests: Mutex<HashMap<Uuid, Arc<Manifest>>>,
}

struct BulkCohort<'a, R>
    where R: WorkflowRepository
{
    coordinator: &'a BulkCoordinator<R>,
    bulk: WorkflowRecord,
    child_kind: WorkflowKind,
}

impl<R> Cohort for BulkCohort<'_, R> where R: WorkflowRepository
{
    fn bulk(&self) -> &WorkflowRecord {
        &self.bulk
    }

    fn children(&self) -> Result<Vec<WorkflowRecord>> {
        self.coordinator.engine.children(&self.bulk.id)
    }

    fn items(&self) -> Result<Vec<ItemRef>> {
        let manifest = self.coordinator.manifest(&self.bulk.id)?;
        Ok(manifest.items(self.coordinator.loader.as_ref())?.to_vec())
    }

    fn resolve(&self, item: &ItemRef) -> std::result::Result<ItemId, InvalidReason> {
        self.coordinator.resolver.resolve(item)
    }

    fn note_invalid(&self, invalid: Vec<String>) -> Result<()> {
        let repo = self.coordinator.engine.repo();
        let mut record = repo.get_record(&self.bulk.id)?;
        record.invalid_items = invalid;
        repo.update_record(&record)
    }

    fn spawn_child(&self, item_id: &ItemId, store_action: ActionType) -> Result<Uuid> {
        let mut child = WorkflowRecord::new(self.child_kind, self.bulk.submission_id).with_bulk(self.bulk.id)
                                                                                   .with_item(item_id.as_str())
                                                                                   .with_store_action(store_action);
        child.manifest_id = self.bulk.manifest_id;
        child.remote = self.bulk.remote.clone();
        self.coordinator.engine.create(child)
    }

    fn launch(&self, child_id: &Uuid) -> Result<StepStatus> {
        self.coordinator.engine.launch(child_id)
    }

    fn resume_parked(&self, child_id: &Uuid) -> Result<StepStatus> {
        self.coordinator.engine.resume_parked(child_id)
    }

    fn reset(&self, child_id: &Uuid) -> Result<()> {
        self.coordinator.engine.reset(child_id).map(|_| ())
    }
}

impl<R> BulkCoordinator<R> where R: WorkflowRepository
{
    pub fn new(engine: Arc<WorkflowEngine<R>>,
               resolver: Arc<dyn IdentifierResolver>,
               loader: Arc<dyn ManifestLoader>)
               -> Self {
        Self { engine, resolver, loader, manifests: Mutex::new(HashMap::new()) }
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine<R>> {
        &self.engine
    }

    /// Persiste el registro masivo y asocia su manifiesto.
    pub fn create_bulk(&self, mut record: WorkflowRecord, manifest: Manifest) -> Result<Uuid> {
        if !record.kind.is_bulk() {
            return Err(FlowError::InvalidArgument(format!("{} no es un tipo masivo", record.kind)));
        }
        record.bulk_id = Some(record.id);
        record.manifest_id = Some(manifest.id());
        let id = self.engine.create(record)?;
        self.lock_manifests()?.insert(id, Arc::new(manifest));
        Ok(id)
    }

    /// Manifiesto asociado a un lote.
    pub fn manifest(&self, bulk_id: &Uuid) -> Result<Arc<Manifest>> {
        self.lock_manifests()?
            .get(bulk_id)
            .cloned()
            .ok_or_else(|| FlowError::NotFound(format!("manifiesto del lote {}", bulk_id)))
    }

    /// Lote registrado para un manifiesto.
    pub fn bulk_for_manifest(&self, manifest_id: &Uuid) -> Result<Option<Uuid>> {
        Ok(self.lock_manifests()?
               .iter()
               .find(|(_, m)| m.id() == *manifest_id)
               .map(|(bulk_id, _)| *bulk_id))
    }

    pub fn run(&self, bulk_id: &Uuid) -> Result<StepStatus> {
        let status = self.command(bulk_id, WorkflowState::Running, |s, c| s.run_sequence(c))?;
        if status.is_accepted() {
            let mut record = self.engine.get(bulk_id)?;
            record.last_submitted = Some(chrono::Utc::now());
            self.engine.repo().update_record(&record)?;
            self.engine.refresh_cohort(bulk_id)?;
        }
        self.current(bulk_id, status)
    }

    pub fn pause(&self, bulk_id: &Uuid) -> Result<StepStatus> {
        let status = self.command(bulk_id, WorkflowState::Pausing, |s, c| s.pause_sequence(c))?;
        if status.is_accepted() {
            self.engine.transition_to(bulk_id, WorkflowState::Paused)?;
        }
        self.current(bulk_id, status)
    }

    pub fn resume(&self, bulk_id: &Uuid) -> Result<StepStatus> {
        let status = self.command(bulk_id, WorkflowState::Resuming, |s, c| s.resume_sequence(c))?;
        if status.is_accepted() {
            self.engine.transition_to(bulk_id, WorkflowState::Running)?;
            self.engine.refresh_cohort(bulk_id)?;
        }
        self.current(bulk_id, status)
    }

    pub fn restart(&self, bulk_id: &Uuid) -> Result<StepStatus> {
        let status = self.command(bulk_id, WorkflowState::Restarting, |s, c| s.restart_sequence(c))?;
        if status.is_accepted() {
            self.engine.transition_to(bulk_id, WorkflowState::Running)?;
            self.engine.refresh_cohort(bulk_id)?;
        }
        self.current(bulk_id, status)
    }

    /// Cancela el lote y cada hijo cuya tabla lo admita. Los hijos con
    /// trabajo en vuelo se cancelan en su próximo punto de control.
    pub fn cancel(&self, bulk_id: &Uuid) -> Result<StepStatus> {
        if self.engine.transition_to(bulk_id, WorkflowState::Canceling)?.is_none() {
            return Ok(StepStatus::Rejected);
        }
        let mut canceled = 0;
        for child in self.engine.children(bulk_id)? {
            if self.engine.cancel(&child.id)?.is_accepted() {
                canceled += 1;
            }
        }
        self.engine.transition_to(bulk_id, WorkflowState::Canceled)?;
        log::info!("lote {} cancelado ({} hijos cancelados)", bulk_id, canceled);
        self.current(bulk_id, StepStatus::Completed { state: WorkflowState::Canceled })
    }

    pub fn summary(&self, bulk_id: &Uuid) -> Result<BulkSummary> {
        let bulk = self.engine.get(bulk_id)?;
        let children = self.engine.children(bulk_id)?;
        let mut by_state = BTreeMap::new();
        for child in &children {
            *by_state.entry(child.state.to_string()).or_insert(0) += 1;
        }
        Ok(BulkSummary { bulk_id: bulk.id,
                         kind: bulk.kind,
                         state: bulk.state,
                         children: children.len(),
                         parked: children.iter().filter(|c| c.parked.is_some()).count(),
                         by_state,
                         invalid_items: bulk.invalid_items })
    }

    fn command<F>(&self, bulk_id: &Uuid, transient: WorkflowState, sequence: F) -> Result<StepStatus>
        where F: FnOnce(&dyn BulkStrategy, &dyn Cohort) -> Result<bool>
    {
        let bulk = self.engine.get(bulk_id)?;
        let strategy = strategy_for(bulk.kind).ok_or_else(|| {
                                                  FlowError::InvalidArgument(format!("{} no es un registro masivo",
                                                                                     bulk_id))
                                              })?;
        let prev = match self.engine.transition_to(bulk_id, transient)? {
            Some(prev) => prev,
            None => return Ok(StepStatus::Rejected),
        };
        let bulk = self.engine.get(bulk_id)?;
        let cohort = BulkCohort { coordinator: self, bulk, child_kind: strategy.child_kind() };
        let view: &dyn Cohort = &cohort;
        match sequence(strategy, view) {
            Ok(true) => Ok(StepStatus::Completed { state: transient }),
            Ok(false) => {
                log::warn!("lote {}: la secuencia de {} no tuvo efecto", bulk_id, transient);
                self.engine.revert_to(bulk_id, prev)?;
                Ok(StepStatus::Failed)
            }
            Err(e) => {
                log::error!("lote {}: la secuencia de {} falló: {}", bulk_id, transient, e);
                self.engine.revert_to(bulk_id, prev)?;
                Err(e)
            }
        }
    }

    fn current(&self, bulk_id: &Uuid, status: StepStatus) -> Result<StepStatus> {
        match status {
            StepStatus::Completed { .. } => Ok(StepStatus::Completed { state: self.engine.get(bulk_id)?.state }),
            other => Ok(other),
        }
    }

    fn lock_manifests(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, Arc<Manifest>>>> {
        self.manifests
            .lock()
            .map_err(|e| FlowError::Storage(format!("mutex poisoned: {:?}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategies_cover_bulk_kinds_only() {
        for kind in [WorkflowKind::BulkCreate, WorkflowKind::BulkEdit, WorkflowKind::BulkRemove] {
            let s = strategy_for(kind).expect("estrategia");
            assert_eq!(s.kind(), kind);
            assert_eq!(Some(s.child_kind()), kind.child_kind());
            assert_eq!(Some(s.generated_action()), kind.storage_action());
        }
        assert!(strategy_for(WorkflowKind::Create).is_none());
        assert!(strategy_for(WorkflowKind::Review).is_none());
    }
}
