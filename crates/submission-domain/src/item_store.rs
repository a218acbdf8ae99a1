// item_store.rs
use crate::item::ItemId;
use crate::DomainError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Estado persistido de un ítem dentro de un manifiesto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Ok { step: String },
    Failed { step: String, reason: String },
}

impl ItemStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, ItemStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStatusEntry {
    pub manifest_id: Uuid,
    pub item: ItemId,
    pub status: ItemStatus,
    pub updated_at: DateTime<Utc>,
}

/// Ruta normal de persistencia del estado por ítem. Los motores de lote
/// nunca mutan la colección de entrada: todo cambio pasa por aquí.
pub trait ItemStore: Send + Sync {
    /// Registra el estado más reciente de `item` en `manifest_id`.
    fn record_status(&self, manifest_id: &Uuid, item: &ItemId, status: ItemStatus) -> Result<(), DomainError>;

    fn status(&self, manifest_id: &Uuid, item: &ItemId) -> Result<Option<ItemStatusEntry>, DomainError>;

    /// Lista las entradas del manifiesto ordenadas por id de ítem.
    fn list(&self, manifest_id: &Uuid) -> Result<Vec<ItemStatusEntry>, DomainError>;
}

/// Implementación en memoria para tests y desarrollo.
#[derive(Debug, Default)]
pub struct InMemoryItemStore {
    entries: DashMap<(Uuid, ItemId), ItemStatusEntry>,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ItemStore for InMemoryItemStore {
    fn record_status(&self, manifest_id: &Uuid, item: &ItemId, status: ItemStatus) -> Result<(), DomainError> {
        let entry = ItemStatusEntry { manifest_id: *manifest_id,
                                      item: item.clone(),
                                      status,
                                      updated_at: Utc::now() };
        self.entries.insert((*manifest_id, item.clone()), entry);
        Ok(())
    }

    fn status(&self, manifest_id: &Uuid, item: &ItemId) -> Result<Option<ItemStatusEntry>, DomainError> {
        Ok(self.entries
               .get(&(*manifest_id, item.clone()))
               .map(|e| e.value().clone()))
    }

    fn list(&self, manifest_id: &Uuid) -> Result<Vec<ItemStatusEntry>, DomainError> {
        let mut out: Vec<ItemStatusEntry> = self.entries
                                                .iter()
                                                .filter(|e| &e.key().0 == manifest_id)
                                                .map(|e| e.value().clone())
                                                .collect();
        out.sort_by(|a, b| a.item.cmp(&b.item));
        Ok(out)
    }
}
