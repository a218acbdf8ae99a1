use crate::item::ItemRef;
use crate::manifest::{Manifest, ManifestLoader};
use crate::DomainError;
use dashmap::DashMap;
use serde_json::json;

/// Loader en memoria: asocia referencias diferidas a listas de ítems.
#[derive(Debug, Default)]
pub struct InMemoryManifestLoader {
    sources: DashMap<String, Vec<ItemRef>>,
}

impl InMemoryManifestLoader {
    pub fn new() -> Self {
        Self { sources: DashMap::new() }
    }

    /// Registra (o reemplaza) la lista asociada a `reference`.
    pub fn register(&self, reference: impl Into<String>, items: Vec<ItemRef>) {
        self.sources.insert(reference.into(), items);
    }
}

impl ManifestLoader for InMemoryManifestLoader {
    fn load(&self, reference: &str) -> Result<Vec<ItemRef>, DomainError> {
        self.sources
            .get(reference)
            .map(|v| v.value().clone())
            .ok_or_else(|| DomainError::ValidationError(format!("referencia de manifiesto desconocida: {}", reference)))
    }
}

pub struct DomainStubs;

impl DomainStubs {
    /// Manifiesto de ejemplo con representaciones heterogéneas y dos ítems
    /// inválidos (vacío y registro sin id).
    pub fn sample_manifest() -> Manifest {
        Manifest::from_items(vec![ItemRef::Id("doc-001".into()),
                                  ItemRef::Number(1002),
                                  ItemRef::Record(json!({"id": "doc-003", "title": "Informe"})),
                                  ItemRef::Content(b"contenido adjunto".to_vec()),
                                  ItemRef::Id("  ".into()),
                                  ItemRef::Record(json!({"title": "sin identificador"}))]).with_name("sample")
    }

    /// `n` ítems textuales `item-1..item-n`.
    pub fn numbered_items(n: usize) -> Vec<ItemRef> {
        (1..=n).map(|i| ItemRef::Id(format!("item-{}", i))).collect()
    }
}
