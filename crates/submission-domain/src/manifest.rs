// manifest.rs
use crate::item::ItemRef;
use crate::DomainError;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Origen de los ítems de un manifiesto: lista literal ordenada o una
/// referencia diferida que se resuelve con un `ManifestLoader`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ManifestSource {
    Items(Vec<ItemRef>),
    Deferred(String),
}

/// Carga la lista de ítems a partir de una referencia diferida.
pub trait ManifestLoader: Send + Sync {
    fn load(&self, reference: &str) -> Result<Vec<ItemRef>, DomainError>;
}

/// Loader que sólo admite manifiestos literales.
#[derive(Debug, Default, Clone)]
pub struct LiteralOnlyLoader;

impl ManifestLoader for LiteralOnlyLoader {
    fn load(&self, reference: &str) -> Result<Vec<ItemRef>, DomainError> {
        Err(DomainError::ValidationError(format!("no hay loader para la referencia diferida '{}'", reference)))
    }
}

/// Loader que interpreta la referencia como ruta a un archivo JSON con un
/// array de ítems. Los elementos string se toman como `ItemRef::Id`, los
/// números como `ItemRef::Number` y los objetos como `ItemRef::Record`.
#[derive(Debug, Default, Clone)]
pub struct FileManifestLoader {
    pub base_dir: Option<PathBuf>,
}

impl ManifestLoader for FileManifestLoader {
    fn load(&self, reference: &str) -> Result<Vec<ItemRef>, DomainError> {
        let path = match &self.base_dir {
            Some(dir) => dir.join(reference),
            None => PathBuf::from(reference),
        };
        let raw = std::fs::read_to_string(&path)?;
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        let list = value.as_array()
                        .ok_or_else(|| DomainError::ValidationError(format!("{} no contiene un array", path.display())))?;
        Ok(list.iter()
               .map(|v| match v {
                   serde_json::Value::String(s) => ItemRef::Id(s.clone()),
                   serde_json::Value::Number(n) if n.is_i64() => ItemRef::Number(n.as_i64().unwrap_or_default()),
                   other => ItemRef::Record(other.clone()),
               })
               .collect())
    }
}

/// Lista ordenada de descriptores de ítems a enviar en una operación masiva.
///
/// La lista se normaliza a memoria en el primer acceso (`items`) y queda
/// cacheada; accesos posteriores no vuelven a invocar al loader.
#[derive(Debug, Clone)]
pub struct Manifest {
    id: Uuid,
    name: Option<String>,
    source: ManifestSource,
    items: OnceCell<Vec<ItemRef>>,
}

impl Manifest {
    pub fn new(id: Uuid, name: Option<String>, source: ManifestSource) -> Self {
        Self { id, name, source, items: OnceCell::new() }
    }

    pub fn from_items(items: Vec<ItemRef>) -> Self {
        Self::new(Uuid::new_v4(), None, ManifestSource::Items(items))
    }

    pub fn deferred(reference: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4(), None, ManifestSource::Deferred(reference.into()))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn source(&self) -> &ManifestSource {
        &self.source
    }

    /// Indica si la lista ya fue normalizada a memoria.
    pub fn is_loaded(&self) -> bool {
        self.items.get().is_some()
    }

    /// Devuelve los ítems en orden, cargándolos con `loader` la primera vez.
    pub fn items(&self, loader: &dyn ManifestLoader) -> Result<&[ItemRef], DomainError> {
        self.items
            .get_or_try_init(|| match &self.source {
                ManifestSource::Items(list) => Ok(list.clone()),
                ManifestSource::Deferred(reference) => {
                    log::debug!("cargando manifiesto {} desde '{}'", self.id, reference);
                    loader.load(reference)
                }
            })
            .map(|v| v.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader(AtomicUsize);

    impl ManifestLoader for CountingLoader {
        fn load(&self, _reference: &str) -> Result<Vec<ItemRef>, DomainError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![ItemRef::from("a"), ItemRef::from("b")])
        }
    }

    #[test]
    fn deferred_manifest_loads_once() {
        let loader = CountingLoader(AtomicUsize::new(0));
        let manifest = Manifest::deferred("lote-1");
        assert!(!manifest.is_loaded());
        assert_eq!(manifest.items(&loader).unwrap().len(), 2);
        assert_eq!(manifest.items(&loader).unwrap().len(), 2);
        assert_eq!(loader.0.load(Ordering::SeqCst), 1);
        assert!(manifest.is_loaded());
    }

    #[test]
    fn literal_manifest_keeps_order() {
        let manifest = Manifest::from_items(vec!["z".into(), "a".into(), ItemRef::Number(3)]);
        let items = manifest.items(&LiteralOnlyLoader).unwrap();
        assert_eq!(items[0], ItemRef::Id("z".into()));
        assert_eq!(items[2], ItemRef::Number(3));
    }

    #[test]
    fn literal_only_loader_rejects_deferred() {
        let manifest = Manifest::deferred("x.json");
        assert!(manifest.items(&LiteralOnlyLoader).is_err());
        assert!(!manifest.is_loaded());
    }
}
