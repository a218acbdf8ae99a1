// item.rs
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identificador canónico de un ítem ya resuelto.
///
/// Es el único valor que circula por el pipeline de envío: las
/// representaciones heterogéneas (`ItemRef`) se reducen a un `ItemId` antes
/// de ejecutar cualquier paso.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Representación arbitraria de un ítem tal como la entrega el llamador.
///
/// - `Id`: identificador textual (posiblemente con espacios alrededor).
/// - `Number`: identificador numérico.
/// - `Record`: registro JSON que contiene el id en `id`, `item_id` o
///   `identifier`.
/// - `Content`: contenido en bruto; su id se deriva de un hash SHA-256.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ItemRef {
    Id(String),
    Number(i64),
    Record(serde_json::Value),
    Content(Vec<u8>),
}

impl ItemRef {
    /// Descripción corta usada al reportar ítems inválidos.
    pub fn describe(&self) -> String {
        match self {
            ItemRef::Id(s) => s.clone(),
            ItemRef::Number(n) => n.to_string(),
            ItemRef::Record(v) => v.to_string(),
            ItemRef::Content(bytes) => format!("<{} bytes>", bytes.len()),
        }
    }
}

impl From<&str> for ItemRef {
    fn from(value: &str) -> Self {
        ItemRef::Id(value.to_string())
    }
}

impl From<String> for ItemRef {
    fn from(value: String) -> Self {
        ItemRef::Id(value)
    }
}

impl From<i64> for ItemRef {
    fn from(value: i64) -> Self {
        ItemRef::Number(value)
    }
}

impl From<serde_json::Value> for ItemRef {
    fn from(value: serde_json::Value) -> Self {
        ItemRef::Record(value)
    }
}
