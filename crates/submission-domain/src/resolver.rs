// resolver.rs
use crate::item::{ItemId, ItemRef};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Motivo por el cual un ítem no pudo reducirse a un id canónico.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvalidReason(pub String);

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reduce una representación arbitraria de ítem a su id canónico o a un
/// motivo de invalidez. Nunca falla con error: la invalidez es un resultado.
pub trait IdentifierResolver: Send + Sync {
    fn resolve(&self, item: &ItemRef) -> Result<ItemId, InvalidReason>;
}

impl<F> IdentifierResolver for F where F: Fn(&ItemRef) -> Result<ItemId, InvalidReason> + Send + Sync
{
    fn resolve(&self, item: &ItemRef) -> Result<ItemId, InvalidReason> {
        self(item)
    }
}

/// Claves buscadas, en orden, dentro de un `ItemRef::Record`.
const RECORD_ID_KEYS: [&str; 3] = ["id", "item_id", "identifier"];

/// Resolvedor por defecto.
#[derive(Debug, Clone, Default)]
pub struct DefaultResolver;

impl DefaultResolver {
    pub fn new() -> Self {
        Self
    }

    fn resolve_text(raw: &str) -> Result<ItemId, InvalidReason> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InvalidReason("identificador vacío".into()));
        }
        if let Some(bad) = trimmed.chars()
                                  .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ':' | '/')))
        {
            return Err(InvalidReason(format!("carácter inválido '{}' en identificador '{}'", bad, trimmed)));
        }
        Ok(ItemId::new(trimmed))
    }

    fn resolve_number(n: i64) -> Result<ItemId, InvalidReason> {
        if n <= 0 {
            return Err(InvalidReason(format!("identificador numérico no positivo: {}", n)));
        }
        Ok(ItemId::new(n.to_string()))
    }
}

impl IdentifierResolver for DefaultResolver {
    fn resolve(&self, item: &ItemRef) -> Result<ItemId, InvalidReason> {
        match item {
            ItemRef::Id(s) => Self::resolve_text(s),
            ItemRef::Number(n) => Self::resolve_number(*n),
            ItemRef::Record(value) => {
                let obj = value.as_object()
                               .ok_or_else(|| InvalidReason("el registro no es un objeto JSON".into()))?;
                for key in RECORD_ID_KEYS {
                    match obj.get(key) {
                        Some(serde_json::Value::String(s)) => return Self::resolve_text(s),
                        Some(serde_json::Value::Number(n)) => {
                            return n.as_i64()
                                    .ok_or_else(|| InvalidReason(format!("id numérico fuera de rango: {}", n)))
                                    .and_then(Self::resolve_number);
                        }
                        Some(other) if !other.is_null() => {
                            return Err(InvalidReason(format!("campo '{}' con tipo no soportado", key)));
                        }
                        _ => {}
                    }
                }
                Err(InvalidReason("registro sin campo de identificador".into()))
            }
            ItemRef::Content(bytes) => {
                if bytes.is_empty() {
                    return Err(InvalidReason("contenido vacío".into()));
                }
                Ok(ItemId::new(format!("sha256:{:x}", Sha256::digest(bytes))))
            }
        }
    }
}
