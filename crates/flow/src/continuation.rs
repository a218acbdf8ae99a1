// Archivo: continuation.rs
// Propósito: continuaciones serializables que cruzan la frontera asíncrona
// entre el despacho de un paso y su callback de finalización.
use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Paso siguiente de una continuación. Las variantes `*Done` son callbacks
/// de finalización y requieren el id de la acción despachada; el resto
/// inician un paso nuevo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStep {
    Upload,
    Promote,
    Index,
    Submit,
    Unrecord,
    Unindex,
    Unstore,
    UploadDone,
    PromoteDone,
    IndexDone,
    SubmitDone,
    UnrecordDone,
    UnindexDone,
    UnstoreDone,
}

impl NextStep {
    pub fn is_callback(&self) -> bool {
        matches!(self,
                 NextStep::UploadDone
                 | NextStep::PromoteDone
                 | NextStep::IndexDone
                 | NextStep::SubmitDone
                 | NextStep::UnrecordDone
                 | NextStep::UnindexDone
                 | NextStep::UnstoreDone)
    }
}

impl fmt::Display for NextStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// `{target_id, next_step, inner}`: qué registro, qué manejador y qué
/// continuación interna invocar cuando el manejador termine con éxito.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuation {
    pub target_id: Uuid,
    pub next_step: NextStep,
    pub inner: Option<Box<Continuation>>,
}

impl Continuation {
    pub fn new(target_id: Uuid, next_step: NextStep) -> Self {
        Self { target_id, next_step, inner: None }
    }

    /// Encadena `inner` como continuación a invocar tras esta.
    pub fn then(mut self, inner: Option<Continuation>) -> Self {
        self.inner = inner.map(Box::new);
        self
    }

    /// Construye la cadena `steps[0] -> steps[1] -> ...` para un registro.
    /// Devuelve `None` si `steps` está vacío.
    pub fn chain(target_id: Uuid, steps: &[NextStep]) -> Option<Continuation> {
        steps.iter()
             .rev()
             .fold(None, |inner, step| Some(Continuation::new(target_id, *step).then(inner)))
    }

    /// Separa la cabeza de la continuación interna.
    pub fn split(self) -> (Uuid, NextStep, Option<Continuation>) {
        (self.target_id, self.next_step, self.inner.map(|b| *b))
    }

    /// Pasos de la cadena, de afuera hacia adentro.
    pub fn steps(&self) -> Vec<NextStep> {
        let mut out = vec![self.next_step];
        let mut cur = self.inner.as_deref();
        while let Some(c) = cur {
            out.push(c.next_step);
            cur = c.inner.as_deref();
        }
        out
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_nests_in_order() {
        let id = Uuid::new_v4();
        let c = Continuation::chain(id, &[NextStep::Upload, NextStep::Promote, NextStep::Index]).unwrap();
        assert_eq!(c.steps(), vec![NextStep::Upload, NextStep::Promote, NextStep::Index]);
        let (target, head, inner) = c.split();
        assert_eq!(target, id);
        assert_eq!(head, NextStep::Upload);
        assert_eq!(inner.unwrap().next_step, NextStep::Promote);
        assert!(Continuation::chain(id, &[]).is_none());
    }

    #[test]
    fn continuation_survives_json() {
        let id = Uuid::new_v4();
        let c = Continuation::new(id, NextStep::IndexDone).then(Continuation::chain(id, &[NextStep::Submit]));
        let raw = c.to_json().unwrap();
        assert_eq!(Continuation::from_json(&raw).unwrap(), c);
        assert!(raw.contains("index_done"));
    }
}
