// Archivo: normalizer.rs
// Propósito: normalizar entradas heterogéneas en un `Request` canónico
// (`pre_flight`) y cualquier resultado en un `Response` canónico
// (`post_flight`).
use crate::errors::{BatchError, Result};
use crate::slice::SlicePolicy;
use crate::slicer::BatchResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use submission_domain::ItemRef;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Create,
    Update,
    Start,
    Cancel,
    Pause,
    Resume,
    List,
}

/// Solicitud canónica. Inmutable una vez normalizada: sólo `pre_flight`
/// estampa la hora de inicio, y nunca la sobrescribe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    job_id: Uuid,
    command: Command,
    manifest_id: Uuid,
    items: Vec<ItemRef>,
    batch_size: Option<usize>,
    extended: bool,
    started_at: Option<DateTime<Utc>>,
}

impl Request {
    pub fn new(command: Command, manifest_id: Uuid, items: Vec<ItemRef>) -> Self {
        Self { job_id: Uuid::new_v4(),
               command,
               manifest_id,
               items,
               batch_size: None,
               extended: false,
               started_at: None }
    }

    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_extended(mut self, extended: bool) -> Self {
        self.extended = extended;
        self
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn manifest_id(&self) -> Uuid {
        self.manifest_id
    }

    pub fn items(&self) -> &[ItemRef] {
        &self.items
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }

    pub fn extended(&self) -> bool {
        self.extended
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }
}

/// Solicitud compuesta: una sub-solicitud por slice, todas con el mismo
/// `manifest_id` y la misma hora de inicio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiRequest {
    pub job_id: Uuid,
    pub command: Command,
    pub manifest_id: Uuid,
    pub slice_size: usize,
    pub extended: bool,
    pub started_at: DateTime<Utc>,
    pub parts: Vec<Request>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Normalized {
    Single(Request),
    Multi(MultiRequest),
}

impl Normalized {
    pub fn job_id(&self) -> Uuid {
        match self {
            Normalized::Single(r) => r.job_id,
            Normalized::Multi(m) => m.job_id,
        }
    }

    pub fn command(&self) -> Command {
        match self {
            Normalized::Single(r) => r.command,
            Normalized::Multi(m) => m.command,
        }
    }

    pub fn manifest_id(&self) -> Uuid {
        match self {
            Normalized::Single(r) => r.manifest_id,
            Normalized::Multi(m) => m.manifest_id,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Normalized::Single(r) => r.started_at,
            Normalized::Multi(m) => Some(m.started_at),
        }
    }

    pub fn extended(&self) -> bool {
        match self {
            Normalized::Single(r) => r.extended,
            Normalized::Multi(m) => m.extended,
        }
    }

    /// Sub-solicitudes en orden (una sola para `Single`).
    pub fn parts(&self) -> Vec<&Request> {
        match self {
            Normalized::Single(r) => vec![r],
            Normalized::Multi(m) => m.parts.iter().collect(),
        }
    }

    /// Número de ítems de entrada.
    pub fn count(&self) -> usize {
        self.parts().iter().map(|p| p.items.len()).sum()
    }

    pub fn slice_size(&self) -> Option<usize> {
        match self {
            Normalized::Single(_) => None,
            Normalized::Multi(m) => Some(m.slice_size),
        }
    }

    pub fn context(&self) -> FlightContext {
        FlightContext { manifest_id: self.manifest_id(),
                        started_at: self.started_at().unwrap_or_else(Utc::now),
                        extended: self.extended() }
    }
}

/// Entradas aceptadas por `pre_flight`.
#[derive(Debug, Clone)]
pub enum CallInput {
    /// Forma ya normalizada; se devuelve sin cambios.
    Normalized(Normalized),
    Request(Request),
    Items {
        command: Command,
        manifest_id: Option<Uuid>,
        items: Vec<ItemRef>,
    },
    /// Arreglo de ítems u objeto `{command, manifest_id, items, batch_size, extended}`.
    Json(JsonValue),
}

impl From<Normalized> for CallInput {
    fn from(value: Normalized) -> Self {
        CallInput::Normalized(value)
    }
}

impl From<Request> for CallInput {
    fn from(value: Request) -> Self {
        CallInput::Request(value)
    }
}

impl CallInput {
    /// Aplica las opciones del llamador antes de normalizar: `batch_size`
    /// reemplaza al de la entrada y `extended` se suma al de la entrada.
    /// Una forma ya normalizada conserva su partición.
    pub fn with_overrides(self, batch_size: Option<usize>, extended: bool, default_command: Command) -> Result<Self> {
        let request = match self {
            CallInput::Normalized(mut n) => {
                if extended {
                    match &mut n {
                        Normalized::Single(r) => r.extended = true,
                        Normalized::Multi(m) => {
                            m.extended = true;
                            m.parts.iter_mut().for_each(|p| p.extended = true);
                        }
                    }
                }
                return Ok(CallInput::Normalized(n));
            }
            CallInput::Request(r) => r,
            CallInput::Items { command, manifest_id, items } => {
                Request::new(command, manifest_id.unwrap_or_else(Uuid::new_v4), items)
            }
            CallInput::Json(value) => request_from_json(value, default_command)?,
        };
        let batch_size = batch_size.or(request.batch_size);
        let extended = extended || request.extended;
        Ok(CallInput::Request(request.with_batch_size(batch_size).with_extended(extended)))
    }
}

/// Normaliza la entrada. Idempotente: una forma ya normalizada conserva su
/// hora de inicio y su partición.
pub fn pre_flight(input: CallInput, default_command: Command, policy: &SlicePolicy) -> Result<Normalized> {
    let request = match input {
        CallInput::Normalized(n) => return Ok(n),
        CallInput::Request(r) => r,
        CallInput::Items { command, manifest_id, items } => {
            Request::new(command, manifest_id.unwrap_or_else(Uuid::new_v4), items)
        }
        CallInput::Json(value) => request_from_json(value, default_command)?,
    };
    if request.batch_size == Some(0) {
        return Err(BatchError::Validation("batch_size debe ser mayor que cero".into()));
    }
    let mut request = request;
    if request.started_at.is_none() {
        request.started_at = Some(Utc::now());
    }
    let slice = policy.slice_for(request.batch_size, request.items.len());
    let slice = match slice {
        Some(s) => s,
        None => return Ok(Normalized::Single(request)),
    };
    let started_at = request.started_at.unwrap_or_else(Utc::now);
    let parts = request.items
                       .chunks(slice)
                       .map(|chunk| Request { job_id: Uuid::new_v4(),
                                              command: request.command,
                                              manifest_id: request.manifest_id,
                                              items: chunk.to_vec(),
                                              batch_size: Some(slice),
                                              extended: request.extended,
                                              started_at: Some(started_at) })
                       .collect();
    Ok(Normalized::Multi(MultiRequest { job_id: request.job_id,
                                        command: request.command,
                                        manifest_id: request.manifest_id,
                                        slice_size: slice,
                                        extended: request.extended,
                                        started_at,
                                        parts }))
}

fn request_from_json(value: JsonValue, default_command: Command) -> Result<Request> {
    match value {
        JsonValue::Array(items) => Ok(Request::new(default_command, Uuid::new_v4(), items_from_json(items))),
        JsonValue::Object(mut obj) => {
            let command = match obj.remove("command") {
                Some(c) => serde_json::from_value(c)?,
                None => default_command,
            };
            let manifest_id = match obj.remove("manifest_id") {
                Some(m) => serde_json::from_value(m)?,
                None => Uuid::new_v4(),
            };
            let items = match obj.remove("items") {
                Some(JsonValue::Array(items)) => items_from_json(items),
                Some(other) => {
                    return Err(BatchError::Validation(format!("'items' debe ser un arreglo, no {}", other)));
                }
                None => return Err(BatchError::Validation("falta el campo 'items'".into())),
            };
            let batch_size = match obj.remove("batch_size") {
                Some(JsonValue::Null) | None => None,
                Some(b) => Some(serde_json::from_value(b)?),
            };
            let extended = obj.remove("extended").and_then(|v| v.as_bool()).unwrap_or(false);
            Ok(Request::new(command, manifest_id, items).with_batch_size(batch_size)
                                                        .with_extended(extended))
        }
        other => Err(BatchError::Validation(format!("entrada no reconocida: {}", other))),
    }
}

fn items_from_json(items: Vec<JsonValue>) -> Vec<ItemRef> {
    items.into_iter()
         .map(|v| match v {
             JsonValue::String(s) => ItemRef::Id(s),
             JsonValue::Number(n) => match n.as_i64() {
                 Some(i) => ItemRef::Number(i),
                 None => ItemRef::Id(n.to_string()),
             },
             other => ItemRef::Record(other),
         })
         .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Partial,
    Failed,
    Rejected,
}

/// Respuesta canónica, construida una sola vez por llamada de nivel
/// superior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: ResponseStatus,
    pub data: JsonValue,
    pub duration_ms: Option<i64>,
    pub manifest_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn new(status: ResponseStatus, data: JsonValue) -> Self {
        Self { status, data, duration_ms: None, manifest_id: None, diagnostic: None, error: None }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
}

/// Lo que devolvió (o lanzó) la llamada envuelta.
#[derive(Debug)]
pub enum CallOutcome {
    Batch(BatchResult),
    Payload(JsonValue),
    Response(Response),
    Rejected(String),
    Raised(BatchError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlightContext {
    pub manifest_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub extended: bool,
}

impl FlightContext {
    pub fn new(manifest_id: Uuid, extended: bool) -> Self {
        Self { manifest_id, started_at: Utc::now(), extended }
    }
}

/// Construye la respuesta final. Siempre completa `duration_ms` y
/// `manifest_id`; con diagnósticos extendidos completa también
/// `diagnostic` y `error`.
pub fn post_flight(ctx: &FlightContext, outcome: CallOutcome) -> Response {
    let mut response = match outcome {
        CallOutcome::Batch(result) => {
            let status = batch_status(&result);
            let error = result.failure
                              .iter()
                              .next()
                              .map(|(id, reason)| format!("{} fallos; primero {}: {}", result.failure.len(), id, reason));
            match serde_json::to_value(&result) {
                Ok(data) => Response { error, ..Response::new(status, data) },
                Err(e) => Response { error: Some(e.to_string()), ..Response::new(ResponseStatus::Failed, JsonValue::Null) },
            }
        }
        CallOutcome::Payload(data) => Response::new(ResponseStatus::Ok, data),
        CallOutcome::Response(response) => response,
        CallOutcome::Rejected(reason) => Response { error: Some(reason), ..Response::new(ResponseStatus::Rejected, JsonValue::Null) },
        CallOutcome::Raised(e) => {
            log::error!("llamada sobre el manifiesto {} falló: {}", ctx.manifest_id, e);
            Response { error: Some(e.to_string()), ..Response::new(ResponseStatus::Failed, JsonValue::Null) }
        }
    };
    if response.duration_ms.is_none() {
        response.duration_ms = Some((Utc::now() - ctx.started_at).num_milliseconds().max(0));
    }
    if response.manifest_id.is_none() {
        response.manifest_id = Some(ctx.manifest_id);
    }
    if ctx.extended {
        if response.diagnostic.is_none() {
            response.diagnostic = Some(diagnostic(&response));
        }
        if response.error.is_none() {
            response.error = Some("ninguno".into());
        }
    } else if response.status == ResponseStatus::Ok {
        response.error = None;
    }
    response
}

fn batch_status(result: &BatchResult) -> ResponseStatus {
    if result.failure.is_empty() && result.invalid.is_empty() {
        ResponseStatus::Ok
    } else if !result.success.is_empty() {
        ResponseStatus::Partial
    } else {
        ResponseStatus::Failed
    }
}

fn diagnostic(response: &Response) -> String {
    let summary = json!({
        "status": response.status,
        "duration_ms": response.duration_ms,
        "count": response.data.get("count"),
        "failures": response.data.get("failure").and_then(|f| f.as_object()).map(|f| f.len()),
    });
    summary.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> SlicePolicy {
        SlicePolicy { configured: 4, min: 2, max: 10 }
    }

    fn items(n: usize) -> Vec<ItemRef> {
        (1..=n).map(|i| ItemRef::Id(format!("item-{}", i))).collect()
    }

    #[test]
    fn pre_flight_is_idempotent() {
        let first = pre_flight(CallInput::Items { command: Command::Create, manifest_id: None, items: items(9) },
                               Command::Create,
                               &policy()).expect("first");
        let started = first.started_at();
        assert!(started.is_some());
        let second = pre_flight(first.clone().into(), Command::Create, &policy()).expect("second");
        assert_eq!(second, first);
        assert_eq!(second.started_at(), started);
    }

    #[test]
    fn stamped_request_keeps_its_start_time() {
        let once = match pre_flight(Request::new(Command::Create, Uuid::new_v4(), items(1)).into(),
                                    Command::Create,
                                    &policy()).expect("single")
        {
            Normalized::Single(r) => r,
            other => panic!("expected single, got {:?}", other),
        };
        let stamp = once.started_at();
        let twice = pre_flight(once.into(), Command::Create, &policy()).expect("again");
        assert_eq!(twice.started_at(), stamp);
    }

    #[test]
    fn nine_items_become_three_parts_sharing_the_manifest() {
        let n = pre_flight(CallInput::Items { command: Command::Create, manifest_id: None, items: items(9) },
                           Command::Create,
                           &policy()).expect("multi");
        let sizes: Vec<usize> = n.parts().iter().map(|p| p.items().len()).collect();
        assert_eq!(sizes, vec![4, 4, 1]);
        assert!(n.parts().iter().all(|p| p.manifest_id() == n.manifest_id()));
        assert!(n.parts().iter().all(|p| p.started_at() == n.started_at()));
        assert_eq!(n.count(), 9);
    }

    #[test]
    fn json_inputs_are_accepted() {
        let manifest_id = Uuid::new_v4();
        let n = pre_flight(CallInput::Json(json!({
                               "command": "update",
                               "manifest_id": manifest_id,
                               "items": ["a", 7, {"id": "c"}],
                               "batch_size": 3
                           })),
                           Command::Create,
                           &policy()).expect("json");
        assert_eq!(n.command(), Command::Update);
        assert_eq!(n.manifest_id(), manifest_id);
        assert_eq!(n.slice_size(), Some(3));
        assert!(pre_flight(CallInput::Json(json!({"command": "create"})), Command::Create, &policy()).is_err());
        assert!(matches!(pre_flight(CallInput::Json(json!(["x"])), Command::Create, &policy()),
                         Ok(Normalized::Single(_))));
    }

    #[test]
    fn post_flight_fills_missing_fields() {
        let ctx = FlightContext::new(Uuid::new_v4(), true);
        let raised = post_flight(&ctx, CallOutcome::Raised(BatchError::Validation("x".into())));
        assert_eq!(raised.status, ResponseStatus::Failed);
        assert!(raised.duration_ms.is_some());
        assert_eq!(raised.manifest_id, Some(ctx.manifest_id));
        assert!(raised.diagnostic.is_some());
        assert!(raised.error.unwrap().contains("x"));

        let typed = post_flight(&ctx, CallOutcome::Response(Response::new(ResponseStatus::Partial, json!({}))));
        assert_eq!(typed.status, ResponseStatus::Partial);
        assert!(typed.duration_ms.is_some() && typed.diagnostic.is_some() && typed.error.is_some());

        let plain = post_flight(&FlightContext::new(Uuid::new_v4(), false), CallOutcome::Payload(json!([1])));
        assert!(plain.is_ok());
        assert!(plain.diagnostic.is_none() && plain.error.is_none());
    }
}
