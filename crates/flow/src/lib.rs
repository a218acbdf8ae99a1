//! Crate `flow`: motor de workflows de envío basado en registros
//!
//! Cada envío es un `WorkflowRecord` persistente con una máquina de estados
//! declarada por tipo (`state_table`). El motor (`WorkflowEngine`) aplica
//! transiciones con compare-and-set, despacha cada paso asíncrono como un
//! `Job` y encadena el siguiente paso mediante una `Continuation`
//! serializable que el worker devuelve a `WorkflowEngine::complete`.
//!
//! Diseño resumido:
//! - Transiciones rechazadas no son errores: se informan como
//!   `StepStatus::Rejected`.
//! - Cada paso crea un `ActionRecord`; su resultado se entrega al callback
//!   exactamente una vez.
//! - Las operaciones masivas (`BulkCoordinator`) gobiernan una cohorte de
//!   registros hijos con pausa, reanudación, reinicio y cancelación.
//!
//! Ejemplo rápido:
//! ```rust
//! use flow::{EngineConfig, FlowService, WorkflowKind, WorkflowRecord};
//! use std::sync::Arc;
//! use submission_domain::LiteralOnlyLoader;
//! let wiring = FlowService::in_memory(EngineConfig::default(), Arc::new(LiteralOnlyLoader));
//! let record = WorkflowRecord::new(WorkflowKind::Create, uuid::Uuid::new_v4()).with_item("doc-1");
//! let (id, _) = wiring.service.submit_record(record).unwrap();
//! wiring.service.drain().unwrap();
//! assert_eq!(wiring.service.engine().get(&id).unwrap().state.as_str(), "indexed");
//! ```
pub mod bulk;
pub mod continuation;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod repository;
pub mod service;
pub mod services;
pub mod state_table;
pub mod stubs;
pub mod worker;

pub use bulk::*;
pub use continuation::*;
pub use domain::*;
pub use engine::*;
pub use errors::*;
pub use repository::*;
pub use service::*;
pub use services::*;
pub use stubs::*;
pub use worker::*;
