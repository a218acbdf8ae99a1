//! Motor de envíos por lotes.
//!
//! Recorre una lista de ítems por el pipeline fijo de pasos
//! (`persist_intent`, `stage_upload`, `promote`, `index`), en slices o ítem
//! por ítem, y devuelve un `BatchResult` envuelto en un `Response`
//! canónico. La fachada `SubmissionCoordinator` expone además los comandos
//! de control sobre lotes de workflows del crate `flow`.
//!
//! ```
//! use std::sync::Arc;
//! use submission_batch::{BatchConfig, BatchOptions, BatchSlicer, RecordingBackend, ResponseStatus,
//!                        SubmissionCoordinator};
//! use flow::{EngineConfig, FlowService};
//! use submission_domain::{DefaultResolver, InMemoryItemStore, ItemRef, LiteralOnlyLoader, Manifest};
//!
//! let config = BatchConfig::default();
//! let flow = FlowService::in_memory(EngineConfig::default(), Arc::new(LiteralOnlyLoader));
//! let backend = Arc::new(RecordingBackend::new(Arc::new(InMemoryItemStore::new())));
//! let slicer = BatchSlicer::from_config(&config, backend, Arc::new(DefaultResolver::new()));
//! let coordinator =
//!     SubmissionCoordinator::new(config, slicer, flow.service.bulk().clone(), Arc::new(LiteralOnlyLoader));
//!
//! let manifest = Manifest::from_items(vec![ItemRef::from("a"), ItemRef::from("b"), ItemRef::from("c")]);
//! let response = coordinator.batch_create(&manifest, BatchOptions::default()).unwrap();
//! assert_eq!(response.status, ResponseStatus::Ok);
//! assert_eq!(response.manifest_id, Some(manifest.id()));
//! ```
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod normalizer;
pub mod slice;
pub mod slicer;
pub mod step;

pub use config::*;
pub use coordinator::*;
pub use errors::*;
pub use normalizer::*;
pub use slice::*;
pub use slicer::*;
pub use step::*;
