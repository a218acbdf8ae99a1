mod domain_stubs;
mod errors;
mod item;
mod item_store;
mod manifest;
mod resolver;

pub use domain_stubs::{DomainStubs, InMemoryManifestLoader};
pub use errors::DomainError;
pub use item::{ItemId, ItemRef};
pub use item_store::{InMemoryItemStore, ItemStatus, ItemStatusEntry, ItemStore};
pub use manifest::{FileManifestLoader, LiteralOnlyLoader, Manifest, ManifestLoader, ManifestSource};
pub use resolver::{DefaultResolver, IdentifierResolver, InvalidReason};
