// Entity canonicalization
//
// Raw counterparty names printed by banks vary ("JOHN D", "johndoe99").
// Each user maps them to one canonical display name per entity type.
//
// - mapping: EntityMapping value type and name normalization
// - store:   MappingStore seam and its SQLite implementation
// - service: CanonicalizationService (resolve/create/update/delete/list)

pub mod mapping;
pub mod service;
pub mod store;

pub use mapping::{normalize_name, EntityMapping, EntityType};
pub use service::CanonicalizationService;
pub use store::{MappingStore, SqliteMappingStore};
