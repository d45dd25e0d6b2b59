//! XSD Schema Repository
//!
//! A namespace-indexed store for XML Schema documents used to describe
//! message structures on the service bus.
//!
//! ## Features
//!
//! - **OASIS Catalog**: Every stored schema is registered in an XML catalog
//!   that stays valid for any catalog-aware resolver
//! - **Deduplication**: Structurally equivalent schemas are stored once, even
//!   when they differ in declaration, prefixes or import scaffolding
//! - **Collision-free naming**: New files never overwrite existing ones
//! - **Service writes**: A schema and the schemas it imports are stored
//!   together, with imports rewritten to the final sibling file names
//!
//! ## Architecture
//!
//! ```text
//! repository/
//! ├── catalog.xml          <uri name="{namespace}" uri="{location}"/> per schema
//! ├── billing.xsd
//! ├── billing-customer.xsd
//! └── billing-customer_1.xsd
//! ```

pub mod cache;
pub mod catalog;
pub mod config;
pub mod equivalence;
pub mod error;
pub mod namer;
pub mod schema;
pub mod store;
pub mod xsd;

pub use cache::CatalogCache;
pub use catalog::CatalogIndex;
pub use config::RepositoryConfig;
pub use equivalence::{ComparisonStrategy, SchemaComparator, StrictComparator, StructuralComparator};
pub use error::{RepositoryError, Result};
pub use namer::FileNamer;
pub use schema::{CatalogEntry, ImportSource, ServiceSchemas};
pub use store::SchemaStore;
