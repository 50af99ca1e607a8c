//! Document store for the sylva query engine.
//!
//! A [`Database`] keeps collections of XML documents and binary resources
//! under `/db`, maintains the value and full-text indexes declared by
//! collection descriptors, and runs queries through [`Session`]s.
//!
//! ```no_run
//! use sylva_store::{Database, DatabaseConfig};
//!
//! let db = Database::open(DatabaseConfig::default().with_data_dir("/var/lib/sylva"))?;
//! db.store_document("/db/shop", "items.xml", "<items><item price='5'/></items>")?;
//! let total = db.session().query_to_string("sum(//item/@price)")?;
//! assert_eq!(total, "5");
//! # Ok::<(), sylva_store::StoreError>(())
//! ```

pub mod collection;
pub mod config;
pub mod database;
pub mod error;
pub mod index;
pub mod lock;
mod modules;
pub mod path;
pub mod persist;
pub mod session;

pub use config::{DatabaseConfig, Method, SerializationDefaults};
pub use database::{Database, Listing};
pub use error::{Result, StoreError};
pub use index::config::IndexConfig;
pub use index::{IndexManager, IndexStats};
pub use session::Session;
