//! SQLite inventory of inbound connection attempts: services, remote
//! addresses, and how often each address called each service.

mod open;
mod models;
mod insert;
mod query;
mod schema;
mod arrow_schemas;
mod export_parquet;

pub use open::Db;
pub use models::*;
pub use insert::*;
pub use query::*;
