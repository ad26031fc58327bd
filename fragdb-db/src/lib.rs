mod schema;
mod url;
pub mod db;
pub mod models;
pub mod pool;

pub(crate) use schema::*;

pub use url::*;

pub use diesel::result::DatabaseErrorKind;
pub use diesel::result::Error as QueryError;
pub use diesel::{Connection, PgConnection};
