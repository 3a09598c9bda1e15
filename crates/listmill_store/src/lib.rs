//! SQLite-backed storage for Listmill lists.
//!
//! Lists, their columns and their cells form a single aggregate owned by
//! [`ListStore`]; columns and cells are addressed by `(list_id, ...)` and
//! have no standalone identity outside this crate.

pub mod error;
pub mod models;
mod schema;
mod store;

pub use error::{Result, StoreError};
pub use models::{
    ColumnDef, ColumnType, JsonConfigStatus, List, ListColumn, ListRow, NewList, SelectedColumn,
    SourceFormat, UpdateType,
};
pub use store::ListStore;
