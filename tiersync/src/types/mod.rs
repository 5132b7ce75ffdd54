//! Row, value and schema types shared by every tier.

mod cell;
mod sized;
mod table;
mod table_row;

pub use cell::*;
pub use sized::*;
pub use table::*;
pub use table_row::*;

// Re-exports.
pub use tiersync_mysql::types::{ColumnDefinition, MySqlType};
pub use tiersync_postgres::types::WarehouseType;
