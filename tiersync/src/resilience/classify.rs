//! Classification of driver errors into transient and fatal [`ErrorKind`]s.

use sqlx::mysql::MySqlDatabaseError;

use crate::database::DatabaseRole;
use crate::error::{ErrorKind, SyncError};

/// MySQL server error numbers worth retrying on a fresh connection.
const MYSQL_TRANSIENT_CONNECTION: &[u16] = &[
    1040, // too many connections
    1053, // server shutdown in progress
    1158, // error reading communication packets
    1159, // timeout reading communication packets
    1160, // error writing communication packets
    1161, // timeout writing communication packets
    2006, // server has gone away
    2013, // lost connection during query
];

/// MySQL server error numbers of lock conflicts.
const MYSQL_TRANSACTION_CONFLICT: &[u16] = &[
    1205, // lock wait timeout
    1213, // deadlock
];

const MYSQL_NO_SUCH_TABLE: u16 = 1146;

/// PostgreSQL SQLSTATEs worth retrying on a fresh connection, besides class `08`.
const PG_TRANSIENT_CONNECTION: &[&str] = &[
    "53300", // too many connections
    "57014", // query canceled
    "57P01", // admin shutdown
    "57P02", // crash shutdown
    "57P03", // cannot connect now
];

const PG_TRANSACTION_CONFLICT: &[&str] = &[
    "40001", // serialization failure
    "40P01", // deadlock detected
];

/// Classifies a driver error raised while talking to the `role` tier.
pub fn classify_sqlx(role: DatabaseRole, err: &sqlx::Error) -> ErrorKind {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => role.connection_error_kind(),
        sqlx::Error::Configuration(_) => ErrorKind::ConfigError,
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => ErrorKind::ConversionError,
        sqlx::Error::Database(db_err) => {
            if let Some(mysql_err) = db_err.try_downcast_ref::<MySqlDatabaseError>() {
                return classify_mysql_number(role, mysql_err.number());
            }

            match db_err.code() {
                Some(code) => classify_sqlstate(role, &code),
                None => role.query_error_kind(),
            }
        }
        _ => role.query_error_kind(),
    }
}

fn classify_mysql_number(role: DatabaseRole, number: u16) -> ErrorKind {
    if MYSQL_TRANSIENT_CONNECTION.contains(&number) {
        role.connection_error_kind()
    } else if MYSQL_TRANSACTION_CONFLICT.contains(&number) {
        ErrorKind::TransactionConflict
    } else if number == MYSQL_NO_SUCH_TABLE {
        ErrorKind::SourceSchemaError
    } else {
        role.query_error_kind()
    }
}

fn classify_sqlstate(role: DatabaseRole, code: &str) -> ErrorKind {
    if code.starts_with("08") || PG_TRANSIENT_CONNECTION.contains(&code) {
        role.connection_error_kind()
    } else if PG_TRANSACTION_CONFLICT.contains(&code) {
        ErrorKind::TransactionConflict
    } else if code.starts_with("22") {
        ErrorKind::ConversionError
    } else if code.starts_with("23") {
        ErrorKind::InvalidData
    } else {
        role.query_error_kind()
    }
}

/// Wraps a driver error raised while talking to the `role` tier.
#[track_caller]
pub fn database_error(role: DatabaseRole, description: &'static str, err: sqlx::Error) -> SyncError {
    let kind = classify_sqlx(role, &err);
    SyncError::wrap(kind, description, err)
}

/// Adapter for `map_err` keeping the callsite of the failing statement.
pub trait DatabaseResultExt<T> {
    fn or_db_error(self, role: DatabaseRole, description: &'static str) -> Result<T, SyncError>;
}

impl<T> DatabaseResultExt<T> for Result<T, sqlx::Error> {
    #[track_caller]
    fn or_db_error(self, role: DatabaseRole, description: &'static str) -> Result<T, SyncError> {
        match self {
            Ok(value) => Ok(value),
            Err(err) => Err(database_error(role, description, err)),
        }
    }
}
