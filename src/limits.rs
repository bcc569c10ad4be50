/// Max reservations held at once. Sweeps free room as old entries expire.
pub const MAX_RESERVATIONS: usize = 100_000;

/// Max accepted username length in bytes.
pub const MAX_USERNAME_LEN: usize = 64;

/// Max configured users.
pub const MAX_USERS: usize = 10_000;

/// Max accepted SQL statement length in bytes.
pub const MAX_QUERY_LEN: usize = 16 * 1024;

/// Highest `$N` placeholder accepted in a prepared statement, as in PostgreSQL.
pub const MAX_PARAMS: usize = 65_535;
