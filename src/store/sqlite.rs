use rusqlite::{Connection, OpenFlags};

/// Opens a read-write SQLite file in WAL mode, creating it when missing.
pub fn init_connection(path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
    )?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_row| Ok(()))?;
    Ok(conn)
}

/// Opens an existing SQLite file without write access.
pub fn open_read_only(path: &str) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
}
