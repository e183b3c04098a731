use rusqlite::{params, Connection, Result};

const GLOBAL_USED: &str = "global_used";
const GLOBAL_MAX: &str = "global_max";

/// System-wide daily submission counter and its ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalAllocation {
    pub used: u32,
    pub max: u32,
}

impl GlobalAllocation {
    pub fn is_exhausted(&self) -> bool {
        self.used >= self.max
    }
}

fn read(conn: &Connection, key: &str) -> Result<u32> {
    conn.query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| row.get(0))
}

pub fn global_allocation(conn: &Connection) -> Result<GlobalAllocation> {
    Ok(GlobalAllocation {
        used: read(conn, GLOBAL_USED)?,
        max: read(conn, GLOBAL_MAX)?,
    })
}

/// Applies the configured ceiling at startup
pub fn set_global_max(conn: &Connection, max: u32) -> Result<()> {
    conn.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![GLOBAL_MAX, max],
    )?;
    Ok(())
}

/// Callers run this inside the admission transaction.
pub fn increment_global_used(conn: &Connection) -> Result<()> {
    conn.execute("UPDATE meta SET value = value + 1 WHERE key = ?1", [GLOBAL_USED])?;
    Ok(())
}

pub fn reset_global_used(conn: &Connection) -> Result<()> {
    conn.execute("UPDATE meta SET value = 0 WHERE key = ?1", [GLOBAL_USED])?;
    Ok(())
}
