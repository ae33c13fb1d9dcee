//! SQLite-backed list store.

use crate::error::{StorageError, StorageResult};
use rusqlite::{params, Connection};
use shopsync_crdt::ShoppingList;
use shopsync_types::ListId;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Persistent store mapping list id to canonical shopping-list JSON.
pub struct ListStore {
    conn: Arc<Mutex<Connection>>,
}

impl ListStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS shopping_list (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                items TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Loads every stored list. Rows that fail to decode are skipped with a
    /// warning so one corrupt row cannot block recovery of the rest.
    pub fn load_all(&self) -> StorageResult<Vec<ShoppingList>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, items FROM shopping_list")?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let items: String = row.get(1)?;
            Ok((id, items))
        })?;

        let mut lists = Vec::new();
        for row in rows {
            let (id, items) = row?;
            match ShoppingList::from_json(&items) {
                Ok(list) => lists.push(list),
                Err(e) => warn!("skipping corrupt row for list {id}: {e}"),
            }
        }
        Ok(lists)
    }

    /// Saves (inserts or replaces) one list.
    pub fn save(&self, list: &ShoppingList) -> StorageResult<()> {
        let json = list.to_json().map_err(|e| StorageError::CorruptRow {
            id: list.id().to_string(),
            reason: e.to_string(),
        })?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO shopping_list (id, name, items) VALUES (?1, ?2, ?3)",
            params![list.id().to_string(), list.name(), json],
        )?;
        Ok(())
    }

    /// Overwrites the store with exactly the given lists (shutdown flush).
    pub fn replace_all<'a>(
        &self,
        lists: impl IntoIterator<Item = &'a ShoppingList>,
    ) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM shopping_list", [])?;
        for list in lists {
            let json = list.to_json().map_err(|e| StorageError::CorruptRow {
                id: list.id().to_string(),
                reason: e.to_string(),
            })?;
            conn.execute(
                "INSERT INTO shopping_list (id, name, items) VALUES (?1, ?2, ?3)",
                params![list.id().to_string(), list.name(), json],
            )?;
        }
        Ok(())
    }

    /// Deletes one list. Deleting an absent id is a no-op.
    pub fn delete(&self, id: &ListId) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM shopping_list WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }

    /// Number of stored lists.
    pub fn len(&self) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM shopping_list", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
