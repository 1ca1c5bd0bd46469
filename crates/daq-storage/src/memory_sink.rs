//! In-memory table sink.

use daq_core::capabilities::TableSink;
use daq_core::data::ColumnTable;
use daq_core::error::{AppResult, DaqError};
use parking_lot::Mutex;
use tracing::debug;

/// Keeps every written table; rejects a second table for the same group.
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: Mutex<Vec<ColumnTable>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies of all tables in write order.
    pub fn tables(&self) -> Vec<ColumnTable> {
        self.tables.lock().clone()
    }

    pub fn table(&self, group: &str) -> Option<ColumnTable> {
        self.tables.lock().iter().find(|t| t.group() == group).cloned()
    }

    pub fn len(&self) -> usize {
        self.tables.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.lock().is_empty()
    }
}

impl TableSink for MemorySink {
    fn write_table(&self, table: &ColumnTable) -> AppResult<()> {
        let mut tables = self.tables.lock();
        if tables.iter().any(|t| t.group() == table.group()) {
            return Err(DaqError::Storage(format!(
                "group '{}' already written",
                table.group()
            )));
        }
        debug!(group = table.group(), rows = table.rows(), "Table kept in memory");
        tables.push(table.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(group: &str) -> ColumnTable {
        let mut table = ColumnTable::new(group, 2);
        table.push_f64("Wavefront RMS", Some("um"), vec![0.1, 0.2]).unwrap();
        table
    }

    #[test]
    fn keeps_tables_in_write_order() {
        let sink = MemorySink::new();
        sink.write_table(&table("run_a")).unwrap();
        sink.write_table(&table("run_b")).unwrap();

        assert_eq!(sink.len(), 2);
        let groups: Vec<String> = sink.tables().iter().map(|t| t.group().to_string()).collect();
        assert_eq!(groups, vec!["run_a", "run_b"]);
        assert_eq!(sink.table("run_b").unwrap().rows(), 2);
    }

    #[test]
    fn rejects_duplicate_group() {
        let sink = MemorySink::new();
        sink.write_table(&table("run_a")).unwrap();
        let err = sink.write_table(&table("run_a")).unwrap_err();
        assert!(matches!(err, DaqError::Storage(_)));
        assert_eq!(sink.len(), 1);
    }
}
