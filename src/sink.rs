//! Persistence seam: finalized tables go to a `StatsSink`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::Result;

pub trait StatsSink {
    /// Stores `rows` as table `name`, replacing an earlier table of that name.
    fn write_table<R: Serialize>(&mut self, name: &str, rows: &[R]) -> Result<()>;
}

/// One `<name>.csv` per table inside a directory.
#[derive(Debug, Clone)]
pub struct CsvSink {
    dir: PathBuf,
}

impl CsvSink {
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(CsvSink { dir: dir.as_ref().to_path_buf() })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", name))
    }
}

impl StatsSink for CsvSink {
    fn write_table<R: Serialize>(&mut self, name: &str, rows: &[R]) -> Result<()> {
        let path = self.path(name);
        let mut wtr = csv::Writer::from_path(&path)?;
        for row in rows {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
        debug!(table = name, rows = rows.len(), path = %path.display(), "table written");
        Ok(())
    }
}

/// Keeps every table as CSV text.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    tables: BTreeMap<String, String>,
}

impl MemorySink {
    pub fn table(&self, name: &str) -> Option<&str> {
        self.tables.get(name).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item=&str> {
        self.tables.keys().map(String::as_str)
    }
}

impl StatsSink for MemorySink {
    fn write_table<R: Serialize>(&mut self, name: &str, rows: &[R]) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(vec![]);
        for row in rows {
            wtr.serialize(row)?;
        }
        let data = wtr.into_inner().map_err(|e| e.into_error())?;
        self.tables.insert(name.to_string(), String::from_utf8_lossy(&data).into_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Row {
        name: &'static str,
        value: i64,
    }

    #[test]
    fn test_memory_sink_writes_header_and_rows() {
        let mut sink = MemorySink::default();
        sink.write_table("t", &[Row { name: "a", value: 1 }, Row { name: "b", value: -1 }]).unwrap();
        assert_eq!(sink.table("t"), Some("name,value\na,1\nb,-1\n"));
        sink.write_table("t", &Vec::<Row>::new()).unwrap();
        assert_eq!(sink.table("t"), Some(""));
        assert_eq!(sink.names().collect::<Vec<_>>(), vec!["t"]);
    }

    #[test]
    fn test_csv_sink_creates_one_file_per_table() {
        let dir = std::env::temp_dir().join(format!("pcap_stats_sink_{}", std::process::id()));
        let mut sink = CsvSink::create(&dir).unwrap();
        sink.write_table("ip_ttl", &[Row { name: "x", value: 64 }]).unwrap();
        let text = fs::read_to_string(sink.path("ip_ttl")).unwrap();
        assert_eq!(text, "name,value\nx,64\n");
        fs::remove_dir_all(&dir).unwrap();
    }
}
