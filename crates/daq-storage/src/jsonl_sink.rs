//! Plain-text run dump.
//!
//! Appends one JSON object per record to a text file, keyed by column name,
//! plus `"group"` and `"record"` so several runs can share one file. The first
//! line of each run is a header object carrying the group attributes. Values
//! that were not measured (NaN) are written as `null`.

use crate::storage_error;
use anyhow::{bail, Context, Result};
use daq_core::capabilities::TableSink;
use daq_core::data::{AttrValue, ColumnData, ColumnTable};
use daq_core::error::AppResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// First line of every run. Field order is fixed so headers can be found by
/// prefix without parsing record lines.
#[derive(Serialize)]
struct RunHeader<'a> {
    attributes: &'a BTreeMap<String, AttrValue>,
    group: &'a str,
    records: usize,
}

#[derive(Deserialize)]
struct HeaderGroup {
    group: String,
}

const HEADER_PREFIX: &str = "{\"attributes\":";

#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    // Groups already in the file, read once on the first write.
    groups: Mutex<Option<HashSet<String>>>,
}

impl JsonLinesSink {
    /// Sink appending to `path`; the file is created on first write.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            groups: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Group names from the header lines of an existing file.
    fn scan_groups(&self) -> Result<HashSet<String>> {
        let mut groups = HashSet::new();
        if !self.path.exists() {
            return Ok(groups);
        }
        let file = File::open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if !line.starts_with(HEADER_PREFIX) {
                continue;
            }
            if let Ok(header) = serde_json::from_str::<HeaderGroup>(&line) {
                groups.insert(header.group);
            }
        }
        Ok(groups)
    }

    fn append(&self, table: &ColumnTable) -> Result<()> {
        let mut known = self.groups.lock();
        if known.is_none() {
            *known = Some(self.scan_groups()?);
        }
        let groups = known.get_or_insert_with(HashSet::new);
        if groups.contains(table.group()) {
            bail!("group '{}' already exists in {}", table.group(), self.path.display());
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {} for append", self.path.display()))?;
        let mut out = BufWriter::new(file);

        let header = RunHeader {
            attributes: table.attrs(),
            group: table.group(),
            records: table.rows(),
        };
        writeln!(out, "{}", serde_json::to_string(&header)?)?;

        for record in 0..table.rows() {
            let mut object = Map::new();
            object.insert("group".into(), json!(table.group()));
            object.insert("record".into(), json!(record));
            for column in table.columns() {
                object.insert(column.name.clone(), row_value(&column.data, record));
            }
            writeln!(out, "{}", Value::Object(object))?;
        }
        out.flush()?;
        groups.insert(table.group().to_string());
        Ok(())
    }
}

/// Value of one record; inner dimensions become nested arrays.
fn row_value(data: &ColumnData, record: usize) -> Value {
    let shape = data.shape();
    let inner = shape.get(1..).unwrap_or_default();
    let stride: usize = inner.iter().product();
    match data {
        ColumnData::F64 { values, .. } => {
            let row = values.get(record * stride..(record + 1) * stride).unwrap_or_default();
            nest(row, inner, |v| json!(v))
        }
        ColumnData::U32 { values, .. } => {
            let row = values.get(record * stride..(record + 1) * stride).unwrap_or_default();
            nest(row, inner, |v| json!(v))
        }
        ColumnData::Text(values) => values.get(record).map_or(Value::Null, |v| json!(v)),
    }
}

fn nest<T: Copy>(values: &[T], shape: &[usize], leaf: impl Fn(T) -> Value + Copy) -> Value {
    match shape {
        [] => values.first().map_or(Value::Null, |v| leaf(*v)),
        [_] => Value::Array(values.iter().map(|v| leaf(*v)).collect()),
        [_, rest @ ..] => {
            let stride: usize = rest.iter().product::<usize>().max(1);
            Value::Array(values.chunks(stride).map(|c| nest(c, rest, leaf)).collect())
        }
    }
}

impl TableSink for JsonLinesSink {
    fn write_table(&self, table: &ColumnTable) -> AppResult<()> {
        self.append(table).map_err(storage_error)?;
        info!(
            path = %self.path.display(),
            group = table.group(),
            records = table.rows(),
            "Run appended as JSON lines"
        );
        Ok(())
    }

    fn describe(&self) -> String {
        format!("jsonl:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn table(group: &str) -> ColumnTable {
        let mut table = ColumnTable::new(group, 2);
        table.push_f64("Wavefront RMS", Some("um"), vec![0.25, f64::NAN]).unwrap();
        table
            .push_f64_array("Zernike RMS", Some("um"), &[2], vec![1.0, 2.0, 3.0, 4.0])
            .unwrap();
        table
            .push_f64_array("Wavefront", Some("um"), &[2, 2], (0..8).map(f64::from).collect())
            .unwrap();
        table.push_u32("Step Failures", vec![0, 64]).unwrap();
        table
            .push_text("Timestamp", vec!["t0".into(), "t1".into()])
            .unwrap();
        table.set_attr("zernike_order", 4);
        table
    }

    fn lines(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn writes_header_then_one_object_per_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("WFSdata.txt");
        let sink = JsonLinesSink::new(&path);
        sink.write_table(&table("run_1")).unwrap();

        let lines = lines(&path);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["attributes"]["zernike_order"], json!(4));
        assert_eq!(lines[0]["records"], json!(2));

        assert_eq!(lines[1]["record"], json!(0));
        assert_eq!(lines[1]["Wavefront RMS"], json!(0.25));
        assert_eq!(lines[1]["Zernike RMS"], json!([1.0, 2.0]));
        assert_eq!(lines[1]["Wavefront"], json!([[0.0, 1.0], [2.0, 3.0]]));
        assert_eq!(lines[2]["Wavefront RMS"], Value::Null);
        assert_eq!(lines[2]["Step Failures"], json!(64));
        assert_eq!(lines[2]["Timestamp"], json!("t1"));
    }

    #[test]
    fn appends_runs_and_rejects_duplicate_group() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runs.jsonl");
        let sink = JsonLinesSink::new(&path);
        sink.write_table(&table("run_1")).unwrap();
        sink.write_table(&table("run_2")).unwrap();
        assert!(sink.write_table(&table("run_1")).is_err());

        assert_eq!(lines(&path).len(), 6);
        assert!(sink.describe().starts_with("jsonl:"));
    }

    #[test]
    fn existing_file_groups_are_found_from_headers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runs.jsonl");
        JsonLinesSink::new(&path).write_table(&table("run_1")).unwrap();

        // A record line naming a group is not a header.
        std::fs::write(
            &path,
            format!(
                "{}{{\"group\":\"run_9\",\"record\":0}}\n",
                std::fs::read_to_string(&path).unwrap()
            ),
        )
        .unwrap();

        let reopened = JsonLinesSink::new(&path);
        assert!(reopened.write_table(&table("run_1")).is_err());
        reopened.write_table(&table("run_9")).unwrap();
        assert!(reopened.write_table(&table("run_9")).is_err());
    }

    #[test]
    fn empty_table_writes_only_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.jsonl");
        JsonLinesSink::new(&path)
            .write_table(&ColumnTable::new("empty", 0))
            .unwrap();
        assert_eq!(lines(&path).len(), 1);
    }
}
