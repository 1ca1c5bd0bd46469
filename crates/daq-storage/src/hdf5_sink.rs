//! HDF5 table sink.
//!
//! Each table becomes one group in the file, each column one dataset whose
//! first dimension is the record index. Column units go on the dataset as a
//! `units` attribute; table attributes go on the group. The file is created
//! on the first write and appended to afterwards, so a sequence of runs
//! lands in a single file, readable from Python, MATLAB or Igor.

use anyhow::Result;
use daq_core::capabilities::TableSink;
use daq_core::data::ColumnTable;
use daq_core::error::AppResult;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Hdf5TableSink {
    path: PathBuf,
}

impl Hdf5TableSink {
    /// Sink writing into `path`.
    #[cfg(feature = "storage_hdf5")]
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            path: path.as_ref().to_path_buf(),
        })
    }

    #[cfg(not(feature = "storage_hdf5"))]
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        anyhow::bail!(
            "HDF5 storage feature not enabled (cannot write {})",
            path.as_ref().display()
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(feature = "storage_hdf5")]
    fn write_blocking(&self, table: &ColumnTable) -> Result<()> {
        use anyhow::bail;
        use hdf5::File;

        // Strings are encoded up front so a bad value never leaves a group behind.
        let encoded = EncodedStrings::new(table)?;

        let file = File::append(&self.path)?;
        if file.group(table.group()).is_ok() {
            bail!(
                "group '{}' already exists in {}",
                table.group(),
                self.path.display()
            );
        }
        let group = file.create_group(table.group())?;
        if let Err(err) = write_group(&group, table, &encoded) {
            drop(group);
            if let Err(unlink_err) = file.unlink(table.group()) {
                tracing::error!(
                    group = table.group(),
                    error = %unlink_err,
                    "Could not remove partially written group"
                );
            }
            return Err(err);
        }
        file.flush()?;
        Ok(())
    }

    #[cfg(not(feature = "storage_hdf5"))]
    fn write_blocking(&self, _table: &ColumnTable) -> Result<()> {
        anyhow::bail!("HDF5 storage feature not enabled")
    }
}

#[cfg(feature = "storage_hdf5")]
fn unicode(value: &str) -> Result<hdf5::types::VarLenUnicode> {
    value
        .parse::<hdf5::types::VarLenUnicode>()
        .map_err(|e| anyhow::anyhow!("invalid HDF5 string {value:?}: {e:?}"))
}

/// Every string of a table converted to its HDF5 form, by column and attribute index.
#[cfg(feature = "storage_hdf5")]
struct EncodedStrings {
    text: Vec<Option<Vec<hdf5::types::VarLenUnicode>>>,
    units: Vec<Option<hdf5::types::VarLenUnicode>>,
    attrs: Vec<Option<hdf5::types::VarLenUnicode>>,
}

#[cfg(feature = "storage_hdf5")]
impl EncodedStrings {
    fn new(table: &ColumnTable) -> Result<Self> {
        use daq_core::data::{AttrValue, ColumnData};

        let mut text = Vec::with_capacity(table.columns().len());
        let mut units = Vec::with_capacity(table.columns().len());
        for column in table.columns() {
            text.push(match &column.data {
                ColumnData::Text(values) => Some(
                    values
                        .iter()
                        .map(|v| unicode(v))
                        .collect::<Result<Vec<_>>>()?,
                ),
                _ => None,
            });
            units.push(column.units.as_deref().map(unicode).transpose()?);
        }
        let attrs = table
            .attrs()
            .values()
            .map(|value| match value {
                AttrValue::Text(v) => unicode(v).map(Some),
                _ => Ok(None),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { text, units, attrs })
    }
}

#[cfg(feature = "storage_hdf5")]
fn write_group(group: &hdf5::Group, table: &ColumnTable, encoded: &EncodedStrings) -> Result<()> {
    use daq_core::data::{AttrValue, ColumnData};
    use hdf5::types::VarLenUnicode;

    for (i, column) in table.columns().iter().enumerate() {
        let name = column.name.as_str();
        let dataset = match (&column.data, &encoded.text[i]) {
            (ColumnData::F64 { shape, values }, _) => {
                let ds = group.new_dataset::<f64>().shape(shape.clone()).create(name)?;
                ds.write_raw(values)?;
                ds
            }
            (ColumnData::U32 { shape, values }, _) => {
                let ds = group.new_dataset::<u32>().shape(shape.clone()).create(name)?;
                ds.write_raw(values)?;
                ds
            }
            (ColumnData::Text(_), Some(values)) => {
                let ds = group
                    .new_dataset::<VarLenUnicode>()
                    .shape(values.len())
                    .create(name)?;
                ds.write_raw(values)?;
                ds
            }
            (ColumnData::Text(_), None) => anyhow::bail!("column '{name}' was not encoded"),
        };
        if let Some(units) = &encoded.units[i] {
            dataset
                .new_attr::<VarLenUnicode>()
                .create("units")?
                .write_scalar(units)?;
        }
    }

    for ((name, value), text) in table.attrs().iter().zip(&encoded.attrs) {
        let name = name.as_str();
        match (value, text) {
            (AttrValue::Bool(v), _) => group.new_attr::<bool>().create(name)?.write_scalar(v)?,
            (AttrValue::I64(v), _) => group.new_attr::<i64>().create(name)?.write_scalar(v)?,
            (AttrValue::F64(v), _) => group.new_attr::<f64>().create(name)?.write_scalar(v)?,
            (AttrValue::Text(_), Some(v)) => group
                .new_attr::<VarLenUnicode>()
                .create(name)?
                .write_scalar(v)?,
            (AttrValue::Text(_), None) => anyhow::bail!("attribute '{name}' was not encoded"),
        }
    }
    Ok(())
}

impl TableSink for Hdf5TableSink {
    fn write_table(&self, table: &ColumnTable) -> AppResult<()> {
        self.write_blocking(table).map_err(crate::storage_error)?;
        tracing::info!(
            path = %self.path.display(),
            group = table.group(),
            records = table.rows(),
            columns = table.columns().len(),
            "Run written to HDF5"
        );
        Ok(())
    }

    fn describe(&self) -> String {
        format!("hdf5:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(feature = "storage_hdf5"))]
    fn constructor_reports_missing_feature() {
        let err = Hdf5TableSink::new("run.h5").unwrap_err();
        assert!(err.to_string().contains("HDF5 storage feature not enabled"));
    }

    #[cfg(feature = "storage_hdf5")]
    mod hdf5_enabled {
        use super::*;
        use tempfile::TempDir;

        fn table(group: &str) -> ColumnTable {
            let mut table = ColumnTable::new(group, 3);
            table
                .push_f64("Wavefront RMS", Some("um"), vec![0.1, f64::NAN, 0.3])
                .unwrap();
            table
                .push_f64_array("Zernike RMS", Some("um"), &[2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
                .unwrap();
            table.push_u32("Step Failures", vec![0, 64, 0]).unwrap();
            table
                .push_text("Timestamp", vec!["a".into(), "b".into(), "c".into()])
                .unwrap();
            table.set_attr("zernike_order", 4);
            table.set_attr("limit_to_pupil", true);
            table.set_attr("camera_model", "WFS20");
            table
        }

        #[test]
        fn writes_one_dataset_per_column() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("runs.h5");
            let sink = Hdf5TableSink::new(&path).unwrap();
            sink.write_table(&table("wavefront_sensor")).unwrap();

            let file = hdf5::File::open(&path).unwrap();
            let group = file.group("wavefront_sensor").unwrap();
            let rms = group.dataset("Wavefront RMS").unwrap();
            assert_eq!(rms.shape(), vec![3]);
            let values: Vec<f64> = rms.read_raw().unwrap();
            assert!(values[1].is_nan());
            assert_eq!(group.dataset("Zernike RMS").unwrap().shape(), vec![3, 2]);
            let order: i64 = group.attr("zernike_order").unwrap().read_scalar().unwrap();
            assert_eq!(order, 4);
        }

        #[test]
        fn appends_groups_and_rejects_duplicates() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("runs.h5");
            let sink = Hdf5TableSink::new(&path).unwrap();
            sink.write_table(&table("shot_1")).unwrap();
            sink.write_table(&table("shot_2")).unwrap();
            assert!(sink.write_table(&table("shot_1")).is_err());

            let file = hdf5::File::open(&path).unwrap();
            assert_eq!(file.member_names().unwrap(), vec!["shot_1", "shot_2"]);
        }

        #[test]
        fn unencodable_text_writes_nothing() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("runs.h5");
            let sink = Hdf5TableSink::new(&path).unwrap();
            sink.write_table(&table("shot_0")).unwrap();

            let mut bad = ColumnTable::new("shot_1", 1);
            bad.push_f64("Wavefront RMS", Some("um"), vec![0.2]).unwrap();
            bad.push_text("Timestamp", vec!["12:00\0".into()]).unwrap();
            assert!(sink.write_table(&bad).is_err());

            let file = hdf5::File::open(&path).unwrap();
            assert_eq!(file.member_names().unwrap(), vec!["shot_0"]);
        }

        #[test]
        fn failed_write_leaves_group_free_for_retry() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("runs.h5");
            let sink = Hdf5TableSink::new(&path).unwrap();

            // The first dataset lands, the second name cannot be created.
            let mut broken = ColumnTable::new("shot_1", 3);
            broken
                .push_f64("Wavefront RMS", Some("um"), vec![0.1, 0.2, 0.3])
                .unwrap();
            broken.push_u32("Step\0Failures", vec![0, 0, 0]).unwrap();
            assert!(sink.write_table(&broken).is_err());

            sink.write_table(&table("shot_1")).unwrap();
            let file = hdf5::File::open(&path).unwrap();
            let group = file.group("shot_1").unwrap();
            assert_eq!(group.dataset("Step Failures").unwrap().shape(), vec![3]);
        }
    }
}
