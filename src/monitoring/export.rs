use std::fs::OpenOptions;
use std::path::Path;

use thiserror::Error;

use crate::monitoring::metrics::MetricsSnapshot;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Appends one snapshot row to the CSV file, writing the header only when
/// the file is first created.
pub fn append_snapshot(path: &Path, snapshot: &MetricsSnapshot) -> Result<(), ExportError> {
    let file_exists = path.exists();
    let file = OpenOptions::new().append(true).create(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);
    writer.serialize(snapshot)?;
    writer.flush()?;
    Ok(())
}
