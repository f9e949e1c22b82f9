/// Raw batch reading.
///
/// Loads a CSV file into string cells without interpreting them. Type
/// coercion and every other content check belong to `ingest::validation`,
/// which is the sole gatekeeper for malformed data.

use crate::error::{IngestError, Result};
use std::io::Read;
use std::path::Path;

/// Uninterpreted CSV content: a header row plus string cells.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawBatch {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawBatch {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        RawBatch { headers, rows }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Parses CSV text from any reader. Header names are trimmed.
pub fn read_csv<R: Read>(source: R) -> Result<RawBatch> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(RawBatch { headers, rows })
}

/// Reads a CSV file from disk.
///
/// Returns `Read` if the file cannot be opened, `EmptyFile` if it has no
/// header row, and `Csv` if the content is not well-formed CSV.
pub fn read_csv_file(path: &Path) -> Result<RawBatch> {
    let file = std::fs::File::open(path).map_err(|e| IngestError::Read {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let batch = read_csv(file)?;
    if batch.headers.iter().all(|h| h.is_empty()) {
        return Err(IngestError::EmptyFile(path.to_path_buf()));
    }

    tracing::info!(
        path = %path.display(),
        rows = batch.len(),
        columns = batch.headers.len(),
        "read raw batch"
    );
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_csv_keeps_cells_as_strings() {
        let text = "timestamp,turbine_id,power_output\n2025-04-01 00:00:00, 1 ,100.5\n";
        let batch = read_csv(text.as_bytes()).unwrap();
        assert_eq!(batch.headers, vec!["timestamp", "turbine_id", "power_output"]);
        assert_eq!(batch.rows, vec![vec!["2025-04-01 00:00:00", "1", "100.5"]]);
        assert_eq!(batch.column_index("power_output"), Some(2));
        assert_eq!(batch.column_index("wind_speed"), None);
    }

    #[test]
    fn test_read_csv_keeps_empty_cells() {
        let text = "a,b\n1,\n,2\n";
        let batch = read_csv(text.as_bytes()).unwrap();
        assert_eq!(batch.rows[0], vec!["1", ""]);
        assert_eq!(batch.rows[1], vec!["", "2"]);
    }

    #[test]
    fn test_ragged_rows_are_rejected() {
        let text = "a,b\n1,2,3\n";
        assert!(matches!(read_csv(text.as_bytes()), Err(IngestError::Csv(_))));
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        let result = read_csv_file(Path::new("/definitely/not/here.csv"));
        assert!(matches!(result, Err(IngestError::Read { .. })));
    }
}
