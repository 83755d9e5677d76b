use nalgebra::DVector;
use statrs::statistics::Statistics;
use tracing::debug;

use super::models::Sequence;
use super::scaler::Scaler;
use crate::error::InputError;

const LABEL_COLUMN: &str = "LABEL";

/// Numeric feature columns of an uploaded CSV, before scaling.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureFrame {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Value of `name` in the first row, if that column exists.
    pub fn first(&self, name: &str) -> Option<f64> {
        let idx = self.column_index(name)?;
        self.rows.first().map(|row| row[idx])
    }

    pub fn first_cell(&self) -> Option<f64> {
        self.rows.first().and_then(|row| row.first()).copied()
    }
}

#[derive(Debug, Clone)]
pub struct PreparedBatch {
    pub raw: FeatureFrame,
    pub sequences: Vec<Sequence>,
}

enum ColumnKind {
    Numeric(Vec<Option<f64>>),
    Identifier,
}

fn csv_error(e: csv::Error) -> InputError {
    InputError::Csv(e.to_string())
}

fn parse_cell(cell: &str) -> Result<Option<f64>, ()> {
    if cell.is_empty() {
        return Ok(None);
    }
    match cell.parse::<f64>() {
        Ok(v) if v.is_nan() => Ok(None),
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(()),
    }
}

fn classify(name: &str, cells: &[&str]) -> Result<ColumnKind, InputError> {
    let parsed: Vec<Result<Option<f64>, ()>> = cells.iter().map(|c| parse_cell(c)).collect();
    let numeric = parsed.iter().filter(|p| matches!(p, Ok(Some(_)))).count();
    let text = parsed.iter().filter(|p| p.is_err()).count();

    match (numeric, text) {
        (0, 0) => Err(InputError::EmptyColumn(name.to_string())),
        (0, _) => Ok(ColumnKind::Identifier),
        (_, 0) => Ok(ColumnKind::Numeric(
            parsed.into_iter().map(|p| p.unwrap_or(None)).collect(),
        )),
        _ => {
            let row = parsed.iter().position(|p| p.is_err()).unwrap_or(0);
            Err(InputError::NonNumeric {
                row: row + 1,
                column: name.to_string(),
                value: cells[row].to_string(),
            })
        }
    }
}

/// Reads CSV text into a numeric frame: drops the label column and
/// all-text identifier columns, fills gaps with the column mean.
pub fn parse_csv(text: &str) -> Result<FeatureFrame, InputError> {
    if text.trim().is_empty() {
        return Err(InputError::Empty);
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader.headers().map_err(csv_error)?.clone();
    let records = reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(csv_error)?;

    if records.is_empty() {
        return Err(InputError::NoRows);
    }

    let mut columns = Vec::new();
    let mut values: Vec<Vec<Option<f64>>> = Vec::new();

    for (idx, name) in headers.iter().enumerate() {
        if name.eq_ignore_ascii_case(LABEL_COLUMN) {
            continue;
        }
        let cells: Vec<&str> = records.iter().map(|r| r.get(idx).unwrap_or("")).collect();
        match classify(name, &cells)? {
            ColumnKind::Numeric(column) => {
                columns.push(name.to_string());
                values.push(column);
            }
            ColumnKind::Identifier => debug!("Dropping non-numeric column '{}'", name),
        }
    }

    let filled: Vec<Vec<f64>> = values
        .into_iter()
        .map(|column| {
            let present: Vec<f64> = column.iter().flatten().copied().collect();
            let mean = present.iter().mean();
            column.into_iter().map(|v| v.unwrap_or(mean)).collect()
        })
        .collect();

    let rows = (0..records.len())
        .map(|r| filled.iter().map(|column| column[r]).collect())
        .collect();

    Ok(FeatureFrame { columns, rows })
}

fn to_sequence(scaled: Vec<f64>, input_features: usize) -> Sequence {
    scaled
        .chunks_exact(input_features)
        .map(|chunk| DVector::from_column_slice(chunk))
        .collect()
}

pub fn prepare_csv(
    text: &str,
    scaler: &Scaler,
    input_features: usize,
) -> Result<PreparedBatch, InputError> {
    let raw = parse_csv(text)?;

    if raw.columns.len() != scaler.n_features() {
        return Err(InputError::ColumnCount {
            expected: scaler.n_features(),
            actual: raw.columns.len(),
        });
    }

    let sequences = raw
        .rows
        .iter()
        .map(|row| scaler.transform_row(row).map(|s| to_sequence(s, input_features)))
        .collect::<Result<Vec<_>, _>>()?;

    debug!(
        "Prepared {} samples of {} timesteps",
        sequences.len(),
        sequences.first().map(|s| s.len()).unwrap_or(0)
    );
    Ok(PreparedBatch { raw, sequences })
}

/// A raw flux array is treated as one CSV row.
pub fn prepare_series(
    values: &[f64],
    scaler: &Scaler,
    input_features: usize,
) -> Result<Sequence, InputError> {
    if values.is_empty() {
        return Err(InputError::Empty);
    }
    if let Some(i) = values.iter().position(|v| !v.is_finite()) {
        return Err(InputError::InvalidValue(format!("element {} is not finite", i)));
    }
    let scaled = scaler.transform_row(values)?;
    Ok(to_sequence(scaled, input_features))
}
