use serde_json::{json, Map, Value};

use crate::error::ProcessError;
use crate::model::ParameterBag;
use crate::processor::{params, Processor};
use crate::table::{float_to_json, Table};

pub const DEFAULT_WINDOW_SIZE: usize = 5;
const SAMPLE_ROWS: usize = 10;

/// Centered rolling mean over numeric columns.
pub struct RollingMean;

/// Centered moving average with a minimum of one sample.
///
/// For index `i` the window covers `[i - w/2, i + (w - 1)/2]`, clipped to the
/// series, so even windows lean backward. Missing values are skipped; a window with no values yields `None`.
pub fn centered_rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let window = window.max(1);
    let last = values.len().saturating_sub(1);

    (0..values.len())
        .map(|i| {
            let reach = i + (window - 1) / 2;
            let start = reach.saturating_sub(window - 1);
            let end = reach.min(last);

            let (sum, count) = values[start..=end]
                .iter()
                .flatten()
                .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));

            if count == 0 {
                None
            } else {
                Some(sum / count as f64)
            }
        })
        .collect()
}

impl Processor for RollingMean {
    fn name(&self) -> &'static str {
        "rolling_mean"
    }

    fn validate(&self, params: &ParameterBag) -> Result<(), ProcessError> {
        params::check_string_list(params, "columns")
    }

    fn process(&self, table: Table, params: &ParameterBag) -> Result<Value, ProcessError> {
        let window = match params::integer(params, "window_size") {
            Some(w) if w >= 1 => w as usize,
            Some(w) => {
                log::warn!("window_size {} clamped to 1", w);
                1
            }
            None => DEFAULT_WINDOW_SIZE,
        };

        let requested = match params::string_list(params, "columns") {
            Some(columns) => {
                if let Some(missing) = columns.iter().find(|c| table.column(c).is_none()) {
                    return Err(ProcessError::ColumnNotFound(missing.clone()));
                }
                columns
            }
            None => table.numeric_column_names(),
        };

        let mut series = Map::new();
        let mut skipped = Vec::new();
        for name in &requested {
            let values = table.column(name).and_then(|c| c.numeric_values());
            match values {
                Some(values) => {
                    let averaged = centered_rolling_mean(&values, window)
                        .into_iter()
                        .map(|v| v.map(float_to_json).unwrap_or(Value::Null))
                        .collect();
                    series.insert(
                        format!("{}_rolling_mean_{}", name, window),
                        Value::Array(averaged),
                    );
                }
                None => {
                    log::warn!("Skipping non-numeric column '{}'", name);
                    skipped.push(name.clone());
                }
            }
        }

        let original_columns = table.column_names();
        let mut processed_columns = original_columns.clone();
        processed_columns.extend(series.keys().cloned());

        let sample_data: Vec<Value> = table
            .head_records(SAMPLE_ROWS)
            .into_iter()
            .enumerate()
            .map(|(row, mut record)| {
                if let Value::Object(fields) = &mut record {
                    for (key, values) in &series {
                        let cell = values.get(row).cloned().unwrap_or(Value::Null);
                        fields.insert(key.clone(), cell);
                    }
                }
                record
            })
            .collect();

        Ok(json!({
            "window_size": window,
            "original_columns": original_columns,
            "processed_columns": processed_columns,
            "skipped_columns": skipped,
            "series": series,
            "sample_data": sample_data,
        }))
    }
}
