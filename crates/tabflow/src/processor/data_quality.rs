use std::collections::HashMap;

use serde_json::{json, Map, Value};

use crate::error::ProcessError;
use crate::model::ParameterBag;
use crate::processor::{params, Processor};
use crate::table::{float_to_json, Cell, Column, Table};

const TOP_VALUES: usize = 5;

/// Per-column completeness and distribution summary.
pub struct DataQuality;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        round2(count as f64 / total as f64 * 100.0)
    }
}

fn median(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Sample standard deviation; undefined for fewer than two values.
fn sample_std(values: &[f64], mean: f64) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    Some((sum_sq / (values.len() - 1) as f64).sqrt())
}

fn numeric_metrics(column: &Column, metrics: &mut Map<String, Value>) {
    let rows = column.len();
    let mut values: Vec<f64> = column.cells().iter().filter_map(Cell::as_f64).collect();

    let zeros = values.iter().filter(|v| **v == 0.0).count();
    let negatives = values.iter().filter(|v| **v < 0.0).count();

    if values.is_empty() {
        for key in ["min", "max", "mean", "median", "std"] {
            metrics.insert(key.to_string(), Value::Null);
        }
    } else {
        values.sort_by(f64::total_cmp);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        metrics.insert("min".into(), float_to_json(values[0]));
        metrics.insert("max".into(), float_to_json(values[values.len() - 1]));
        metrics.insert("mean".into(), float_to_json(mean));
        metrics.insert("median".into(), float_to_json(median(&values)));
        metrics.insert(
            "std".into(),
            sample_std(&values, mean)
                .map(float_to_json)
                .unwrap_or(Value::Null),
        );
    }

    metrics.insert("zeros_count".into(), json!(zeros));
    metrics.insert("zeros_percentage".into(), json!(percentage(zeros, rows)));
    metrics.insert("negative_count".into(), json!(negatives));
    metrics.insert(
        "negative_percentage".into(),
        json!(percentage(negatives, rows)),
    );
}

fn text_metrics(column: &Column, metrics: &mut Map<String, Value>) {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for cell in column.cells() {
        let key = match cell {
            Cell::Text(s) => s.clone(),
            Cell::Integer(i) => i.to_string(),
            Cell::Number(n) => n.to_string(),
            Cell::Missing => continue,
        };
        *counts.entry(key).or_insert(0) += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    metrics.insert("unique_count".into(), json!(ranked.len()));
    let top: Map<String, Value> = ranked
        .into_iter()
        .take(TOP_VALUES)
        .map(|(value, count)| (value, json!(count)))
        .collect();
    metrics.insert("top_values".into(), Value::Object(top));
}

impl Processor for DataQuality {
    fn name(&self) -> &'static str {
        "data_quality"
    }

    fn validate(&self, params: &ParameterBag) -> Result<(), ProcessError> {
        params::check_string_list(params, "columns")
    }

    fn process(&self, table: Table, params: &ParameterBag) -> Result<Value, ProcessError> {
        let selected = match params::string_list(params, "columns") {
            Some(columns) => {
                if let Some(missing) = columns.iter().find(|c| table.column(c).is_none()) {
                    return Err(ProcessError::ColumnNotFound(missing.clone()));
                }
                columns
            }
            None => table.column_names(),
        };

        let mut columns = Map::new();
        let mut missing_percentages = Vec::with_capacity(selected.len());

        for column in selected.iter().filter_map(|name| table.column(name)) {
            let missing = column.missing_count();
            let missing_pct = percentage(missing, column.len());
            missing_percentages.push(missing_pct);

            let mut metrics = Map::new();
            metrics.insert("dtype".into(), json!(column.dtype()));
            metrics.insert("missing_count".into(), json!(missing));
            metrics.insert("missing_percentage".into(), json!(missing_pct));

            if column.is_numeric() {
                numeric_metrics(column, &mut metrics);
            } else {
                text_metrics(column, &mut metrics);
            }
            columns.insert(column.name().to_string(), Value::Object(metrics));
        }

        let overall_missing = if missing_percentages.is_empty() {
            0.0
        } else {
            round2(missing_percentages.iter().sum::<f64>() / missing_percentages.len() as f64)
        };

        let column_count = columns.len();
        Ok(json!({
            "row_count": table.row_count(),
            "column_count": column_count,
            "columns": columns,
            "overall_missing_percentage": overall_missing,
            "quality_score": round2(100.0 - overall_missing),
        }))
    }
}
