use serde_json::{json, Map, Value};

use crate::error::ProcessError;
use crate::model::ParameterBag;
use crate::processor::{params, Processor};
use crate::table::{float_to_json, Table};

const PREVIEW_ROWS: usize = 5;

/// Multiplies one numeric column by a constant and previews the result.
pub struct ScaleColumn;

impl Processor for ScaleColumn {
    fn name(&self) -> &'static str {
        "scale_column"
    }

    fn validate(&self, params: &ParameterBag) -> Result<(), ProcessError> {
        params::check_string(params, "target_column")
    }

    fn process(&self, table: Table, params: &ParameterBag) -> Result<Value, ProcessError> {
        let mut result = json!({
            "message": "Scale column processor executed successfully.",
            "input_rows": table.row_count(),
            "input_cols": table.column_count(),
        });

        let Some(target) = params::string(params, "target_column") else {
            result["info"] = json!("No target_column given; nothing was scaled.");
            return Ok(result);
        };

        let column = table
            .column(&target)
            .ok_or_else(|| ProcessError::ColumnNotFound(target.clone()))?;
        let values = column
            .numeric_values()
            .ok_or_else(|| ProcessError::NonNumericColumn(target.clone()))?;
        let multiplier = params::number_or(params, "multiplier", 1.0);

        let preview: Map<String, Value> = values
            .iter()
            .take(PREVIEW_ROWS)
            .enumerate()
            .map(|(row, v)| {
                let scaled = v.map(|v| float_to_json(v * multiplier)).unwrap_or(Value::Null);
                (row.to_string(), scaled)
            })
            .collect();

        result["custom_calculation_details"] = json!({
            "target_column": target,
            "multiplier_used": multiplier,
            "new_column_name_preview": format!("{}_multiplied_by_{:?}", target, multiplier),
            "sample_custom_calculation_result": preview,
        });
        Ok(result)
    }
}
