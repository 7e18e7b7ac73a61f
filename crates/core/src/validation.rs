use chrono::{NaiveDate, NaiveDateTime};

use crate::row::{CellValue, Column, ColumnKind};

/// Per-column check run before a draft value is committed.
pub trait CellValidator: Send + Sync {
    fn validate(&self, value: &CellValue) -> Result<(), String>;
}

/// Adapts a closure into a [`CellValidator`].
pub struct FnValidator<F>(pub F);

impl<F> CellValidator for FnValidator<F>
where
    F: Fn(&CellValue) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, value: &CellValue) -> Result<(), String> {
        (self.0)(value)
    }
}

/// Built-in validator derived from a column descriptor: nullability plus the
/// shape of number, boolean and date values. Text and other columns accept
/// anything non-null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeValidator {
    kind: ColumnKind,
    nullable: bool,
}

impl TypeValidator {
    #[must_use]
    pub fn for_column(column: &Column) -> Self {
        Self {
            kind: column.kind,
            nullable: column.nullable,
        }
    }
}

impl CellValidator for TypeValidator {
    fn validate(&self, value: &CellValue) -> Result<(), String> {
        if value.is_null() {
            return if self.nullable {
                Ok(())
            } else {
                Err("value is required".to_string())
            };
        }

        match self.kind {
            ColumnKind::Number => validate_number(value),
            ColumnKind::Boolean => validate_boolean(value),
            ColumnKind::Date => validate_date(value),
            ColumnKind::Text | ColumnKind::Other => Ok(()),
        }
    }
}

fn validate_number(value: &CellValue) -> Result<(), String> {
    match value {
        CellValue::Number(_) => Ok(()),
        CellValue::String(raw) if raw.trim().parse::<f64>().is_ok_and(f64::is_finite) => Ok(()),
        _ => Err(format!("`{}` is not a number", display_value(value))),
    }
}

fn validate_boolean(value: &CellValue) -> Result<(), String> {
    match value {
        CellValue::Bool(_) => Ok(()),
        CellValue::String(raw)
            if matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "true" | "false" | "1" | "0"
            ) =>
        {
            Ok(())
        }
        _ => Err(format!("`{}` is not a boolean", display_value(value))),
    }
}

fn validate_date(value: &CellValue) -> Result<(), String> {
    let CellValue::String(raw) = value else {
        return Err(format!("`{}` is not a date", display_value(value)));
    };
    let raw = raw.trim();
    let parsed = NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok()
        || NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").is_ok()
        || NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").is_ok()
        || NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f").is_ok();
    if parsed {
        Ok(())
    } else {
        Err(format!("`{raw}` is not a date (expected YYYY-MM-DD)"))
    }
}

/// Converts text drafts for number and boolean columns into typed values so
/// a committed cell compares equal to what storage holds. Text that does not
/// parse is returned unchanged for the validator to reject.
#[must_use]
pub fn coerce_value(kind: ColumnKind, value: CellValue) -> CellValue {
    let CellValue::String(raw) = &value else {
        return value;
    };
    let trimmed = raw.trim();
    match kind {
        ColumnKind::Number => {
            if let Ok(integer) = trimmed.parse::<i64>() {
                return CellValue::from(integer);
            }
            if let Ok(unsigned) = trimmed.parse::<u64>() {
                return CellValue::from(unsigned);
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map_or(value, CellValue::Number)
        }
        ColumnKind::Boolean => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "1" => CellValue::Bool(true),
            "false" | "0" => CellValue::Bool(false),
            _ => value,
        },
        ColumnKind::Text | ColumnKind::Date | ColumnKind::Other => value,
    }
}

/// Human-facing rendering of a cell, shared by validation messages, filters
/// and hosts.
#[must_use]
pub fn display_value(value: &CellValue) -> String {
    match value {
        CellValue::Null => String::new(),
        CellValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{coerce_value, CellValidator, FnValidator, TypeValidator};
    use crate::row::{CellValue, Column, ColumnKind};

    #[test]
    fn number_columns_accept_numbers_and_numeric_text() {
        let validator = TypeValidator::for_column(&Column::new("amount", ColumnKind::Number));

        assert!(validator.validate(&json!(12.5)).is_ok());
        assert!(validator.validate(&json!(" 42 ")).is_ok());
        assert_eq!(
            validator.validate(&json!("twelve")),
            Err("`twelve` is not a number".to_string())
        );
    }

    #[test]
    fn required_columns_reject_null() {
        let validator =
            TypeValidator::for_column(&Column::new("email", ColumnKind::Text).required());

        assert_eq!(
            validator.validate(&CellValue::Null),
            Err("value is required".to_string())
        );
        assert!(validator.validate(&json!("a@b.c")).is_ok());
    }

    #[test]
    fn date_columns_accept_iso_dates_and_datetimes() {
        let validator = TypeValidator::for_column(&Column::new("created", ColumnKind::Date));

        assert!(validator.validate(&json!("2026-02-28")).is_ok());
        assert!(validator.validate(&json!("2026-02-28 10:11:12")).is_ok());
        assert!(validator.validate(&json!("2026-02-30")).is_err());
        assert!(validator.validate(&json!(20_260_228)).is_err());
    }

    #[test]
    fn boolean_columns_accept_common_spellings() {
        let validator = TypeValidator::for_column(&Column::new("active", ColumnKind::Boolean));

        assert!(validator.validate(&json!(true)).is_ok());
        assert!(validator.validate(&json!("FALSE")).is_ok());
        assert!(validator.validate(&json!("maybe")).is_err());
    }

    #[test]
    fn coercion_types_numeric_and_boolean_text() {
        assert_eq!(coerce_value(ColumnKind::Number, json!(" 42 ")), json!(42));
        assert_eq!(coerce_value(ColumnKind::Number, json!("2.5")), json!(2.5));
        assert_eq!(coerce_value(ColumnKind::Number, json!("twelve")), json!("twelve"));
        assert_eq!(coerce_value(ColumnKind::Boolean, json!("FALSE")), json!(false));
        assert_eq!(coerce_value(ColumnKind::Boolean, json!("1")), json!(true));
        assert_eq!(coerce_value(ColumnKind::Text, json!("42")), json!("42"));
        assert_eq!(coerce_value(ColumnKind::Number, CellValue::Null), CellValue::Null);
    }

    #[test]
    fn closures_can_act_as_validators() {
        let validator = FnValidator(|value: &CellValue| {
            if value.as_i64().is_some_and(|number| number >= 0) {
                Ok(())
            } else {
                Err("must be non-negative".to_string())
            }
        });

        assert!(validator.validate(&json!(3)).is_ok());
        assert!(validator.validate(&json!(-3)).is_err());
    }
}
