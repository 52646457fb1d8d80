// Shape Layer - field-level validation of incoming payloads
//
// Errors are collected per field (and per child index for nested lists) so a
// client gets every problem in one response, keyed the same way the payload is.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

pub const REQUIRED: &str = "This field is required.";
pub const BLANK: &str = "This field may not be blank.";
pub const NULL: &str = "This field may not be null.";

/// For fields with a default: a missing key stays `None`, an explicit `null`
/// becomes `Some(None)`. Use with `#[serde(default, deserialize_with = "nullable")]`.
pub fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Messages for a single field, or the errors of each element of a nested list
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldError {
    Messages(Vec<String>),
    Nested(Vec<FieldErrors>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, FieldError>);

impl FieldErrors {
    /// Key for errors that concern the record as a whole
    pub const NON_FIELD: &'static str = "non_field_errors";

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        let message = message.into();
        match self.0.get_mut(field) {
            Some(FieldError::Messages(messages)) => messages.push(message),
            _ => {
                self.0
                    .insert(field.to_string(), FieldError::Messages(vec![message]));
            }
        }
    }

    /// Attach per-element errors of a nested list; dropped when every element is clean
    pub fn nest(&mut self, field: &str, children: Vec<FieldErrors>) {
        if children.iter().any(|c| !c.is_empty()) {
            self.0.insert(field.to_string(), FieldError::Nested(children));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&FieldError> {
        self.0.get(field)
    }

    /// Messages recorded for `field` (empty for unknown or nested fields)
    pub fn messages(&self, field: &str) -> &[String] {
        match self.0.get(field) {
            Some(FieldError::Messages(m)) => m,
            _ => &[],
        }
    }

    pub fn into_result(self) -> crate::Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(crate::Error::Validation(self))
        }
    }

    // ------------------------------------------------------------------------
    // Checks. Each records its message and returns the usable value, if any.
    // ------------------------------------------------------------------------

    /// Presence check for a required field
    pub fn required<T>(&mut self, field: &str, value: Option<T>) -> Option<T> {
        if value.is_none() {
            self.add(field, REQUIRED);
        }
        value
    }

    /// Field with a server-side default: missing takes `default`, `null` is rejected
    pub fn defaulted<T>(&mut self, field: &str, value: Option<Option<T>>, default: impl FnOnce() -> T) -> Option<T> {
        match value {
            None => Some(default()),
            Some(None) => {
                self.add(field, NULL);
                None
            }
            Some(Some(value)) => Some(value),
        }
    }

    /// Required, non-blank text no longer than `max` characters (trimmed)
    pub fn text(&mut self, field: &str, value: Option<&str>, max: usize) -> Option<String> {
        let value = self.required(field, value)?;
        self.bounded_text(field, value, max)
    }

    /// Optional text; blank becomes `None`
    pub fn optional_text(&mut self, field: &str, value: Option<&str>, max: usize) -> Option<String> {
        match value.map(str::trim) {
            None | Some("") => None,
            Some(v) => self.bounded_text(field, v, max),
        }
    }

    fn bounded_text(&mut self, field: &str, value: &str, max: usize) -> Option<String> {
        let value = value.trim();
        if value.is_empty() {
            self.add(field, BLANK);
            return None;
        }
        if value.chars().count() > max {
            self.add(
                field,
                format!("Ensure this field has no more than {max} characters."),
            );
            return None;
        }
        Some(value.to_string())
    }

    /// Required finite number
    pub fn number(&mut self, field: &str, value: Option<f64>) -> Option<f64> {
        let value = self.required(field, value)?;
        if !value.is_finite() {
            self.add(field, "A valid number is required.");
            return None;
        }
        Some(value)
    }

    /// Optional finite number
    pub fn optional_number(&mut self, field: &str, value: Option<f64>) -> Option<f64> {
        match value {
            None => None,
            Some(v) => self.number(field, Some(v)),
        }
    }

    /// Integer within an inclusive range
    pub fn range(&mut self, field: &str, value: i64, min: Option<i64>, max: Option<i64>) -> Option<i64> {
        if let Some(min) = min {
            if value < min {
                self.add(
                    field,
                    format!("Ensure this value is greater than or equal to {min}."),
                );
                return None;
            }
        }
        if let Some(max) = max {
            if value > max {
                self.add(
                    field,
                    format!("Ensure this value is less than or equal to {max}."),
                );
                return None;
            }
        }
        Some(value)
    }

    /// Value drawn from a closed set of choices
    pub fn choice<T>(&mut self, field: &str, value: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let parsed = parse(value);
        if parsed.is_none() {
            self.add(field, format!("\"{value}\" is not a valid choice."));
        }
        parsed
    }

    /// Choice that falls back to `default` when absent
    pub fn choice_or<T>(
        &mut self,
        field: &str,
        value: Option<Option<&str>>,
        default: T,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Option<T> {
        match value {
            None => Some(default),
            Some(None) => {
                self.add(field, NULL);
                None
            }
            Some(Some(v)) => self.choice(field, v, parse),
        }
    }

    /// Nullable choice; blank counts as unset
    pub fn optional_choice<T>(
        &mut self,
        field: &str,
        value: Option<&str>,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Option<T> {
        match value.map(str::trim) {
            None | Some("") => None,
            Some(v) => self.choice(field, v, parse),
        }
    }

    /// Optional number that may not be negative
    pub fn optional_non_negative(&mut self, field: &str, value: Option<f64>) -> Option<f64> {
        let value = self.optional_number(field, value)?;
        if value < 0.0 {
            self.add(field, "Ensure this value is greater than or equal to 0.");
            return None;
        }
        Some(value)
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        f.write_str(&json)
    }
}

/// Year of the current calendar date, the default for reporting years
pub fn current_year() -> i64 {
    use chrono::Datelike;
    i64::from(chrono::Utc::now().year())
}
