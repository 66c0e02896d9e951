use obrolan_domain::error::FieldError;
use validator::{Validate, ValidationErrors};

use crate::error::ApiError;

pub fn validate<T: Validate>(value: &T) -> Result<(), ApiError> {
    value
        .validate()
        .map_err(|err| ApiError::validation(field_errors(&err)))
}

fn field_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut output: Vec<FieldError> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, failures)| {
            failures.iter().map(move |failure| {
                let message = failure
                    .message
                    .as_ref()
                    .map(|message| message.to_string())
                    .unwrap_or_else(|| format!("failed {} check", failure.code));
                FieldError::new(field.to_string(), message)
            })
        })
        .collect();
    output.sort_by(|a, b| a.field.cmp(&b.field));
    output
}
