use validator::{Validate, ValidationErrors};

use crate::error::AppError;

pub trait ValidateExt: Sized {
    fn validate_request(self) -> Result<Self, AppError>;
}

impl<T: Validate> ValidateExt for T {
    fn validate_request(self) -> Result<Self, AppError> {
        match self.validate() {
            Ok(()) => Ok(self),
            Err(errors) => Err(AppError::Validation(describe(&errors))),
        }
    }
}

fn describe(errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, field_errors)| {
            field_errors.iter().map(move |error| {
                let message = error
                    .message
                    .clone()
                    .unwrap_or_else(|| "Invalid value".into());
                format!("{}: {}", field, message)
            })
        })
        .collect();

    messages.sort();
    messages.join("; ")
}
