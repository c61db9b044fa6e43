use std::path::Path;

use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::api::errors::ApiError;

pub(crate) const IMPORT_EXTENSION: &str = "xlsx";

/// Runs the payload's field rules before anything is sent.
pub(crate) fn validate_payload<T: Validate>(payload: &T) -> Result<(), ApiError> {
    payload.validate().map_err(|errors| ApiError::InvalidInput(describe(&errors)))
}

pub(crate) fn validate_uuid(value: &str, what: &str) -> Result<(), ApiError> {
    Uuid::parse_str(value.trim())
        .map(|_| ())
        .map_err(|_| ApiError::InvalidInput(format!("Invalid {what} id: {value}")))
}

/// Ids are interpolated into paths, so they must be a single non-empty segment.
pub(crate) fn validate_path_segment(value: &str, what: &str) -> Result<(), ApiError> {
    let invalid = value.trim().is_empty() || value.contains(['/', '?', '#', '\\']);
    if invalid {
        Err(ApiError::InvalidInput(format!("Invalid {what} id: {value:?}")))
    } else {
        Ok(())
    }
}

pub(crate) fn validate_import_file(path: &Path) -> Result<(), ApiError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .ok_or_else(|| ApiError::InvalidInput("File must have an extension".to_string()))?;

    if extension == IMPORT_EXTENSION {
        Ok(())
    } else {
        Err(ApiError::InvalidInput(format!(
            "Only .{IMPORT_EXTENSION} files can be imported, got '.{extension}'"
        )))
    }
}

fn describe(errors: &ValidationErrors) -> String {
    let mut messages = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, items)| {
            items.iter().map(move |item| match &item.message {
                Some(message) => format!("{field}: {message}"),
                None => format!("{field}: {}", item.code),
            })
        })
        .collect::<Vec<_>>();
    messages.sort();
    messages.join("; ")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::schemas::auth::LoginForm;

    #[test]
    fn uuid_validation() {
        assert!(validate_uuid("7a0e3f7c-93a4-4c35-9f55-5f0f8f1b1e10", "question").is_ok());
        let err = validate_uuid("42", "question").unwrap_err();
        assert_eq!(err.detail(), "Invalid question id: 42");
    }

    #[test]
    fn path_segments_reject_separators() {
        assert!(validate_path_segment("a-1", "attempt").is_ok());
        assert!(validate_path_segment("", "attempt").is_err());
        assert!(validate_path_segment("../admin", "attempt").is_err());
        assert!(validate_path_segment("a?b=1", "exam").is_err());
    }

    #[test]
    fn import_requires_xlsx() {
        assert!(validate_import_file(&PathBuf::from("bank.XLSX")).is_ok());
        assert!(validate_import_file(&PathBuf::from("bank.csv")).is_err());
        assert!(validate_import_file(&PathBuf::from("bank")).is_err());
    }

    #[test]
    fn payload_errors_name_fields() {
        let form = LoginForm { email: "nope".to_string(), password: String::new() };
        let err = validate_payload(&form).unwrap_err();
        assert_eq!(
            err.detail(),
            "email: enter a valid email; password: password must not be empty"
        );
    }
}
