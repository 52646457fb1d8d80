// Error model shared by the repository layer, the serializers and the API.

use crate::schema::FieldErrors;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Payload failed field-level validation (400)
    #[error("validation failed: {0}")]
    Validation(FieldErrors),

    /// Request body could not be parsed (400)
    #[error("JSON parse error - {0}")]
    Parse(String),

    /// Body sent without a JSON content type (415)
    #[error("Unsupported media type - {0}")]
    UnsupportedMediaType(String),

    #[error("Not found.")]
    NotFound,

    #[error("Authentication credentials were not provided.")]
    NotAuthenticated,

    #[error("Invalid token.")]
    AuthenticationFailed,

    #[error("You do not have permission to perform this action.")]
    PermissionDenied,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("logging error: {0}")]
    Logging(String),

    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl Error {
    /// Single-field validation failure
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::default();
        errors.add(field, message);
        Error::Validation(errors)
    }

    /// Uniqueness failure over a composite key, worded like a form error
    pub fn unique_together(fields: &[&str]) -> Self {
        Self::field(
            FieldErrors::NON_FIELD,
            format!("The fields {} must make a unique set.", fields.join(", ")),
        )
    }

    /// True for errors caused by the client rather than the server; the rest
    /// are logged and answered with a generic 500
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Error::Database(_)
                | Error::Json(_)
                | Error::Config(_)
                | Error::Csv(_)
                | Error::Logging(_)
                | Error::Internal(_)
        )
    }
}

/// Returns true when a SQLite error is a UNIQUE (or primary key) violation
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

/// Maps a UNIQUE violation on `entity` onto a validation error
pub fn map_unique(err: rusqlite::Error, entity: &str, fields: &[&str]) -> Error {
    if is_unique_violation(&err) {
        if let [field] = fields {
            Error::field(field, format!("{entity} with this {field} already exists."))
        } else {
            Error::unique_together(fields)
        }
    } else {
        Error::Database(err)
    }
}
