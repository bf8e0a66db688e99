use crate::types::Field;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{what} unavailable: {reason}")]
    DataUnavailable { what: String, reason: String },
    #[error("`{field}` cannot be chosen before `{requires}`")]
    InvalidSelectionOrder { field: Field, requires: Field },
    #[error("selection incomplete, missing: {}", join_fields(.missing))]
    IncompleteSelection { missing: Vec<Field> },
    #[error("`{value}` is not a valid choice for `{field}`")]
    UnknownOption { field: Field, value: String },
    #[error("{0}")]
    Transform(String),
    #[error("model error: {0}")]
    Model(String),
}

impl Error {
    pub fn unavailable(what: impl Into<String>, reason: impl ToString) -> Self {
        Error::DataUnavailable { what: what.into(), reason: reason.to_string() }
    }
}

fn join_fields(fields: &[Field]) -> String {
    fields.iter().map(|f| f.to_string()).collect::<Vec<_>>().join(", ")
}
