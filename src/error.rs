//! Errors surfaced at the submission boundary.
//!
//! Degraded conditions (classifier unavailable, store write rejected) are not
//! errors here: they are absorbed as `None` / deferred delivery further down.

use serde::Serialize;
use thiserror::Error;

use crate::decision::FieldId;

/// One field-level problem, shaped for a form to display next to the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn for_field(field: FieldId, message: impl Into<String>) -> Self {
        Self::new(field.as_str(), message)
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("report form is incomplete")]
    Validation(Vec<FieldError>),

    #[error("please clarify if this person is a student, teacher, or staff member")]
    NeedsClarification(FieldError),

    #[error("required fields are missing for this report")]
    MissingFields(Vec<FieldError>),

    /// Escalating while anonymous: the reporter must either provide `fields`
    /// or resubmit with the anonymous override set.
    #[error("this report will be escalated; provide your details or confirm anonymous submission")]
    AnonymityChoiceRequired { fields: Vec<FieldId> },

    #[error("an unexpected error occurred while submitting your report, please try again")]
    Internal(#[from] anyhow::Error),
}

impl SubmitError {
    /// Stable machine-readable kind for API bodies and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            SubmitError::Validation(_) => "validation",
            SubmitError::NeedsClarification(_) => "needs_clarification",
            SubmitError::MissingFields(_) => "missing_fields",
            SubmitError::AnonymityChoiceRequired { .. } => "anonymity_choice_required",
            SubmitError::Internal(_) => "internal",
        }
    }

    pub fn field_errors(&self) -> Vec<FieldError> {
        match self {
            SubmitError::Validation(v) | SubmitError::MissingFields(v) => v.clone(),
            SubmitError::NeedsClarification(f) => vec![f.clone()],
            SubmitError::AnonymityChoiceRequired { .. } | SubmitError::Internal(_) => Vec::new(),
        }
    }

    /// Precondition failures are the reporter's to fix; everything else is ours.
    pub fn is_precondition(&self) -> bool {
        !matches!(self, SubmitError::Internal(_))
    }
}
