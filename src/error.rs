use crate::schema::{LineNumber, Period};
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PnlError {
    #[error("Invalid mapping rule '{rule}': {details}")]
    ValidationError { rule: String, details: String },

    #[error("Invariant violation: {0}")]
    InvariantViolation(#[from] InvariantViolation),

    #[error("Invalid statement template: {0}")]
    InvalidTemplate(String),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Invalid amount '{0}'")]
    InvalidAmount(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Fatal conditions for a single build call. No partial statement is
/// returned when one of these is raised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("more than one override for line {line} in period {period}")]
    DuplicateOverride { line: LineNumber, period: Period },

    #[error("line {total} references child line {child}, which does not exist")]
    UnknownChildLine { total: LineNumber, child: LineNumber },

    #[error("line {line} is part of a cycle of derived lines")]
    CyclicTotal { line: LineNumber },

    #[error("line {line} is not a valued line of the template ({context})")]
    UnknownLine { line: LineNumber, context: String },

    #[error("line {line} is a header and cannot carry an override")]
    OverrideOnHeader { line: LineNumber },

    #[error("classified items sum to {items} but the period matrix sums to {matrix}")]
    ConservationBroken { items: Decimal, matrix: Decimal },
}

impl PnlError {
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, PnlError::InvariantViolation(_))
    }

    pub fn is_validation_error(&self) -> bool {
        matches!(self, PnlError::ValidationError { .. })
    }
}

pub type Result<T> = std::result::Result<T, PnlError>;
