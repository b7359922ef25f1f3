//! Heuristic classification of engine failure text.
//!
//! The patterns mirror real, observed engine failure output. Precedence is
//! a data structure: [`RULES`] is evaluated in order, first match wins, and
//! anything unmatched falls through to `Unknown`. Classification never
//! fails; the retry decision stays with the caller.

use crate::error::HarnessError;

/// Taxonomy bucket a failure message lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The engine could not access its own scratch storage.
    Resource,
    /// Transient storage fault or fatal signal.
    Random,
    /// Configuration/option validation or semantic constraint violation.
    Input,
    /// Everything else.
    Unknown,
}

type Predicate = fn(&str, Option<&str>) -> bool;

fn storage_fault_on_scratch(message: &str, _error_type: Option<&str>) -> bool {
    message.contains("PSIO Error") && message.contains("scratch directory")
}

fn storage_fault(message: &str, _error_type: Option<&str>) -> bool {
    message.contains("PSIO Error")
}

fn fatal_signal(message: &str, _error_type: Option<&str>) -> bool {
    message.contains("SIGSEV")
        || message.contains("SIGSEGV")
        || message.contains("segmentation fault")
}

fn option_validation(message: &str, error_type: Option<&str>) -> bool {
    message.contains("TypeError: set_global_option") || error_type == Some("ValidationError")
}

fn reference_multiplicity_conflict(message: &str, _error_type: Option<&str>) -> bool {
    message.contains("RHF reference is only for singlets")
}

/// Ordered classification rules, first match wins.
pub const RULES: &[(ErrorKind, Predicate)] = &[
    (ErrorKind::Resource, storage_fault_on_scratch),
    (ErrorKind::Random, storage_fault),
    (ErrorKind::Random, fatal_signal),
    (ErrorKind::Input, option_validation),
    (ErrorKind::Input, reference_multiplicity_conflict),
];

/// Classify a failure message (and the engine-reported error type, when one
/// exists) into a taxonomy error carrying the message.
pub fn classify(message: &str, error_type: Option<&str>) -> HarnessError {
    let kind = RULES
        .iter()
        .find(|(_, predicate)| predicate(message, error_type))
        .map(|(kind, _)| *kind)
        .unwrap_or(ErrorKind::Unknown);

    let message = message.to_string();
    match kind {
        ErrorKind::Resource => HarnessError::Resource(message),
        ErrorKind::Random => HarnessError::Random(message),
        ErrorKind::Input => HarnessError::Input(message),
        ErrorKind::Unknown => HarnessError::Unknown(message),
    }
}
