//! Error classification for quote lookups
//!
//! Decides whether a failure message proves that a ticker no longer exists,
//! or whether it is just noise (network, throttling, unknown API errors).

/// How a lookup failure should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    PermanentDelisted,
}

/// Messages the quote service returns for tickers that no longer exist
const DELISTING_SIGNATURES: &[&str] = &[
    "No fundamentals data found for symbol",
    "1d data not available for startTime",
    "Only 100 years worth of day granularity data are allowed",
    "Ticker not found",
    "Invalid ticker",
    "Symbol not found",
    "No data found for this date range",
];

/// Signatures that show up inside otherwise successful response bodies
const PAYLOAD_SIGNATURES: &[&str] = &[
    "No fundamentals data found for symbol",
    "1d data not available for startTime",
];

/// Classify a raw error or response message
pub fn classify(message: &str) -> ErrorClass {
    if DELISTING_SIGNATURES.iter().any(|sig| message.contains(sig)) {
        ErrorClass::PermanentDelisted
    } else {
        ErrorClass::Transient
    }
}

/// Look for a delisting signature embedded in a serialized response body
pub fn payload_signature(body: &str) -> Option<&'static str> {
    PAYLOAD_SIGNATURES.iter().copied().find(|sig| body.contains(sig))
}
