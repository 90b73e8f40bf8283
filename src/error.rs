use thiserror::Error;

/// Failures that stop a single alert from being produced.
///
/// Marketplace failures never surface here: the sampler boundary turns them
/// into an empty sample, which the analyzer classifies as research-required.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlertError {
    #[error("invalid input: {0}")]
    InputValidation(String),

    #[error("malformed event: {0}")]
    MalformedEvent(String),
}
