use crate::configuration::ConfigurationError;
use crate::cost::AnalyzeError;
use crate::cost::WeightTableError;
use crate::storage::StoreError;

/// Any failure the gate can surface to the host.
///
/// Setup failures ([`GateError::Configuration`], [`GateError::WeightTable`])
/// halt the gate. Per-request failures map onto a response class via
/// [`GateError::is_client_error`]: `true` means the request was at fault and
/// a 400-class response is appropriate, `false` means the gate or its store
/// failed and the host should answer with a server error.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    WeightTable(#[from] WeightTableError),

    /// The query failed parsing or schema validation.
    #[error("query does not validate against the schema: {}", .errors.join("; "))]
    InvalidQuery { errors: Vec<String> },

    #[error(transparent)]
    Analyze(#[from] AnalyzeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Neither a forwarded address nor a peer address was available.
    #[error("unable to derive a client identity for the request")]
    MissingClientIdentity,
}

impl GateError {
    /// Whether the failure was caused by the request rather than the gate.
    ///
    /// Analysis errors are the gate's to answer for: the query already passed
    /// validation, so a missing table entry or an uncoercible multiplier is a
    /// server-side failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            GateError::InvalidQuery { .. } | GateError::MissingClientIdentity
        )
    }
}
