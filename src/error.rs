use blsttc::error::FromBytesError;
use std::array::TryFromSliceError;
use thiserror::Error;

/// Specialisation of `std::Result`.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
/// error variants.
pub enum Error {
    #[error("An error occured when signing {0}")]
    Signing(String),

    #[error("deserialization from bytes failed")]
    BlsttcFromBytes(#[from] FromBytesError),

    #[error("deserialization from bytes failed")]
    InvalidBytes(#[from] TryFromSliceError),

    #[error("bytes do not encode a valid curve point")]
    InvalidPoint,

    #[error("bytes do not encode a valid scalar")]
    InvalidScalar,

    #[error("blinding factor is not invertible")]
    ZeroBlindingFactor,

    #[error("balance is below the requested threshold")]
    InsufficientBalance,

    #[error("balance surplus does not fit in {0} bits")]
    SurplusOutOfRange(usize),

    #[error("malformed balance proof: {0}")]
    MalformedProof(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("mpc session failed: {0}")]
    Session(String),

    #[error("mpc session timed out after {0}ms")]
    Timeout(u64),
}
