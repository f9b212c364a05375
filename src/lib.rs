mod balance_proof;
mod blind_sigs;
mod config;
mod error;
mod fraud;
mod mpc;
mod pipeline;
mod shares;
mod utils;

pub use crate::balance_proof::{
    BalanceCommitment, BalanceProof, BalanceProofVerifier, BalanceProver, MAX_RANGE_BITS,
};
pub use crate::blind_sigs::{
    BlindAuthorizer, BlindSignature, BlindSigner, Envelope, SignedEnvelope, TransactionPreparer,
};
pub use crate::config::PipelineConfig;
pub use crate::error::{Error, Result};
pub use crate::fraud::{Actor, FraudGuard, FraudState};
pub use crate::mpc::{
    DistributedAmountVerifier, LocalRuntime, LocalSession, MpcRuntime, MpcSession,
    ParticipantEndpoint,
};
pub use crate::pipeline::{
    AmountVerifier, AuthorizationError, AuthorizationPipeline, BalanceProofSystem, Decision,
    PolicyViolation, Stage, TransactionAuthorizer, TransactionRequest,
};

// Curve types used by the MPC capability traits.
pub use blsttc::pairing::bls12_381::{Fr, G1};
