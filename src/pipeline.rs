//! Ordered authorization of a single transaction.
//!
//! ```text
//! FraudCheck -> BalanceCheck -> SignatureIssuance -> DistributedVerification -> Decision
//! ```
//!
//! Each stage runs only when the previous one passed. The first failure is
//! turned into the final `Decision` and no later stage is attempted.

use crate::balance_proof::BalanceProofVerifier;
use crate::blind_sigs::BlindAuthorizer;
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::fraud::{Actor, FraudGuard};
use crate::mpc::DistributedAmountVerifier;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::Instrument;

/// Produces and checks proofs that a hidden balance covers a threshold.
pub trait BalanceProofSystem {
    type Proof;

    fn generate_proof(&self, balance: u64, threshold: u64) -> Result<Self::Proof>;

    fn verify_proof(&self, proof: &Self::Proof, threshold: u64) -> bool;
}

/// Issues and checks signatures over transaction details.
pub trait TransactionAuthorizer {
    type Signature;

    fn sign_transaction(&self, details: &str) -> Result<Self::Signature>;

    fn verify_signature(&self, details: &str, signature: &Self::Signature) -> bool;
}

/// Recomputes an amount across several parties and returns the aggregate.
pub trait AmountVerifier {
    fn verify_amount(&self, amount: u64) -> impl Future<Output = Result<u64>> + Send;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TransactionRequest {
    pub sender_balance: u64,
    pub amount: u64,
    pub actor: Actor,
}

impl TransactionRequest {
    pub fn new(sender_balance: u64, amount: u64, actor: impl Into<Actor>) -> Self {
        Self {
            sender_balance,
            amount,
            actor: actor.into(),
        }
    }

    /// The string the authorizer signs.
    pub fn details(&self) -> String {
        format!("Transaction of {}", self.amount)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Stage {
    FraudCheck,
    BalanceCheck,
    SignatureIssuance,
    DistributedVerification,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::FraudCheck => "fraud_check",
            Stage::BalanceCheck => "balance_check",
            Stage::SignatureIssuance => "signature_issuance",
            Stage::DistributedVerification => "distributed_verification",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PolicyViolation {
    Blacklisted,
    RateLimited,
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyViolation::Blacklisted => f.write_str("Transaction denied. User is blacklisted."),
            PolicyViolation::RateLimited => f.write_str("Rate limit exceeded. Transaction denied."),
        }
    }
}

#[derive(Error, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum AuthorizationError {
    #[error("{0}")]
    DeniedByPolicy(PolicyViolation),

    #[error("Insufficient balance")]
    InsufficientBalanceProof,

    #[error("Transaction failed. Balance proof could not be produced: {0}")]
    BalanceProofFailed(String),

    #[error("Transaction failed. Signature verification failed.")]
    SignatureVerificationFailed,

    #[error("Transaction failed. Distributed verification failed: {0}")]
    DistributedVerificationFailed(String),
}

impl AuthorizationError {
    /// The stage that produced the error.
    pub fn stage(&self) -> Stage {
        match self {
            Self::DeniedByPolicy(_) => Stage::FraudCheck,
            Self::InsufficientBalanceProof | Self::BalanceProofFailed(_) => Stage::BalanceCheck,
            Self::SignatureVerificationFailed => Stage::SignatureIssuance,
            Self::DistributedVerificationFailed(_) => Stage::DistributedVerification,
        }
    }
}

/// Final outcome of one pipeline run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Decision {
    Denied(AuthorizationError),
    Authorized(u64),
    Failed(AuthorizationError),
}

impl Decision {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Decision::Authorized(_))
    }

    pub fn error(&self) -> Option<&AuthorizationError> {
        match self {
            Decision::Denied(e) | Decision::Failed(e) => Some(e),
            Decision::Authorized(_) => None,
        }
    }
}

impl From<std::result::Result<u64, AuthorizationError>> for Decision {
    fn from(outcome: std::result::Result<u64, AuthorizationError>) -> Self {
        match outcome {
            Ok(amount) => Decision::Authorized(amount),
            Err(
                e @ (AuthorizationError::DeniedByPolicy(_)
                | AuthorizationError::InsufficientBalanceProof),
            ) => Decision::Denied(e),
            Err(e) => Decision::Failed(e),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Authorized(amount) => {
                write!(f, "Transaction of {} authorized and verified.", amount)
            }
            Decision::Denied(e) | Decision::Failed(e) => write!(f, "{}", e),
        }
    }
}

pub struct AuthorizationPipeline<
    B = BalanceProofVerifier,
    A = BlindAuthorizer,
    V = DistributedAmountVerifier,
> {
    fraud: Arc<FraudGuard>,
    balance: Arc<B>,
    authorizer: A,
    verifier: V,
}

impl AuthorizationPipeline {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        Self::with_fraud_guard(config, Arc::new(FraudGuard::new()))
    }

    /// Build a pipeline sharing fraud state with other pipelines.
    pub fn with_fraud_guard(config: &PipelineConfig, fraud: Arc<FraudGuard>) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(
            fraud,
            BalanceProofVerifier::new()?,
            BlindAuthorizer::new(),
            DistributedAmountVerifier::new(config.participants, config.session_timeout())?,
        ))
    }
}

impl<B, A, V> AuthorizationPipeline<B, A, V>
where
    B: BalanceProofSystem + Send + Sync + 'static,
    A: TransactionAuthorizer,
    V: AmountVerifier,
{
    pub fn from_parts(fraud: Arc<FraudGuard>, balance: B, authorizer: A, verifier: V) -> Self {
        Self {
            fraud,
            balance: Arc::new(balance),
            authorizer,
            verifier,
        }
    }

    pub fn fraud_guard(&self) -> &Arc<FraudGuard> {
        &self.fraud
    }

    pub async fn initiate_transaction(
        &self,
        sender_balance: u64,
        amount: u64,
        actor_id: &str,
    ) -> Decision {
        self.authorize(&TransactionRequest::new(sender_balance, amount, actor_id))
            .await
    }

    pub async fn authorize(&self, request: &TransactionRequest) -> Decision {
        let span = tracing::info_span!(
            "authorize",
            actor = %request.actor,
            amount = request.amount
        );
        let decision = Decision::from(self.run(request).instrument(span.clone()).await);

        span.in_scope(|| match &decision {
            Decision::Authorized(amount) => tracing::info!(amount, "transaction authorized"),
            Decision::Denied(e) => {
                tracing::warn!(stage = %e.stage(), reason = %e, "transaction denied")
            }
            // Already logged as an error where the signature was rejected.
            Decision::Failed(AuthorizationError::SignatureVerificationFailed) => {}
            Decision::Failed(e) => {
                tracing::warn!(stage = %e.stage(), reason = %e, "transaction failed")
            }
        });
        decision
    }

    async fn run(&self, request: &TransactionRequest) -> std::result::Result<u64, AuthorizationError> {
        self.screen(&request.actor)?;
        tracing::debug!(stage = %Stage::FraudCheck, "stage passed");

        self.check_balance(request).await?;
        tracing::debug!(stage = %Stage::BalanceCheck, "stage passed");

        self.issue_signature(request)?;
        tracing::debug!(stage = %Stage::SignatureIssuance, "stage passed");

        let amount = self.confirm_amount(request.amount).await?;
        tracing::debug!(stage = %Stage::DistributedVerification, "stage passed");
        Ok(amount)
    }

    fn screen(&self, actor: &Actor) -> std::result::Result<(), AuthorizationError> {
        if self.fraud.check_blacklist(actor) {
            return Err(AuthorizationError::DeniedByPolicy(PolicyViolation::Blacklisted));
        }
        if !self.fraud.admit(actor) {
            return Err(AuthorizationError::DeniedByPolicy(PolicyViolation::RateLimited));
        }
        Ok(())
    }

    /// Proving and verifying are CPU bound, so both run on the blocking pool.
    async fn check_balance(&self, request: &TransactionRequest) -> std::result::Result<(), AuthorizationError> {
        let balance = Arc::clone(&self.balance);
        let (sender_balance, amount) = (request.sender_balance, request.amount);
        let outcome = tokio::task::spawn_blocking(move || {
            let proof = balance.generate_proof(sender_balance, amount)?;
            Ok::<_, Error>(balance.verify_proof(&proof, amount))
        })
        .await
        .map_err(|e| AuthorizationError::BalanceProofFailed(e.to_string()))?;

        match outcome {
            Ok(true) => Ok(()),
            Ok(false) | Err(Error::InsufficientBalance) => {
                Err(AuthorizationError::InsufficientBalanceProof)
            }
            Err(e) => {
                tracing::warn!(error = %e, "balance proof generation failed");
                Err(AuthorizationError::BalanceProofFailed(e.to_string()))
            }
        }
    }

    fn issue_signature(&self, request: &TransactionRequest) -> std::result::Result<(), AuthorizationError> {
        let details = request.details();
        let signature = self.authorizer.sign_transaction(&details).map_err(|e| {
            tracing::error!(error = %e, "signature issuance failed");
            AuthorizationError::SignatureVerificationFailed
        })?;

        if !self.authorizer.verify_signature(&details, &signature) {
            tracing::error!("issued signature does not verify against transaction details");
            return Err(AuthorizationError::SignatureVerificationFailed);
        }
        Ok(())
    }

    async fn confirm_amount(&self, amount: u64) -> std::result::Result<u64, AuthorizationError> {
        match self.verifier.verify_amount(amount).await {
            Ok(aggregate) if aggregate == amount => Ok(amount),
            Ok(aggregate) => Err(AuthorizationError::DistributedVerificationFailed(format!(
                "aggregate {} does not match declared amount",
                aggregate
            ))),
            Err(e) => Err(AuthorizationError::DistributedVerificationFailed(e.to_string())),
        }
    }
}
