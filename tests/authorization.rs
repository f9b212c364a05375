use privauth::{
    Actor, AmountVerifier, AuthorizationError, AuthorizationPipeline, BalanceProofSystem,
    BalanceProofVerifier, BlindAuthorizer, Decision, DistributedAmountVerifier, Error, Fr,
    FraudGuard, MpcRuntime, MpcSession, ParticipantEndpoint, PipelineConfig, PolicyViolation,
    Result, Stage, TransactionAuthorizer, TransactionRequest,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn config() -> PipelineConfig {
    PipelineConfig::default()
}

#[derive(Default)]
struct Calls {
    proofs: AtomicUsize,
    signatures: AtomicUsize,
    verifications: AtomicUsize,
}

impl Calls {
    fn total(&self) -> usize {
        self.proofs.load(Ordering::SeqCst)
            + self.signatures.load(Ordering::SeqCst)
            + self.verifications.load(Ordering::SeqCst)
    }
}

struct CountingProofs(Arc<Calls>);

impl BalanceProofSystem for CountingProofs {
    type Proof = u64;

    fn generate_proof(&self, balance: u64, threshold: u64) -> Result<u64> {
        self.0.proofs.fetch_add(1, Ordering::SeqCst);
        if balance < threshold {
            return Err(Error::InsufficientBalance);
        }
        Ok(threshold)
    }

    fn verify_proof(&self, proven: &u64, threshold: u64) -> bool {
        threshold <= *proven
    }
}

struct CountingAuthorizer {
    calls: Arc<Calls>,
    tamper: bool,
}

impl TransactionAuthorizer for CountingAuthorizer {
    type Signature = String;

    fn sign_transaction(&self, details: &str) -> Result<String> {
        self.calls.signatures.fetch_add(1, Ordering::SeqCst);
        if self.tamper {
            Ok(format!("{}!", details))
        } else {
            Ok(details.to_owned())
        }
    }

    fn verify_signature(&self, details: &str, signature: &String) -> bool {
        details == signature
    }
}

struct CountingVerifier {
    calls: Arc<Calls>,
    skew: u64,
}

impl AmountVerifier for CountingVerifier {
    async fn verify_amount(&self, amount: u64) -> Result<u64> {
        self.calls.verifications.fetch_add(1, Ordering::SeqCst);
        Ok(amount + self.skew)
    }
}

type CountingPipeline = AuthorizationPipeline<CountingProofs, CountingAuthorizer, CountingVerifier>;

fn counting_pipeline(tamper: bool, skew: u64) -> (CountingPipeline, Arc<Calls>) {
    let calls = Arc::new(Calls::default());
    let pipeline = AuthorizationPipeline::from_parts(
        Arc::new(FraudGuard::new()),
        CountingProofs(calls.clone()),
        CountingAuthorizer {
            calls: calls.clone(),
            tamper,
        },
        CountingVerifier {
            calls: calls.clone(),
            skew,
        },
    );
    (pipeline, calls)
}

struct StalledRuntime;

struct StalledSession;

impl MpcSession for StalledSession {
    async fn share_and_aggregate(&mut self, _: Fr) -> Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }

    fn result(&self) -> Option<Fr> {
        None
    }
}

impl MpcRuntime for StalledRuntime {
    type Session = StalledSession;

    async fn establish(&self, _: &[ParticipantEndpoint]) -> Result<StalledSession> {
        Ok(StalledSession)
    }
}

#[tokio::test]
async fn first_request_is_authorized() -> Result<()> {
    let pipeline = AuthorizationPipeline::new(&PipelineConfig::default())?;
    let decision = pipeline.initiate_transaction(1000, 500, "user123").await;

    assert_eq!(decision, Decision::Authorized(500));
    assert_eq!(
        decision.to_string(),
        "Transaction of 500 authorized and verified."
    );
    Ok(())
}

#[tokio::test]
async fn second_request_hits_rate_limit() -> Result<()> {
    let pipeline = AuthorizationPipeline::new(&config())?;
    assert!(pipeline
        .initiate_transaction(1000, 500, "user123")
        .await
        .is_authorized());

    let decision = pipeline.initiate_transaction(1000, 500, "user123").await;
    assert_eq!(
        decision,
        Decision::Denied(AuthorizationError::DeniedByPolicy(
            PolicyViolation::RateLimited
        ))
    );
    assert_eq!(decision.to_string(), "Rate limit exceeded. Transaction denied.");
    Ok(())
}

#[tokio::test]
async fn insufficient_balance_is_denied_at_balance_check() -> Result<()> {
    let pipeline = AuthorizationPipeline::new(&config())?;
    let decision = pipeline.initiate_transaction(300, 500, "fresh").await;

    assert_eq!(
        decision,
        Decision::Denied(AuthorizationError::InsufficientBalanceProof)
    );
    assert_eq!(decision.error().map(|e| e.stage()), Some(Stage::BalanceCheck));
    Ok(())
}

#[tokio::test]
async fn blacklisted_actor_is_denied() -> Result<()> {
    let pipeline = AuthorizationPipeline::new(&config())?;
    pipeline.fraud_guard().add_to_blacklist(Actor::from("mallory"));

    let decision = pipeline.initiate_transaction(u64::MAX, 1, "mallory").await;
    assert_eq!(
        decision,
        Decision::Denied(AuthorizationError::DeniedByPolicy(
            PolicyViolation::Blacklisted
        ))
    );
    assert_eq!(decision.to_string(), "Transaction denied. User is blacklisted.");
    Ok(())
}

#[tokio::test]
async fn blacklist_short_circuits_all_cryptography() {
    let (pipeline, calls) = counting_pipeline(false, 0);
    pipeline.fraud_guard().add_to_blacklist(Actor::from("mallory"));

    for (balance, amount) in [(0, 0), (1000, 500), (10, 500)] {
        let decision = pipeline.initiate_transaction(balance, amount, "mallory").await;
        assert!(matches!(
            decision,
            Decision::Denied(AuthorizationError::DeniedByPolicy(PolicyViolation::Blacklisted))
        ));
    }
    assert_eq!(calls.total(), 0);
}

#[tokio::test]
async fn blacklist_wins_over_rate_limit() {
    let (pipeline, calls) = counting_pipeline(false, 0);
    let actor = Actor::from("turncoat");
    assert!(pipeline.fraud_guard().admit(&actor));
    pipeline.fraud_guard().add_to_blacklist(actor);

    assert_eq!(
        pipeline.initiate_transaction(1000, 500, "turncoat").await,
        Decision::Denied(AuthorizationError::DeniedByPolicy(
            PolicyViolation::Blacklisted
        ))
    );
    assert_eq!(calls.total(), 0);
}

#[tokio::test]
async fn rate_limited_actor_skips_cryptography() {
    let (pipeline, calls) = counting_pipeline(false, 0);
    assert!(pipeline
        .initiate_transaction(1000, 500, "user123")
        .await
        .is_authorized());
    assert_eq!(calls.total(), 3);

    pipeline.initiate_transaction(1000, 500, "user123").await;
    assert_eq!(calls.total(), 3);
}

#[tokio::test]
async fn balance_failure_skips_signing_and_mpc() {
    let (pipeline, calls) = counting_pipeline(false, 0);
    let decision = pipeline.initiate_transaction(300, 500, "fresh").await;

    assert_eq!(
        decision,
        Decision::Denied(AuthorizationError::InsufficientBalanceProof)
    );
    assert_eq!(calls.proofs.load(Ordering::SeqCst), 1);
    assert_eq!(calls.signatures.load(Ordering::SeqCst), 0);
    assert_eq!(calls.verifications.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn bad_signature_fails_before_mpc() {
    let (pipeline, calls) = counting_pipeline(true, 0);
    let decision = pipeline.initiate_transaction(1000, 500, "user123").await;

    assert_eq!(
        decision,
        Decision::Failed(AuthorizationError::SignatureVerificationFailed)
    );
    assert_eq!(calls.verifications.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn aggregate_mismatch_fails_closed() {
    let (pipeline, _) = counting_pipeline(false, 1);
    let decision = pipeline.initiate_transaction(1000, 500, "user123").await;

    assert!(matches!(
        decision,
        Decision::Failed(AuthorizationError::DistributedVerificationFailed(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn stalled_mpc_session_fails_closed() -> Result<()> {
    let pipeline = AuthorizationPipeline::from_parts(
        Arc::new(FraudGuard::new()),
        BalanceProofVerifier::new()?,
        BlindAuthorizer::new(),
        DistributedAmountVerifier::with_runtime(StalledRuntime, 3, Duration::from_millis(100))?,
    );

    let decision = pipeline.initiate_transaction(1000, 500, "user123").await;
    match decision {
        Decision::Failed(AuthorizationError::DistributedVerificationFailed(reason)) => {
            assert!(reason.contains("timed out"), "unexpected reason: {}", reason);
        }
        other => panic!("expected distributed verification failure, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn pipelines_share_fraud_state() -> Result<()> {
    let guard = Arc::new(FraudGuard::new());
    let first = AuthorizationPipeline::with_fraud_guard(&config(), guard.clone())?;
    let second = AuthorizationPipeline::with_fraud_guard(&config(), guard.clone())?;

    assert!(first.authorize(&TransactionRequest::new(1000, 1, "alice")).await.is_authorized());
    assert_eq!(
        second.initiate_transaction(1000, 1, "alice").await,
        Decision::Denied(AuthorizationError::DeniedByPolicy(
            PolicyViolation::RateLimited
        ))
    );

    guard.add_to_blacklist(Actor::from("bob"));
    assert!(matches!(
        first.initiate_transaction(1000, 1, "bob").await,
        Decision::Denied(AuthorizationError::DeniedByPolicy(PolicyViolation::Blacklisted))
    ));
    Ok(())
}

#[tokio::test]
async fn concurrent_requests_for_one_actor_admit_once() {
    let (pipeline, _) = counting_pipeline(false, 0);
    let (a, b, c) = tokio::join!(
        pipeline.initiate_transaction(1000, 10, "racer"),
        pipeline.initiate_transaction(1000, 10, "racer"),
        pipeline.initiate_transaction(1000, 10, "racer"),
    );

    let authorized = [a, b, c].iter().filter(|d| d.is_authorized()).count();
    assert_eq!(authorized, 1);
}

#[tokio::test]
async fn zero_amount_is_authorized() -> Result<()> {
    let pipeline = AuthorizationPipeline::new(&config())?;
    assert_eq!(
        pipeline.initiate_transaction(0, 0, "nobody").await,
        Decision::Authorized(0)
    );
    Ok(())
}

#[tokio::test]
async fn large_surplus_is_authorized() -> Result<()> {
    let pipeline = AuthorizationPipeline::new(&config())?;
    assert_eq!(
        pipeline.initiate_transaction(1_000_000, 1, "rich").await,
        Decision::Authorized(1)
    );
    assert_eq!(
        pipeline.initiate_transaction(u64::MAX, 1, "richer").await,
        Decision::Authorized(1)
    );
    assert_eq!(
        pipeline.initiate_transaction(u64::MAX, 0, "richest").await,
        Decision::Authorized(0)
    );
    Ok(())
}

#[tokio::test]
async fn narrow_proof_width_never_reports_insufficient_balance() -> Result<()> {
    let pipeline = AuthorizationPipeline::from_parts(
        Arc::new(FraudGuard::new()),
        BalanceProofVerifier::with_range_bits(16)?,
        BlindAuthorizer::new(),
        DistributedAmountVerifier::new(2, Duration::from_secs(5))?,
    );

    // Surplus fits in 16 bits.
    assert_eq!(
        pipeline.initiate_transaction(60_000, 1, "modest").await,
        Decision::Authorized(1)
    );

    let decision = pipeline.initiate_transaction(1_000_000, 1, "rich").await;
    assert!(
        matches!(
            decision,
            Decision::Failed(AuthorizationError::BalanceProofFailed(_))
        ),
        "unexpected decision: {:?}",
        decision
    );
    assert_eq!(decision.error().map(|e| e.stage()), Some(Stage::BalanceCheck));

    assert_eq!(
        pipeline.initiate_transaction(10, 500, "poor").await,
        Decision::Denied(AuthorizationError::InsufficientBalanceProof)
    );
    Ok(())
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn signature_failure_is_logged_once_as_error() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let (pipeline, _) = counting_pipeline(true, 0);
    let decision = pipeline.initiate_transaction(1000, 500, "user123").await;
    assert_eq!(
        decision,
        Decision::Failed(AuthorizationError::SignatureVerificationFailed)
    );

    let text = logs.text();
    assert_eq!(text.matches("ERROR").count(), 1, "logs: {}", text);
    assert!(text.contains("issued signature does not verify"), "logs: {}", text);
    assert!(!text.contains("transaction failed"), "logs: {}", text);
}

struct ThreadRecordingProofs(Arc<Mutex<Option<std::thread::ThreadId>>>);

impl BalanceProofSystem for ThreadRecordingProofs {
    type Proof = ();

    fn generate_proof(&self, _: u64, _: u64) -> Result<()> {
        *self.0.lock() = Some(std::thread::current().id());
        Ok(())
    }

    fn verify_proof(&self, _: &(), _: u64) -> bool {
        true
    }
}

#[tokio::test]
async fn proof_work_runs_off_the_executor_thread() {
    let prover_thread = Arc::new(Mutex::new(None));
    let calls = Arc::new(Calls::default());
    let pipeline = AuthorizationPipeline::from_parts(
        Arc::new(FraudGuard::new()),
        ThreadRecordingProofs(prover_thread.clone()),
        CountingAuthorizer {
            calls: calls.clone(),
            tamper: false,
        },
        CountingVerifier { calls, skew: 0 },
    );

    assert!(pipeline
        .initiate_transaction(1000, 500, "user123")
        .await
        .is_authorized());
    let prover_thread = *prover_thread.lock();
    assert!(prover_thread.is_some());
    assert_ne!(prover_thread, Some(std::thread::current().id()));
}
