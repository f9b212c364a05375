//! Distributed confirmation of a transaction amount.
//!
//! The amount is dealt as additive shares to N participants. Each
//! participant hides its share behind pairwise masks exchanged with every
//! other participant and reports only the masked value, so the coordinator
//! learns the sum and nothing else.

use crate::error::{Error, Result};
use crate::pipeline::AmountVerifier;
use crate::shares::{apply_masks, combine, commitments_sum_to, share_matches_commitment, Dealing};
use crate::utils::{fr_from_u64, fr_to_u64, random_fr};
use blsttc::ff::Field;
use blsttc::pairing::bls12_381::{Fr, G1};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Address of one computation participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticipantEndpoint {
    pub name: String,
}

impl ParticipantEndpoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Hosts participants and sets up sessions between them.
pub trait MpcRuntime: Send + Sync {
    type Session: MpcSession;

    fn establish(
        &self,
        participants: &[ParticipantEndpoint],
    ) -> impl Future<Output = Result<Self::Session>> + Send;
}

/// A single secret-share-then-aggregate round.
pub trait MpcSession: Send {
    fn share_and_aggregate(&mut self, secret: Fr) -> impl Future<Output = Result<()>> + Send;

    /// The aggregate, once `share_and_aggregate` has completed.
    fn result(&self) -> Option<Fr>;
}

#[derive(Debug)]
enum Message {
    Share { value: Fr, commitment: G1 },
    Mask { from: usize, value: Fr },
}

type Report = (usize, Result<Fr>);

/// Runs every participant as a tokio task in the current process.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalRuntime;

impl MpcRuntime for LocalRuntime {
    type Session = LocalSession;

    async fn establish(&self, participants: &[ParticipantEndpoint]) -> Result<LocalSession> {
        let n = participants.len();
        if n < 2 {
            return Err(Error::Session(format!(
                "at least two participants are required, got {}",
                n
            )));
        }

        // Each inbox receives n - 1 masks and one share.
        let (inboxes, senders): (Vec<_>, Vec<_>) = (0..n)
            .map(|_| {
                let (tx, rx) = mpsc::channel(n + 1);
                (rx, tx)
            })
            .unzip();
        let (report_tx, reports) = mpsc::channel(n);

        let tasks = inboxes
            .into_iter()
            .zip(participants)
            .enumerate()
            .map(|(index, (inbox, endpoint))| {
                tokio::spawn(run_participant(
                    index,
                    endpoint.name.clone(),
                    inbox,
                    senders.clone(),
                    report_tx.clone(),
                ))
            })
            .collect();

        tracing::debug!(participants = n, "mpc session established");
        Ok(LocalSession {
            dealers: senders,
            reports,
            tasks,
            aggregate: None,
        })
    }
}

async fn run_participant(
    index: usize,
    name: String,
    mut inbox: mpsc::Receiver<Message>,
    peers: Vec<mpsc::Sender<Message>>,
    reports: mpsc::Sender<Report>,
) {
    let outcome = participate(index, &mut inbox, &peers).await;
    if let Err(e) = &outcome {
        tracing::warn!(participant = %name, error = %e, "participant failed");
    }
    let _ = reports.send((index, outcome)).await;
}

async fn participate(
    index: usize,
    inbox: &mut mpsc::Receiver<Message>,
    peers: &[mpsc::Sender<Message>],
) -> Result<Fr> {
    let hung_up = |_| Error::Session(format!("participant {} lost a peer", index));

    let mut outgoing = Vec::with_capacity(peers.len() - 1);
    for (peer, tx) in peers.iter().enumerate() {
        if peer == index {
            continue;
        }
        let mask = random_fr()?;
        tx.send(Message::Mask {
            from: index,
            value: mask,
        })
        .await
        .map_err(hung_up)?;
        outgoing.push(mask);
    }

    let mut share = None;
    let mut incoming: Vec<Option<Fr>> = vec![None; peers.len()];
    incoming[index] = Some(Fr::zero());
    while share.is_none() || incoming.iter().any(Option::is_none) {
        match inbox.recv().await {
            Some(Message::Share { value, commitment }) => {
                if !share_matches_commitment(value, commitment) {
                    return Err(Error::Session(format!(
                        "participant {} was dealt a share that does not match its commitment",
                        index
                    )));
                }
                share = Some(value);
            }
            Some(Message::Mask { from, value }) if from != index && from < peers.len() => {
                incoming[from] = Some(value);
            }
            Some(Message::Mask { from, .. }) => {
                return Err(Error::Session(format!(
                    "participant {} got a mask from unknown peer {}",
                    index, from
                )));
            }
            None => {
                return Err(Error::Session(format!(
                    "participant {} inbox closed",
                    index
                )))
            }
        }
    }

    let incoming: Vec<Fr> = incoming.into_iter().flatten().collect();
    let share = share.ok_or_else(|| Error::Session("no share dealt".into()))?;
    Ok(apply_masks(share, &incoming, &outgoing))
}

/// Session over in-process participants. Participant tasks are aborted
/// when the session is dropped.
pub struct LocalSession {
    dealers: Vec<mpsc::Sender<Message>>,
    reports: mpsc::Receiver<Report>,
    tasks: Vec<JoinHandle<()>>,
    aggregate: Option<Fr>,
}

impl MpcSession for LocalSession {
    async fn share_and_aggregate(&mut self, secret: Fr) -> Result<()> {
        let n = self.dealers.len();
        let dealing = Dealing::split(secret, n)?;
        if !commitments_sum_to(dealing.commitments(), secret) {
            return Err(Error::Session("dealing is inconsistent".into()));
        }

        for (tx, (value, commitment)) in self.dealers.iter().zip(dealing.into_parts()) {
            tx.send(Message::Share { value, commitment })
                .await
                .map_err(|_| Error::Session("participant unavailable".into()))?;
        }

        let mut masked: Vec<Option<Fr>> = vec![None; n];
        while masked.iter().any(Option::is_none) {
            let (index, outcome) = self
                .reports
                .recv()
                .await
                .ok_or_else(|| Error::Session("participants hung up".into()))?;
            masked[index] = Some(outcome?);
        }

        self.aggregate = Some(combine(masked.into_iter().flatten()));
        Ok(())
    }

    fn result(&self) -> Option<Fr> {
        self.aggregate
    }
}

impl Drop for LocalSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Confirms an amount through an MPC round with a bounded duration.
pub struct DistributedAmountVerifier<R = LocalRuntime> {
    runtime: R,
    participants: Vec<ParticipantEndpoint>,
    timeout: Duration,
}

impl DistributedAmountVerifier<LocalRuntime> {
    pub fn new(participants: usize, timeout: Duration) -> Result<Self> {
        Self::with_runtime(LocalRuntime, participants, timeout)
    }
}

impl<R: MpcRuntime> DistributedAmountVerifier<R> {
    pub fn with_runtime(runtime: R, participants: usize, timeout: Duration) -> Result<Self> {
        if participants < 2 {
            return Err(Error::InvalidConfig(format!(
                "participants must be at least 2, got {}",
                participants
            )));
        }
        let participants = (0..participants)
            .map(|i| ParticipantEndpoint::new(format!("participant-{}", i)))
            .collect();
        Ok(Self {
            runtime,
            participants,
            timeout,
        })
    }

    pub fn participants(&self) -> &[ParticipantEndpoint] {
        &self.participants
    }

    /// Run one session and return the aggregate.
    ///
    /// Setup failure, participant failure and timeout all surface as errors;
    /// no partial aggregate is ever returned.
    pub async fn verify_transaction(&self, amount: u64) -> Result<u64> {
        let secret = fr_from_u64(amount)?;
        let round = async {
            let mut session = self.runtime.establish(&self.participants).await?;
            session.share_and_aggregate(secret).await?;
            session
                .result()
                .ok_or_else(|| Error::Session("session produced no aggregate".into()))
        };

        let aggregate = tokio::time::timeout(self.timeout, round)
            .await
            .map_err(|_| Error::Timeout(self.timeout.as_millis() as u64))??;

        fr_to_u64(aggregate).ok_or_else(|| Error::Session("aggregate does not fit in u64".into()))
    }
}

impl<R: MpcRuntime> AmountVerifier for DistributedAmountVerifier<R> {
    fn verify_amount(&self, amount: u64) -> impl Future<Output = Result<u64>> + Send {
        self.verify_transaction(amount)
    }
}
