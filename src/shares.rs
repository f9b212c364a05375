use crate::error::{Error, Result};
use crate::utils::*;
use blsttc::ff::Field;
use blsttc::group::CurveProjective;
use blsttc::pairing::bls12_381::{Fr, G1};

/// A secret split into additive shares over Fr.
///
/// Every share comes with a public commitment `share·G` so the receiving
/// participant can check it was dealt the value the coordinator
/// committed to. No subset smaller than all shares says anything about
/// the secret.
#[derive(Clone, Debug)]
pub struct Dealing {
    shares: Vec<Fr>,
    commitments: Vec<G1>,
}

impl Dealing {
    pub fn split(secret: Fr, parties: usize) -> Result<Self> {
        if parties < 2 {
            return Err(Error::InvalidConfig(format!(
                "a dealing needs at least two parties, got {}",
                parties
            )));
        }

        let mut shares = Vec::with_capacity(parties);
        let mut remainder = secret;
        for _ in 1..parties {
            let share = random_fr()?;
            remainder = fr_sub(remainder, share);
            shares.push(share);
        }
        shares.push(remainder);

        let commitments = shares.iter().map(|s| commit_share(*s)).collect();
        Ok(Self {
            shares,
            commitments,
        })
    }

    pub fn commitments(&self) -> &[G1] {
        &self.commitments
    }

    /// Hand out `(share, commitment)` pairs, one per party.
    pub fn into_parts(self) -> impl Iterator<Item = (Fr, G1)> {
        self.shares.into_iter().zip(self.commitments)
    }
}

pub fn commit_share(share: Fr) -> G1 {
    g1_mul(G1::one(), share)
}

pub fn share_matches_commitment(share: Fr, commitment: G1) -> bool {
    commit_share(share) == commitment
}

/// True when the share commitments add up to a commitment of `secret`.
pub fn commitments_sum_to(commitments: &[G1], secret: Fr) -> bool {
    let total = commitments.iter().fold(G1::zero(), |acc, c| g1_add(acc, *c));
    total == commit_share(secret)
}

/// `share + Σ incoming - Σ outgoing`.
///
/// Every mask a participant sends is received by exactly one other
/// participant, so the masks cancel when all masked shares are summed.
pub fn apply_masks(share: Fr, incoming: &[Fr], outgoing: &[Fr]) -> Fr {
    let received = combine(incoming.iter().copied());
    let sent = combine(outgoing.iter().copied());
    fr_sub(fr_add(share, received), sent)
}

pub fn combine<I>(values: I) -> Fr
where
    I: IntoIterator<Item = Fr>,
{
    values.into_iter().fold(Fr::zero(), fr_add)
}
