//! Zero-knowledge proof that a committed balance covers a threshold.
//!
//! The balance `b` is held in a Pedersen commitment `C = b·G + r·H` on G1.
//! To show `b >= T` the prover decomposes the surplus `d = b - T` into
//! `range_bits` bits, commits to every bit with blinding factors whose
//! weighted sum is `r`, and proves each bit commitment opens to 0 or 1 with
//! a Fiat-Shamir OR-proof. The verifier recombines the bit commitments:
//!
//! ```text
//! Σ 2^i·C_i + T·G == C
//! ```
//!
//! Since every `C_i` holds a bit and `range_bits <= 64`, the recombined
//! surplus is a non-negative integer far below the group order, so the check
//! cannot be met by a balance under the threshold. A proof always carries
//! exactly `range_bits` bit proofs whatever the balance.

use crate::error::{Error, Result};
use crate::pipeline::BalanceProofSystem;
use crate::utils::*;
use blsttc::ff::Field;
use blsttc::group::CurveProjective;
use blsttc::pairing::bls12_381::{Fr, G1};

/// Largest supported surplus width.
pub const MAX_RANGE_BITS: usize = 64;

const GENERATOR_DST: &[u8] = b"PRIVAUTH_PEDERSEN_BLS12381G1_XMD:SHA-256_SSWU_RO_";
const GENERATOR_SEED: &[u8] = b"balance commitment blinding generator";
const CHALLENGE_DOMAIN: &[u8] = b"privauth/balance-bit-proof/v1";

const POINT_LEN: usize = 48;
const SCALAR_LEN: usize = 32;
const BIT_PROOF_LEN: usize = 3 * POINT_LEN + 3 * SCALAR_LEN;
const HEADER_LEN: usize = POINT_LEN + 8 + 2;

/// The pair of independent G1 generators used for commitments.
#[derive(Clone, Copy, Debug)]
struct PedersenGens {
    g: G1,
    h: G1,
}

impl PedersenGens {
    fn new() -> Result<Self> {
        Ok(Self {
            g: G1::one(),
            h: hash_g1_with_dst(GENERATOR_SEED, GENERATOR_DST)?,
        })
    }

    fn commit(&self, value: Fr, blinding: Fr) -> G1 {
        g1_add(g1_mul(self.g, value), g1_mul(self.h, blinding))
    }
}

fn check_range_bits(range_bits: usize) -> Result<()> {
    if range_bits == 0 || range_bits > MAX_RANGE_BITS {
        return Err(Error::InvalidConfig(format!(
            "range_bits must be within 1..={}, got {}",
            MAX_RANGE_BITS, range_bits
        )));
    }
    Ok(())
}

/// Commitment to a hidden balance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BalanceCommitment(G1);

impl BalanceCommitment {
    pub fn to_bytes(&self) -> [u8; 48] {
        g1_to_be_bytes(self.0)
    }

    pub fn from_bytes(bytes: [u8; 48]) -> Result<Self> {
        Ok(Self(be_bytes_to_g1(bytes)?))
    }
}

/// OR-proof that `commitment` opens to 0 or to 1.
///
/// Branch k proves knowledge of `r` with `P_k = r·H`, where `P_0 = C_i` and
/// `P_1 = C_i - G`. Only `e0` is stored; `e1` is the challenge minus `e0`.
#[derive(Clone, Debug, PartialEq)]
struct BitProof {
    commitment: G1,
    a0: G1,
    a1: G1,
    e0: Fr,
    z0: Fr,
    z1: Fr,
}

fn challenge(
    balance: &BalanceCommitment,
    threshold: u64,
    index: usize,
    commitment: G1,
    a0: G1,
    a1: G1,
) -> Result<Fr> {
    hash_to_fr(
        CHALLENGE_DOMAIN,
        &[
            &balance.to_bytes(),
            &threshold.to_be_bytes(),
            &(index as u64).to_be_bytes(),
            &g1_to_be_bytes(commitment),
            &g1_to_be_bytes(a0),
            &g1_to_be_bytes(a1),
        ],
    )
}

impl BitProof {
    fn prove(
        gens: &PedersenGens,
        balance: &BalanceCommitment,
        threshold: u64,
        index: usize,
        bit: bool,
        blinding: Fr,
    ) -> Result<Self> {
        let value = if bit { Fr::one() } else { Fr::zero() };
        let commitment = gens.commit(value, blinding);
        let p0 = commitment;
        let p1 = g1_sub(commitment, gens.g);

        // The branch we cannot open is simulated from a chosen challenge.
        let w = random_fr()?;
        let e_sim = random_fr()?;
        let z_sim = random_fr()?;
        let (a0, a1) = if bit {
            (
                g1_sub(g1_mul(gens.h, z_sim), g1_mul(p0, e_sim)),
                g1_mul(gens.h, w),
            )
        } else {
            (
                g1_mul(gens.h, w),
                g1_sub(g1_mul(gens.h, z_sim), g1_mul(p1, e_sim)),
            )
        };

        let e = challenge(balance, threshold, index, commitment, a0, a1)?;
        let e_real = fr_sub(e, e_sim);
        let z_real = fr_add(w, fr_mul(e_real, blinding));

        let (e0, z0, z1) = if bit {
            (e_sim, z_sim, z_real)
        } else {
            (e_real, z_real, z_sim)
        };

        Ok(Self {
            commitment,
            a0,
            a1,
            e0,
            z0,
            z1,
        })
    }

    fn verify(
        &self,
        gens: &PedersenGens,
        balance: &BalanceCommitment,
        threshold: u64,
        index: usize,
    ) -> bool {
        let e = match challenge(balance, threshold, index, self.commitment, self.a0, self.a1) {
            Ok(e) => e,
            Err(_) => return false,
        };
        let e1 = fr_sub(e, self.e0);
        let p0 = self.commitment;
        let p1 = g1_sub(self.commitment, gens.g);

        g1_mul(gens.h, self.z0) == g1_add(self.a0, g1_mul(p0, self.e0))
            && g1_mul(gens.h, self.z1) == g1_add(self.a1, g1_mul(p1, e1))
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&g1_to_be_bytes(self.commitment));
        out.extend_from_slice(&g1_to_be_bytes(self.a0));
        out.extend_from_slice(&g1_to_be_bytes(self.a1));
        out.extend_from_slice(&fr_to_be_bytes(self.e0));
        out.extend_from_slice(&fr_to_be_bytes(self.z0));
        out.extend_from_slice(&fr_to_be_bytes(self.z1));
    }

    fn read(bytes: &[u8]) -> Result<Self> {
        let point = |i: usize| -> Result<G1> {
            let start = i * POINT_LEN;
            be_bytes_to_g1(bytes[start..start + POINT_LEN].try_into()?)
        };
        let scalar = |i: usize| -> Result<Fr> {
            let start = 3 * POINT_LEN + i * SCALAR_LEN;
            fr_from_be_bytes(bytes[start..start + SCALAR_LEN].try_into()?)
        };
        Ok(Self {
            commitment: point(0)?,
            a0: point(1)?,
            a1: point(2)?,
            e0: scalar(0)?,
            z0: scalar(1)?,
            z1: scalar(2)?,
        })
    }
}

/// Proof that the balance behind `commitment` is at least `threshold`.
#[derive(Clone, Debug, PartialEq)]
pub struct BalanceProof {
    commitment: BalanceCommitment,
    threshold: u64,
    bits: Vec<BitProof>,
}

impl BalanceProof {
    pub fn commitment(&self) -> &BalanceCommitment {
        &self.commitment
    }

    /// The threshold the proof was generated for.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.bits.len() * BIT_PROOF_LEN);
        out.extend_from_slice(&self.commitment.to_bytes());
        out.extend_from_slice(&self.threshold.to_be_bytes());
        out.extend_from_slice(&(self.bits.len() as u16).to_be_bytes());
        for bit in &self.bits {
            bit.write(&mut out);
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::MalformedProof("truncated header".into()));
        }
        let commitment = BalanceCommitment::from_bytes(bytes[..POINT_LEN].try_into()?)?;
        let threshold = u64::from_be_bytes(bytes[POINT_LEN..POINT_LEN + 8].try_into()?);
        let count = u16::from_be_bytes(bytes[POINT_LEN + 8..HEADER_LEN].try_into()?) as usize;

        if count == 0 || count > MAX_RANGE_BITS {
            return Err(Error::MalformedProof(format!("bad bit count {}", count)));
        }
        let body = &bytes[HEADER_LEN..];
        if body.len() != count * BIT_PROOF_LEN {
            return Err(Error::MalformedProof(format!(
                "expected {} bytes of bit proofs, got {}",
                count * BIT_PROOF_LEN,
                body.len()
            )));
        }

        let bits = body
            .chunks_exact(BIT_PROOF_LEN)
            .map(BitProof::read)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            commitment,
            threshold,
            bits,
        })
    }
}

/// Holds the hidden balance and its blinding factor.
///
/// The commitment is fixed at construction, so every proof produced by the
/// same prover binds to the same `BalanceCommitment`.
pub struct BalanceProver {
    balance: u64,
    blinding: Fr,
    gens: PedersenGens,
    range_bits: usize,
}

impl BalanceProver {
    pub fn new(balance: u64) -> Result<Self> {
        Self::with_range_bits(balance, MAX_RANGE_BITS)
    }

    pub fn with_range_bits(balance: u64, range_bits: usize) -> Result<Self> {
        check_range_bits(range_bits)?;
        Ok(Self {
            balance,
            blinding: random_fr()?,
            gens: PedersenGens::new()?,
            range_bits,
        })
    }

    pub fn commitment(&self) -> Result<BalanceCommitment> {
        Ok(BalanceCommitment(
            self.gens.commit(fr_from_u64(self.balance)?, self.blinding),
        ))
    }

    /// Prove `balance >= threshold`.
    ///
    /// Refuses with `Error::InsufficientBalance` rather than emitting a proof
    /// that could never verify.
    pub fn generate_proof(&self, threshold: u64) -> Result<BalanceProof> {
        let surplus = self
            .balance
            .checked_sub(threshold)
            .ok_or(Error::InsufficientBalance)?;
        if self.range_bits < MAX_RANGE_BITS && surplus >> self.range_bits != 0 {
            return Err(Error::SurplusOutOfRange(self.range_bits));
        }
        self.prove_surplus(surplus, threshold)
    }

    fn prove_surplus(&self, surplus: u64, threshold: u64) -> Result<BalanceProof> {
        let commitment = self.commitment()?;
        let bits = self
            .split_blinding()?
            .into_iter()
            .enumerate()
            .map(|(i, blinding)| {
                let bit = (surplus >> i) & 1 == 1;
                BitProof::prove(&self.gens, &commitment, threshold, i, bit, blinding)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(BalanceProof {
            commitment,
            threshold,
            bits,
        })
    }

    // r_0..r_{n-2} are random, r_{n-1} is fixed so that Σ 2^i·r_i == r.
    fn split_blinding(&self) -> Result<Vec<Fr>> {
        let mut blindings = Vec::with_capacity(self.range_bits);
        let mut weighted = Fr::zero();
        let mut weight = Fr::one();
        for _ in 1..self.range_bits {
            let r = random_fr()?;
            weighted = fr_add(weighted, fr_mul(weight, r));
            blindings.push(r);
            weight.double();
        }
        let inverse = weight.inverse().ok_or(Error::ZeroBlindingFactor)?;
        blindings.push(fr_mul(fr_sub(self.blinding, weighted), inverse));
        Ok(blindings)
    }
}

/// Produces and checks balance proofs for a fixed surplus width.
#[derive(Clone, Debug)]
pub struct BalanceProofVerifier {
    gens: PedersenGens,
    range_bits: usize,
}

impl BalanceProofVerifier {
    pub fn new() -> Result<Self> {
        Self::with_range_bits(MAX_RANGE_BITS)
    }

    /// A verifier for proofs over `range_bits` bits. Below 64 bits, provers
    /// refuse any surplus of `2^range_bits` or more with
    /// `Error::SurplusOutOfRange`.
    pub fn with_range_bits(range_bits: usize) -> Result<Self> {
        check_range_bits(range_bits)?;
        Ok(Self {
            gens: PedersenGens::new()?,
            range_bits,
        })
    }

    pub fn range_bits(&self) -> usize {
        self.range_bits
    }

    /// Accepts iff the proof is valid for its own threshold and `threshold`
    /// does not exceed it.
    pub fn verify_proof(&self, proof: &BalanceProof, threshold: u64) -> bool {
        if threshold > proof.threshold || proof.bits.len() != self.range_bits {
            return false;
        }

        let mut recombined = match fr_from_u64(proof.threshold) {
            Ok(t) => g1_mul(self.gens.g, t),
            Err(_) => return false,
        };
        let mut weight = Fr::one();
        for bit in &proof.bits {
            recombined = g1_add(recombined, g1_mul(bit.commitment, weight));
            weight.double();
        }
        if recombined != proof.commitment.0 {
            return false;
        }

        proof
            .bits
            .iter()
            .enumerate()
            .all(|(i, bit)| bit.verify(&self.gens, &proof.commitment, proof.threshold, i))
    }

    /// As `verify_proof`, additionally pinning the commitment the proof must
    /// be about.
    pub fn verify_against(
        &self,
        commitment: &BalanceCommitment,
        proof: &BalanceProof,
        threshold: u64,
    ) -> bool {
        proof.commitment == *commitment && self.verify_proof(proof, threshold)
    }

    /// Decode and verify in one step; undecodable input is simply rejected.
    pub fn verify_bytes(&self, proof: &[u8], threshold: u64) -> bool {
        match BalanceProof::from_bytes(proof) {
            Ok(proof) => self.verify_proof(&proof, threshold),
            Err(_) => false,
        }
    }
}

impl BalanceProofSystem for BalanceProofVerifier {
    type Proof = BalanceProof;

    fn generate_proof(&self, balance: u64, threshold: u64) -> Result<BalanceProof> {
        BalanceProver::with_range_bits(balance, self.range_bits)?.generate_proof(threshold)
    }

    fn verify_proof(&self, proof: &BalanceProof, threshold: u64) -> bool {
        BalanceProofVerifier::verify_proof(self, proof, threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TEST_BITS: usize = 16;

    fn verifier() -> BalanceProofVerifier {
        BalanceProofVerifier::with_range_bits(TEST_BITS).unwrap()
    }

    #[test]
    fn sufficient_balance_verifies() -> Result<()> {
        let prover = BalanceProver::with_range_bits(1000, TEST_BITS)?;
        let proof = prover.generate_proof(500)?;

        let v = verifier();
        assert!(v.verify_proof(&proof, 500));
        assert!(v.verify_against(&prover.commitment()?, &proof, 500));
        Ok(())
    }

    #[test]
    fn exact_balance_verifies() -> Result<()> {
        let proof = BalanceProver::with_range_bits(500, TEST_BITS)?.generate_proof(500)?;
        assert!(verifier().verify_proof(&proof, 500));
        Ok(())
    }

    #[test]
    fn full_width_proof() -> Result<()> {
        let proof = BalanceProver::new(u64::MAX)?.generate_proof(1)?;
        assert!(BalanceProofVerifier::new()?.verify_proof(&proof, 1));
        Ok(())
    }

    #[test]
    fn insufficient_balance_is_refused() -> Result<()> {
        let prover = BalanceProver::with_range_bits(300, TEST_BITS)?;
        assert!(matches!(
            prover.generate_proof(500),
            Err(Error::InsufficientBalance)
        ));
        Ok(())
    }

    #[test]
    fn surplus_wider_than_range_is_refused() -> Result<()> {
        let prover = BalanceProver::with_range_bits(1 << 20, TEST_BITS)?;
        assert!(matches!(
            prover.generate_proof(0),
            Err(Error::SurplusOutOfRange(TEST_BITS))
        ));
        Ok(())
    }

    #[test]
    fn forged_surplus_does_not_verify() -> Result<()> {
        // A prover that skips the balance check and proves the wrapped surplus.
        let prover = BalanceProver::with_range_bits(300, TEST_BITS)?;
        let wrapped = 300u64.wrapping_sub(500) & ((1 << TEST_BITS) - 1);
        let forged = prover.prove_surplus(wrapped, 500)?;
        assert!(!verifier().verify_proof(&forged, 500));
        Ok(())
    }

    #[test]
    fn proof_is_bound_to_its_threshold() -> Result<()> {
        let proof = BalanceProver::with_range_bits(1000, TEST_BITS)?.generate_proof(500)?;
        let v = verifier();
        assert!(v.verify_proof(&proof, 400));
        assert!(!v.verify_proof(&proof, 501));
        assert!(!v.verify_proof(&proof, 1000));

        // Rewriting the recorded threshold breaks the recombination.
        let mut raised = proof.clone();
        raised.threshold = 900;
        assert!(!v.verify_proof(&raised, 900));
        Ok(())
    }

    #[test]
    fn tampered_bit_proof_fails() -> Result<()> {
        let mut proof = BalanceProver::with_range_bits(1000, TEST_BITS)?.generate_proof(10)?;
        proof.bits[3].z0 = fr_add(proof.bits[3].z0, Fr::one());
        assert!(!verifier().verify_proof(&proof, 10));
        Ok(())
    }

    #[test]
    fn wrong_commitment_is_rejected() -> Result<()> {
        let proof = BalanceProver::with_range_bits(1000, TEST_BITS)?.generate_proof(10)?;
        let other = BalanceProver::with_range_bits(1000, TEST_BITS)?.commitment()?;
        assert!(!verifier().verify_against(&other, &proof, 10));
        Ok(())
    }

    #[test]
    fn bit_width_must_match_verifier() -> Result<()> {
        let proof = BalanceProver::with_range_bits(1000, 12)?.generate_proof(10)?;
        assert!(!verifier().verify_proof(&proof, 10));
        Ok(())
    }

    #[test]
    fn proof_size_does_not_depend_on_balance() -> Result<()> {
        let small = BalanceProver::with_range_bits(10, TEST_BITS)?.generate_proof(10)?;
        let large = BalanceProver::with_range_bits(60_000, TEST_BITS)?.generate_proof(10)?;
        assert_eq!(small.to_bytes().len(), large.to_bytes().len());
        Ok(())
    }

    #[test]
    fn encoded_proof_verifies() -> Result<()> {
        let proof = BalanceProver::with_range_bits(1000, TEST_BITS)?.generate_proof(500)?;
        let bytes = proof.to_bytes();
        assert_eq!(BalanceProof::from_bytes(&bytes)?, proof);
        assert!(verifier().verify_bytes(&bytes, 500));
        Ok(())
    }

    #[test]
    fn malformed_bytes_are_rejected() -> Result<()> {
        let v = verifier();
        assert!(!v.verify_bytes(&[], 1));
        assert!(!v.verify_bytes(b"proof_for_balance_1000", 1));

        let bytes = BalanceProver::with_range_bits(1000, TEST_BITS)?
            .generate_proof(500)?
            .to_bytes();
        assert!(!v.verify_bytes(&bytes[..bytes.len() - 1], 500));

        let mut corrupted = bytes.clone();
        corrupted[HEADER_LEN + 5] ^= 0xff;
        assert!(!v.verify_bytes(&corrupted, 500));
        Ok(())
    }

    #[test]
    fn invalid_range_bits() {
        assert!(BalanceProofVerifier::with_range_bits(0).is_err());
        assert!(BalanceProofVerifier::with_range_bits(65).is_err());
        assert!(BalanceProver::with_range_bits(1, 65).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn threshold_at_most_balance_verifies(balance in 0u64..60_000, frac in 0u64..=100) {
            let threshold = balance * frac / 100;
            let proof = BalanceProver::with_range_bits(balance, TEST_BITS)
                .and_then(|p| p.generate_proof(threshold))
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert!(verifier().verify_proof(&proof, threshold));
        }

        #[test]
        fn threshold_above_balance_never_verifies(balance in 0u64..60_000, excess in 1u64..5_000) {
            let threshold = balance + excess;
            let prover = BalanceProver::with_range_bits(balance, TEST_BITS)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert!(prover.generate_proof(threshold).is_err());

            let proof = prover
                .generate_proof(balance)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert!(!verifier().verify_proof(&proof, threshold));
        }
    }
}
