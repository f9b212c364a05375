use crate::error::{Error, Result};
use blst::{blst_hash_to_g1, blst_hash_to_g2, blst_p1, blst_p1_compress, blst_p2, blst_p2_compress};
use blsttc::ff::{Field, PrimeField}; // for Fr trait
use blsttc::group::{CurveAffine, CurveProjective, EncodedPoint};
use blsttc::pairing::bls12_381::{Fr, FrRepr, G1Affine, G2Affine, G1, G2};
use blsttc::{PublicKey, SecretKey, Signature};
use sha2::{Digest, Sha256};
use std::borrow::Borrow;

pub(crate) const SIG_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_NUL_";

pub(crate) fn verify_signature_on_details(data: &[u8], sig: &Signature, pk: &PublicKey) -> bool {
    // The details are mapped onto G2 with the same hash the preparer used
    // before blinding, then checked with the pairing
    //   e(pk, H(details)) == e(g1, sig)
    match hash_g2_with_dst(data) {
        Ok(data_g2) => pk.verify_g2(sig, data_g2),
        Err(_) => false,
    }
}

pub(crate) fn verify_signature_on_blinded(blinded_msg: G2, sig: &Signature, pk: &PublicKey) -> bool {
    // The signer never saw the details, only the blinded G2, so the blinded
    // signature is checked against that point without any hashing.
    pk.verify_g2(sig, blinded_msg)
}

pub(crate) fn hash_g2_with_dst(msg: &[u8]) -> Result<G2> {
    let mut msg_hash: blst_p2 = Default::default();
    let aug = b"";
    unsafe {
        blst_hash_to_g2(
            &mut msg_hash,
            msg.as_ptr(),
            msg.len(),
            SIG_DST.as_ptr(),
            SIG_DST.len(),
            aug.as_ptr(),
            aug.len(),
        )
    };
    let mut msg_g2_bytes = [0u8; 96];
    unsafe { blst_p2_compress(&mut msg_g2_bytes[0], &msg_hash) }
    be_bytes_to_g2(msg_g2_bytes)
}

/// Hash arbitrary bytes onto G1 under a caller supplied domain tag.
pub(crate) fn hash_g1_with_dst(msg: &[u8], dst: &[u8]) -> Result<G1> {
    let mut msg_hash: blst_p1 = Default::default();
    let aug = b"";
    unsafe {
        blst_hash_to_g1(
            &mut msg_hash,
            msg.as_ptr(),
            msg.len(),
            dst.as_ptr(),
            dst.len(),
            aug.as_ptr(),
            aug.len(),
        )
    };
    let mut msg_g1_bytes = [0u8; 48];
    unsafe { blst_p1_compress(&mut msg_g1_bytes[0], &msg_hash) }
    be_bytes_to_g1(msg_g1_bytes)
}

// see blsttc util.rs
pub(crate) fn fr_from_be_bytes(bytes: [u8; 32]) -> Result<Fr> {
    let mut le_bytes = bytes;
    le_bytes.reverse();
    let mut fr_u64s = [0u64; 4];
    for (i, limb) in fr_u64s.iter_mut().enumerate() {
        let mut next_u64_bytes = [0u8; 8];
        next_u64_bytes.copy_from_slice(&le_bytes[i * 8..(i + 1) * 8]);
        *limb = u64::from_le_bytes(next_u64_bytes);
    }
    Fr::from_repr(FrRepr(fr_u64s)).map_err(|_| Error::InvalidScalar)
}

pub(crate) fn fr_to_be_bytes(fr: Fr) -> [u8; 32] {
    let repr = fr.into_repr();
    let mut bytes = [0u8; 32];
    for (i, limb) in repr.0.iter().enumerate() {
        bytes[i * 8..(i + 1) * 8].copy_from_slice(&limb.to_le_bytes());
    }
    bytes.reverse();
    bytes
}

pub(crate) fn fr_from_u64(value: u64) -> Result<Fr> {
    Fr::from_repr(FrRepr([value, 0, 0, 0])).map_err(|_| Error::InvalidScalar)
}

/// Returns `None` when the scalar does not fit in a u64.
pub(crate) fn fr_to_u64(fr: Fr) -> Option<u64> {
    let repr = fr.into_repr();
    if repr.0[1..].iter().all(|limb| *limb == 0) {
        Some(repr.0[0])
    } else {
        None
    }
}

// A fresh secret key is a uniformly random non-zero Fr.
pub(crate) fn random_fr() -> Result<Fr> {
    fr_from_be_bytes(SecretKey::random().to_bytes())
}

/// Fiat-Shamir challenge: SHA-256 over length-prefixed parts, reduced
/// below the Fr modulus by clearing the top two bits.
pub(crate) fn hash_to_fr(domain: &[u8], parts: &[&[u8]]) -> Result<Fr> {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    let mut bytes: [u8; 32] = hasher.finalize().into();
    bytes[0] &= 0x3f;
    fr_from_be_bytes(bytes)
}

pub(crate) fn fr_add(a: Fr, b: Fr) -> Fr {
    let mut sum = a;
    sum.add_assign(&b);
    sum
}

pub(crate) fn fr_sub(a: Fr, b: Fr) -> Fr {
    let mut diff = a;
    diff.sub_assign(&b);
    diff
}

pub(crate) fn fr_mul(a: Fr, b: Fr) -> Fr {
    let mut product = a;
    product.mul_assign(&b);
    product
}

// p * s
pub(crate) fn g1_mul(p: G1, s: Fr) -> G1 {
    p.into_affine().mul(s)
}

pub(crate) fn g1_add(a: G1, b: G1) -> G1 {
    let mut sum = a;
    sum.add_assign(&b);
    sum
}

pub(crate) fn g1_sub(a: G1, b: G1) -> G1 {
    let mut neg = b;
    neg.negate();
    g1_add(a, neg)
}

// y = x * r
pub(crate) fn blind(g2: G2, r: Fr) -> G2 {
    g2.into_affine().mul(r)
}

// x = y * 1/r
pub(crate) fn unblind(g2: G2, r: Fr) -> Result<G2> {
    let inverse = r.inverse().ok_or(Error::ZeroBlindingFactor)?;
    Ok(g2.into_affine().mul(inverse))
}

// see blsttc Signature from_bytes
pub(crate) fn be_bytes_to_g2(bytes: [u8; 96]) -> Result<G2> {
    let mut compressed: <G2Affine as CurveAffine>::Compressed = EncodedPoint::empty();
    compressed.as_mut().copy_from_slice(bytes.borrow());
    let affine = compressed.into_affine().map_err(|_| Error::InvalidPoint)?;
    Ok(affine.into_projective())
}

// see blsttc Signature to_bytes
pub(crate) fn g2_to_be_bytes(g2: G2) -> [u8; 96] {
    let mut bytes = [0u8; 96];
    bytes.copy_from_slice(g2.into_affine().into_compressed().as_ref());
    bytes
}

pub(crate) fn be_bytes_to_g1(bytes: [u8; 48]) -> Result<G1> {
    let mut compressed: <G1Affine as CurveAffine>::Compressed = EncodedPoint::empty();
    compressed.as_mut().copy_from_slice(bytes.borrow());
    let affine = compressed.into_affine().map_err(|_| Error::InvalidPoint)?;
    Ok(affine.into_projective())
}

pub(crate) fn g1_to_be_bytes(g1: G1) -> [u8; 48] {
    let mut bytes = [0u8; 48];
    bytes.copy_from_slice(g1.into_affine().into_compressed().as_ref());
    bytes
}

// Signing a G2 directly rather than message bytes, see `BlindSigner`.
pub(crate) fn sign_g2(g2: G2, fr: Fr) -> G2 {
    g2.into_affine().mul(fr)
}
