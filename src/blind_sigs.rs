use crate::error::{Error, Result};
use crate::pipeline::TransactionAuthorizer;
use crate::utils::*;
use blsttc::pairing::bls12_381::{Fr, G2};
use blsttc::{PublicKey, SecretKey, Signature};

/// Represents the party that describes a transaction and
/// hides the description before it goes to the signer.
#[derive(Clone, Debug)]
pub struct TransactionPreparer {
    blinding_factor: Fr,
}

impl TransactionPreparer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            blinding_factor: random_fr()?,
        })
    }

    pub fn blinding_factor(&self) -> Fr {
        self.blinding_factor
    }

    pub fn place_details_in_envelope(&self, details: &[u8]) -> Result<Envelope> {
        let msg_g2 = hash_g2_with_dst(details)?;

        let blinded_msg = blind(msg_g2, self.blinding_factor);

        Ok(Envelope::from(blinded_msg))
    }

    /// Check the signer's answer against the envelope it was given, then
    /// strip the blinding to get a signature over the details.
    pub fn open_signed_envelope(
        &self,
        signed: &SignedEnvelope,
        pk: &PublicKey,
    ) -> Result<Signature> {
        if !verify_signature_on_blinded(signed.envelope.blinded_msg(), &signed.signature, pk) {
            return Err(Error::Signing(
                "signer returned an invalid signature for the envelope".into(),
            ));
        }
        signed.signature_for_details(self.blinding_factor)
    }
}

impl TryFrom<[u8; 32]> for TransactionPreparer {
    type Error = Error;

    fn try_from(b: [u8; 32]) -> Result<Self> {
        Ok(Self {
            blinding_factor: fr_from_be_bytes(b)?,
        })
    }
}

/// An Envelope holds the transaction details without
/// revealing them.
#[derive(Clone, Debug)]
pub struct Envelope {
    blinded_msg: G2,
}

impl Envelope {
    pub fn blinded_msg(&self) -> G2 {
        self.blinded_msg
    }

    pub fn to_bytes(&self) -> [u8; 96] {
        g2_to_be_bytes(self.blinded_msg)
    }
}

impl From<G2> for Envelope {
    fn from(blinded_msg: G2) -> Self {
        Self { blinded_msg }
    }
}

impl TryFrom<&[u8]> for Envelope {
    type Error = Error;

    fn try_from(b: &[u8]) -> Result<Self> {
        let bytes: [u8; 96] = b.try_into()?;
        Ok(Self::from(be_bytes_to_g2(bytes)?))
    }
}

/// An Envelope which has a signature written on it by the
/// BlindSigner party.
///
/// Signing the envelope also signs the details inside, even
/// though the signer has never seen them.
#[derive(Clone, Debug)]
pub struct SignedEnvelope {
    pub envelope: Envelope,
    signature: Signature,
}

impl SignedEnvelope {
    pub fn signature_for_envelope(&self) -> &Signature {
        &self.signature
    }

    pub fn signature_for_details(&self, blinding_factor: Fr) -> Result<Signature> {
        let blinded_sig_g2 = be_bytes_to_g2(self.signature.to_bytes())?;
        let unblinded_sig_g2 = unblind(blinded_sig_g2, blinding_factor)?;

        let unblinded_sig = Signature::from_bytes(g2_to_be_bytes(unblinded_sig_g2))?;
        Ok(unblinded_sig)
    }
}

/// Represents the party that signs the Envelope
/// without seeing the details inside.
pub struct BlindSigner {
    sk: SecretKey,
}

impl BlindSigner {
    pub fn new() -> Self {
        Self {
            sk: SecretKey::random(),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.sk.public_key()
    }

    fn sk_bendian(&self) -> Result<Fr> {
        fr_from_be_bytes(self.sk.to_bytes())
    }

    pub fn sign_envelope(&self, e: Envelope) -> Result<SignedEnvelope> {
        // We sign a G2, not message bytes, so SecretKey::sign(msg) does not apply.
        let bs_sig_g2 = sign_g2(e.blinded_msg(), self.sk_bendian()?);

        let signed_envelope = SignedEnvelope {
            envelope: e,
            signature: Signature::from_bytes(g2_to_be_bytes(bs_sig_g2))?,
        };

        Ok(signed_envelope)
    }
}

impl Default for BlindSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl From<SecretKey> for BlindSigner {
    fn from(sk: SecretKey) -> Self {
        Self { sk }
    }
}

/// Unblinded signature over transaction details, together with the key
/// that must verify it.
#[derive(Clone, Debug, PartialEq)]
pub struct BlindSignature {
    pub signature: Signature,
    pub signer_public_key: PublicKey,
}

impl BlindSignature {
    pub const BYTES_LEN: usize = 96 + 48;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::BYTES_LEN);
        out.extend_from_slice(&self.signature.to_bytes());
        out.extend_from_slice(&self.signer_public_key.to_bytes());
        out
    }

    pub fn from_bytes(b: &[u8]) -> Result<Self> {
        if b.len() != Self::BYTES_LEN {
            return Err(Error::Signing(format!(
                "expected {} signature bytes, got {}",
                Self::BYTES_LEN,
                b.len()
            )));
        }
        let sig_bytes: [u8; 96] = b[..96].try_into()?;
        let pk_bytes: [u8; 48] = b[96..].try_into()?;
        Ok(Self {
            signature: Signature::from_bytes(sig_bytes)?,
            signer_public_key: PublicKey::from_bytes(pk_bytes)?,
        })
    }
}

/// Authorizes transaction details through a blind signing round.
///
/// The signing key lives as long as the authorizer; each transaction gets a
/// fresh blinding factor, so the signer cannot link an issued signature to
/// the envelope it signed.
#[derive(Default)]
pub struct BlindAuthorizer {
    signer: BlindSigner,
}

impl BlindAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn public_key(&self) -> PublicKey {
        self.signer.public_key()
    }

    pub fn sign_transaction(&self, details: &str) -> Result<BlindSignature> {
        let preparer = TransactionPreparer::new()?;
        let envelope = preparer.place_details_in_envelope(details.as_bytes())?;

        let signed = self.signer.sign_envelope(envelope)?;

        let pk = self.signer.public_key();
        let signature = preparer.open_signed_envelope(&signed, &pk)?;
        Ok(BlindSignature {
            signature,
            signer_public_key: pk,
        })
    }

    pub fn verify_signature(&self, details: &str, signature: &BlindSignature) -> bool {
        signature.signer_public_key == self.signer.public_key()
            && verify_signature_on_details(
                details.as_bytes(),
                &signature.signature,
                &signature.signer_public_key,
            )
    }
}

impl From<BlindSigner> for BlindAuthorizer {
    fn from(signer: BlindSigner) -> Self {
        Self { signer }
    }
}

impl TransactionAuthorizer for BlindAuthorizer {
    type Signature = BlindSignature;

    fn sign_transaction(&self, details: &str) -> Result<BlindSignature> {
        BlindAuthorizer::sign_transaction(self, details)
    }

    fn verify_signature(&self, details: &str, signature: &BlindSignature) -> bool {
        BlindAuthorizer::verify_signature(self, details, signature)
    }
}
