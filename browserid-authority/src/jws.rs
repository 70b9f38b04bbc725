//! Compact JSON Web Signatures with `ES256`: `base64url(header).base64url(payload).base64url(r || s)`.

use browserid_types::{encoding, PublicKey};
use p256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::SigningError;

const ALGORITHM: &str = "ES256";

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
}

/// Serialize `claims` and sign them with `key`.
pub(crate) fn sign<T: Serialize>(claims: &T, key: &SigningKey) -> Result<String, SigningError> {
    let header = serde_json::to_vec(&Header {
        alg: ALGORITHM.into(),
    })
    .map_err(|_| SigningError::SignatureFailed)?;
    let payload = serde_json::to_vec(claims).map_err(|_| SigningError::SignatureFailed)?;

    let signing_input = format!(
        "{}.{}",
        encoding::base64url(&header),
        encoding::base64url(&payload)
    );
    let signature: Signature = key
        .try_sign(signing_input.as_bytes())
        .map_err(|_| SigningError::SignatureFailed)?;

    Ok(format!(
        "{signing_input}.{}",
        encoding::base64url(&signature.to_bytes())
    ))
}

/// A decoded, not yet verified, token.
#[derive(Debug, Clone)]
pub(crate) struct Jws {
    token: String,
    signed_len: usize,
    payload: Vec<u8>,
    signature: Signature,
}

impl Jws {
    /// Split and decode a compact token. Only `ES256` tokens are accepted.
    pub(crate) fn decode(token: &str) -> Option<Self> {
        let (signing_input, signature) = token.rsplit_once('.')?;
        let (header, payload) = signing_input.split_once('.')?;

        let header: Header = serde_json::from_slice(&encoding::try_from_base64url(header)?).ok()?;
        if header.alg != ALGORITHM {
            return None;
        }
        let payload = encoding::try_from_base64url(payload)?;
        let signature = Signature::from_slice(&encoding::try_from_base64url(signature)?).ok()?;

        Some(Self {
            token: token.to_owned(),
            signed_len: signing_input.len(),
            payload,
            signature,
        })
    }

    pub(crate) fn claims<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_slice(&self.payload).ok()
    }

    pub(crate) fn verify(&self, key: &PublicKey) -> bool {
        let signing_input = &self.token.as_bytes()[..self.signed_len];
        VerifyingKey::from(key.as_p256())
            .verify(signing_input, &self.signature)
            .is_ok()
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.token
    }
}
