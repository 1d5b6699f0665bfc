//! JSON Web Key model for the two key families Solid providers publish, plus
//! the private signing keys this client can hold.

use miette::Diagnostic;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use rsa::BigUint;
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::jose::JwsAlgorithm;
use crate::utils::{base64url_decode, base64url_encode};

/// Errors from key parsing and conversion.
#[derive(Debug, Error, Diagnostic)]
pub enum KeyError {
    /// Invalid or unsupported JWK
    #[error("invalid JWK: {0}")]
    #[diagnostic(
        code(solid_oidc::jwk),
        help("ensure RSA n,e or EC P-256 x,y values are unpadded base64url")
    )]
    Jwk(String),
    /// Unsupported curve
    #[error("unsupported curve: {0}")]
    #[diagnostic(code(solid_oidc::jwk::curve), help("only P-256 EC keys are supported"))]
    UnsupportedCurve(String),
    /// PEM parse failure
    #[error("key PEM parse error: {0}")]
    #[diagnostic(code(solid_oidc::jwk::pem))]
    Pem(String),
}

pub type Result<T> = core::result::Result<T, KeyError>;

/// Parameters common to all key types.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct JwkCommon {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RsaJwk {
    #[serde(flatten)]
    pub common: JwkCommon,
    pub n: String,
    pub e: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EcJwk {
    #[serde(flatten)]
    pub common: JwkCommon,
    pub crv: String,
    pub x: String,
    pub y: String,
}

/// A public JSON Web Key, tagged by `kty`.
///
/// Matching on this enum is exhaustive on purpose: a new key type has to be
/// handled at every sign/verify site rather than silently ignored.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kty")]
pub enum Jwk {
    #[serde(rename = "RSA")]
    Rsa(RsaJwk),
    #[serde(rename = "EC")]
    Ec(EcJwk),
}

impl Jwk {
    pub fn kid(&self) -> Option<&str> {
        match self {
            Jwk::Rsa(k) => k.common.kid.as_deref(),
            Jwk::Ec(k) => k.common.kid.as_deref(),
        }
    }

    pub fn alg(&self) -> Option<&str> {
        match self {
            Jwk::Rsa(k) => k.common.alg.as_deref(),
            Jwk::Ec(k) => k.common.alg.as_deref(),
        }
    }

    /// The signature algorithm implied by the key type when `alg` is absent.
    pub fn implied_alg(&self) -> JwsAlgorithm {
        match self {
            Jwk::Rsa(_) => JwsAlgorithm::Rs256,
            Jwk::Ec(_) => JwsAlgorithm::Es256,
        }
    }
}

impl RsaJwk {
    pub fn public_key(&self) -> Result<rsa::RsaPublicKey> {
        let n = base64url_decode(&self.n).map_err(|e| KeyError::Jwk(e.to_string()))?;
        let e = base64url_decode(&self.e).map_err(|e| KeyError::Jwk(e.to_string()))?;
        rsa::RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
            .map_err(|e| KeyError::Jwk(e.to_string()))
    }
}

impl EcJwk {
    pub fn verifying_key(&self) -> Result<p256::ecdsa::VerifyingKey> {
        if self.crv != "P-256" {
            return Err(KeyError::UnsupportedCurve(self.crv.clone()));
        }
        let x = base64url_decode(&self.x).map_err(|e| KeyError::Jwk(e.to_string()))?;
        let y = base64url_decode(&self.y).map_err(|e| KeyError::Jwk(e.to_string()))?;
        if x.len() != 32 || y.len() != 32 {
            return Err(KeyError::Jwk("EC coordinates must be 32 bytes".into()));
        }
        let point = p256::EncodedPoint::from_affine_coordinates(
            p256::FieldBytes::from_slice(&x),
            p256::FieldBytes::from_slice(&y),
            false,
        );
        p256::ecdsa::VerifyingKey::from_encoded_point(&point)
            .map_err(|e| KeyError::Jwk(e.to_string()))
    }
}

/// JWK set document as served from a provider's `jwks_uri`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid() == Some(kid))
    }
}

/// A private signing key held by the client, used for DPoP proofs.
#[derive(Clone)]
pub enum ClientKey {
    Rs256(rsa::RsaPrivateKey),
    Es256(p256::ecdsa::SigningKey),
}

impl ClientKey {
    /// Generate a fresh P-256 key from OS entropy.
    pub fn generate_es256() -> Self {
        ClientKey::Es256(p256::ecdsa::SigningKey::random(&mut OsRng))
    }

    pub fn rsa_from_pkcs8_pem(pem: &str) -> Result<Self> {
        use rsa::pkcs8::DecodePrivateKey;
        rsa::RsaPrivateKey::from_pkcs8_pem(pem)
            .map(ClientKey::Rs256)
            .map_err(|e| KeyError::Pem(e.to_string()))
    }

    pub fn rsa_from_pkcs1_pem(pem: &str) -> Result<Self> {
        use rsa::pkcs1::DecodeRsaPrivateKey;
        rsa::RsaPrivateKey::from_pkcs1_pem(pem)
            .map(ClientKey::Rs256)
            .map_err(|e| KeyError::Pem(e.to_string()))
    }

    pub fn ec_from_pkcs8_pem(pem: &str) -> Result<Self> {
        use p256::pkcs8::DecodePrivateKey;
        p256::ecdsa::SigningKey::from_pkcs8_pem(pem)
            .map(ClientKey::Es256)
            .map_err(|e| KeyError::Pem(e.to_string()))
    }

    pub fn alg(&self) -> JwsAlgorithm {
        match self {
            ClientKey::Rs256(_) => JwsAlgorithm::Rs256,
            ClientKey::Es256(_) => JwsAlgorithm::Es256,
        }
    }

    /// Derive the public JWK for embedding in proof headers.
    pub fn public_jwk(&self) -> Result<Jwk> {
        match self {
            ClientKey::Rs256(key) => {
                let public = key.to_public_key();
                Ok(Jwk::Rsa(RsaJwk {
                    common: JwkCommon::default(),
                    n: base64url_encode(public.n().to_bytes_be()),
                    e: base64url_encode(public.e().to_bytes_be()),
                }))
            }
            ClientKey::Es256(key) => {
                let point = key.verifying_key().to_encoded_point(false);
                let (Some(x), Some(y)) = (point.x(), point.y()) else {
                    return Err(KeyError::Jwk("EC point at infinity".into()));
                };
                Ok(Jwk::Ec(EcJwk {
                    common: JwkCommon::default(),
                    crv: "P-256".into(),
                    x: base64url_encode(x),
                    y: base64url_encode(y),
                }))
            }
        }
    }
}

impl std::fmt::Debug for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientKey::Rs256(_) => f.write_str("ClientKey::Rs256(..)"),
            ClientKey::Es256(_) => f.write_str("ClientKey::Es256(..)"),
        }
    }
}
