//! Signed token envelopes.
//!
//! A token's `value` is a Biscuit whose authority block carries the canonical
//! claim set as a single `claims($json)` fact. Verifying the Biscuit signature
//! authenticates those claims; the presented [`Token`] must then serialise to
//! exactly the same claim set, otherwise it was altered after signing.

use crate::error::TokenError;
use crate::keys::KeyPair;
use crate::token::{SigningAlgorithm, Token, TokenType};
use biscuit_auth::Biscuit;
use biscuit_auth::builder::AuthorizerBuilder;
use biscuit_auth::macros::fact;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// The claim set covered by a signature.
///
/// Sets are ordered and timestamps are integer microseconds, so one token
/// always serialises to the same bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedClaims {
    pub jti: String,
    pub typ: TokenType,
    pub sub: String,
    pub iss: String,
    pub aud: BTreeSet<String>,
    pub scope: BTreeSet<String>,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub alg: SigningAlgorithm,
    pub kid: String,
}

impl SignedClaims {
    /// Claims of `token` as they would be signed by key `kid`.
    pub fn of(token: &Token, kid: &str) -> Self {
        Self {
            jti: token.id.clone(),
            typ: token.token_type,
            sub: token.subject.clone(),
            iss: token.issuer.clone(),
            aud: token.audience.clone(),
            scope: token.scopes.clone(),
            iat: token.issued_at.timestamp_micros(),
            nbf: token.not_before.timestamp_micros(),
            exp: token.expires_at.timestamp_micros(),
            alg: token.algorithm,
            kid: kid.to_string(),
        }
    }

    fn to_json(&self) -> Result<String, TokenError> {
        serde_json::to_string(self)
            .map_err(|e| TokenError::InvalidClaims(format!("cannot encode claims: {e}")))
    }

    /// Rebuild a token from verified claims. Metadata and revocation are not
    /// signed and come back empty.
    pub fn into_token(self, value: String) -> Result<Token, TokenError> {
        let ts = |micros: i64, name: &str| {
            DateTime::<Utc>::from_timestamp_micros(micros)
                .ok_or_else(|| TokenError::InvalidClaims(format!("{name} out of range")))
        };
        Ok(Token {
            issued_at: ts(self.iat, "iat")?,
            not_before: ts(self.nbf, "nbf")?,
            expires_at: ts(self.exp, "exp")?,
            id: self.jti,
            token_type: self.typ,
            subject: self.sub,
            issuer: self.iss,
            audience: self.aud,
            scopes: self.scope,
            algorithm: self.alg,
            key_id: Some(self.kid),
            value: Some(value),
            metadata: BTreeMap::new(),
            revocation: None,
        })
    }
}

/// Signing capability bound to one retained key.
#[derive(Debug, Clone)]
pub struct Signer {
    key: Arc<KeyPair>,
}

impl Signer {
    pub fn new(key: Arc<KeyPair>) -> Self {
        Self { key }
    }

    pub fn key_id(&self) -> &str {
        self.key.id()
    }

    /// Sign `token`'s claims, returning the base64 envelope.
    pub fn sign(&self, token: &Token) -> Result<String, TokenError> {
        let claims = SignedClaims::of(token, self.key.id()).to_json()?;

        let biscuit = Biscuit::builder()
            .fact(fact!("claims({claims})", claims = claims))
            .map_err(|e| TokenError::SigningError(e.to_string()))?
            .build(self.key.inner())
            .map_err(|e| TokenError::SigningError(e.to_string()))?;

        biscuit
            .to_base64()
            .map_err(|e| TokenError::SigningError(format!("serialization failed: {e}")))
    }

    /// Check the envelope signature against this key and extract its claims.
    pub fn open(&self, value: &str, now: DateTime<Utc>) -> Result<SignedClaims, TokenError> {
        let biscuit = Biscuit::from_base64(value, self.key.public_key())
            .map_err(|e| TokenError::InvalidSignature(e.to_string()))?;

        let now = now.timestamp();
        let mut authorizer = AuthorizerBuilder::new()
            .code(format!(
                r#"
                time({now});
                allow if true;
                "#
            ))
            .map_err(|e| TokenError::InvalidSignature(e.to_string()))?
            .build(&biscuit)
            .map_err(|e| TokenError::InvalidSignature(e.to_string()))?;

        authorizer
            .authorize()
            .map_err(|e| TokenError::InvalidSignature(e.to_string()))?;

        let rule: biscuit_auth::builder::Rule = "data($x) <- claims($x)"
            .parse()
            .map_err(|e: biscuit_auth::error::Token| TokenError::InvalidSignature(e.to_string()))?;

        let results: Vec<(String,)> = authorizer
            .query(rule)
            .map_err(|e| TokenError::InvalidSignature(e.to_string()))?;

        let (json,) = results
            .into_iter()
            .next()
            .ok_or_else(|| TokenError::InvalidSignature("missing claims".into()))?;

        let claims: SignedClaims = serde_json::from_str(&json)
            .map_err(|e| TokenError::InvalidSignature(format!("malformed claims: {e}")))?;

        if claims.kid != self.key.id() {
            return Err(TokenError::InvalidSignature("key id mismatch".into()));
        }
        Ok(claims)
    }

    /// Verify that `token.value` was signed by this key over `token`'s claims.
    pub fn verify(&self, token: &Token, now: DateTime<Utc>) -> Result<(), TokenError> {
        let value = token
            .value
            .as_deref()
            .ok_or_else(|| TokenError::InvalidSignature("token is not signed".into()))?;

        let signed = self.open(value, now)?;
        if signed != SignedClaims::of(token, self.key.id()) {
            return Err(TokenError::InvalidSignature(
                "claims do not match signature".into(),
            ));
        }
        Ok(())
    }
}
