//! BrowserID-style assertion verification.
//!
//! The client proves control of its claimed e-mail address by presenting a
//! certificate chain rooted at a trusted issuer plus an assertion signed by
//! the chain's leaf key. Certificates and the assertion are JWTs (EdDSA);
//! the chain is verified as of the current time with zero leeway.
//!
//! Failure mapping: malformed input and assertion-level failures (audience
//! policy, principal mismatch, assertion signature) yield
//! `bad-browserid-assertion`; any chain-verification error (signature,
//! expiry, untrusted issuer, malformed embedded key) yields
//! `server-problem-try-again-later`.

use futures_util::FutureExt;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::challenge::{ChallengeMechanism, Verdict};
use crate::config::BrowserIdConfig;
use crate::error::{AppError, AppResult};

/// The `because.browserid` payload: a certificate chain and the assertion it
/// vouches for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionBundle {
    pub certificates: Vec<String>,
    pub assertion: String,
}

/// Claims carried by each certificate in the chain. `publicKey` is the SPKI
/// PEM of the subject key: the key that signs the next certificate, or, in
/// the leaf, the assertion itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertClaims {
    pub iss: String,
    pub exp: u64,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    pub principal: Principal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub email: String,
}

/// Claims carried by the assertion. `aud` is the client origin the assertion
/// was minted for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub aud: String,
    pub exp: u64,
}

/// Invokes the BrowserID verifier for one signup attempt. Precondition
/// failures and malformed bundles resolve synchronously with no async work;
/// chain verification is returned as pending work.
pub fn evaluate(
    response: &serde_json::Value,
    claimed_emails: &[String],
    config: &BrowserIdConfig,
) -> Verdict {
    // The identity must claim exactly one e-mail address; the validated
    // plural list is the source of truth.
    let claimed_email = match claimed_emails {
        [single] => single.clone(),
        _ => {
            tracing::debug!(
                count = claimed_emails.len(),
                "browserid requires exactly one claimed e-mail"
            );
            return Verdict::Ready(Some(ChallengeMechanism::BadBrowserIdAssertion));
        }
    };

    let bundle: AssertionBundle = match serde_json::from_value(response.clone()) {
        Ok(bundle) => bundle,
        Err(err) => {
            tracing::debug!(error = %err, "malformed browserid response");
            return Verdict::Ready(Some(ChallengeMechanism::BadBrowserIdAssertion));
        }
    };
    if bundle.certificates.is_empty() {
        return Verdict::Ready(Some(ChallengeMechanism::BadBrowserIdAssertion));
    }

    let config = config.clone();
    Verdict::Pending(async move { Ok(verify(bundle, claimed_email, config)) }.boxed())
}

struct VerifiedChain {
    leaf_key: DecodingKey,
    principal_email: String,
}

fn verify(
    bundle: AssertionBundle,
    claimed_email: String,
    config: BrowserIdConfig,
) -> Option<ChallengeMechanism> {
    let chain = match verify_chain(&bundle.certificates, &config) {
        Ok(chain) => chain,
        Err(err) => {
            tracing::debug!(error = %err, "certificate chain rejected");
            return Some(ChallengeMechanism::ServerProblemTryAgainLater);
        }
    };

    let assertion =
        match decode::<AssertionClaims>(&bundle.assertion, &chain.leaf_key, &validation()) {
            Ok(data) => data.claims,
            Err(err) => {
                tracing::debug!(error = %err, "assertion rejected");
                return Some(ChallengeMechanism::BadBrowserIdAssertion);
            }
        };

    if !origin_allowed(&assertion.aud, &config) {
        tracing::debug!(audience = %assertion.aud, "assertion audience rejected by origin policy");
        return Some(ChallengeMechanism::BadBrowserIdAssertion);
    }

    if chain.principal_email != claimed_email {
        tracing::debug!("asserted principal does not match claimed e-mail");
        return Some(ChallengeMechanism::BadBrowserIdAssertion);
    }

    None
}

/// Verifies the certificate chain as of now. The first certificate must name
/// the configured trusted root issuer and verify under its key; each
/// certificate's embedded subject key verifies the next. Yields the leaf
/// subject key and the asserted principal e-mail.
fn verify_chain(certs: &[String], config: &BrowserIdConfig) -> AppResult<VerifiedChain> {
    let root_pem = config
        .root_key_pem
        .as_deref()
        .ok_or_else(|| AppError::internal("no BrowserID root issuer key configured"))?;

    let mut key = DecodingKey::from_ed_pem(root_pem.as_bytes())?;
    let mut principal_email = String::new();

    for (index, cert) in certs.iter().enumerate() {
        let data = decode::<CertClaims>(cert, &key, &validation())?;

        if index == 0 && data.claims.iss != config.root_issuer {
            return Err(AppError::internal(format!(
                "certificate issued by untrusted root {}",
                data.claims.iss
            )));
        }

        key = DecodingKey::from_ed_pem(data.claims.public_key.as_bytes())?;
        principal_email = data.claims.principal.email;
    }

    Ok(VerifiedChain {
        leaf_key: key,
        principal_email,
    })
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::EdDSA);
    // As-of-now verification, no backdating tolerance.
    validation.leeway = 0;
    // The audience is the client origin; it is checked against the origin
    // policy, not against a fixed value.
    validation.validate_aud = false;
    validation
}

/// Client-origin trust policy. The default accepts only non-domain origins
/// (local extension identifiers and the like): anything containing a `.` is
/// rejected unless explicitly allowed.
fn origin_allowed(audience: &str, config: &BrowserIdConfig) -> bool {
    if config.allowed_origins.iter().any(|origin| origin == audience) {
        return true;
    }
    if config.allow_domain_origins {
        return true;
    }
    !audience.contains('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ed25519_dalek::pkcs8::{spki::der::pem::LineEnding, EncodePrivateKey, EncodePublicKey};
    use jsonwebtoken::{encode, EncodingKey, Header};

    use crate::crypto::generate_keypair;

    const ROOT_ISSUER: &str = "browserid.example";
    const EMAIL: &str = "alice@example.com";

    struct TestKey {
        encoding: EncodingKey,
        spki_pem: String,
    }

    fn test_key() -> TestKey {
        let (signing, verifying) = generate_keypair();
        let pkcs8 = signing.to_pkcs8_pem(LineEnding::LF).unwrap();
        TestKey {
            encoding: EncodingKey::from_ed_pem(pkcs8.as_bytes()).unwrap(),
            spki_pem: verifying.to_public_key_pem(LineEnding::LF).unwrap(),
        }
    }

    fn now() -> u64 {
        Utc::now().timestamp() as u64
    }

    fn config_with_root(root: &TestKey) -> BrowserIdConfig {
        BrowserIdConfig {
            root_issuer: ROOT_ISSUER.to_string(),
            root_key_pem: Some(root.spki_pem.clone()),
            allow_domain_origins: false,
            allowed_origins: Vec::new(),
        }
    }

    fn make_cert(issuer_key: &EncodingKey, iss: &str, subject_pem: &str, email: &str, exp: u64) -> String {
        let claims = CertClaims {
            iss: iss.to_string(),
            exp,
            public_key: subject_pem.to_string(),
            principal: Principal {
                email: email.to_string(),
            },
        };
        encode(&Header::new(Algorithm::EdDSA), &claims, issuer_key).unwrap()
    }

    fn make_assertion(leaf_key: &EncodingKey, aud: &str, exp: u64) -> String {
        let claims = AssertionClaims {
            aud: aud.to_string(),
            exp,
        };
        encode(&Header::new(Algorithm::EdDSA), &claims, leaf_key).unwrap()
    }

    fn bundle_for(root: &TestKey, user: &TestKey, email: &str, aud: &str, cert_exp: u64) -> AssertionBundle {
        AssertionBundle {
            certificates: vec![make_cert(
                &root.encoding,
                ROOT_ISSUER,
                &user.spki_pem,
                email,
                cert_exp,
            )],
            assertion: make_assertion(&user.encoding, aud, now() + 300),
        }
    }

    #[test]
    fn valid_chain_and_assertion_pass() {
        let root = test_key();
        let user = test_key();
        let bundle = bundle_for(&root, &user, EMAIL, "signup-widget", now() + 3600);

        assert_eq!(
            verify(bundle, EMAIL.to_string(), config_with_root(&root)),
            None
        );
    }

    #[test]
    fn expired_chain_is_a_server_problem_not_a_bad_assertion() {
        let root = test_key();
        let user = test_key();
        let bundle = bundle_for(&root, &user, EMAIL, "signup-widget", now() - 3600);

        assert_eq!(
            verify(bundle, EMAIL.to_string(), config_with_root(&root)),
            Some(ChallengeMechanism::ServerProblemTryAgainLater)
        );
    }

    #[test]
    fn untrusted_root_issuer_is_a_server_problem() {
        let root = test_key();
        let user = test_key();
        let mut bundle = bundle_for(&root, &user, EMAIL, "signup-widget", now() + 3600);
        bundle.certificates = vec![make_cert(
            &root.encoding,
            "someone-else.example",
            &user.spki_pem,
            EMAIL,
            now() + 3600,
        )];

        assert_eq!(
            verify(bundle, EMAIL.to_string(), config_with_root(&root)),
            Some(ChallengeMechanism::ServerProblemTryAgainLater)
        );
    }

    #[test]
    fn principal_mismatch_is_a_bad_assertion_even_with_a_valid_chain() {
        let root = test_key();
        let user = test_key();
        let bundle = bundle_for(&root, &user, "bob@example.com", "signup-widget", now() + 3600);

        assert_eq!(
            verify(bundle, EMAIL.to_string(), config_with_root(&root)),
            Some(ChallengeMechanism::BadBrowserIdAssertion)
        );
    }

    #[test]
    fn domain_audience_is_rejected_by_default_policy() {
        let root = test_key();
        let user = test_key();
        let bundle = bundle_for(&root, &user, EMAIL, "https://site.example.com", now() + 3600);

        assert_eq!(
            verify(bundle, EMAIL.to_string(), config_with_root(&root)),
            Some(ChallengeMechanism::BadBrowserIdAssertion)
        );
    }

    #[test]
    fn allow_listed_domain_audience_passes() {
        let root = test_key();
        let user = test_key();
        let bundle = bundle_for(&root, &user, EMAIL, "https://site.example.com", now() + 3600);

        let mut config = config_with_root(&root);
        config.allowed_origins = vec!["https://site.example.com".to_string()];

        assert_eq!(verify(bundle, EMAIL.to_string(), config), None);
    }

    #[test]
    fn assertion_signed_by_foreign_key_is_a_bad_assertion() {
        let root = test_key();
        let user = test_key();
        let stranger = test_key();
        let mut bundle = bundle_for(&root, &user, EMAIL, "signup-widget", now() + 3600);
        bundle.assertion = make_assertion(&stranger.encoding, "signup-widget", now() + 300);

        assert_eq!(
            verify(bundle, EMAIL.to_string(), config_with_root(&root)),
            Some(ChallengeMechanism::BadBrowserIdAssertion)
        );
    }

    #[test]
    fn wrong_email_count_fails_synchronously() {
        let root = test_key();
        let config = config_with_root(&root);
        let response = serde_json::json!({"certificates": [], "assertion": ""});

        for emails in [vec![], vec!["a@x.com".to_string(), "b@x.com".to_string()]] {
            match evaluate(&response, &emails, &config) {
                Verdict::Ready(Some(ChallengeMechanism::BadBrowserIdAssertion)) => {}
                _ => panic!("expected synchronous bad-assertion outcome"),
            }
        }
    }

    #[test]
    fn malformed_response_fails_synchronously() {
        let root = test_key();
        let config = config_with_root(&root);
        let emails = vec![EMAIL.to_string()];

        let response = serde_json::json!({"certificates": "not-a-list"});
        match evaluate(&response, &emails, &config) {
            Verdict::Ready(Some(ChallengeMechanism::BadBrowserIdAssertion)) => {}
            _ => panic!("expected synchronous bad-assertion outcome"),
        }
    }
}
