//! Identity data model and the signup bundle validator.
//!
//! A peer asking to sign up presents a [`SignupBundle`]: a self-signed
//! self-ident blob, a list of client authorizations signed by the identity's
//! root key, an opaque keyring to persist verbatim, and challenge-response
//! payloads. Validation is a soft-failure task: any failure resolves to a
//! "not valid" sentinel the signup pipeline branches on; no error crosses
//! the task boundary to connection-handling code.

use std::collections::HashMap;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};

use crate::crypto::{encode_base64, generate_keypair, verifying_key_from_b64, SignedBlob};
use crate::error::{AppError, AppResult};
use crate::task::{proceed, FailurePolicy, StepOutcome, Task, TaskEnd};

/// Portable-contacts-like profile carried by a self-ident payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poco {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub emails: Vec<String>,
}

/// The signed declaration at the heart of an identity: its root signing key,
/// profile, and the transit server it claims as its server of record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfIdentPayload {
    pub root_sign_pub_key: String,
    pub poco: Poco,
    pub transit_server_ident: String,
}

/// Payload of a client authorization: one client public key the identity's
/// root key vouches for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientAuthPayload {
    pub authorized_client_key: String,
}

/// The signup request body. Constructed by the client, consumed exactly once
/// per attempt, never persisted here (persistence is the account store's
/// job).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupBundle {
    pub self_ident: SignedBlob,
    pub client_auths: Vec<SignedBlob>,
    #[serde(default)]
    pub store_keyring: serde_json::Value,
    #[serde(default)]
    pub because: HashMap<String, serde_json::Value>,
}

/// A fully validated signup identity: the parsed payload, the raw blob as it
/// will be listed publicly, and the map of authorized client key to signed
/// authorization.
#[derive(Debug, Clone)]
pub struct ValidatedIdentity {
    pub payload: SelfIdentPayload,
    pub raw_blob: String,
    pub client_auths: HashMap<String, SignedBlob>,
}

/// Generates a fresh, self-signed server identity blob. Used when no
/// provisioned identity is configured; the keypair is ephemeral.
pub fn generate_server_ident(display_name: &str) -> AppResult<String> {
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct ServerIdentPayload<'a> {
        display_name: &'a str,
        root_sign_pub_key: String,
    }

    let (signing, verifying) = generate_keypair();
    let blob = SignedBlob::seal(
        &ServerIdentPayload {
            display_name,
            root_sign_pub_key: encode_base64(verifying.as_bytes()),
        },
        &signing,
    )?;
    Ok(serde_json::to_string(&blob)?)
}

/// Context grown by the validation steps.
struct ValidateCtx {
    bundle: SignupBundle,
    peer_key: String,
    server_ident_blob: String,
    payload: Option<SelfIdentPayload>,
    client_auths: HashMap<String, SignedBlob>,
}

impl ValidateCtx {
    fn payload(&self) -> AppResult<&SelfIdentPayload> {
        self.payload
            .as_ref()
            .ok_or_else(|| AppError::internal("self-ident payload not parsed yet"))
    }
}

/// Validates a signup bundle against the connected peer's key and this
/// server's own published identity. Returns the validated identity, or
/// `None` when the bundle is not valid; the caller cannot observe which
/// step failed.
pub async fn validate_signup_bundle(
    bundle: &SignupBundle,
    peer_key: &str,
    server_ident_blob: &str,
) -> Option<ValidatedIdentity> {
    let mut ctx = ValidateCtx {
        bundle: bundle.clone(),
        peer_key: peer_key.to_string(),
        server_ident_blob: server_ident_blob.to_string(),
        payload: None,
        client_auths: HashMap::new(),
    };

    let task = Task::new("validate-signup-bundle", FailurePolicy::Soft)
        .step("parse_self_ident", parse_self_ident)
        .step("check_transit_server", check_transit_server)
        .step("check_display_name", check_display_name)
        .step("verify_client_auths", verify_client_auths)
        .step("require_peer_authorized", require_peer_authorized);

    match task.run(&mut ctx).await {
        Ok(TaskEnd::Completed) => {
            let raw_blob = serde_json::to_string(&ctx.bundle.self_ident).ok()?;
            Some(ValidatedIdentity {
                payload: ctx.payload.take()?,
                raw_blob,
                client_auths: ctx.client_auths,
            })
        }
        _ => None,
    }
}

/// The blob must be self-consistent: its signature verifies under its own
/// embedded key, and the payload's declared root key is that same key.
fn parse_self_ident(ctx: &mut ValidateCtx) -> BoxFuture<'_, AppResult<StepOutcome<()>>> {
    async move {
        let (payload_bytes, signer) = ctx.bundle.self_ident.open()?;
        let payload: SelfIdentPayload = serde_json::from_slice(&payload_bytes)?;

        if payload.root_sign_pub_key != encode_base64(signer.as_bytes()) {
            return Err(AppError::malformed(
                "self-ident not signed by its declared root key",
            ));
        }

        ctx.payload = Some(payload);
        proceed()
    }
    .boxed()
}

/// Exact string equality against this server's own blob: a stale or spoofed
/// server reference is a key mismatch, not something to repair.
fn check_transit_server(ctx: &mut ValidateCtx) -> BoxFuture<'_, AppResult<StepOutcome<()>>> {
    async move {
        if ctx.payload()?.transit_server_ident != ctx.server_ident_blob {
            return Err(AppError::KeyMismatch);
        }
        proceed()
    }
    .boxed()
}

fn check_display_name(ctx: &mut ValidateCtx) -> BoxFuture<'_, AppResult<StepOutcome<()>>> {
    async move {
        if ctx.payload()?.poco.display_name.is_empty() {
            return Err(AppError::malformed("profile carries no displayName"));
        }
        proceed()
    }
    .boxed()
}

/// Every authorization must verify against the root key from the self-ident
/// payload; one bad authorization rejects the whole bundle.
fn verify_client_auths(ctx: &mut ValidateCtx) -> BoxFuture<'_, AppResult<StepOutcome<()>>> {
    async move {
        if ctx.bundle.client_auths.is_empty() {
            return Err(AppError::malformed("no client authorizations"));
        }

        let root_key = ctx.payload()?.root_sign_pub_key.clone();
        let mut verified = HashMap::new();

        for auth in &ctx.bundle.client_auths {
            let payload_bytes = auth.open_signed_by(&root_key)?;
            let payload: ClientAuthPayload = serde_json::from_slice(&payload_bytes)?;
            verifying_key_from_b64(&payload.authorized_client_key)?;
            verified.insert(payload.authorized_client_key, auth.clone());
        }

        ctx.client_auths = verified;
        proceed()
    }
    .boxed()
}

/// The peer speaking right now must be one of the authorized clients. A peer
/// that is not is asking us to confirm or deny possession of keys that are
/// not theirs. A more severe failure, logged as such, but answered exactly
/// like any other invalid bundle.
fn require_peer_authorized(ctx: &mut ValidateCtx) -> BoxFuture<'_, AppResult<StepOutcome<()>>> {
    async move {
        if !ctx.client_auths.contains_key(&ctx.peer_key) {
            return Err(AppError::UnauthorizedDataLeak);
        }
        proceed()
    }
    .boxed()
}
