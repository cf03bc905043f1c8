//! The signup pipeline: the composed task behind `(Root, "signup")`.
//!
//! Validate the bundle (nested soft-failure task), gate on account
//! existence, run the challenge gate, and only if every gate passes call the
//! account store and acknowledge. Each stage can terminate the task early
//! with the one terminal message this attempt will ever get.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::challenge::{run_challenge_gate, ChallengeMechanism};
use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::handlers::connection::ConnectionHandler;
use crate::ident::{validate_signup_bundle, SignupBundle, ValidatedIdentity};
use crate::message::ServerMessage;
use crate::metrics;
use crate::store::{NewAccount, PublicListingInfo};
use crate::task::{early, proceed, FailurePolicy, StepOutcome, Task, TaskEnd};
use crate::utils::log_safe_key;

struct SignupCtx {
    app: AppContext,
    peer_key: String,
    bundle: SignupBundle,
    identity: Option<ValidatedIdentity>,
}

impl SignupCtx {
    fn identity(&self) -> AppResult<&ValidatedIdentity> {
        self.identity
            .as_ref()
            .ok_or_else(|| AppError::internal("signup bundle not validated yet"))
    }
}

pub async fn handle_signup(
    handler: &mut ConnectionHandler,
    app: &AppContext,
    bundle: SignupBundle,
) {
    metrics::SIGNUP_ATTEMPTS_TOTAL.inc();

    let mut ctx = SignupCtx {
        app: app.clone(),
        peer_key: handler.peer_key().to_string(),
        bundle,
        identity: None,
    };

    let task = Task::new("signup", FailurePolicy::Fatal)
        .step("validate_bundle", validate_bundle)
        .step("check_existing", check_existing)
        .step("challenge_gate", challenge_gate)
        .step("create_account", create_account);

    let reply = match task.run(&mut ctx).await {
        Ok(TaskEnd::Returned(msg)) => msg,
        Ok(_) => {
            // The pipeline always resolves through an early return; anything
            // else is a bug in the step list itself.
            tracing::error!("signup pipeline completed without a terminal message");
            ServerMessage::challenge(ChallengeMechanism::ServerProblemTryAgainLater)
        }
        Err(err) => {
            err.log();
            ServerMessage::challenge(ChallengeMechanism::ServerProblemTryAgainLater)
        }
    };

    match &reply {
        ServerMessage::SignedUp => metrics::SIGNUPS_TOTAL.inc(),
        _ => metrics::SIGNUP_REJECTIONS_TOTAL.inc(),
    }

    handler.terminal(&reply).await;
}

/// Runs the nested soft-failure validator. An invalid bundle (malformed,
/// naming another server, or probing keys the peer does not hold) gets the
/// same `never` answer.
fn validate_bundle(ctx: &mut SignupCtx) -> BoxFuture<'_, AppResult<StepOutcome<ServerMessage>>> {
    async move {
        let validated = validate_signup_bundle(
            &ctx.bundle,
            &ctx.peer_key,
            &ctx.app.config.self_ident_blob,
        )
        .await;

        match validated {
            Some(identity) => {
                ctx.identity = Some(identity);
                proceed()
            }
            None => early(ServerMessage::challenge(ChallengeMechanism::Never)),
        }
    }
    .boxed()
}

/// The existence check gates everything that mutates: an account that is
/// already there answers `already-signed-up` and creation is never attempted.
fn check_existing(ctx: &mut SignupCtx) -> BoxFuture<'_, AppResult<StepOutcome<ServerMessage>>> {
    async move {
        let root_key = ctx.identity()?.payload.root_sign_pub_key.clone();

        if ctx.app.store.account_exists(&root_key).await? {
            tracing::debug!(
                root_key_hash = %log_safe_key(&root_key, &ctx.app.config.logging.hash_salt),
                "signup for existing account"
            );
            return early(ServerMessage::challenge(ChallengeMechanism::AlreadySignedUp));
        }
        proceed()
    }
    .boxed()
}

fn challenge_gate(ctx: &mut SignupCtx) -> BoxFuture<'_, AppResult<StepOutcome<ServerMessage>>> {
    async move {
        let emails = ctx.identity()?.payload.poco.emails.clone();

        let outcome = run_challenge_gate(
            &ctx.app.config.challenges,
            &ctx.bundle.because,
            &emails,
            &ctx.app.config.browserid,
        )
        .await;

        match outcome {
            Some(mechanism) => early(ServerMessage::challenge(mechanism)),
            None => proceed(),
        }
    }
    .boxed()
}

fn create_account(ctx: &mut SignupCtx) -> BoxFuture<'_, AppResult<StepOutcome<ServerMessage>>> {
    async move {
        let identity = ctx.identity()?.clone();
        let root_key = identity.payload.root_sign_pub_key.clone();

        let account = NewAccount {
            root_key: root_key.clone(),
            listing: PublicListingInfo {
                display_name: identity.payload.poco.display_name.clone(),
            },
            raw_self_ident: identity.raw_blob,
            client_auths: identity.client_auths,
            payload: identity.payload,
            store_keyring: ctx.bundle.store_keyring.clone(),
        };

        ctx.app.store.create_account(account).await?;

        let logging = &ctx.app.config.logging;
        if logging.enable_user_identifiers {
            tracing::info!(root_key = %root_key, "account provisioned");
        } else {
            tracing::info!(
                root_key_hash = %log_safe_key(&root_key, &logging.hash_salt),
                "account provisioned"
            );
        }

        early(ServerMessage::SignedUp)
    }
    .boxed()
}
