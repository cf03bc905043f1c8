//! Challenge-response authentication gate for signup.
//!
//! The server owns an ordered [`ChallengeCatalog`] of supported challenge
//! kinds. The same catalog instance that is offered is the one used to
//! validate responses; a response naming a kind the server never offered is
//! simply ignored. Every verifier evaluation yields a uniform [`Verdict`]
//! (ready or pending), so the first-failure-wins aggregation is written once
//! regardless of whether a given verifier needed to do asynchronous work.

pub mod browserid;

use std::collections::HashMap;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::config::BrowserIdConfig;
use crate::error::AppResult;

/// A challenge kind the server may require before provisioning an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    /// Not a real challenge: its presence in the catalog means open signup.
    None,
    /// BrowserID-style e-mail assertion.
    BrowserId,
}

impl ChallengeKind {
    pub fn parse(input: &str) -> Option<ChallengeKind> {
        match input {
            "none" => Some(ChallengeKind::None),
            "browserid" => Some(ChallengeKind::BrowserId),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeKind::None => "none",
            ChallengeKind::BrowserId => "browserid",
        }
    }
}

/// Server-authoritative ordered set of supported challenge kinds. Built once
/// from configuration at startup; never client-suppliable.
#[derive(Debug, Clone)]
pub struct ChallengeCatalog {
    kinds: Vec<ChallengeKind>,
}

impl ChallengeCatalog {
    pub fn new(kinds: Vec<ChallengeKind>) -> Self {
        ChallengeCatalog { kinds }
    }

    /// Parses a comma-separated catalog, e.g. `"none,browserid"`. Unknown
    /// kinds are a configuration error, not something to ignore.
    pub fn parse_list(input: &str) -> anyhow::Result<Self> {
        let mut kinds = Vec::new();
        for item in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let kind = ChallengeKind::parse(item)
                .ok_or_else(|| anyhow::anyhow!("unsupported challenge kind: {item}"))?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        Ok(ChallengeCatalog { kinds })
    }

    pub fn kinds(&self) -> &[ChallengeKind] {
        &self.kinds
    }

    /// `none` in the catalog means requests pass with no further checks.
    pub fn allows_open_signup(&self) -> bool {
        self.kinds.contains(&ChallengeKind::None)
    }
}

/// Terminal challenge outcomes, exactly as they appear on the wire. Issuing
/// one ends the signup task with a response to the peer, never a silent
/// success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeMechanism {
    /// The request can never succeed regardless of how it is resubmitted.
    #[serde(rename = "never")]
    Never,
    #[serde(rename = "already-signed-up")]
    AlreadySignedUp,
    #[serde(rename = "bad-browserid-assertion")]
    BadBrowserIdAssertion,
    #[serde(rename = "server-problem-try-again-later")]
    ServerProblemTryAgainLater,
}

/// The uniform result of invoking a verifier: either an immediately known
/// outcome or pending asynchronous work. `None` inside means "no failure".
pub enum Verdict {
    Ready(Option<ChallengeMechanism>),
    Pending(BoxFuture<'static, AppResult<Option<ChallengeMechanism>>>),
}

/// Runs the challenge gate for one signup attempt. Returns `None` when the
/// gate passes and provisioning may proceed, or the mechanism to issue.
pub async fn run_challenge_gate(
    catalog: &ChallengeCatalog,
    because: &HashMap<String, serde_json::Value>,
    claimed_emails: &[String],
    browserid_config: &BrowserIdConfig,
) -> Option<ChallengeMechanism> {
    if catalog.allows_open_signup() {
        return None;
    }

    // Walk the catalog in its own order; kinds present in the response but
    // absent from the catalog are silently ignored (forward compatible).
    let mut evaluations = Vec::new();
    for kind in catalog.kinds() {
        let Some(response) = because.get(kind.as_str()) else {
            continue;
        };
        let verdict = match kind {
            ChallengeKind::None => Verdict::Ready(None),
            ChallengeKind::BrowserId => {
                browserid::evaluate(response, claimed_emails, browserid_config)
            }
        };
        evaluations.push((kind.as_str(), verdict));
    }

    // With no open-signup kind offered and nothing recognized to verify, the
    // request cannot succeed however it is resubmitted.
    if evaluations.is_empty() {
        return Some(ChallengeMechanism::Never);
    }

    first_failure(evaluations).await
}

/// First-failure-wins aggregation over uniform verdicts, preserving original
/// ordering. A failing ready outcome is issued immediately without waiting on
/// pending work; otherwise pending verifiers are awaited in order and the
/// first failure wins. An error while awaiting becomes a generic retry-later;
/// internal detail is never forwarded to the peer.
async fn first_failure(
    evaluations: Vec<(&'static str, Verdict)>,
) -> Option<ChallengeMechanism> {
    let mut pending = Vec::new();

    for (kind, verdict) in evaluations {
        match verdict {
            Verdict::Ready(Some(mechanism)) => {
                tracing::debug!(kind, ?mechanism, "challenge failed synchronously");
                return Some(mechanism);
            }
            Verdict::Ready(None) => {}
            Verdict::Pending(fut) => pending.push((kind, fut)),
        }
    }

    for (kind, fut) in pending {
        match fut.await {
            Ok(Some(mechanism)) => {
                tracing::debug!(kind, ?mechanism, "challenge failed");
                return Some(mechanism);
            }
            Ok(None) => {}
            Err(err) => {
                err.log();
                return Some(ChallengeMechanism::ServerProblemTryAgainLater);
            }
        }
    }

    None
}
