use anyhow::{Context, Result};

use crate::challenge::ChallengeCatalog;
use crate::ident::generate_server_ident;

// ============================================================================
// Configuration Constants
// ============================================================================

// Default port values
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_HTTP_PORT: u16 = 8081;

// Default challenge catalog: open signup, with browserid available for
// deployments that drop `none`.
const DEFAULT_CHALLENGES: &str = "none,browserid";

// Default trusted BrowserID root issuer name.
const DEFAULT_BROWSERID_ROOT_ISSUER: &str = "browserid.org";

// Message size limit. A signup bundle is a few signed envelopes plus an
// opaque keyring; anything larger indicates an attack, not a bigger bundle.
pub const MAX_WEBSOCKET_MESSAGE_SIZE: usize = 64 * 1024; // 64 KB

// Header the transport layer uses to present the connecting client's public
// key on the WebSocket upgrade.
pub const CLIENT_KEY_HEADER: &str = "x-transit-client-key";

// ============================================================================
// Configuration Structures
// ============================================================================

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// When false, identity keys are only ever logged as salted hashes.
    pub enable_user_identifiers: bool,
    pub hash_salt: String,
}

/// BrowserID challenge configuration: the trusted root issuer and the client
/// origin trust policy.
#[derive(Clone, Debug)]
pub struct BrowserIdConfig {
    /// Issuer name the first certificate of every chain must carry.
    pub root_issuer: String,
    /// SPKI PEM of the root issuer's signing key. Without it the browserid
    /// challenge cannot verify anything.
    pub root_key_pem: Option<String>,
    /// Accept audiences that look like domains (contain a `.`). Off by
    /// default: only non-domain client origins such as extension identifiers
    /// are trusted.
    pub allow_domain_origins: bool,
    /// Exact audiences accepted regardless of the domain rule.
    pub allowed_origins: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// WebSocket protocol port.
    pub port: u16,
    /// HTTP port for the well-known document, /health and /metrics.
    pub http_port: u16,
    /// Short server name; names the well-known document path.
    pub server_name: String,
    /// This server's own published self-ident blob. Every signup bundle must
    /// reference it verbatim.
    pub self_ident_blob: String,
    /// Ordered, server-authoritative challenge catalog.
    pub challenges: ChallengeCatalog,
    pub browserid: BrowserIdConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = env_parse("PORT", DEFAULT_PORT)?;
        let http_port = env_parse("HTTP_PORT", DEFAULT_HTTP_PORT)?;

        let server_name = env_or("TRANSIT_SERVER_NAME", "transit");

        let self_ident_blob = match std::env::var("SELF_IDENT") {
            Ok(blob) if !blob.trim().is_empty() => blob,
            _ => {
                tracing::warn!(
                    "SELF_IDENT not configured; generating an ephemeral server identity"
                );
                generate_server_ident(&server_name)
                    .map_err(|e| anyhow::anyhow!("failed to generate server identity: {e}"))?
            }
        };

        let challenges = ChallengeCatalog::parse_list(&env_or(
            "SIGNUP_CHALLENGES",
            DEFAULT_CHALLENGES,
        ))
        .context("invalid SIGNUP_CHALLENGES")?;

        let browserid = BrowserIdConfig {
            root_issuer: env_or("BROWSERID_ROOT_ISSUER", DEFAULT_BROWSERID_ROOT_ISSUER),
            root_key_pem: std::env::var("BROWSERID_ROOT_KEY_PEM")
                .ok()
                .filter(|pem| !pem.trim().is_empty()),
            allow_domain_origins: env_flag("BROWSERID_ALLOW_DOMAIN_ORIGINS"),
            allowed_origins: std::env::var("BROWSERID_ALLOWED_ORIGINS")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        };

        let logging = LoggingConfig {
            enable_user_identifiers: env_flag("LOG_USER_IDENTIFIERS"),
            hash_salt: env_or("LOG_HASH_SALT", "transit-dev-salt"),
        };

        Ok(Config {
            port,
            http_port,
            server_name,
            self_ident_blob,
            challenges,
            browserid,
            logging,
        })
    }

    /// Path of the unauthenticated well-known self-identity document.
    pub fn well_known_path(&self) -> String {
        format!("/.well-known/{}-server.selfident.json", self.server_name)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("invalid value for {key}")),
        Err(_) => Ok(default),
    }
}
