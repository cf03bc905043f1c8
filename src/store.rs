//! Account store collaborator interface.
//!
//! The signup core never persists anything itself: it talks to an
//! [`AccountStore`] behind a narrow async interface. The store owns the
//! atomicity contract: concurrent creates for the same root key must not
//! both succeed.

use std::collections::HashMap;

use anyhow::{bail, Result};
use tokio::sync::Mutex;

use crate::crypto::SignedBlob;
use crate::ident::SelfIdentPayload;

/// The slice of an identity published in the phonebook.
#[derive(Debug, Clone)]
pub struct PublicListingInfo {
    pub display_name: String,
}

/// Everything the store persists for a freshly provisioned account. The
/// keyring is opaque to the core and stored verbatim.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub root_key: String,
    pub payload: SelfIdentPayload,
    pub raw_self_ident: String,
    pub client_auths: HashMap<String, SignedBlob>,
    pub store_keyring: serde_json::Value,
    pub listing: PublicListingInfo,
}

/// Storage interface for provisioned accounts.
///
/// This trait allows for multiple implementations; the in-process
/// [`MemoryAccountStore`] backs tests and the demo server, a persistent
/// store backs a real deployment.
#[async_trait::async_trait]
pub trait AccountStore: Send + Sync {
    /// Whether an account exists for this root signing key. Always consulted
    /// before any mutation.
    async fn account_exists(&self, root_key: &str) -> Result<bool>;

    /// Persist a new account. Must fail, not overwrite, when an account
    /// already exists for the same root key, even under concurrent calls.
    async fn create_account(&self, account: NewAccount) -> Result<()>;

    /// All self-ident blobs published in the phonebook.
    async fn scan_public_listing(&self) -> Result<Vec<String>>;

    /// Liveness probe for the health endpoint.
    async fn ping(&self) -> Result<()>;
}

/// In-memory account store. One lock around the map gives the
/// no-double-create guarantee the trait demands.
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: Mutex<HashMap<String, NewAccount>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl AccountStore for MemoryAccountStore {
    async fn account_exists(&self, root_key: &str) -> Result<bool> {
        Ok(self.accounts.lock().await.contains_key(root_key))
    }

    async fn create_account(&self, account: NewAccount) -> Result<()> {
        let mut accounts = self.accounts.lock().await;
        if accounts.contains_key(&account.root_key) {
            bail!("account already exists for root key");
        }
        accounts.insert(account.root_key.clone(), account);
        Ok(())
    }

    async fn scan_public_listing(&self) -> Result<Vec<String>> {
        Ok(self
            .accounts
            .lock()
            .await
            .values()
            .map(|account| account.raw_self_ident.clone())
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
