use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use ed25519_dalek::SigningKey;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use transit_server::challenge::ChallengeCatalog;
use transit_server::config::{BrowserIdConfig, Config, LoggingConfig, CLIENT_KEY_HEADER};
use transit_server::context::AppContext;
use transit_server::crypto::{encode_base64, generate_keypair, SignedBlob};
use transit_server::handlers::dispatch::DispatchTable;
use transit_server::ident::{
    generate_server_ident, ClientAuthPayload, Poco, SelfIdentPayload, SignupBundle,
};
use transit_server::message::{ClientMessage, ServerMessage};
use transit_server::store::{AccountStore, MemoryAccountStore, NewAccount};

pub struct TestApp {
    pub ws_address: String,
    pub http_address: String,
    pub server_blob: String,
    pub store: Arc<RecordingStore>,
}

/// Account store wrapper that records collaborator calls, so tests can
/// assert that the existence gate ran and that creation happened exactly
/// once (or never).
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryAccountStore,
    exists_calls: AtomicUsize,
    create_calls: AtomicUsize,
    created_keys: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn created_keys(&self) -> Vec<String> {
        self.created_keys.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AccountStore for RecordingStore {
    async fn account_exists(&self, root_key: &str) -> Result<bool> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.account_exists(root_key).await
    }

    async fn create_account(&self, account: NewAccount) -> Result<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.created_keys
            .lock()
            .unwrap()
            .push(account.root_key.clone());
        self.inner.create_account(account).await
    }

    async fn scan_public_listing(&self) -> Result<Vec<String>> {
        self.inner.scan_public_listing().await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

pub fn test_browserid_config() -> BrowserIdConfig {
    BrowserIdConfig {
        root_issuer: "browserid.example".to_string(),
        root_key_pem: None,
        allow_domain_origins: false,
        allowed_origins: Vec::new(),
    }
}

/// Boots a server on ephemeral ports with an in-memory recording store.
pub async fn spawn_app(challenges: &str, browserid: BrowserIdConfig) -> TestApp {
    let server_blob = generate_server_ident("transit").unwrap();

    let config = Arc::new(Config {
        port: 0,
        http_port: 0,
        server_name: "transit".to_string(),
        self_ident_blob: server_blob.clone(),
        challenges: ChallengeCatalog::parse_list(challenges).unwrap(),
        browserid,
        logging: LoggingConfig {
            enable_user_identifiers: false,
            hash_salt: "test-salt".to_string(),
        },
    });

    let dispatch = Arc::new(DispatchTable::protocol());
    dispatch.validate().unwrap();

    let store = Arc::new(RecordingStore::default());

    let ctx = AppContext::new(store.clone(), config, dispatch);

    let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_address = ws_listener.local_addr().unwrap().to_string();
    let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_address = http_listener.local_addr().unwrap().to_string();

    tokio::spawn(transit_server::run_websocket_server(
        ctx.clone(),
        ws_listener,
    ));
    tokio::spawn(async move {
        let _ = transit_server::run_http_server(ctx, http_listener).await;
    });

    TestApp {
        ws_address,
        http_address,
        server_blob,
        store,
    }
}

/// A signup identity under test: a root keypair and one client keypair the
/// root authorizes.
pub struct TestIdentity {
    pub root: SigningKey,
    pub client: SigningKey,
}

impl TestIdentity {
    pub fn new() -> Self {
        let (root, _) = generate_keypair();
        let (client, _) = generate_keypair();
        TestIdentity { root, client }
    }

    pub fn root_key(&self) -> String {
        encode_base64(self.root.verifying_key().as_bytes())
    }

    pub fn client_key(&self) -> String {
        encode_base64(self.client.verifying_key().as_bytes())
    }

    pub fn self_ident_payload(&self, server_blob: &str, emails: Vec<String>) -> SelfIdentPayload {
        SelfIdentPayload {
            root_sign_pub_key: self.root_key(),
            poco: Poco {
                display_name: "Alice".to_string(),
                emails,
            },
            transit_server_ident: server_blob.to_string(),
        }
    }

    pub fn client_auth(&self) -> SignedBlob {
        SignedBlob::seal(
            &ClientAuthPayload {
                authorized_client_key: self.client_key(),
            },
            &self.root,
        )
        .unwrap()
    }

    pub fn signup_bundle(
        &self,
        server_blob: &str,
        emails: Vec<String>,
        because: HashMap<String, serde_json::Value>,
    ) -> SignupBundle {
        let payload = self.self_ident_payload(server_blob, emails);
        SignupBundle {
            self_ident: SignedBlob::seal(&payload, &self.root).unwrap(),
            client_auths: vec![self.client_auth()],
            store_keyring: serde_json::json!({"opaque": true}),
            because,
        }
    }
}

pub struct TestClient {
    pub ws: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

impl TestClient {
    /// Connects presenting `client_key` as the transport-authenticated
    /// client identity.
    pub async fn connect(server_addr: &str, client_key: &str) -> Result<Self> {
        let mut request = format!("ws://{}", server_addr).into_client_request()?;
        request
            .headers_mut()
            .insert(CLIENT_KEY_HEADER, client_key.parse()?);

        let (ws, _) = connect_async(request).await?;
        Ok(Self { ws })
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.ws.send(WsMessage::Text(text)).await?;
        Ok(())
    }

    /// Receives the next protocol message, skipping transport frames.
    pub async fn recv(&mut self) -> Result<Option<ServerMessage>> {
        match self.recv_raw().await? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// Receives the next protocol frame verbatim, for byte-level response
    /// comparisons.
    pub async fn recv_raw(&mut self) -> Result<Option<String>> {
        loop {
            match self.ws.next().await {
                Some(Ok(WsMessage::Text(text))) => return Ok(Some(text)),
                Some(Ok(WsMessage::Close(_))) => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(anyhow::anyhow!(e)),
                None => return Ok(None),
            }
        }
    }
}

/// One full signup round trip on a fresh connection.
pub async fn attempt_signup(
    app: &TestApp,
    ident: &TestIdentity,
    bundle: &SignupBundle,
) -> Result<Option<ServerMessage>> {
    let mut client = TestClient::connect(&app.ws_address, &ident.client_key()).await?;
    client.send(&ClientMessage::Signup(bundle.clone())).await?;
    client.recv().await
}
