mod test_utils;

use std::collections::HashMap;

use serial_test::serial;
use test_utils::{attempt_signup, spawn_app, test_browserid_config, TestClient, TestIdentity};
use transit_server::message::{ClientMessage, ServerMessage};

#[tokio::test]
#[serial]
async fn listing_is_empty_before_any_signup() {
    let app = spawn_app("none", test_browserid_config()).await;
    let viewer = TestIdentity::new();

    let mut client = TestClient::connect(&app.ws_address, &viewer.client_key())
        .await
        .unwrap();
    client.send(&ClientMessage::ListPeeps).await.unwrap();

    match client.recv().await.unwrap() {
        Some(ServerMessage::Listing { self_ident_blobs }) => {
            assert!(self_ident_blobs.is_empty());
        }
        other => panic!("expected listing, got {:?}", other),
    }

    // Terminal message, then close.
    assert!(client.recv_raw().await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn listing_carries_the_raw_self_ident_blob_after_signup() {
    let app = spawn_app("none", test_browserid_config()).await;
    let ident = TestIdentity::new();
    let bundle = ident.signup_bundle(&app.server_blob, vec![], HashMap::new());

    let response = attempt_signup(&app, &ident, &bundle).await.unwrap();
    assert!(matches!(response, Some(ServerMessage::SignedUp)));

    let viewer = TestIdentity::new();
    let mut client = TestClient::connect(&app.ws_address, &viewer.client_key())
        .await
        .unwrap();
    client.send(&ClientMessage::ListPeeps).await.unwrap();

    match client.recv().await.unwrap() {
        Some(ServerMessage::Listing { self_ident_blobs }) => {
            assert_eq!(
                self_ident_blobs,
                vec![serde_json::to_string(&bundle.self_ident).unwrap()]
            );
        }
        other => panic!("expected listing, got {:?}", other),
    }
}
