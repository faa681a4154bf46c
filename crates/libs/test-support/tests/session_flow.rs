use serde_json::json;
use std::sync::Arc;
use test_support::{
    eth_permissions, init_logging, pump, settle_pairing, MemoryRelayNetwork, TestPeer,
    ALICE_ACCOUNT,
};
use wc_core::codec;
use wc_core::jsonrpc::reason;
use wc_core::params::{PairingPayloadParams, PayloadRequest, SessionProposal};
use wc_core::{
    JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, MemoryStorage, PairingPermissions,
    ProtocolError, Reason, Session, SessionPermissions, SessionState, SqliteStorage, WcMethod,
};
use wc_engine::EngineEvent;

const BOB_ACCOUNT: &str = "eip155:1:0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed";

struct Settled {
    network: Arc<MemoryRelayNetwork>,
    dapp: TestPeer,
    wallet: TestPeer,
    topic: String,
}

fn receive_proposal(wallet: &TestPeer) -> SessionProposal {
    wallet
        .events()
        .into_iter()
        .find_map(|event| match event {
            EngineEvent::SessionProposal { proposal } => Some(proposal),
            _ => None,
        })
        .expect("wallet saw SessionProposal")
}

fn settle_session(network: &Arc<MemoryRelayNetwork>, dapp: &TestPeer, wallet: &TestPeer) -> String {
    let pairing = settle_pairing(network, dapp, wallet);
    wallet.events();
    dapp.client.session().propose(&pairing.topic, eth_permissions(), None).expect("propose");
    pump(network, &[dapp, wallet]);
    let proposal = receive_proposal(wallet);
    let session = wallet
        .client
        .session()
        .approve(&proposal, vec![ALICE_ACCOUNT.to_string()])
        .expect("approve");
    let report = pump(network, &[dapp, wallet]);
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    dapp.events();
    wallet.events();
    session.topic
}

fn settled() -> Settled {
    init_logging();
    let network = MemoryRelayNetwork::new();
    let dapp = TestPeer::new(&network, "dapp", false);
    let wallet = TestPeer::new(&network, "wallet", false);
    let topic = settle_session(&network, &dapp, &wallet);
    Settled { network, dapp, wallet, topic }
}

/// Publishes a hand-built request from `from`, recording it so the answer
/// resolves like any other.
fn send_raw(network: &MemoryRelayNetwork, from: &TestPeer, topic: &str, request: &JsonRpcRequest) {
    from.client.history().set(topic, request).expect("record");
    inject(network, from, topic, JsonRpcMessage::Request(request.clone()));
}

/// Publishes a message from `from`, sealed when it holds an agreement for
/// the topic.
fn inject(network: &MemoryRelayNetwork, from: &TestPeer, topic: &str, message: JsonRpcMessage) {
    let bytes = message.to_vec().expect("encode");
    let message = match from.client.crypto().get_agreement(topic).expect("agreement") {
        Some(secret) => codec::encrypt(&secret, &bytes).expect("encrypt"),
        None => codec::encode_plaintext(&bytes),
    };
    network.inject(&from.name, topic, &message);
}

/// Id of the last request `peer` published on `topic`.
fn last_request_id(network: &MemoryRelayNetwork, peer: &TestPeer, topic: &str) -> i64 {
    let envelope = network.published_on(topic).pop().expect("published");
    let bytes = match peer.client.crypto().get_agreement(topic).expect("agreement") {
        Some(secret) => codec::decrypt(&secret, &envelope.message).expect("decrypt"),
        None => codec::decode_plaintext(&envelope.message).expect("hex json"),
    };
    match JsonRpcMessage::from_slice(&bytes).expect("json-rpc") {
        JsonRpcMessage::Request(request) => request.id,
        other => panic!("expected request, got {other:?}"),
    }
}

/// Crypto material a peer keeps in storage.
fn crypto_keys(storage: &MemoryStorage) -> Vec<String> {
    storage.keys_with_prefix("wc.crypto.")
}

fn failure_code(peer: &TestPeer) -> i64 {
    match peer.events().as_slice() {
        [EngineEvent::RequestFailed { error, .. }] => error.code,
        other => panic!("{}: expected one RequestFailed, got {other:?}", peer.name),
    }
}

fn session(peer: &TestPeer, topic: &str) -> Session {
    peer.client.session().get_session(topic).expect("session")
}

/// A peer whose storage stays inspectable, paired with a plain dapp.
fn paired_with_storage(
    network: &Arc<MemoryRelayNetwork>,
    name: &str,
) -> (TestPeer, TestPeer, Arc<MemoryStorage>, String) {
    init_logging();
    let storage = Arc::new(MemoryStorage::new());
    let inspected = TestPeer::with_storage(network, name, false, storage.clone());
    let other = TestPeer::new(network, if name == "dapp" { "wallet" } else { "dapp" }, false);
    let pairing = if name == "dapp" {
        settle_pairing(network, &inspected, &other)
    } else {
        settle_pairing(network, &other, &inspected)
    };
    inspected.events();
    other.events();
    (inspected, other, storage, pairing.topic)
}

/// Checks that a failed negotiation left only the pairing it travelled over.
fn assert_only_pairing_remains(
    peer: &TestPeer,
    storage: &MemoryStorage,
    keys: &[String],
    pairing_topic: &str,
) {
    assert!(peer.client.session().get_sessions().expect("sessions").is_empty());
    assert_eq!(crypto_keys(storage), keys, "{} kept session key material", peer.name);
    assert_eq!(peer.client.subscriber().get_topics(), vec![pairing_topic.to_string()]);
    assert!(peer.client.history().get_pending().expect("pending").is_empty());
}

#[test]
fn proposal_approval_settles_both_sides_on_one_topic() {
    init_logging();
    let network = MemoryRelayNetwork::new();
    let dapp = TestPeer::new(&network, "dapp", false);
    let wallet = TestPeer::new(&network, "wallet", false);
    let pairing = settle_pairing(&network, &dapp, &wallet);
    wallet.events();

    let proposal =
        dapp.client.session().propose(&pairing.topic, eth_permissions(), None).expect("propose");
    assert_eq!(session(&dapp, &proposal.topic).state, SessionState::Proposed);
    assert!(network.is_subscribed("dapp", &proposal.topic));
    pump(&network, &[&dapp, &wallet]);
    let received = receive_proposal(&wallet);
    assert_eq!(received, proposal);

    let pre_settled = wallet
        .client
        .session()
        .approve(&received, vec![ALICE_ACCOUNT.to_string()])
        .expect("approve");
    assert_eq!(pre_settled.state, SessionState::PreSettled);
    let report = pump(&network, &[&dapp, &wallet]);
    assert!(report.errors.is_empty(), "{:?}", report.errors);

    let dapp_session = session(&dapp, &pre_settled.topic);
    let wallet_session = session(&wallet, &pre_settled.topic);
    assert_eq!(dapp_session.state, SessionState::Settled);
    assert_eq!(wallet_session.state, SessionState::Settled);
    assert_eq!(dapp_session.accounts, vec![ALICE_ACCOUNT.to_string()]);
    assert_eq!(dapp_session.expiry, wallet_session.expiry);
    assert_eq!(dapp_session.pairing_topic, pairing.topic);
    assert!(wallet_session.is_controller);
    assert!(!dapp_session.is_controller);

    for peer in [&dapp, &wallet] {
        assert!(peer.client.session().get_session(&proposal.topic).is_err());
        assert!(!network.is_subscribed(&peer.name, &proposal.topic));
        assert!(network.is_subscribed(&peer.name, &pre_settled.topic));
    }
    assert!(matches!(
        dapp.events().as_slice(),
        [EngineEvent::SessionApproved { session }] if session.topic == pre_settled.topic
    ));
    assert!(matches!(
        wallet.events().as_slice(),
        [EngineEvent::SessionSettled { session }] if session.topic == pre_settled.topic
    ));
}

#[test]
fn proposals_require_a_settled_pairing() {
    let network = MemoryRelayNetwork::new();
    let dapp = TestPeer::new(&network, "dapp", false);
    let uri = dapp.client.pairing().propose(PairingPermissions::default()).expect("propose");
    let err = dapp
        .client
        .session()
        .propose(&uri.topic, eth_permissions(), None)
        .expect_err("pairing not settled");
    assert_eq!(err.protocol(), Some(&ProtocolError::PairingNotSettled(uri.topic.clone())));
    assert!(network.published().is_empty());
}

#[test]
fn refused_proposal_is_discarded_by_the_proposer() {
    let network = MemoryRelayNetwork::new();
    let dapp = TestPeer::new(&network, "dapp", false);
    let wallet = TestPeer::new(&network, "wallet", false);
    let pairing = settle_pairing(&network, &dapp, &wallet);
    wallet.client.pairings().delete(&pairing.topic).expect("forget pairing");

    let proposal =
        dapp.client.session().propose(&pairing.topic, eth_permissions(), None).expect("propose");
    pump(&network, &[&dapp, &wallet]);
    assert_eq!(failure_code(&dapp), reason::NO_MATCHING_TOPIC);
    assert!(dapp.client.session().get_session(&proposal.topic).is_err());
    assert!(!network.is_subscribed("dapp", &proposal.topic));
}

#[test]
fn rejected_proposal_is_cleaned_up() {
    let network = MemoryRelayNetwork::new();
    let dapp = TestPeer::new(&network, "dapp", false);
    let wallet = TestPeer::new(&network, "wallet", false);
    let pairing = settle_pairing(&network, &dapp, &wallet);
    wallet.events();
    let proposal =
        dapp.client.session().propose(&pairing.topic, eth_permissions(), None).expect("propose");
    pump(&network, &[&dapp, &wallet]);
    dapp.events();

    let reason = Reason::new(reason::USER_REJECTED, "not now");
    wallet.client.session().reject(&receive_proposal(&wallet), reason.clone()).expect("reject");
    pump(&network, &[&dapp, &wallet]);

    assert!(dapp.client.session().get_sessions().expect("sessions").is_empty());
    assert!(!network.is_subscribed("dapp", &proposal.topic));
    assert!(matches!(
        dapp.events().as_slice(),
        [EngineEvent::SessionRejected { topic, reason: received }]
            if topic == &proposal.topic && received == &reason
    ));
}

#[test]
fn controller_updates_and_upgrades_reach_the_peer() {
    let Settled { network, dapp, wallet, topic } = settled();

    let accounts = vec![ALICE_ACCOUNT.to_string(), BOB_ACCOUNT.to_string()];
    wallet.client.session().update(&topic, accounts.clone()).expect("update");
    assert_eq!(session(&wallet, &topic).accounts, vec![ALICE_ACCOUNT.to_string()]);
    pump(&network, &[&dapp, &wallet]);
    for peer in [&dapp, &wallet] {
        assert_eq!(session(peer, &topic).accounts, accounts);
        assert!(matches!(
            peer.events().as_slice(),
            [EngineEvent::SessionUpdated { accounts: received, .. }] if received == &accounts
        ));
    }

    let extra = SessionPermissions {
        chains: vec!["eip155:137".to_string()],
        methods: vec!["eth_signTypedData".to_string()],
        notifications: Vec::new(),
    };
    let expected = eth_permissions().merged(&extra);
    wallet.client.session().upgrade(&topic, extra).expect("upgrade");
    assert_eq!(session(&wallet, &topic).permissions, eth_permissions());
    pump(&network, &[&dapp, &wallet]);
    for peer in [&dapp, &wallet] {
        let permissions = session(peer, &topic).permissions;
        assert!(permissions.allows_chain("eip155:1"));
        assert!(permissions.allows_chain("eip155:137"));
        assert_eq!(permissions, expected);
        assert!(matches!(
            peer.events().as_slice(),
            [EngineEvent::SessionUpgraded { permissions, .. }] if permissions == &expected
        ));
    }
}

#[test]
fn refused_changes_leave_both_sides_unchanged() {
    let Settled { network, dapp, wallet, topic } = settled();

    wallet.client.session().update(&topic, vec![BOB_ACCOUNT.to_string()]).expect("update");
    let id = last_request_id(&network, &wallet, &topic);
    network.next_deliveries();
    let refusal = JsonRpcResponse::failure(id, reason::UNAUTHORIZED_UPDATE, "not allowed");
    inject(&network, &dapp, &topic, JsonRpcMessage::Response(refusal));
    let report = pump(&network, &[&wallet]);
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(failure_code(&wallet), reason::UNAUTHORIZED_UPDATE);
    for peer in [&dapp, &wallet] {
        assert_eq!(session(peer, &topic).accounts, vec![ALICE_ACCOUNT.to_string()]);
    }

    let extra = SessionPermissions {
        chains: vec!["eip155:10".to_string()],
        methods: Vec::new(),
        notifications: Vec::new(),
    };
    wallet.client.session().upgrade(&topic, extra).expect("upgrade");
    let id = last_request_id(&network, &wallet, &topic);
    network.next_deliveries();
    let refusal = JsonRpcResponse::failure(id, reason::INVALID_SESSION_UPGRADE, "bad upgrade");
    inject(&network, &dapp, &topic, JsonRpcMessage::Response(refusal));
    pump(&network, &[&wallet]);
    assert_eq!(failure_code(&wallet), reason::INVALID_SESSION_UPGRADE);
    for peer in [&dapp, &wallet] {
        assert_eq!(session(peer, &topic).permissions, eth_permissions());
    }
}

#[test]
fn invalid_upgrade_is_rejected_before_publishing() {
    let Settled { network, wallet, topic, .. } = settled();
    let published = network.published().len();

    let bad = SessionPermissions {
        chains: vec![String::new()],
        methods: Vec::new(),
        notifications: Vec::new(),
    };
    let err = wallet.client.session().upgrade(&topic, bad).expect_err("empty chain id");
    assert!(matches!(err.protocol(), Some(ProtocolError::InvalidPermissions(_))));
    assert_eq!(network.published().len(), published);
    assert_eq!(session(&wallet, &topic).permissions, eth_permissions());
}

#[test]
fn only_the_controller_may_change_the_session() {
    let Settled { network, dapp, topic, .. } = settled();
    let published = network.published().len();

    let err = dapp
        .client
        .session()
        .update(&topic, vec![ALICE_ACCOUNT.to_string()])
        .expect_err("not controller");
    assert_eq!(err.protocol(), Some(&ProtocolError::NotController(topic.clone())));
    let err = dapp.client.session().upgrade(&topic, eth_permissions()).expect_err("upgrade");
    assert_eq!(err.protocol(), Some(&ProtocolError::NotController(topic.clone())));
    let err = dapp
        .client
        .session()
        .update("0000", vec![ALICE_ACCOUNT.to_string()])
        .expect_err("unknown");
    assert_eq!(err.protocol(), Some(&ProtocolError::NoSequenceForTopic("0000".to_string())));
    assert_eq!(network.published().len(), published);
}

#[test]
fn invalid_accounts_are_rejected_locally() {
    let Settled { wallet, topic, .. } = settled();
    let err = wallet
        .client
        .session()
        .update(&topic, vec!["eip155:1".to_string()])
        .expect_err("chain id is not an account");
    assert_eq!(err.protocol(), Some(&ProtocolError::InvalidAccount("eip155:1".to_string())));
}

#[test]
fn inbound_update_from_non_controller_is_unauthorized() {
    let Settled { network, dapp, wallet, topic } = settled();
    let request = JsonRpcRequest::new(
        WcMethod::SessionUpdate,
        &json!({ "state": { "accounts": [BOB_ACCOUNT] } }),
    )
    .expect("request");
    send_raw(&network, &dapp, &topic, &request);
    pump(&network, &[&dapp, &wallet]);
    assert_eq!(failure_code(&dapp), reason::UNAUTHORIZED_UPDATE);
    assert_eq!(session(&wallet, &topic).accounts, vec![ALICE_ACCOUNT.to_string()]);

    let request = JsonRpcRequest::new(
        WcMethod::SessionUpgrade,
        &json!({ "permissions": { "chains": ["eip155:10"], "methods": [] } }),
    )
    .expect("request");
    send_raw(&network, &dapp, &topic, &request);
    pump(&network, &[&dapp, &wallet]);
    assert_eq!(failure_code(&dapp), reason::UNAUTHORIZED_UPGRADE);
}

#[test]
fn inbound_update_on_unknown_topic_reports_no_matching_topic() {
    let Settled { network, dapp, wallet, topic } = settled();
    dapp.client.sessions().delete(&topic).expect("forget session");

    wallet.client.session().update(&topic, vec![BOB_ACCOUNT.to_string()]).expect("update");
    pump(&network, &[&dapp, &wallet]);
    assert_eq!(failure_code(&wallet), reason::NO_MATCHING_TOPIC);
    assert_eq!(session(&wallet, &topic).accounts, vec![ALICE_ACCOUNT.to_string()]);
}

#[test]
fn malformed_inbound_changes_are_rejected() {
    let Settled { network, dapp, wallet, topic } = settled();

    let request = JsonRpcRequest::new(
        WcMethod::SessionUpdate,
        &json!({ "state": { "accounts": ["not-an-account"] } }),
    )
    .expect("request");
    send_raw(&network, &wallet, &topic, &request);
    pump(&network, &[&dapp, &wallet]);
    assert_eq!(failure_code(&wallet), reason::INVALID_SESSION_UPDATE);
    assert_eq!(session(&dapp, &topic).accounts, vec![ALICE_ACCOUNT.to_string()]);

    let request = JsonRpcRequest::new(
        WcMethod::SessionUpgrade,
        &json!({ "permissions": { "chains": [""], "methods": [] } }),
    )
    .expect("request");
    send_raw(&network, &wallet, &topic, &request);
    pump(&network, &[&dapp, &wallet]);
    assert_eq!(failure_code(&wallet), reason::INVALID_SESSION_UPGRADE);
    assert_eq!(session(&dapp, &topic).permissions, eth_permissions());
}

#[test]
fn payload_requests_round_trip_with_a_prompt() {
    let Settled { network, dapp, wallet, topic } = settled();

    let id = dapp
        .client
        .session()
        .request(
            &topic,
            "personal_sign",
            json!(["0xdeadbeef", ALICE_ACCOUNT]),
            Some("eip155:1".to_string()),
        )
        .expect("request");
    assert!(network.published_on(&topic).last().expect("published").prompt);
    pump(&network, &[&dapp, &wallet]);

    let (request_id, method, chain_id) = match wallet.events().as_slice() {
        [EngineEvent::SessionPayload { request_id, method, chain_id, .. }] => {
            (*request_id, method.clone(), chain_id.clone())
        }
        other => panic!("expected payload, got {other:?}"),
    };
    assert_eq!(request_id, id);
    assert_eq!(method, "personal_sign");
    assert_eq!(chain_id.as_deref(), Some("eip155:1"));

    wallet
        .client
        .session()
        .respond(&topic, &JsonRpcResponse::success(request_id, json!("0xsignature")))
        .expect("respond");
    pump(&network, &[&dapp, &wallet]);
    match dapp.events().as_slice() {
        [EngineEvent::SessionPayloadResponse { response, .. }] => {
            assert_eq!(response.id, id);
            assert_eq!(response.result, Some(json!("0xsignature")));
        }
        other => panic!("expected payload response, got {other:?}"),
    }
}

#[test]
fn payload_permissions_are_enforced_on_both_ends() {
    let Settled { network, dapp, wallet, topic } = settled();

    let err = dapp
        .client
        .session()
        .request(&topic, "eth_signTypedData", json!([]), None)
        .expect_err("method");
    assert_eq!(
        err.protocol(),
        Some(&ProtocolError::UnauthorizedMethod("eth_signTypedData".to_string()))
    );
    let err = dapp
        .client
        .session()
        .request(&topic, "personal_sign", json!([]), Some("eip155:137".to_string()))
        .expect_err("chain");
    assert!(matches!(err.protocol(), Some(ProtocolError::InvalidPermissions(_))));

    let request = JsonRpcRequest::new(
        WcMethod::SessionPayload,
        &json!({ "request": { "method": "eth_signTypedData", "params": [] } }),
    )
    .expect("request");
    send_raw(&network, &dapp, &topic, &request);
    pump(&network, &[&dapp, &wallet]);
    match dapp.events().as_slice() {
        [EngineEvent::SessionPayloadResponse { response, .. }] => {
            assert_eq!(response.id, request.id);
            let error = response.error.as_ref().expect("refusal");
            assert_eq!(error.code, reason::UNAUTHORIZED_METHOD);
        }
        other => panic!("expected payload response, got {other:?}"),
    }
    assert!(wallet.events().is_empty());
}

#[test]
fn notifications_follow_the_permitted_types() {
    let Settled { network, dapp, wallet, topic } = settled();

    wallet
        .client
        .session()
        .notify(&topic, "accountsChanged", json!([BOB_ACCOUNT]))
        .expect("notify");
    pump(&network, &[&dapp, &wallet]);
    assert!(matches!(
        dapp.events().as_slice(),
        [EngineEvent::SessionNotification { kind, .. }] if kind == "accountsChanged"
    ));

    let err = wallet
        .client
        .session()
        .notify(&topic, "chainChanged", json!("eip155:137"))
        .expect_err("not permitted");
    assert_eq!(
        err.protocol(),
        Some(&ProtocolError::UnauthorizedNotification("chainChanged".to_string()))
    );

    let request = JsonRpcRequest::new(
        WcMethod::SessionNotification,
        &json!({ "type": "chainChanged", "data": null }),
    )
    .expect("request");
    send_raw(&network, &wallet, &topic, &request);
    pump(&network, &[&dapp, &wallet]);
    assert_eq!(failure_code(&wallet), reason::UNAUTHORIZED_NOTIFICATION);
}

#[test]
fn ping_and_delete_settled_session() {
    let Settled { network, dapp, wallet, topic } = settled();

    dapp.client.session().ping(&topic).expect("ping");
    pump(&network, &[&dapp, &wallet]);
    assert!(matches!(dapp.events().as_slice(), [EngineEvent::Pong { kind: "session", .. }]));

    let reason = Reason::new(reason::USER_DISCONNECTED, "bye");
    dapp.client.session().delete(&topic, reason.clone()).expect("delete");
    pump(&network, &[&dapp, &wallet]);
    for peer in [&dapp, &wallet] {
        assert!(peer.client.session().get_sessions().expect("sessions").is_empty());
        assert!(!network.is_subscribed(&peer.name, &topic));
    }
    assert!(matches!(
        wallet.events().as_slice(),
        [EngineEvent::SessionDeleted { reason: received, .. }] if received == &reason
    ));
    assert_eq!(dapp.client.pairing().get_settled_pairings().expect("pairings").len(), 1);
}

#[test]
fn pre_settled_session_refuses_application_traffic() {
    let network = MemoryRelayNetwork::new();
    let dapp = TestPeer::new(&network, "dapp", false);
    let wallet = TestPeer::new(&network, "wallet", false);
    let pairing = settle_pairing(&network, &dapp, &wallet);
    wallet.events();
    dapp.client.session().propose(&pairing.topic, eth_permissions(), None).expect("propose");
    pump(&network, &[&dapp, &wallet]);
    let pre_settled = wallet
        .client
        .session()
        .approve(&receive_proposal(&wallet), vec![ALICE_ACCOUNT.to_string()])
        .expect("approve");
    let topic = pre_settled.topic;
    let not_settled = ProtocolError::SessionNotSettled(topic.clone());

    let session = wallet.client.session();
    let err = session.update(&topic, vec![BOB_ACCOUNT.to_string()]).expect_err("update");
    assert_eq!(err.protocol(), Some(&not_settled));
    let err = session.request(&topic, "personal_sign", json!([]), None).expect_err("payload");
    assert_eq!(err.protocol(), Some(&not_settled));
    let err = session.notify(&topic, "accountsChanged", json!([])).expect_err("notify");
    assert_eq!(err.protocol(), Some(&not_settled));
    let err = session.ping(&topic).expect_err("ping");
    assert_eq!(err.protocol(), Some(&not_settled));

    session.delete(&topic, Reason::new(reason::USER_DISCONNECTED, "abort")).expect("delete");
    assert!(session.get_session(&topic).is_err());
}

#[test]
fn sessions_survive_a_restart_on_sqlite() {
    init_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("wallet.sqlite");
    let network = MemoryRelayNetwork::new();
    let dapp = TestPeer::new(&network, "dapp", false);
    let storage = Arc::new(SqliteStorage::open(&path).expect("open"));
    let wallet = TestPeer::with_storage(&network, "wallet", false, storage);
    let topic = settle_session(&network, &dapp, &wallet);
    drop(wallet);

    let reopened = Arc::new(SqliteStorage::open(&path).expect("reopen"));
    let wallet = TestPeer::with_storage(&network, "wallet", false, reopened);
    assert_eq!(wallet.client.restore().expect("restore"), 2);
    assert!(wallet.client.subscriber().is_subscribed(&topic));
    assert_eq!(session(&wallet, &topic).state, SessionState::Settled);

    dapp.client.session().ping(&topic).expect("ping");
    let report = pump(&network, &[&dapp, &wallet]);
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert!(matches!(dapp.events().as_slice(), [EngineEvent::Pong { kind: "session", .. }]));
}

#[test]
fn settled_sessions_expire_exactly_once() {
    let Settled { network, dapp, topic, .. } = settled();
    let expiry = session(&dapp, &topic).expiry;
    dapp.clock.set(expiry);

    assert!(dapp.client.session().get_session(&topic).is_err());
    assert_eq!(dapp.client.sweep_expired().expect("sweep"), 0);
    let expired = dapp
        .events()
        .into_iter()
        .filter(|event| matches!(event, EngineEvent::SequenceExpired { kind: "session", .. }))
        .count();
    assert_eq!(expired, 1);
    assert!(!network.is_subscribed("dapp", &topic));
}

#[test]
fn approval_with_an_unusable_ttl_has_no_effect() {
    let network = MemoryRelayNetwork::new();
    let (wallet, dapp, storage, pairing_topic) = paired_with_storage(&network, "wallet");
    dapp.client.session().propose(&pairing_topic, eth_permissions(), None).expect("propose");
    pump(&network, &[&dapp, &wallet]);
    let mut proposal = receive_proposal(&wallet);
    let keys = crypto_keys(&storage);
    let published = network.published().len();

    for ttl in [0, u64::MAX] {
        proposal.ttl = ttl;
        let err = wallet
            .client
            .session()
            .approve(&proposal, vec![ALICE_ACCOUNT.to_string()])
            .expect_err("ttl out of range");
        assert_eq!(err.protocol(), Some(&ProtocolError::InvalidTtl(ttl)));
    }
    assert_only_pairing_remains(&wallet, &storage, &keys, &pairing_topic);
    assert_eq!(network.published().len(), published);
}

#[test]
fn proposals_with_an_unusable_ttl_are_refused() {
    init_logging();
    let network = MemoryRelayNetwork::new();
    let dapp = TestPeer::new(&network, "dapp", false);
    let wallet = TestPeer::new(&network, "wallet", false);
    let pairing = settle_pairing(&network, &dapp, &wallet);
    wallet.events();

    let mut proposal =
        dapp.client.session().propose(&pairing.topic, eth_permissions(), None).expect("propose");
    network.next_deliveries();
    proposal.ttl = u64::MAX;
    let inner = JsonRpcRequest::new(WcMethod::SessionPropose, &proposal).expect("inner");
    let payload = PairingPayloadParams {
        request: PayloadRequest { method: inner.method, params: inner.params },
    };
    let request = JsonRpcRequest::new(WcMethod::PairingPayload, &payload).expect("request");
    send_raw(&network, &dapp, &pairing.topic, &request);
    pump(&network, &[&dapp, &wallet]);

    assert_eq!(failure_code(&dapp), reason::INVALID_SESSION_PROPOSE);
    assert!(wallet.events().is_empty());
    assert!(dapp.client.session().get_session(&proposal.topic).is_err());
    assert!(!network.is_subscribed("dapp", &proposal.topic));
}

#[test]
fn refused_session_approval_rolls_back_the_responder() {
    let network = MemoryRelayNetwork::new();
    let (wallet, dapp, storage, pairing_topic) = paired_with_storage(&network, "wallet");
    dapp.client.session().propose(&pairing_topic, eth_permissions(), None).expect("propose");
    pump(&network, &[&dapp, &wallet]);
    let proposal = receive_proposal(&wallet);
    let keys = crypto_keys(&storage);
    assert!(!keys.is_empty());

    let pre_settled = wallet
        .client
        .session()
        .approve(&proposal, vec![ALICE_ACCOUNT.to_string()])
        .expect("approve");
    let id = last_request_id(&network, &wallet, &proposal.topic);
    network.next_deliveries();
    let refusal = JsonRpcResponse::failure(id, reason::USER_REJECTED, "user rejected");
    inject(&network, &dapp, &proposal.topic, JsonRpcMessage::Response(refusal));
    let report = pump(&network, &[&wallet]);
    assert_eq!(report.delivered, 1);
    assert!(report.errors.is_empty(), "{:?}", report.errors);

    assert_only_pairing_remains(&wallet, &storage, &keys, &pairing_topic);
    assert!(!network.is_subscribed("wallet", &proposal.topic));
    assert!(!network.is_subscribed("wallet", &pre_settled.topic));
    assert!(matches!(
        wallet.events().as_slice(),
        [EngineEvent::SessionApprovalFailed { topic, reason }]
            if topic == &proposal.topic && reason == "user rejected"
    ));
}

#[test]
fn failed_proposal_publish_leaves_nothing_behind() {
    let network = MemoryRelayNetwork::new();
    let (dapp, wallet, storage, pairing_topic) = paired_with_storage(&network, "dapp");
    let keys = crypto_keys(&storage);

    network.fail_publishes(true);
    let err = dapp
        .client
        .session()
        .propose(&pairing_topic, eth_permissions(), None)
        .expect_err("relay down");
    assert!(err.is_transport());
    assert_only_pairing_remains(&dapp, &storage, &keys, &pairing_topic);

    network.fail_publishes(false);
    dapp.client.session().propose(&pairing_topic, eth_permissions(), None).expect("retry");
    pump(&network, &[&dapp, &wallet]);
    receive_proposal(&wallet);
}

#[test]
fn failed_approval_publish_leaves_nothing_behind() {
    let network = MemoryRelayNetwork::new();
    let (wallet, dapp, storage, pairing_topic) = paired_with_storage(&network, "wallet");
    dapp.client.session().propose(&pairing_topic, eth_permissions(), None).expect("propose");
    pump(&network, &[&dapp, &wallet]);
    let proposal = receive_proposal(&wallet);
    let keys = crypto_keys(&storage);

    network.fail_publishes(true);
    let err = wallet
        .client
        .session()
        .approve(&proposal, vec![ALICE_ACCOUNT.to_string()])
        .expect_err("relay down");
    assert!(err.is_transport());
    assert_only_pairing_remains(&wallet, &storage, &keys, &pairing_topic);
    assert!(!network.is_subscribed("wallet", &proposal.topic));

    network.fail_publishes(false);
    let pre_settled = wallet
        .client
        .session()
        .approve(&proposal, vec![ALICE_ACCOUNT.to_string()])
        .expect("retry");
    pump(&network, &[&dapp, &wallet]);
    assert_eq!(session(&dapp, &pre_settled.topic).state, SessionState::Settled);
}
