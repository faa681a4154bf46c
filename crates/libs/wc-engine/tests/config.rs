use std::io::Write;
use wc_engine::{EngineConfig, TtlConfig};

#[test]
fn empty_document_yields_defaults() {
    let config = EngineConfig::from_toml("").expect("parse");
    assert_eq!(config, EngineConfig::default());
    assert_eq!(config.relay.protocol, "waku");
    assert_eq!(config.pairing_ttl, TtlConfig::PAIRING);
    assert_eq!(config.session_ttl, TtlConfig::SESSION);
}

#[test]
fn full_document_round_trips_into_config() {
    let config = EngineConfig::from_toml(
        r#"
controller = true
sweep_interval_secs = 5
request_timeout_ms = 2500
storage_path = "/var/lib/wc/state.sqlite"

[relay]
protocol = "  waku  "

[metadata]
name = "Wallet"
url = "https://wallet.example"
icons = ["https://wallet.example/icon.png"]

[pairing_ttl]
proposed = 60
pending = 120
settled = 3600

[session_ttl]
proposed = 30
pending = 60
settled = 600
"#,
    )
    .expect("parse");

    assert!(config.controller);
    assert_eq!(config.relay.protocol, "waku");
    assert_eq!(config.metadata.as_ref().map(|m| m.name.as_str()), Some("Wallet"));
    assert_eq!(config.pairing_ttl, TtlConfig { proposed: 60, pending: 120, settled: 3600 });
    assert_eq!(config.session_ttl.settled, 600);
    assert_eq!(config.sweep_interval_secs, 5);
    assert_eq!(config.request_timeout_ms, 2500);
    assert_eq!(
        config.storage_path.as_deref(),
        Some(std::path::Path::new("/var/lib/wc/state.sqlite"))
    );
}

#[test]
fn invalid_values_are_rejected() {
    for (document, needle) in [
        ("[relay]\nprotocol = \"   \"", "relay.protocol"),
        ("sweep_interval_secs = 0", "sweep_interval_secs"),
        ("request_timeout_ms = 0", "request_timeout_ms"),
        ("[pairing_ttl]\nproposed = 0\npending = 1\nsettled = 2", "pairing_ttl"),
        ("[session_ttl]\nproposed = 10\npending = 1\nsettled = 5", "settled ttl"),
        ("[metadata]\nname = \"\"", "metadata.name"),
    ] {
        let err = EngineConfig::from_toml(document).expect_err(document);
        assert!(err.to_string().contains(needle), "{document}: {err}");
    }
}

#[test]
fn unknown_keys_are_rejected() {
    let err = EngineConfig::from_toml("relay_url = \"wss://relay\"").expect_err("unknown key");
    assert!(err.to_string().contains("relay_url"), "{err}");
}

#[test]
fn from_path_reads_file_and_reports_invalid_data() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("engine.toml");
    let mut file = std::fs::File::create(&path).expect("create");
    writeln!(file, "controller = true").expect("write");
    drop(file);
    assert!(EngineConfig::from_path(&path).expect("load").controller);

    std::fs::write(&path, "controller = \"yes\"").expect("rewrite");
    let err = EngineConfig::from_path(&path).expect_err("bad type");
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

    let missing = EngineConfig::from_path(dir.path().join("absent.toml")).expect_err("missing");
    assert_eq!(missing.kind(), std::io::ErrorKind::NotFound);
}

#[test]
fn sqlite_storage_is_opened_when_path_is_set() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = EngineConfig {
        storage_path: Some(dir.path().join("state.sqlite")),
        ..EngineConfig::default()
    };
    let storage = config.open_storage().expect("open");
    storage.set("marker", b"1").expect("set");
    drop(storage);

    let reopened = config.open_storage().expect("reopen");
    assert_eq!(reopened.get("marker").expect("get"), Some(b"1".to_vec()));
}
