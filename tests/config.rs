mod common;

use std::collections::HashMap;
use std::time::Duration;

use chain_checkpoint::ConnectionHandle;
use chain_checkpoint::abi::{AbiSource, ContractAbi};
use chain_checkpoint::config::Config;
use chain_checkpoint::error::{ConfigError, ConnectionError, ValidationError};
use chain_checkpoint::models::{
    Role, format_timestamp, is_known_status, relative_time, validate_address,
};

use common::{CONTRACT, PRIVATE_KEY, RPC_URL, StubChain, test_config};

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| vars.get(name).cloned()
}

fn required() -> Vec<(&'static str, &'static str)> {
    vec![
        ("RPC_URL", RPC_URL),
        ("PRIVATE_KEY", PRIVATE_KEY),
        ("CONTRACT_ADDRESS", CONTRACT),
    ]
}

#[test]
fn defaults_apply_when_optional_vars_are_unset() {
    let config = Config::from_lookup(lookup(&required())).expect("valid config");

    assert_eq!(config.rpc_url, RPC_URL);
    assert_eq!(config.abi_path, None);
    assert_eq!(config.probe_timeout, Duration::from_secs(10));
    assert_eq!(config.confirmation_timeout, Duration::from_secs(120));
    assert_eq!(config.receipt_poll_interval, Duration::from_millis(1000));
    assert_eq!(config.fallback_gas_limit, 300_000);
    assert_eq!(config.gas_price_gwei, None);
    assert_eq!(config.poll_interval, Duration::from_secs(30));
    assert_eq!(config.event_lookback_blocks, 1000);
}

#[test]
fn optional_vars_override_defaults() {
    let mut vars = required();
    vars.extend([
        ("CONTRACT_ABI_PATH", "artifacts/SupplyChainTracker.json"),
        ("CONFIRMATION_TIMEOUT_SECS", "30"),
        ("GAS_PRICE_GWEI", "25"),
        ("POLL_INTERVAL_SECS", "5"),
    ]);
    let config = Config::from_lookup(lookup(&vars)).expect("valid config");

    assert_eq!(
        config.abi_path.as_deref(),
        Some(std::path::Path::new("artifacts/SupplyChainTracker.json"))
    );
    assert_eq!(config.confirmation_timeout, Duration::from_secs(30));
    assert_eq!(config.gas_price_gwei, Some(25));
    assert_eq!(config.poll_interval, Duration::from_secs(5));
}

#[test]
fn each_missing_setting_has_its_own_error() {
    let cases: [(&str, &str, fn(&ConfigError) -> bool); 4] = [
        ("RPC_URL", "", |e| matches!(e, ConfigError::MissingEndpoint)),
        ("PRIVATE_KEY", "your_private_key_here", |e| matches!(e, ConfigError::MissingKey)),
        ("CONTRACT_ADDRESS", "  ", |e| matches!(e, ConfigError::MissingContractAddress)),
        ("CONTRACT_ADDRESS", "your_contract_address", |e| {
            matches!(e, ConfigError::MissingContractAddress)
        }),
    ];

    for (name, value, expected) in cases {
        let vars: Vec<_> = required()
            .into_iter()
            .map(|(k, v)| if k == name { (k, value) } else { (k, v) })
            .collect();
        let err = Config::from_lookup(lookup(&vars)).expect_err("setting is missing");
        assert!(expected(&err), "{} = {:?} gave {:?}", name, value, err);
    }

    let err = Config::from_lookup(lookup(&[])).expect_err("nothing is set");
    assert!(matches!(err, ConfigError::MissingEndpoint));
}

#[test]
fn malformed_optional_values_are_rejected() {
    let mut vars = required();
    vars.push(("POLL_INTERVAL_SECS", "soon"));

    match Config::from_lookup(lookup(&vars)) {
        Err(ConfigError::InvalidValue { name, value }) => {
            assert_eq!(name, "POLL_INTERVAL_SECS");
            assert_eq!(value, "soon");
        }
        other => panic!("expected InvalidValue, got {:?}", other),
    }
}

#[test]
fn debug_output_redacts_the_key() {
    let config = Config::new(RPC_URL, PRIVATE_KEY, CONTRACT);
    let printed = format!("{:?}", config);

    assert!(!printed.contains(&PRIVATE_KEY[2..]));
    assert!(printed.contains("<redacted>"));
}

#[tokio::test]
async fn bad_key_and_address_fail_before_probing() {
    let chain = StubChain::new();

    let mut config = test_config();
    config.private_key = "0x1234".to_string();
    let err = ConnectionHandle::connect_with(&config, ContractAbi::bundled().expect("abi"), chain.clone())
        .await
        .err()
        .expect("invalid key");
    assert!(matches!(err, ConnectionError::Config(ConfigError::InvalidKey)));

    let mut config = test_config();
    config.contract_address = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAeD".to_string();
    let err = ConnectionHandle::connect_with(&config, ContractAbi::bundled().expect("abi"), chain.clone())
        .await
        .err()
        .expect("invalid contract address");
    assert!(matches!(
        err,
        ConnectionError::Config(ConfigError::InvalidContractAddress(ValidationError::BadChecksum(_)))
    ));

    let config = Config::new("", PRIVATE_KEY, CONTRACT);
    let err = ConnectionHandle::connect_with(&config, ContractAbi::bundled().expect("abi"), chain.clone())
        .await
        .err()
        .expect("missing endpoint");
    assert!(matches!(err, ConnectionError::Config(ConfigError::MissingEndpoint)));

    assert_eq!(chain.total_calls(), 0);
}

#[test]
fn addresses_follow_eip55() {
    for valid in [
        "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
        "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
        "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed",
        "0x5AAEB6053F3E94C9B9A09F33669435E7EF1BEAED",
        " 0x5fbdb2315678afecb367f032d93f642f64180aa3 ",
    ] {
        assert!(validate_address(valid).is_ok(), "{} should be valid", valid);
    }

    assert!(matches!(
        validate_address("0xFB6916095ca1df60bB79Ce92cE3Ea74c37c5d359"),
        Err(ValidationError::BadChecksum(_))
    ));
    assert!(matches!(
        validate_address("5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"),
        Err(ValidationError::MalformedAddress(_))
    ));
    assert!(matches!(
        validate_address("0xzzaeb6053f3e94c9b9a09f33669435e7ef1beaed"),
        Err(ValidationError::MalformedAddress(_))
    ));
    assert!(matches!(validate_address(""), Err(ValidationError::Empty("address"))));
}

#[test]
fn timestamps_format_in_utc() {
    assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
    assert_eq!(format_timestamp(1_700_000_000), "2023-11-14 22:13:20 UTC");
    assert_eq!(format_timestamp(u64::MAX), "Invalid timestamp");
}

#[test]
fn relative_times_read_naturally() {
    let now = 1_700_000_000;
    assert_eq!(relative_time(now, now), "just now");
    assert_eq!(relative_time(now - 59, now), "just now");
    assert_eq!(relative_time(now - 60, now), "1 minute ago");
    assert_eq!(relative_time(now - 150, now), "2 minutes ago");
    assert_eq!(relative_time(now - 3_600, now), "1 hour ago");
    assert_eq!(relative_time(now - 3 * 86_400, now), "3 days ago");
}

#[test]
fn roles_and_statuses() {
    assert_eq!(Role::from_code(0), Some(Role::None));
    assert_eq!(Role::from_code(3), Some(Role::Inspector));
    assert_eq!(Role::from_code(4), None);
    assert!(!Role::None.can_submit());
    assert!(Role::Courier.can_submit());
    assert_eq!(Role::Manufacturer.code(), 1);

    assert!(is_known_status("in-transit"));
    assert!(!is_known_status("lost"));
}

#[test]
fn abi_loads_from_artifact_or_array() {
    let bare = include_str!("../abi/SupplyChainTracker.json");
    assert!(ContractAbi::load(&AbiSource::Inline(bare.to_string())).is_ok());

    let artifact = format!(r#"{{"contractName": "SupplyChainTracker", "abi": {}}}"#, bare);
    assert!(ContractAbi::from_json(&artifact).is_ok());

    let missing = r#"[{"type": "function", "name": "admin", "inputs": [], "outputs": [], "stateMutability": "view"}]"#;
    assert!(matches!(
        ContractAbi::from_json(missing),
        Err(ConfigError::InvalidAbi(_))
    ));
    assert!(matches!(
        ContractAbi::load(&AbiSource::File("does/not/exist.json".into())),
        Err(ConfigError::InvalidAbi(_))
    ));
}
