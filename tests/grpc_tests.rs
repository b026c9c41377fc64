use indexmap::IndexMap;
use std::time::Duration;
use volley::config::{validate_method, TargetSettings};
use volley::error::CallError;
use volley::grpc::GrpcConnector;
use volley::performance::outcome::{classify, FailureKind};
use volley::performance::Connector;
use volley::utils::{parse_duration, parse_metadata};

fn settings(endpoint: &str) -> TargetSettings {
    TargetSettings {
        endpoint: endpoint.to_string(),
        method: "profile.v1.ProfileIdentityService/UpdateHandle".to_string(),
        tls: false,
        tls_domain: None,
        call_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(2),
        metadata: IndexMap::new(),
    }
}

#[test]
fn test_parse_duration_formats() {
    assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
    assert_eq!(parse_duration("5000ms").unwrap(), Duration::from_millis(5000));
    assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
    assert_eq!(parse_duration("0s").unwrap(), Duration::from_secs(0));
    assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
    assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));

    assert!(parse_duration("invalid").is_err());
    assert!(parse_duration("").is_err());
    assert!(parse_duration("30x").is_err());
}

#[test]
fn test_service_method_format_validation() {
    let valid_calls = [
        "Users/GetUser",
        "Service.Name/Method_Name",
        "profile.v1.ProfileIdentityService/UpdateHandle",
    ];
    for call in valid_calls {
        assert!(validate_method(call).is_ok(), "Expected '{}' to be valid", call);
    }

    let invalid_calls = ["InvalidFormat", "Too/Many/Slashes", "/MissingService/", ""];
    for call in invalid_calls {
        assert!(validate_method(call).is_err(), "Expected '{}' to be invalid", call);
    }
}

#[test]
fn test_metadata_flags() {
    let parsed = parse_metadata(&["X-Region: eu".to_string(), "trace-id:abc".to_string()]).unwrap();
    assert_eq!(parsed.get("x-region"), Some(&"eu".to_string()));
    assert_eq!(parsed.get("trace-id"), Some(&"abc".to_string()));
    assert!(parse_metadata(&["no-separator".to_string()]).is_err());
}

#[tokio::test]
async fn test_refused_connection_is_classified() {
    let connector = GrpcConnector::new(&settings("http://127.0.0.1:1")).unwrap();
    let result = connector.connect().await;

    let err = result.err().expect("nothing listens on port 1");
    assert!(matches!(err, CallError::Connection(_)));
    assert_eq!(classify(&Err(err)).failure_kind(), Some(FailureKind::Connection));
}
