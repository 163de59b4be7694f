use super::*;
use crate::event::ErrorCode;

#[test]
fn error_codes_are_stable_and_grepable() {
    assert_eq!(GenError::ConfigParse("x".into()).error_code(), "E_CONFIG_PARSE");
    assert_eq!(GenError::MissingApiKey { var: "K".into() }.error_code(), "E_MISSING_API_KEY");
    assert_eq!(GenError::ApiRequest("x".into()).error_code(), "E_API_REQUEST");
    assert_eq!(
        GenError::ApiResponse { status: 500, body: String::new() }.error_code(),
        "E_API_RESPONSE"
    );
    assert_eq!(GenError::ApiParse("x".into()).error_code(), "E_API_PARSE");
}

#[test]
fn transport_and_server_errors_are_retryable() {
    assert!(GenError::ApiRequest("timeout".into()).retryable());
    assert!(GenError::ApiResponse { status: 429, body: String::new() }.retryable());
    assert!(GenError::ApiResponse { status: 503, body: String::new() }.retryable());
}

#[test]
fn client_errors_are_not_retryable() {
    assert!(!GenError::ApiResponse { status: 400, body: String::new() }.retryable());
    assert!(!GenError::ApiResponse { status: 401, body: String::new() }.retryable());
    assert!(!GenError::MissingApiKey { var: "K".into() }.retryable());
    assert!(!GenError::ApiParse("bad json".into()).retryable());
}

#[test]
fn display_includes_the_status() {
    let err = GenError::ApiResponse { status: 429, body: "slow down".into() };
    assert_eq!(err.to_string(), "API response error: status 429");
}
