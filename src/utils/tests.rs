use serial_test::serial;
use tracing_subscriber::filter::LevelFilter;

use super::error::Error;
use super::logging;

#[test]
#[serial]
fn logging_init_accepts_levels() {
    temp_env::with_var_unset("RUST_LOG", || {
        logging::init("info");
        logging::init("debug");
        logging::init("bogus");
    });
}

#[test]
fn log_level_names_are_normalized() {
    assert_eq!(logging::directive("WARNING"), "warn");
    assert_eq!(logging::directive(" debug "), "debug");
    assert_eq!(logging::directive("off"), "off");
    assert_eq!(logging::directive("bogus"), "info");
}

#[test]
#[serial]
fn configured_level_applies_without_rust_log() {
    temp_env::with_var_unset("RUST_LOG", || {
        assert_eq!(logging::filter("debug").max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(logging::filter("bogus").max_level_hint(), Some(LevelFilter::INFO));
    });
}

#[test]
#[serial]
fn rust_log_overrides_configured_level() {
    temp_env::with_var("RUST_LOG", Some("error"), || {
        assert_eq!(logging::filter("trace").max_level_hint(), Some(LevelFilter::ERROR));
    });
}

#[test]
fn root_cause_looks_through_publish_failed() {
    let err = Error::publish_failed(Error::MalformedSubtopic);
    assert!(matches!(err.root_cause(), Error::MalformedSubtopic));
    assert_eq!(err.to_string(), "failed to publish: malformed subtopic");
}

#[test]
fn parse_and_access_failures_are_recoverable() {
    assert!(Error::publish_failed(Error::MalformedTopic).is_recoverable());
    assert!(Error::Unauthorized.is_recoverable());
    assert!(!Error::GatewayUnavailable("timeout".into()).is_recoverable());
    assert!(!Error::publish_failed(Error::Bus("closed".into())).is_recoverable());
    assert!(!Error::MissingCredential.is_recoverable());
}
