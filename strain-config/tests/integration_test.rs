//! Integration tests for strain-config

use std::io::Write;
use std::time::Duration;
use strain_config::*;
use temp_env::with_vars;

#[test]
fn test_default_config_validation() {
    let config = HarnessConfig::default();
    assert!(config.validate_all().is_ok());
    assert_eq!(config.resilience.circuit_breaker.failure_rate_threshold, 0.25);
    assert_eq!(config.load.rps_tolerance, 0.30);
}

#[test]
fn test_config_loader_from_env() {
    let vars = vec![
        ("STRAIN_LOG_LEVEL", Some("debug")),
        ("STRAIN_RPS_TOLERANCE", Some("0.2")),
        ("STRAIN_CB_MIN_SAMPLES", Some("50")),
        ("STRAIN_RETRY_WRITES", Some("true")),
        ("STRAIN_SEED", Some("7")),
        ("STRAIN_CALL_TIMEOUT_MS", Some("250")),
    ];

    with_vars(vars, || {
        let loader = ConfigLoader::new();
        let config = loader.from_env().unwrap();

        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.load.rps_tolerance, 0.2);
        assert_eq!(config.resilience.circuit_breaker.min_samples, 50);
        assert!(config.resilience.retry_writes);
        assert_eq!(config.injection.default_seed, 7);
        assert_eq!(config.resilience.call_timeout, Duration::from_millis(250));
    });
}

#[test]
fn test_invalid_env_value_is_reported() {
    with_vars(vec![("STRAIN_CB_MIN_SAMPLES", Some("many"))], || {
        let err = ConfigLoader::new().from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Override { .. }));
        assert!(err.to_string().contains("STRAIN_CB_MIN_SAMPLES"));
    });
}

#[test]
fn test_env_override_still_validated() {
    with_vars(vec![("STRAIN_RPS_TOLERANCE", Some("1.5"))], || {
        let err = ConfigLoader::new().from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { section: "load", .. }));
    });
}

#[test]
fn test_custom_prefix() {
    with_vars(vec![("STRESS_LOG_FORMAT", Some("json"))], || {
        let config = ConfigLoader::with_prefix("STRESS").from_env().unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
    });
}

#[test]
fn test_yaml_file_loading() {
    let yaml = r#"
load:
  window_seconds: 0.5
  rps_tolerance: 0.25

resilience:
  circuit_breaker:
    failure_rate_threshold: 0.3
    min_samples: 40
    open_duration: 10s
  retry:
    max_attempts: 2
    initial_delay: 20ms
    backoff: fixed
  call_timeout: 500ms

injection:
  default_seed: 1234
  default_dependency: ocr

divergence:
  max_clock_skew_seconds: 0.1

report:
  flaky_threshold_ms: 150
  alerts:
    error_rate: 0.1

logging:
  level: warn
  format: json
"#;

    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    with_vars(Vec::<(&str, Option<&str>)>::new(), || {
        let config = ConfigLoader::new().from_file(file.path()).unwrap();

        assert_eq!(config.load.window_seconds, 0.5);
        assert_eq!(config.resilience.circuit_breaker.min_samples, 40);
        assert_eq!(
            config.resilience.circuit_breaker.open_duration,
            Duration::from_secs(10)
        );
        assert_eq!(config.resilience.retry.backoff, BackoffKind::Fixed);
        assert_eq!(config.resilience.call_timeout, Duration::from_millis(500));
        assert_eq!(config.injection.default_dependency, "ocr");
        assert_eq!(config.divergence.max_clock_skew_seconds, 0.1);
        assert_eq!(config.report.flaky_threshold_ms, 150.0);
        assert_eq!(config.report.alerts.error_rate, 0.1);
        assert_eq!(config.report.alerts.p95_latency_ms, 1000.0);
        assert_eq!(config.logging.level, LogLevel::Warn);
    });
}

#[test]
fn test_json_file_loading() {
    let json = r#"{"load": {"rps_tolerance": 0.1}, "injection": {"default_seed": 99}}"#;

    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(json.as_bytes()).unwrap();

    let config = ConfigLoader::new().from_file(file.path()).unwrap();
    assert_eq!(config.load.rps_tolerance, 0.1);
    assert_eq!(config.injection.default_seed, 99);
    assert_eq!(config.resilience.retry.max_attempts, 3);
}

#[test]
fn test_invalid_file_rejected() {
    let yaml = r#"
resilience:
  circuit_breaker:
    failure_rate_threshold: 2.0
"#;
    let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    let err = ConfigLoader::new().from_file(file.path()).unwrap_err();
    assert!(err.to_string().contains("resilience.circuit_breaker"));
}

#[test]
fn test_missing_file() {
    let err = ConfigLoader::new()
        .load(Some("/nonexistent/strain.yaml"))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}
