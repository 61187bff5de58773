//! Integration tests for YAML-configured streams

use std::fs;
use std::io::Write;

use activity_streams::config::StreamsConfig;
use activity_streams::ConfigError;

#[test]
fn test_configured_stream_writes_ndjson() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("orders.log");
    let output = dir.path().join("orders.ndjson");
    fs::write(&input, "login|150|SUCCESS\nbroken|x|SUCCESS\nlogout|20|ERROR\n").unwrap();

    let yaml = format!(
        r#"
parsers:
  - name: Orders
    type: token
    properties:
      FieldDelim: "|"
    fields:
      - field: activity_name
        locators:
          - {{ type: Index, location: 1 }}
      - field: elapsed_time
        locators:
          - {{ type: Index, location: 2, datatype: Number, units: Milliseconds }}
      - field: status_code
        locators:
          - {{ type: Index, location: 3 }}
      - field: resource
        locators:
          - {{ type: StreamProperty, location: FileName }}
streams:
  - name: orders
    parsers: [Orders]
    properties:
      FileName: "{input}"
    output:
      type: ndjson
      path: "{output}"
"#,
        input = input.display(),
        output = output.display()
    );
    let mut config_file = tempfile::NamedTempFile::new().unwrap();
    config_file.write_all(yaml.as_bytes()).unwrap();

    let config = StreamsConfig::load_from_file(config_file.path()).unwrap();
    let mut streams = config.build().unwrap();
    let stats = streams.remove(0).run().unwrap();

    assert_eq!(stats.current_activity, 3);
    assert_eq!(stats.delivered_activities, 2);
    assert_eq!(stats.skipped_activities, 1);
    assert_eq!(stats.total_bytes, 51);

    let written = fs::read_to_string(&output).unwrap();
    let records: Vec<serde_json::Value> = written
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["activity_name"], "login");
    assert_eq!(records[0]["elapsed_time"], 150_000);
    assert_eq!(records[0]["resource"], input.display().to_string());
    assert_eq!(records[1]["status_code"], "ERROR");
    assert_eq!(records[1]["luw_status"], "EXCEPTION");
}

#[test]
fn test_conflicting_source_properties_fail_build() {
    let yaml = r#"
parsers:
  - name: Lines
    type: regex
    properties:
      Pattern: "(\\w+) (\\d+)"
    fields:
      - field: ActivityName
        locators:
          - { type: Index, location: 1 }
streams:
  - name: both
    parsers: [Lines]
    properties:
      FileName: a.log
      Port: 9000
"#;
    let config = StreamsConfig::from_yaml_str(yaml).unwrap();
    assert!(matches!(
        config.build(),
        Err(ConfigError::ConflictingProperties { .. })
    ));
}

#[test]
fn test_invalid_executor_property() {
    let yaml = r#"
parsers:
  - name: Map
    type: map
streams:
  - name: pooled
    parsers: [Map]
    properties:
      FileName: a.log
      ExecutorThreadsQuantity: 0
"#;
    let config = StreamsConfig::from_yaml_str(yaml).unwrap();
    assert!(matches!(config.build(), Err(ConfigError::InvalidProperty { .. })));
}

#[test]
fn test_unknown_parser_type() {
    let config = StreamsConfig::from_yaml_str("parsers:\n  - name: J\n    type: jms\n").unwrap();
    assert!(matches!(config.build(), Err(ConfigError::UnknownParser(t)) if t == "jms"));
}

#[test]
fn test_sample_config_builds() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/streams.yaml");
    let config = StreamsConfig::load_from_file(path).unwrap();
    let streams = config.build().unwrap();

    let names: Vec<&str> = streams.iter().map(|s| s.name()).collect();
    assert_eq!(names, vec!["access-log", "message-tracking"]);
    assert!(streams[0].settings().bounded);
    assert!(!streams[1].settings().use_executor);
}
