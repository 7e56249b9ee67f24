use gcodebridge_core::{Config, Error};

fn write_temp(name: &str, content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    (dir, path)
}

#[test]
fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.server.address, "0.0.0.0");
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.server.queue_limit, 50);
    assert_eq!(config.device.baud_rate, 115_200);
    assert_eq!(config.device.serial_delay, 100);
    assert_eq!(config.device.liveness_period, 1000);
    assert!(config.device.swallow_realtime_ok);
    assert!(config.custom_triggers.is_empty());
}

#[test]
fn test_load_toml_with_kebab_case_keys() {
    let (_dir, path) = write_temp(
        "config.toml",
        r#"
[server]
port = 9000
queue-limit = 10

[device]
usb-id = "303a:4001"
baud-rate = 250000
serial-delay = 50
liveness-period = 0
swallow-realtime-ok = false

[[custom-triggers]]
id = "air-on"
command = "true"

[custom-triggers.trigger]
type = "gcode"
match = "^M8$"
"#,
    );

    let config = Config::load_from_file(&path).unwrap();
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.server.queue_limit, 10);
    assert_eq!(config.device.usb_id.as_deref(), Some("303a:4001"));
    assert_eq!(config.device.baud_rate, 250_000);
    assert_eq!(config.device.serial_delay, 50);
    assert_eq!(config.device.liveness_period, 0);
    assert!(!config.device.swallow_realtime_ok);
    assert_eq!(config.custom_triggers.len(), 1);
    assert_eq!(config.custom_triggers[0].id, "air-on");
    assert_eq!(config.custom_triggers[0].trigger.kind, "gcode");
    assert_eq!(config.custom_triggers[0].trigger.pattern, "^M8$");
    config.validate(false).unwrap();
}

#[test]
fn test_load_json() {
    let (_dir, path) = write_temp(
        "config.json",
        r#"{
  "server": { "port": 8081 },
  "device": { "dev-path": "/dev/ttyACM0" }
}"#,
    );

    let config = Config::load_from_file(&path).unwrap();
    assert_eq!(config.server.port, 8081);
    assert_eq!(config.device.dev_path.as_deref(), Some("/dev/ttyACM0"));
    config.validate(false).unwrap();
}

#[test]
fn test_unknown_extension_rejected() {
    let (_dir, path) = write_temp("config.yaml", "server:\n  port: 1\n");
    assert!(Config::load_from_file(&path).is_err());
}

#[test]
fn test_validate_requires_device_selection() {
    let config = Config::default();
    let err = config.validate(false).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_validate_dry_run_needs_no_device() {
    let config = Config::default();
    config.validate(true).unwrap();
}

#[test]
fn test_validate_rejects_both_device_selectors() {
    let mut config = Config::default();
    config.device.usb_id = Some("303a:4001".to_string());
    config.device.dev_path = Some("/dev/ttyACM0".to_string());
    assert!(config.validate(false).is_err());
}

#[test]
fn test_validate_rejects_zero_queue_limit() {
    let mut config = Config::default();
    config.device.dev_path = Some("/dev/ttyACM0".to_string());
    config.server.queue_limit = 0;
    assert!(config.validate(false).is_err());
}

#[test]
fn test_validate_rejects_unknown_trigger_type() {
    let (_dir, path) = write_temp(
        "config.toml",
        r#"
[device]
dev-path = "/dev/ttyACM0"

[[custom-triggers]]
id = "bad"
command = "true"

[custom-triggers.trigger]
type = "state"
match = "Idle"
"#,
    );

    let config = Config::load_from_file(&path).unwrap();
    let err = config.validate(false).unwrap_err();
    assert!(err.to_string().contains("unsupported trigger type"));
}

#[test]
fn test_validate_rejects_missing_trigger_fields() {
    let mut config = Config::default();
    config.device.dev_path = Some("/dev/ttyACM0".to_string());
    config.custom_triggers.push(gcodebridge_core::TriggerConfig {
        id: "no-command".to_string(),
        trigger: gcodebridge_core::TriggerMatchConfig {
            kind: "gcode".to_string(),
            pattern: "M8".to_string(),
        },
        command: String::new(),
    });
    assert!(config.validate(false).is_err());
}

#[test]
fn test_validate_rejects_duplicate_trigger_ids() {
    let mut config = Config::default();
    config.device.dev_path = Some("/dev/ttyACM0".to_string());
    for _ in 0..2 {
        config.custom_triggers.push(gcodebridge_core::TriggerConfig {
            id: "dup".to_string(),
            trigger: gcodebridge_core::TriggerMatchConfig {
                kind: "gcode".to_string(),
                pattern: "M8".to_string(),
            },
            command: "true".to_string(),
        });
    }
    assert!(config.validate(false).is_err());
}

#[test]
fn test_save_and_reload_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config::default();
    config.server.port = 7777;
    config.device.usb_id = Some("303a:4001".to_string());
    config.save_to_file(&path).unwrap();

    let reloaded = Config::load_from_file(&path).unwrap();
    assert_eq!(reloaded.server.port, 7777);
    assert_eq!(reloaded.device.usb_id.as_deref(), Some("303a:4001"));
}
