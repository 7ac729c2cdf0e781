use std::io::Write;

use wd_core::config::Config;

#[test]
fn default_config() {
    let cfg = Config::default();
    assert_eq!(cfg.general.log_level, "info");
    assert_eq!(cfg.general.log_format, "human");
    assert_eq!(cfg.approval.timeout_minutes, 5);
    assert_eq!(cfg.approval.check_interval_secs, 3);
    assert_eq!(cfg.approval.fetch_limit, 10);
    assert_eq!(cfg.approval.echo_window_secs, 5);
    assert_eq!(cfg.approval.rate_limit_ceiling_secs, 5);
    assert_eq!(cfg.approval.bot_name_markers, vec!["bot", "app"]);
    assert_eq!(cfg.channel.provider, "file");
    assert_eq!(cfg.channel.token_env, "SLACK_BOT_TOKEN");
    assert_eq!(cfg.execution.quarantine_dir, "trash");
    cfg.validate().expect("defaults validate");
}

#[test]
fn config_roundtrip() {
    let cfg = Config::default();
    let toml_str = cfg.to_toml().expect("serialize to toml");
    assert!(toml_str.contains("SLACK_BOT_TOKEN"));

    let parsed: Config = toml::from_str(&toml_str).expect("parse toml back");
    assert_eq!(parsed.approval.timeout_minutes, cfg.approval.timeout_minutes);
    assert_eq!(parsed.channel.inbox_path, cfg.channel.inbox_path);
    parsed.validate().expect("config validates");
}

#[test]
fn config_partial_toml() {
    let partial = r#"
[approval]
timeout_minutes = 2
echo_window_secs = 0

[channel]
provider = "slack"
channel_id = "C09678WRA30"
"#;
    let cfg: Config = toml::from_str(partial).expect("parse partial");
    assert_eq!(cfg.approval.timeout_minutes, 2);
    assert_eq!(cfg.approval.echo_window_secs, 0);
    assert_eq!(cfg.channel.provider, "slack");
    // defaults should fill in the rest
    assert_eq!(cfg.approval.check_interval_secs, 3);
    assert_eq!(cfg.execution.quarantine_dir, "trash");
    cfg.validate().expect("config validates");
}

#[test]
fn zero_timeout_fails_validation() {
    let mut cfg = Config::default();
    cfg.approval.timeout_minutes = 0;
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("timeout_minutes"));
}

#[test]
fn oversized_timeout_fails_validation() {
    let mut cfg = Config::default();
    cfg.approval.timeout_minutes = u64::MAX;
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("timeout_minutes"));

    cfg.approval.timeout_minutes = wd_core::config::MAX_TIMEOUT_MINUTES;
    cfg.validate().expect("a one-day timeout is allowed");
}

#[test]
fn bad_log_format_fails_validation() {
    let mut cfg = Config::default();
    cfg.general.log_format = "xml".into();
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("log_format"));
}

#[test]
fn load_from_reads_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[general]\nworkspace_root = \"/srv/agent\"\n\n[execution]\nquarantine_dir = \"recovery\""
    )
    .unwrap();

    let cfg = Config::load_from(file.path()).expect("load from file");
    assert_eq!(cfg.execution.quarantine_dir, "recovery");
}

#[test]
fn load_from_missing_file_is_io_error() {
    let err = Config::load_from("/definitely/not/here/config.toml").unwrap_err();
    assert!(err.to_string().starts_with("io:"));
}
