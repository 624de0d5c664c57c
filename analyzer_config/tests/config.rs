use std::io::Write;

use analyzer_config::{Config, ModeCfg, load_toml, profile};
use rstest::rstest;

const GOOD: &str = r#"
[defaults]
sensor_read_interval_ms = 10
actuator_update_interval_ms = 1

[safety]
max_voltage = 30.0
min_voltage = 0.1
max_current_ma = 5000

[[channels]]
id = 0
sensor_module = 0
sensor_channel = 0
actuator_channel = 0
mode = "cc_cv"
profile = "li_ion_2s"
target_current_ma = 700

[[channels]]
id = 1
sensor_module = 0
sensor_channel = 1
actuator_channel = 1
mode = "cv"
target_voltage = 7.2
target_current_ma = 1000
"#;

#[test]
fn parses_and_validates_a_full_config() {
    let cfg = load_toml(GOOD).expect("parse");
    cfg.validate().expect("validate");
    assert_eq!(cfg.channels.len(), 2);
    assert_eq!(cfg.channels[0].mode, ModeCfg::ConstantCurrentConstantVoltage);
    assert_eq!(cfg.channels[1].mode, ModeCfg::ConstantVoltage);
    assert_eq!(cfg.defaults.sensor_read_interval_ms, 10);
    assert_eq!(cfg.hardware.module_addresses, vec![0x40, 0x41, 0x42, 0x43]);
}

#[test]
fn load_reads_from_disk_with_context() {
    let mut f = tempfile::NamedTempFile::new().expect("tempfile");
    f.write_all(GOOD.as_bytes()).expect("write config");
    let cfg = Config::load(f.path()).expect("load");
    assert_eq!(cfg.channels.len(), 2);

    let missing = Config::load(std::path::Path::new("/nonexistent/analyzer.toml"));
    let err = missing.expect_err("missing file");
    assert!(err.to_string().contains("reading config"));
}

#[test]
fn profile_resolution_prefers_explicit_values() {
    let cfg = load_toml(GOOD).expect("parse");
    let t = cfg.channels[0].resolve_targets().expect("resolve");
    // Current overridden per channel, voltage from the profile.
    assert_eq!(t.current_ma, 700);
    assert!((t.voltage - 8.4).abs() < 1e-6);
    assert_eq!(t.max_voltage, Some(8.4));
}

#[rstest]
#[case("profile = \"unobtainium\"", "unknown profile")]
#[case("", "no target voltage")]
#[case("target_voltage = 8.4", "no target current")]
#[case("target_voltage = -1.0\ntarget_current_ma = 500", "target voltage must be finite")]
fn bad_channel_targets_fail_validation(#[case] targets: &str, #[case] needle: &str) {
    let text = format!(
        r#"
[[channels]]
id = 0
sensor_module = 0
sensor_channel = 0
actuator_channel = 0
{targets}
"#
    );
    let cfg = load_toml(&text).expect("parse");
    let err = cfg.validate().expect_err("must fail");
    assert!(
        err.to_string().contains(needle),
        "error {err:#} missing {needle:?}"
    );
}

#[rstest]
#[case(0, 3, "out of range")]
#[case(4, 0, "no configured address")]
fn bad_wiring_fails_validation(#[case] module: u8, #[case] sub: u8, #[case] needle: &str) {
    let text = format!(
        r#"
[[channels]]
id = 0
sensor_module = {module}
sensor_channel = {sub}
actuator_channel = 0
profile = "li_ion_2s"
"#
    );
    let cfg = load_toml(&text).expect("parse");
    let err = cfg.validate().expect_err("must fail");
    assert!(err.to_string().contains(needle), "error {err:#}");
}

#[test]
fn duplicate_channel_ids_fail_validation() {
    let text = r#"
[[channels]]
id = 0
sensor_module = 0
sensor_channel = 0
actuator_channel = 0
profile = "li_ion_2s"

[[channels]]
id = 0
sensor_module = 0
sensor_channel = 1
actuator_channel = 1
profile = "li_ion_2s"
"#;
    let cfg = load_toml(text).expect("parse");
    let err = cfg.validate().expect_err("duplicate");
    assert!(err.to_string().contains("duplicate channel id"));
}

#[test]
fn more_than_twelve_channels_is_rejected() {
    let mut text = String::new();
    for id in 0..13_u8 {
        text.push_str(&format!(
            r#"
[[channels]]
id = {id}
sensor_module = {}
sensor_channel = {}
actuator_channel = {id}
profile = "li_ion_single"
"#,
            id / 3,
            id % 3,
        ));
    }
    let cfg = load_toml(&text).expect("parse");
    let err = cfg.validate().expect_err("too many channels");
    assert!(err.to_string().contains("at most 12"));
}

#[test]
fn builtin_profiles_match_the_supported_chemistries() {
    for name in [
        "li_ion_single",
        "li_ion_2s",
        "li_ion_3s",
        "lead_acid_6v",
        "lead_acid_12v",
        "nimh_6cell",
    ] {
        let p = profile(name).unwrap_or_else(|| panic!("missing profile {name}"));
        assert!(p.voltage > 0.0 && p.current_ma > 0);
        assert!(p.min_voltage < p.max_voltage);
    }
    assert!(profile("unknown").is_none());
}
