use serial_test::serial;

use agent_runner::config::ToolsConfig;
use agent_runner::policy::resolver::{
    resolve, ToolSettings, ALLOWED_TOOLS_ENV, DEFAULT_TOOLS, DISALLOWED_TOOLS_ENV,
};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

#[test]
fn override_minus_disallow() {
    let settings = ToolSettings {
        env_disallowed: Some("B".into()),
        ..ToolSettings::default()
    };
    let requested = strings(&["A", "B"]);

    let policy = resolve(Some(requested.as_slice()), &settings);

    assert_eq!(policy.tools(), strings(&["A"]).as_slice());
}

#[test]
fn env_allow_list_without_disallow() {
    let settings = ToolSettings {
        env_allowed: Some("A,B,C".into()),
        ..ToolSettings::default()
    };

    let policy = resolve(None, &settings);

    assert_eq!(policy.tools(), strings(&["A", "B", "C"]).as_slice());
}

#[test]
fn nothing_configured_yields_default_set() {
    let policy = resolve(None, &ToolSettings::default());

    assert_eq!(policy.tools(), strings(DEFAULT_TOOLS).as_slice());
}

#[test]
fn override_beats_env_and_file() {
    let settings = ToolSettings {
        env_allowed: Some("Env".into()),
        file_allowed: strings(&["File"]),
        ..ToolSettings::default()
    };
    let requested = strings(&["Override"]);

    let policy = resolve(Some(requested.as_slice()), &settings);

    assert_eq!(policy.tools(), strings(&["Override"]).as_slice());
}

#[test]
fn file_list_used_when_env_is_blank() {
    let settings = ToolSettings {
        env_allowed: Some(" , ".into()),
        file_allowed: strings(&["Read", "Grep"]),
        ..ToolSettings::default()
    };

    let policy = resolve(Some(&[][..]), &settings);

    assert_eq!(policy.tools(), strings(&["Read", "Grep"]).as_slice());
}

#[test]
fn env_disallow_replaces_file_disallow() {
    let settings = ToolSettings {
        env_allowed: Some("A,B,C".into()),
        env_disallowed: Some("C".into()),
        file_disallowed: strings(&["A"]),
        ..ToolSettings::default()
    };

    let policy = resolve(None, &settings);

    assert_eq!(policy.tools(), strings(&["A", "B"]).as_slice());
}

#[test]
fn file_disallow_applies_to_default_set() {
    let settings = ToolSettings {
        file_disallowed: strings(&["Bash", "WebFetch"]),
        ..ToolSettings::default()
    };

    let policy = resolve(None, &settings);

    assert!(!policy.allows("Bash"));
    assert!(!policy.allows("WebFetch"));
    assert!(policy.allows("Read"));
    assert_eq!(policy.tools().len(), DEFAULT_TOOLS.len() - 2);
}

#[test]
fn disallow_can_empty_the_list() {
    let settings = ToolSettings {
        env_disallowed: Some("A".into()),
        ..ToolSettings::default()
    };
    let requested = strings(&["A"]);

    let policy = resolve(Some(requested.as_slice()), &settings);

    assert!(policy.tools().is_empty());
}

#[test]
#[serial]
fn capture_reads_current_environment() {
    std::env::set_var(ALLOWED_TOOLS_ENV, "Read,Edit");
    std::env::set_var(DISALLOWED_TOOLS_ENV, "Edit");
    let file = ToolsConfig {
        allowed: strings(&["Grep"]),
        disallowed: Vec::new(),
    };

    let settings = ToolSettings::capture(&file);

    std::env::remove_var(ALLOWED_TOOLS_ENV);
    std::env::remove_var(DISALLOWED_TOOLS_ENV);

    assert_eq!(settings.env_allowed.as_deref(), Some("Read,Edit"));
    assert_eq!(resolve(None, &settings).tools(), strings(&["Read"]).as_slice());
}

#[test]
#[serial]
fn snapshot_is_unaffected_by_later_environment_changes() {
    std::env::remove_var(ALLOWED_TOOLS_ENV);
    std::env::remove_var(DISALLOWED_TOOLS_ENV);
    let settings = ToolSettings::capture(&ToolsConfig::default());

    std::env::set_var(ALLOWED_TOOLS_ENV, "Changed");
    let policy = resolve(None, &settings);
    std::env::remove_var(ALLOWED_TOOLS_ENV);

    assert_eq!(policy.tools(), strings(DEFAULT_TOOLS).as_slice());
}
