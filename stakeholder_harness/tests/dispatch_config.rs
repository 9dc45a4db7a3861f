//! The shipped dispatch table only names scenarios the harness can run

use stakeholder_harness::{find_scenario, DispatchConfig};
use test_helpers::find_project_root;

#[test]
fn test_dispatch_table_resolves() {
    let root = find_project_root().unwrap();
    let config = DispatchConfig::load(&root.join("stakeholder_tests.yaml")).unwrap();
    assert_eq!(config.names().count(), 5);

    for name in config.names() {
        let path = config.module_path(name).unwrap();
        let scenario = find_scenario(path).unwrap_or_else(|| panic!("{name}: {path} not registered"));
        assert_eq!(scenario.module_path(), path);
        assert_eq!(scenario.name().strip_prefix("test_"), Some(name));
    }
}

#[test]
fn test_unknown_name_has_no_module() {
    let root = find_project_root().unwrap();
    let config = DispatchConfig::load(&root.join("stakeholder_tests.yaml")).unwrap();
    assert!(config.module_path("j1927_mosaic").is_none());
}
