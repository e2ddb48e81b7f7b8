//! Every workspace member inherits the workspace version, and the library's
//! exported `VERSION` agrees with it.

use std::path::{Path, PathBuf};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .expect("crate lives two levels below the workspace root")
        .to_path_buf()
}

fn manifest(path: &Path) -> toml::Value {
    let raw = std::fs::read_to_string(path.join("Cargo.toml")).unwrap();
    toml::from_str(&raw).unwrap()
}

#[test]
fn members_inherit_workspace_version() {
    let root = workspace_root();
    let members = manifest(&root)["workspace"]["members"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m.as_str().unwrap().to_string())
        .collect::<Vec<_>>();
    assert!(members.contains(&"crates/tiered-core".to_string()));

    for member in &members {
        let doc = manifest(&root.join(member));
        let inherited = doc["package"]["version"]
            .get("workspace")
            .and_then(|v| v.as_bool());
        assert_eq!(
            inherited,
            Some(true),
            "{member} should use version.workspace = true"
        );
    }
}

#[test]
fn exported_version_matches_workspace() {
    let root = manifest(&workspace_root());
    let ws_version = root["workspace"]["package"]["version"].as_str().unwrap();
    assert_eq!(tiered_core::VERSION, ws_version);
}
