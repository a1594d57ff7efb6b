use cattle::config;
use cattle::facility::FacilityRegistry;
use std::path::Path;

fn demo(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("demos").join(name)
}

#[test]
fn poem_demo_loads() {
    let loaded = config::load(&demo("poem"), "cattle", &FacilityRegistry::builtin()).unwrap();
    let names: Vec<&str> = loaded.steps.iter().map(|s| s.name()).collect();
    assert_eq!(names, vec!["MakeDir", "InstallFile", "Chmod", "Symlink"]);
}

#[test]
fn flaky_demo_loads() {
    let loaded = config::load(&demo("flaky"), "cattle.json", &FacilityRegistry::builtin()).unwrap();
    assert_eq!(loaded.steps.len(), 4);
}
