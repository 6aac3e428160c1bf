use async_trait::async_trait;

use crate::deps::{read_deps_state, PackageInstaller};

use super::*;

struct NoopInstaller;

#[async_trait]
impl PackageInstaller for NoopInstaller {
    async fn install(&self, _manifest_path: &Path, _plugin_dir: &Path) -> Result<()> {
        Ok(())
    }
}

fn deps_manager() -> DependencyManager {
    DependencyManager::new(Arc::new(NoopInstaller))
}

fn write_plugin_dir(root: &Path, dir_name: &str, name: &str, version: &str) -> PathBuf {
    let dir = root.join(dir_name);
    std::fs::create_dir_all(&dir).expect("create plugin dir");
    std::fs::write(
        dir.join("plugin.yaml"),
        format!("name: {name}\nversion: {version}\nentry:\n  command: python3\n"),
    )
    .expect("write descriptor");
    dir
}

#[tokio::test]
async fn discover_builds_the_catalog() {
    let root = tempfile::tempdir().expect("tempdir");
    write_plugin_dir(root.path(), "beta", "beta", "1.0.0");
    write_plugin_dir(root.path(), "alpha", "alpha", "2.0.0");

    let registry = PluginRegistry::new(root.path());
    let report = registry.discover().await.expect("discover");
    assert_eq!(report.discovered.len(), 2);

    let ids = registry.ids().await;
    assert_eq!(ids, vec!["alpha", "beta"]);
    let record = registry.get("alpha").await.expect("alpha record");
    assert_eq!(record.state, PluginState::Discovered);
    assert_eq!(record.version, "2.0.0");
}

#[tokio::test]
async fn rediscover_keeps_runtime_state_and_drops_vanished_dirs() {
    let root = tempfile::tempdir().expect("tempdir");
    write_plugin_dir(root.path(), "keeper", "keeper", "1.0.0");
    let goner_dir = write_plugin_dir(root.path(), "goner", "goner", "1.0.0");

    let registry = PluginRegistry::new(root.path());
    registry.discover().await.expect("discover");
    registry.set_state("keeper", PluginState::Stopped).await;
    registry
        .set_failed("keeper", PluginState::Stopped, "old failure")
        .await;

    std::fs::remove_dir_all(&goner_dir).expect("remove goner");
    registry.discover().await.expect("rediscover");

    assert_eq!(registry.ids().await, vec!["keeper"]);
    let keeper = registry.get("keeper").await.expect("keeper record");
    // Rescan refreshes descriptor fields without resetting lifecycle state.
    assert_eq!(keeper.state, PluginState::Stopped);
    assert_eq!(keeper.last_error.as_deref(), Some("old failure"));
}

#[tokio::test]
async fn install_copies_source_and_records_dependencies() {
    let root = tempfile::tempdir().expect("tempdir");
    let registry = PluginRegistry::new(root.path().join("plugins"));
    let deps = deps_manager();

    let source = tempfile::tempdir().expect("source dir");
    std::fs::write(
        source.path().join("plugin.yaml"),
        "name: weatherbot\nauthor: acme\nversion: 0.1.0\nentry:\n  command: python3\n",
    )
    .expect("write descriptor");
    std::fs::write(source.path().join("requirements.txt"), "requests\n").expect("write manifest");

    let record = registry.install(&deps, source.path()).await.expect("install");
    assert_eq!(record.id, "acme__weatherbot");
    assert_eq!(record.state, PluginState::Discovered);

    let installed_dir = root.path().join("plugins").join("acme__weatherbot");
    assert!(installed_dir.join("plugin.yaml").is_file());
    let state = read_deps_state(&installed_dir).expect("deps state recorded");
    assert!(state.requirements_hash.is_some());

    let briefs = registry.briefs().await;
    assert_eq!(briefs.len(), 1);
    assert_eq!(briefs[0].id, "acme__weatherbot");
}

#[tokio::test]
async fn install_rejects_duplicate_ids() {
    let root = tempfile::tempdir().expect("tempdir");
    let registry = PluginRegistry::new(root.path().join("plugins"));
    let deps = deps_manager();

    let source = tempfile::tempdir().expect("source dir");
    std::fs::write(
        source.path().join("plugin.yaml"),
        "name: solo\nversion: 0.1.0\nentry:\n  command: python3\n",
    )
    .expect("write descriptor");

    registry.install(&deps, source.path()).await.expect("first install");
    let error = registry
        .install(&deps, source.path())
        .await
        .expect_err("duplicate install must fail");
    assert!(matches!(error, Error::Conflict { .. }));
}

#[tokio::test]
async fn concurrent_installs_of_the_same_id_yield_one_winner() {
    let root = tempfile::tempdir().expect("tempdir");
    let registry = PluginRegistry::new(root.path().join("plugins"));
    let deps = deps_manager();

    let source = tempfile::tempdir().expect("source dir");
    std::fs::write(
        source.path().join("plugin.yaml"),
        "name: racer\nversion: 0.1.0\nentry:\n  command: python3\n",
    )
    .expect("write descriptor");

    let (first, second) = tokio::join!(
        registry.install(&deps, source.path()),
        registry.install(&deps, source.path())
    );

    // Exactly one install wins; the loser reports the conflict instead of
    // clobbering the winner's files or record.
    let succeeded = [first.is_ok(), second.is_ok()]
        .iter()
        .filter(|ok| **ok)
        .count();
    assert_eq!(succeeded, 1);
    let error = if first.is_err() {
        first.unwrap_err()
    } else {
        second.unwrap_err()
    };
    assert!(matches!(error, Error::Conflict { .. }));

    assert_eq!(registry.ids().await, vec!["racer"]);
    assert!(root.path().join("plugins/racer/plugin.yaml").is_file());
}

#[tokio::test]
async fn uninstall_removes_record_and_directory() {
    let root = tempfile::tempdir().expect("tempdir");
    let registry = PluginRegistry::new(root.path().join("plugins"));
    let deps = deps_manager();

    let source = tempfile::tempdir().expect("source dir");
    std::fs::write(
        source.path().join("plugin.yaml"),
        "name: shortlived\nversion: 0.1.0\nentry:\n  command: python3\n",
    )
    .expect("write descriptor");

    let record = registry.install(&deps, source.path()).await.expect("install");
    assert!(record.dir.exists());

    registry
        .remove_and_delete("shortlived")
        .await
        .expect("uninstall");
    assert!(!record.dir.exists());
    assert!(!registry.contains("shortlived").await);

    let error = registry
        .remove_and_delete("shortlived")
        .await
        .expect_err("second uninstall must fail");
    assert!(matches!(error, Error::NotFound { .. }));
}

#[tokio::test]
async fn briefs_expose_failures() {
    let root = tempfile::tempdir().expect("tempdir");
    write_plugin_dir(root.path(), "flaky", "flaky", "1.0.0");
    let registry = PluginRegistry::new(root.path());
    registry.discover().await.expect("discover");
    registry
        .set_failed("flaky", PluginState::Crashed, "worker exited")
        .await;

    let briefs = registry.briefs().await;
    assert_eq!(briefs[0].state, PluginState::Crashed);
    assert_eq!(briefs[0].last_error.as_deref(), Some("worker exited"));
}
