use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use super::*;

/// Counts invocations and optionally fails, without touching the system.
struct RecordingInstaller {
    calls: AtomicUsize,
    fail: bool,
}

impl RecordingInstaller {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageInstaller for RecordingInstaller {
    async fn install(&self, _manifest_path: &Path, _plugin_dir: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::operation("installer", "simulated failure".to_string()));
        }
        Ok(())
    }
}

fn write_manifest(dir: &Path, content: &str) {
    std::fs::write(dir.join(REQUIREMENTS_FILE_NAME), content).expect("write manifest");
}

#[tokio::test]
async fn absent_manifest_records_without_installing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let installer = RecordingInstaller::new();
    let manager = DependencyManager::new(installer.clone());

    let outcome = manager
        .ensure_dependencies(dir.path())
        .await
        .expect("ensure");
    assert_eq!(outcome, DepsOutcome::Recorded);
    assert_eq!(installer.calls(), 0);

    let state = read_deps_state(dir.path()).expect("state written");
    assert_eq!(
        state.requirements_hash.as_deref(),
        Some(empty_manifest_fingerprint().as_str())
    );
}

#[tokio::test]
async fn whitespace_only_manifest_records_without_installing() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_manifest(dir.path(), "  \n\t\n");
    let installer = RecordingInstaller::new();
    let manager = DependencyManager::new(installer.clone());

    let outcome = manager
        .ensure_dependencies(dir.path())
        .await
        .expect("ensure");
    assert_eq!(outcome, DepsOutcome::Recorded);
    assert_eq!(installer.calls(), 0);
}

#[tokio::test]
async fn manifest_with_content_installs_then_skips() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_manifest(dir.path(), "requests==2.31.0\n");
    let installer = RecordingInstaller::new();
    let manager = DependencyManager::new(installer.clone());

    let outcome = manager
        .ensure_dependencies(dir.path())
        .await
        .expect("ensure");
    assert_eq!(outcome, DepsOutcome::Installed);
    assert_eq!(installer.calls(), 1);

    let outcome = manager
        .ensure_dependencies(dir.path())
        .await
        .expect("ensure again");
    assert_eq!(outcome, DepsOutcome::UpToDate);
    assert_eq!(installer.calls(), 1);
}

#[tokio::test]
async fn changed_manifest_triggers_reinstall() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_manifest(dir.path(), "requests==2.31.0\n");
    let installer = RecordingInstaller::new();
    let manager = DependencyManager::new(installer.clone());

    manager
        .ensure_dependencies(dir.path())
        .await
        .expect("ensure");
    write_manifest(dir.path(), "requests==2.32.0\n");
    let outcome = manager
        .ensure_dependencies(dir.path())
        .await
        .expect("ensure after change");
    assert_eq!(outcome, DepsOutcome::Installed);
    assert_eq!(installer.calls(), 2);
}

#[tokio::test]
async fn installer_failure_leaves_no_record() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_manifest(dir.path(), "requests==2.31.0\n");
    let installer = RecordingInstaller::failing();
    let manager = DependencyManager::new(installer.clone());

    manager
        .ensure_dependencies(dir.path())
        .await
        .expect_err("install must fail");
    assert_eq!(installer.calls(), 1);
    assert!(read_deps_state(dir.path()).is_none());

    // Next check retries the install instead of trusting a stale record.
    manager
        .ensure_dependencies(dir.path())
        .await
        .expect_err("retry must fail again");
    assert_eq!(installer.calls(), 2);
}

#[tokio::test]
async fn corrupt_state_record_forces_reinstall() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_manifest(dir.path(), "requests==2.31.0\n");
    std::fs::write(deps_state_path(dir.path()), "{ nope").expect("write corrupt state");

    let installer = RecordingInstaller::new();
    let manager = DependencyManager::new(installer.clone());
    let outcome = manager
        .ensure_dependencies(dir.path())
        .await
        .expect("ensure");
    assert_eq!(outcome, DepsOutcome::Installed);
    assert_eq!(installer.calls(), 1);
}

#[tokio::test]
async fn record_install_writes_current_fingerprint() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_manifest(dir.path(), "aiohttp\n");
    let manager = DependencyManager::new(RecordingInstaller::new());

    manager.record_install(dir.path()).await.expect("record");
    let state = read_deps_state(dir.path()).expect("state written");
    assert_eq!(
        state.requirements_hash.as_deref(),
        Some(fingerprint_bytes(b"aiohttp\n").as_str())
    );

    let installer = RecordingInstaller::new();
    let manager = DependencyManager::new(installer.clone());
    let outcome = manager
        .ensure_dependencies(dir.path())
        .await
        .expect("ensure");
    assert_eq!(outcome, DepsOutcome::UpToDate);
    assert_eq!(installer.calls(), 0);
}

#[tokio::test]
async fn unknown_state_fields_survive_rewrites() {
    let dir = tempfile::tempdir().expect("tempdir");
    let seeded = json!({"requirements_hash": "stale", "note": "manual install"});
    std::fs::write(
        deps_state_path(dir.path()),
        serde_json::to_string(&seeded).expect("serialize seed"),
    )
    .expect("seed state");

    let manager = DependencyManager::new(RecordingInstaller::new());
    manager
        .ensure_dependencies(dir.path())
        .await
        .expect("ensure");

    let state = read_deps_state(dir.path()).expect("state rewritten");
    assert_eq!(state.extra.get("note"), Some(&json!("manual install")));
    assert_ne!(state.requirements_hash.as_deref(), Some("stale"));
}

#[test]
fn missing_manifest_and_empty_manifest_share_a_fingerprint() {
    assert_eq!(empty_manifest_fingerprint(), fingerprint_bytes(b""));
    assert_eq!(
        empty_manifest_fingerprint(),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

#[test]
fn command_installer_substitutes_placeholders() {
    let installer = CommandInstaller::new(&InstallerConfig {
        command: vec![
            "pip".to_string(),
            "install".to_string(),
            "-r".to_string(),
            "{manifest}".to_string(),
            "--target".to_string(),
            "{dir}".to_string(),
        ],
    });
    let argv = installer.render_argv(Path::new("/p/requirements.txt"), Path::new("/p"));
    assert_eq!(
        argv,
        vec![
            "pip",
            "install",
            "-r",
            "/p/requirements.txt",
            "--target",
            "/p"
        ]
    );
}
