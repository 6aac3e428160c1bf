use super::*;

/// Builds a minimal stored (uncompressed) zip archive in memory. Entries
/// whose names end in `/` become directories.
fn build_stored_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    fn push_u16(buf: &mut Vec<u8>, value: u16) {
        buf.extend_from_slice(&value.to_le_bytes());
    }
    fn push_u32(buf: &mut Vec<u8>, value: u32) {
        buf.extend_from_slice(&value.to_le_bytes());
    }

    let mut buf = Vec::new();
    let mut central = Vec::new();

    for (name, data) in entries {
        let mut crc = flate2::Crc::new();
        crc.update(data);
        let crc = crc.sum();
        let offset = buf.len() as u32;

        push_u32(&mut buf, 0x0403_4b50);
        push_u16(&mut buf, 20);
        push_u16(&mut buf, 0);
        push_u16(&mut buf, 0); // stored
        push_u16(&mut buf, 0);
        push_u16(&mut buf, 0);
        push_u32(&mut buf, crc);
        push_u32(&mut buf, data.len() as u32);
        push_u32(&mut buf, data.len() as u32);
        push_u16(&mut buf, name.len() as u16);
        push_u16(&mut buf, 0);
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(data);

        push_u32(&mut central, 0x0201_4b50);
        push_u16(&mut central, 20);
        push_u16(&mut central, 20);
        push_u16(&mut central, 0);
        push_u16(&mut central, 0); // stored
        push_u16(&mut central, 0);
        push_u16(&mut central, 0);
        push_u32(&mut central, crc);
        push_u32(&mut central, data.len() as u32);
        push_u32(&mut central, data.len() as u32);
        push_u16(&mut central, name.len() as u16);
        push_u16(&mut central, 0);
        push_u16(&mut central, 0);
        push_u16(&mut central, 0);
        push_u16(&mut central, 0);
        push_u32(&mut central, 0);
        push_u32(&mut central, offset);
        central.extend_from_slice(name.as_bytes());
    }

    let cd_offset = buf.len() as u32;
    let cd_size = central.len() as u32;
    buf.extend_from_slice(&central);
    push_u32(&mut buf, 0x0605_4b50);
    push_u16(&mut buf, 0);
    push_u16(&mut buf, 0);
    push_u16(&mut buf, entries.len() as u16);
    push_u16(&mut buf, entries.len() as u16);
    push_u32(&mut buf, cd_size);
    push_u32(&mut buf, cd_offset);
    push_u16(&mut buf, 0);
    buf
}

#[test]
fn stages_a_plain_directory() {
    let source = tempfile::tempdir().expect("source dir");
    std::fs::write(source.path().join("plugin.yaml"), "name: p\n").expect("write descriptor");
    std::fs::create_dir_all(source.path().join("src")).expect("create subdir");
    std::fs::write(source.path().join("src/main.py"), "print('hi')\n").expect("write source");

    let staging = tempfile::tempdir().expect("staging dir");
    stage_plugin_source(source.path(), staging.path()).expect("stage");

    assert!(staging.path().join("plugin.yaml").is_file());
    assert!(staging.path().join("src/main.py").is_file());
}

#[test]
fn staging_strips_shipped_deps_state() {
    let source = tempfile::tempdir().expect("source dir");
    std::fs::write(source.path().join("plugin.yaml"), "name: p\n").expect("write descriptor");
    std::fs::write(source.path().join(DEPS_STATE_FILE_NAME), "{}").expect("write stray state");

    let staging = tempfile::tempdir().expect("staging dir");
    stage_plugin_source(source.path(), staging.path()).expect("stage");
    assert!(!staging.path().join(DEPS_STATE_FILE_NAME).exists());
}

#[test]
fn stages_a_zip_artifact() {
    let zip = build_stored_zip(&[
        ("plugin.yaml", b"name: p\nversion: 1.0.0\n"),
        ("src/", b""),
        ("src/main.py", b"print('hi')\n"),
    ]);
    let dir = tempfile::tempdir().expect("tempdir");
    let zip_path = dir.path().join("plugin.zip");
    std::fs::write(&zip_path, zip).expect("write zip");

    let staging = tempfile::tempdir().expect("staging dir");
    stage_plugin_source(&zip_path, staging.path()).expect("stage zip");

    let yaml = std::fs::read_to_string(staging.path().join("plugin.yaml")).expect("read yaml");
    assert_eq!(yaml, "name: p\nversion: 1.0.0\n");
    let code = std::fs::read_to_string(staging.path().join("src/main.py")).expect("read code");
    assert_eq!(code, "print('hi')\n");
}

#[test]
fn zip_entries_never_escape_the_staging_dir() {
    let zip = build_stored_zip(&[("../outside.txt", b"nope")]);
    let dir = tempfile::tempdir().expect("tempdir");
    let zip_path = dir.path().join("evil.zip");
    std::fs::write(&zip_path, zip).expect("write zip");

    let staging = tempfile::tempdir().expect("staging dir");
    // Whether the entry is rejected or its path neutralized, nothing may
    // land outside the staging directory.
    let _ = stage_plugin_source(&zip_path, staging.path());
    assert!(!dir.path().join("outside.txt").exists());
    assert!(!staging
        .path()
        .parent()
        .map(|p| p.join("outside.txt").exists())
        .unwrap_or(false));
}

#[test]
fn rejects_missing_and_unsupported_sources() {
    let staging = tempfile::tempdir().expect("staging dir");
    let error = stage_plugin_source(Path::new("/nonexistent/plugin"), staging.path())
        .expect_err("missing source must fail");
    assert!(matches!(error, Error::NotFound { .. }));

    let dir = tempfile::tempdir().expect("tempdir");
    let tarball = dir.path().join("plugin.tar.gz");
    std::fs::write(&tarball, b"not a zip").expect("write file");
    let error = stage_plugin_source(&tarball, staging.path())
        .expect_err("unsupported extension must fail");
    assert!(matches!(error, Error::Unsupported { .. }));
}
