//! Staging of plugin install sources (plain directories and zip artifacts).

use std::path::{Component, Path};

use crate::deps::DEPS_STATE_FILE_NAME;
use crate::error::{Error, Result};

/// Copies a plugin source into `staging`. Accepts a directory or a `.zip`
/// artifact. Any shipped dependency state record is dropped so a fresh
/// install can never fake the installed-dependencies fast path.
pub fn stage_plugin_source(source: &Path, staging: &Path) -> Result<()> {
    if !source.exists() {
        return Err(Error::not_found(
            "plugin source",
            source.display().to_string(),
        ));
    }

    if source.is_dir() {
        copy_dir_recursive(source, staging)?;
    } else if source
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
    {
        extract_zip_to_dir(source, staging)?;
    } else {
        return Err(Error::unsupported(format!(
            "plugin source must be a directory or .zip artifact: {}",
            source.display()
        )));
    }

    let stray_state = staging.join(DEPS_STATE_FILE_NAME);
    if stray_state.exists() {
        std::fs::remove_file(&stray_state).map_err(|e| Error::io_at(&stray_state, e))?;
    }
    Ok(())
}

pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst).map_err(|e| Error::io_at(dst, e))?;
    for entry in walkdir::WalkDir::new(src)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path == src {
            continue;
        }
        let rel = path.strip_prefix(src).map_err(|_| {
            Error::operation(
                "copy plugin source",
                format!("path {} escapes {}", path.display(), src.display()),
            )
        })?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| Error::io_at(&target, e))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
            }
            std::fs::copy(path, &target).map_err(|e| Error::io_at(&target, e))?;
        }
    }
    Ok(())
}

fn extract_zip_to_dir(zip_path: &Path, out_dir: &Path) -> Result<()> {
    let buf = std::fs::read(zip_path).map_err(|e| Error::io_at(zip_path, e))?;
    let archive = rawzip::ZipArchive::from_slice(&buf)
        .map_err(|e| Error::operation("read zip archive", format!("{e:?}")))?;

    for entry in archive.entries() {
        let entry = entry.map_err(|e| Error::operation("read zip entry", format!("{e:?}")))?;
        let filename = entry
            .file_path()
            .try_normalize()
            .map_err(|e| Error::operation("normalize zip path", format!("{e:?}")))?
            .as_ref()
            .to_string();

        let rel = Path::new(&filename);
        if rel.is_absolute()
            || rel
                .components()
                .any(|component| matches!(component, Component::ParentDir))
        {
            return Err(Error::invalid_input(format!(
                "unsafe path in zip artifact: {filename}"
            )));
        }

        let out_path = out_dir.join(rel);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| Error::io_at(&out_path, e))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
        }

        let mut out = std::fs::File::create(&out_path).map_err(|e| Error::io_at(&out_path, e))?;
        let wayfinder = entry.wayfinder();
        let slice_entry = archive
            .get_entry(wayfinder)
            .map_err(|e| Error::operation("read zip entry data", format!("{e:?}")))?;
        let data = slice_entry.data();

        match entry.compression_method() {
            rawzip::CompressionMethod::Store => {
                std::io::copy(&mut &*data, &mut out).map_err(|e| Error::io_at(&out_path, e))?;
            }
            rawzip::CompressionMethod::Deflate => {
                let mut decoder = flate2::read::DeflateDecoder::new(data);
                std::io::copy(&mut decoder, &mut out).map_err(|e| Error::io_at(&out_path, e))?;
            }
            method => {
                return Err(Error::unsupported(format!(
                    "zip compression method {method:?}"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/artifact_tests.rs"]
mod tests;
