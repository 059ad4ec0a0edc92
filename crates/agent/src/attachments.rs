// Agent-side attachment unpacking (§4.10). Archives arrive as gzip tar and
// are extracted under a secure filter before any phase command runs, since
// the archive contents are submitter-controlled.

use std::fs;
use std::io::Read as _;
use std::path::{Component, Path, PathBuf};

use serde_json::Value;
use tar::EntryType;
use testflinger_core::domain::JobSpec;

use crate::error::{AgentError, Result};

const ALLOWED_ROOTS: [&str; 3] = ["provision", "firmware_update", "test"];

/// Unpacks `archive_path` under `<rundir>/attachments/`, rejecting any
/// member that escapes the destination or targets a phase other than
/// provision/firmware_update/test.
pub fn extract_attachments(archive_path: &Path, rundir: &Path) -> Result<()> {
    let dest = rundir.join("attachments");
    fs::create_dir_all(&dest)?;

    let file = fs::File::open(archive_path)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw_path = entry.path()?.into_owned();
        let safe_rel = validate_member_path(&raw_path)?;
        let out_path = dest.join(&safe_rel);

        match entry.header().entry_type() {
            EntryType::Regular | EntryType::Link => {
                if let Some(parent) = out_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mode = entry.header().mode().unwrap_or(0o644);
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf)?;
                fs::write(&out_path, &buf)?;
                apply_safe_mode(&out_path, mode)?;
            }
            EntryType::Symlink => {
                let target = entry
                    .link_name()?
                    .ok_or_else(|| AgentError::Config(format!("attachment member {} has no symlink target", safe_rel.display())))?
                    .into_owned();
                validate_link_target(&target, &safe_rel)?;
                if let Some(parent) = out_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                #[cfg(unix)]
                std::os::unix::fs::symlink(&target, &out_path)?;
            }
            EntryType::Directory => {
                fs::create_dir_all(&out_path)?;
            }
            other => {
                return Err(AgentError::Config(format!(
                    "attachment member {} has rejected type {:?}",
                    safe_rel.display(),
                    other
                )));
            }
        }
    }
    Ok(())
}

/// Resolves `path` relative to the destination root, rejecting absolute
/// paths and `..` escapes, and requiring the first component to be one of
/// the three attachable phases (§4.10).
fn validate_member_path(path: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(AgentError::Config(format!("attachment member {} escapes the destination", path.display())));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(AgentError::Config(format!("attachment member {} has an absolute path", path.display())));
            }
        }
    }

    let root = normalized
        .components()
        .next()
        .and_then(|c| c.as_os_str().to_str())
        .unwrap_or("");
    if !ALLOWED_ROOTS.contains(&root) {
        return Err(AgentError::Config(format!(
            "attachment member {} is outside provision/firmware_update/test",
            normalized.display()
        )));
    }
    Ok(normalized)
}

fn validate_link_target(target: &Path, member_rel: &Path) -> Result<()> {
    if target.is_absolute() {
        return Err(AgentError::Config(format!("link {} has an absolute target", member_rel.display())));
    }
    let base = member_rel.parent().unwrap_or_else(|| Path::new(""));
    let mut resolved = base.to_path_buf();
    for component in target.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return Err(AgentError::Config(format!("link {} escapes the destination", member_rel.display())));
                }
            }
            _ => return Err(AgentError::Config(format!("link {} has an absolute target", member_rel.display()))),
        }
    }
    Ok(())
}

/// Clears high bits and group/other-write bits; masks executable bits
/// unless user-executable was already set; always ensures owner rw (§4.10).
#[cfg(unix)]
fn apply_safe_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut masked = mode & 0o777;
    masked &= !0o022;
    let user_exec = masked & 0o100 != 0;
    if !user_exec {
        masked &= !0o111;
    }
    masked |= 0o600;
    fs::set_permissions(path, fs::Permissions::from_mode(masked))?;
    Ok(())
}

#[cfg(not(unix))]
fn apply_safe_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Strips the `attachments` key from each `<phase>_data` block, dropping
/// the block entirely if it becomes empty, so downstream phase-skip checks
/// that look for data presence aren't confused by a manifest nobody reads
/// again after extraction (§4.10).
pub fn strip_attachment_manifests(spec: &mut JobSpec) {
    strip_one(&mut spec.provision_data);
    strip_one(&mut spec.firmware_update_data);
    strip_one(&mut spec.test_data);
}

fn strip_one(data: &mut Option<Value>) {
    let becomes_empty = match data.as_mut() {
        Some(Value::Object(map)) => {
            map.remove("attachments");
            map.is_empty()
        }
        _ => false,
    };
    if becomes_empty {
        *data = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_paths_outside_the_allowed_phase_roots() {
        assert!(validate_member_path(Path::new("etc/passwd")).is_err());
        assert!(validate_member_path(Path::new("test/file.bin")).is_ok());
    }

    #[test]
    fn rejects_parent_dir_escapes() {
        assert!(validate_member_path(Path::new("test/../../etc/passwd")).is_err());
    }

    #[test]
    fn rejects_absolute_paths() {
        assert!(validate_member_path(Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn strips_attachments_key_and_drops_empty_blocks() {
        let mut spec = JobSpec {
            job_queue: "q".into(),
            job_priority: 0,
            tags: vec![],
            global_timeout: None,
            output_timeout: None,
            job_status_webhook: None,
            parent_job_id: None,
            provision_data: Some(serde_json::json!({"attachments": [{"local": "a"}]})),
            firmware_update_data: None,
            test_data: Some(serde_json::json!({"attachments": [{"local": "b"}], "test_cmds": "echo hi"})),
            allocate_data: None,
            reserve_data: None,
            extra: serde_json::Map::new(),
        };
        strip_attachment_manifests(&mut spec);
        assert!(spec.provision_data.is_none());
        assert_eq!(spec.test_data, Some(serde_json::json!({"test_cmds": "echo hi"})));
    }
}
