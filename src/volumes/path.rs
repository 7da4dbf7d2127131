//! Path sanitization for the Volume Browser
//!
//! Every path a caller supplies is relative to a volume's root as mounted
//! at `/volume` inside a helper container. The security floor: no `..`
//! segment, no absolute escape, and no walking through a symlink that
//! resolves outside `/volume`.

use std::path::{Component, Path, PathBuf};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path escapes the volume root")]
    Escape,

    #[error("path contains a null byte")]
    NullByte,
}

/// Reject `..` components and resolve the path against `/volume`, returning
/// the absolute in-container path to operate on. Does not touch the
/// filesystem — symlink-target validation happens separately against
/// `find`/`stat` output from inside the helper container, since the host
/// process has no visibility into the container's filesystem namespace.
pub fn sanitize(requested: &str) -> Result<PathBuf, PathError> {
    if requested.contains('\0') {
        return Err(PathError::NullByte);
    }

    let mut resolved = PathBuf::from("/volume");
    for component in Path::new(requested).components() {
        match component {
            Component::ParentDir => return Err(PathError::Escape),
            Component::RootDir | Component::Prefix(_) => {}
            Component::CurDir => {}
            Component::Normal(part) => resolved.push(part),
        }
    }
    Ok(resolved)
}

/// Reject `..` segments and absolute escape for a path used in a backup or
/// restore context, where the result stays relative (handed to `tar` as
/// `./path`, never resolved against `/volume` directly).
pub fn sanitize_relative(requested: &str) -> Result<PathBuf, PathError> {
    if requested.contains('\0') {
        return Err(PathError::NullByte);
    }
    let trimmed = requested.trim();
    if trimmed.starts_with("../") || trimmed == ".." {
        return Err(PathError::Escape);
    }

    let mut resolved = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::ParentDir => return Err(PathError::Escape),
            Component::RootDir | Component::Prefix(_) => {}
            Component::CurDir => {}
            Component::Normal(part) => resolved.push(part),
        }
    }
    Ok(resolved)
}

/// Given a symlink target as reported by `find -printf`/`readlink` inside the
/// helper container, decide whether it stays within `/volume`. Targets
/// outside are reported to the caller as `(external)` rather than followed.
pub fn symlink_target_is_external(target: &str) -> bool {
    let target_path = if target.starts_with('/') {
        PathBuf::from(target)
    } else {
        PathBuf::from("/volume").join(target)
    };

    let normalized = normalize(&target_path);
    !normalized.starts_with("/volume")
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_rejects_parent_dir() {
        assert_eq!(sanitize("../etc/passwd"), Err(PathError::Escape));
        assert_eq!(sanitize("a/../../b"), Err(PathError::Escape));
    }

    #[test]
    fn test_sanitize_strips_absolute_and_joins_root() {
        assert_eq!(sanitize("/data/logs").unwrap(), PathBuf::from("/volume/data/logs"));
        assert_eq!(sanitize("data/logs").unwrap(), PathBuf::from("/volume/data/logs"));
    }

    #[test]
    fn test_sanitize_rejects_null_byte() {
        assert_eq!(sanitize("data\0/etc"), Err(PathError::NullByte));
    }

    #[test]
    fn test_symlink_target_outside_volume_is_external() {
        assert!(symlink_target_is_external("/etc/passwd"));
        assert!(symlink_target_is_external("../../etc/passwd"));
    }

    #[test]
    fn test_sanitize_relative_rejects_parent_dir() {
        assert_eq!(sanitize_relative("../etc/passwd"), Err(PathError::Escape));
        assert_eq!(sanitize_relative("a/../../b"), Err(PathError::Escape));
    }

    #[test]
    fn test_sanitize_relative_strips_leading_slash() {
        assert_eq!(sanitize_relative("/data/logs").unwrap(), PathBuf::from("data/logs"));
    }

    #[test]
    fn test_symlink_target_inside_volume_is_not_external() {
        assert!(!symlink_target_is_external("data/file.txt"));
        assert!(!symlink_target_is_external("/volume/data/file.txt"));
    }
}
