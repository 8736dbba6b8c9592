//! Local filesystem passthrough for the `host_fs` import, confined to one
//! root directory.

use agfs_types::{
    FileInfo, FsError, FsRequest, FsResult, HostFsOp, HostFsRequest, Payload, WriteFlag,
    slice_for_read,
};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

#[derive(Debug, Clone)]
pub struct HostFs {
    root: PathBuf,
}

impl HostFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a guest path onto the root. Any `..` is refused outright rather
    /// than normalised.
    pub fn resolve(&self, path: &str) -> FsResult<PathBuf> {
        let mut out = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(seg) => out.push(seg),
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(FsError::permission_denied(format!(
                        "{path}: escapes host_fs root"
                    )));
                }
            }
        }
        Ok(out)
    }

    /// Executes one request and returns the `ok` value of the reply.
    pub fn serve(&self, request: &HostFsRequest) -> FsResult<Value> {
        let req = &request.request;
        let path = self.resolve(&req.path)?;
        let value = match request.op {
            HostFsOp::Read => {
                let data = fs::read(&path).map_err(|e| ctx(e, &req.path))?;
                let slice = slice_for_read(&data, req.offset.unwrap_or(0), req.size.unwrap_or(-1));
                serde_json::to_value(Payload(slice.to_vec()))
            }
            HostFsOp::Write => serde_json::to_value(self.write(&path, req)?),
            HostFsOp::Stat => serde_json::to_value(stat(&path, &req.path)?),
            HostFsOp::Readdir => {
                let mut entries = Vec::new();
                for entry in fs::read_dir(&path).map_err(|e| ctx(e, &req.path))? {
                    let entry = entry?;
                    let name = entry.file_name().to_string_lossy().into_owned();
                    entries.push(stat(&entry.path(), &name)?);
                }
                entries.sort_by(|a, b| a.name.cmp(&b.name));
                serde_json::to_value(entries)
            }
            HostFsOp::Mkdir => {
                fs::create_dir(&path).map_err(|e| ctx(e, &req.path))?;
                Ok(Value::Null)
            }
            HostFsOp::Remove => {
                if path == self.root {
                    return Err(FsError::invalid_argument("cannot remove the host_fs root"));
                }
                let meta = fs::metadata(&path).map_err(|e| ctx(e, &req.path))?;
                let res = if !meta.is_dir() {
                    fs::remove_file(&path)
                } else if req.recursive.unwrap_or(false) {
                    fs::remove_dir_all(&path)
                } else {
                    fs::remove_dir(&path)
                };
                res.map_err(|e| ctx(e, &req.path))?;
                Ok(Value::Null)
            }
            HostFsOp::Rename => {
                let to = self.resolve(req.require_new_path()?)?;
                if path == self.root || to == self.root {
                    return Err(FsError::invalid_argument("cannot rename the host_fs root"));
                }
                fs::rename(&path, &to).map_err(|e| ctx(e, &req.path))?;
                Ok(Value::Null)
            }
        };
        value.map_err(|e| FsError::internal(format!("encode host_fs reply: {e}")))
    }

    fn write(&self, path: &Path, req: &FsRequest) -> FsResult<u64> {
        let flags = req.flags.unwrap_or(WriteFlag::CREATE);
        let data = req.data.as_ref().map(Payload::as_slice).unwrap_or_default();
        let offset = req.offset.unwrap_or(-1);
        let append = flags.contains(WriteFlag::APPEND);

        let mut opts = OpenOptions::new();
        opts.write(true);
        if flags.contains(WriteFlag::CREATE) && flags.contains(WriteFlag::EXCLUSIVE) {
            opts.create_new(true);
        } else if flags.contains(WriteFlag::CREATE) {
            opts.create(true);
        }
        if append {
            opts.append(true);
        } else if flags.contains(WriteFlag::TRUNCATE) || offset < 0 {
            opts.truncate(true);
        }

        let mut file = opts.open(path).map_err(|e| ctx(e, &req.path))?;
        if !append && offset > 0 {
            file.seek(SeekFrom::Start(offset as u64))?;
        }
        file.write_all(data)?;
        Ok(data.len() as u64)
    }
}

fn ctx(e: std::io::Error, path: &str) -> FsError {
    FsError::from(e).context(path)
}

fn stat(path: &Path, name: &str) -> FsResult<FileInfo> {
    let meta = fs::metadata(path).map_err(|e| ctx(e, name))?;
    let mod_time = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let name = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/".to_string());
    let info = if meta.is_dir() {
        FileInfo::dir(name, mode_of(&meta))
    } else {
        FileInfo::file(name, meta.len(), mode_of(&meta))
    };
    Ok(info.with_mod_time(mod_time))
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(meta: &fs::Metadata) -> u32 {
    if meta.is_dir() {
        0o755
    } else if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agfs_types::ErrorKind;

    fn req(op: HostFsOp, request: FsRequest) -> HostFsRequest {
        HostFsRequest { op, request }
    }

    #[test]
    fn parent_segments_are_refused() {
        let host = HostFs::new("/srv/data");
        let err = host.resolve("/a/../../etc/passwd").unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
        assert_eq!(host.resolve("/a/./b").unwrap(), PathBuf::from("/srv/data/a/b"));
    }

    #[test]
    fn write_then_read_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let host = HostFs::new(dir.path());

        let written = host
            .serve(&req(HostFsOp::Write, FsRequest::write("/f.txt", b"hello", -1, WriteFlag::CREATE)))
            .unwrap();
        assert_eq!(written, 5);
        assert_eq!(fs::read(dir.path().join("f.txt")).unwrap(), b"hello");

        let read = host.serve(&req(HostFsOp::Read, FsRequest::read("/f.txt", 1, 3))).unwrap();
        let payload: Payload = serde_json::from_value(read).unwrap();
        assert_eq!(payload.as_slice(), b"ell");
    }

    #[test]
    fn stat_and_readdir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), b"12").unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        let host = HostFs::new(dir.path());

        let info: FileInfo =
            serde_json::from_value(host.serve(&req(HostFsOp::Stat, FsRequest::at("/b.txt"))).unwrap()).unwrap();
        assert_eq!(info.name, "b.txt");
        assert_eq!(info.size, 2);

        let entries: Vec<FileInfo> =
            serde_json::from_value(host.serve(&req(HostFsOp::Readdir, FsRequest::at("/"))).unwrap()).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b.txt"]);
        assert!(entries[0].is_dir);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let host = HostFs::new(dir.path());
        let err = host.serve(&req(HostFsOp::Read, FsRequest::at("/nope"))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn rename_target_is_confined_too() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), b"x").unwrap();
        let host = HostFs::new(dir.path());
        let err = host
            .serve(&req(HostFsOp::Rename, FsRequest::rename("/a", "/../a")))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
        assert!(dir.path().join("a").exists());
    }

    #[test]
    fn root_cannot_be_removed_or_renamed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("keep"), b"x").unwrap();
        let host = HostFs::new(dir.path());

        for path in ["/", "", "/."] {
            let err = host
                .serve(&req(HostFsOp::Remove, FsRequest::at(path).with_recursive(true)))
                .unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidArgument, "remove {path:?}");
        }
        let err = host.serve(&req(HostFsOp::Rename, FsRequest::rename("/", "/moved"))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        let err = host.serve(&req(HostFsOp::Rename, FsRequest::rename("/keep", "/"))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);

        assert_eq!(fs::read(dir.path().join("keep")).unwrap(), b"x");
        assert!(!dir.path().join("moved").exists());
    }
}
