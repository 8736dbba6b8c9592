//! In-memory provider.
//!
//! A flat map from normalized path to node. Directories are explicit nodes;
//! the root always exists.

use crate::path::{basename, normalize, parent};
use agfs_types::{
    FileInfo, FileSystem, FsError, FsResult, ReadOnlyFileSystem, WriteFlag, slice_for_read,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

const DEFAULT_FILE_MODE: u32 = 0o644;
const DEFAULT_DIR_MODE: u32 = 0o755;
/// Largest file `MemFs` will hold. Writes that would grow a file past it fail
/// with `InvalidArgument` before anything is allocated.
pub const MAX_FILE_SIZE: usize = 1 << 30;

#[derive(Debug, Clone)]
enum Content {
    File(Vec<u8>),
    Dir,
}

#[derive(Debug, Clone)]
struct Node {
    content: Content,
    mode: u32,
    mod_time: i64,
}

impl Node {
    fn file(data: Vec<u8>) -> Self {
        Self {
            content: Content::File(data),
            mode: DEFAULT_FILE_MODE,
            mod_time: now(),
        }
    }

    fn dir(mode: u32) -> Self {
        Self {
            content: Content::Dir,
            mode,
            mod_time: now(),
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self.content, Content::Dir)
    }

    fn info(&self, path: &str) -> FileInfo {
        let name = basename(path);
        match &self.content {
            Content::File(data) => FileInfo::file(name, data.len() as u64, self.mode),
            Content::Dir => FileInfo::dir(name, self.mode),
        }
        .with_mod_time(self.mod_time)
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn is_child(dir: &str, candidate: &str) -> bool {
    candidate != "/" && parent(candidate) == dir
}

fn is_within(dir: &str, candidate: &str) -> bool {
    candidate == dir || (dir == "/" || candidate.starts_with(&format!("{dir}/")))
}

#[derive(Debug)]
pub struct MemFs {
    nodes: RwLock<BTreeMap<String, Node>>,
}

impl MemFs {
    /// Registry name.
    pub const KIND: &'static str = "memfs";

    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::dir(DEFAULT_DIR_MODE));
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    /// Checks that the parent of `path` exists and is a directory.
    fn check_parent(nodes: &BTreeMap<String, Node>, path: &str) -> FsResult<()> {
        let dir = parent(path);
        match nodes.get(dir) {
            None => Err(FsError::not_found(dir)),
            Some(node) if !node.is_dir() => Err(FsError::not_a_directory(dir)),
            Some(_) => Ok(()),
        }
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReadOnlyFileSystem for MemFs {
    fn name(&self) -> &str {
        Self::KIND
    }

    fn readme(&self) -> String {
        "memfs: volatile in-memory file system. Contents are lost on unmount.".to_string()
    }

    async fn read(&self, path: &str, offset: i64, size: i64) -> FsResult<Vec<u8>> {
        let path = normalize(path)?;
        let nodes = self.nodes.read();
        match nodes.get(&path).map(|n| &n.content) {
            None => Err(FsError::not_found(path)),
            Some(Content::Dir) => Err(FsError::is_directory(path)),
            Some(Content::File(data)) => Ok(slice_for_read(data, offset, size).to_vec()),
        }
    }

    async fn stat(&self, path: &str) -> FsResult<FileInfo> {
        let path = normalize(path)?;
        let nodes = self.nodes.read();
        nodes
            .get(&path)
            .map(|n| n.info(&path))
            .ok_or_else(|| FsError::not_found(path))
    }

    async fn readdir(&self, path: &str) -> FsResult<Vec<FileInfo>> {
        let path = normalize(path)?;
        let nodes = self.nodes.read();
        match nodes.get(&path) {
            None => return Err(FsError::not_found(path)),
            Some(node) if !node.is_dir() => return Err(FsError::not_a_directory(path)),
            Some(_) => {}
        }
        Ok(nodes
            .iter()
            .filter(|(p, _)| is_child(&path, p))
            .map(|(p, n)| n.info(p))
            .collect())
    }
}

/// Reserves room for `len` bytes, reporting allocation failure instead of
/// aborting.
fn grow(content: &mut Vec<u8>, len: usize, path: &str) -> FsResult<()> {
    content
        .try_reserve(len.saturating_sub(content.len()))
        .map_err(|e| FsError::io(format!("{path}: cannot grow to {len} bytes: {e}")))
}

#[async_trait]
impl FileSystem for MemFs {
    async fn write(&self, path: &str, data: &[u8], offset: i64, flags: WriteFlag) -> FsResult<u64> {
        let path = normalize(path)?;
        let placed_end = if offset >= 0 && !flags.contains(WriteFlag::APPEND) {
            let start = usize::try_from(offset).ok();
            let end = start.and_then(|s| s.checked_add(data.len())).filter(|e| *e <= MAX_FILE_SIZE);
            Some(end.ok_or_else(|| {
                FsError::invalid_argument(format!("{path}: write at offset {offset} exceeds {MAX_FILE_SIZE} bytes"))
            })?)
        } else {
            None
        };
        let mut nodes = self.nodes.write();

        match nodes.get(&path).map(Node::is_dir) {
            Some(true) => return Err(FsError::is_directory(path)),
            Some(false) if flags.contains(WriteFlag::CREATE | WriteFlag::EXCLUSIVE) => {
                return Err(FsError::already_exists(path));
            }
            Some(false) => {}
            None if !flags.contains(WriteFlag::CREATE) => return Err(FsError::not_found(path)),
            None => {
                Self::check_parent(&nodes, &path)?;
                nodes.insert(path.clone(), Node::file(Vec::new()));
            }
        }

        let node = nodes
            .get_mut(&path)
            .ok_or_else(|| FsError::internal(format!("{path}: vanished during write")))?;
        let Content::File(content) = &mut node.content else {
            return Err(FsError::is_directory(path));
        };

        if flags.contains(WriteFlag::TRUNCATE) {
            content.clear();
        }
        match placed_end {
            Some(end) => {
                let start = end - data.len();
                if content.len() < end {
                    grow(content, end, &path)?;
                    content.resize(end, 0);
                }
                content[start..end].copy_from_slice(data);
            }
            None => {
                if !flags.contains(WriteFlag::APPEND) {
                    content.clear();
                }
                let end = content
                    .len()
                    .checked_add(data.len())
                    .filter(|e| *e <= MAX_FILE_SIZE)
                    .ok_or_else(|| FsError::invalid_argument(format!("{path}: file would exceed {MAX_FILE_SIZE} bytes")))?;
                grow(content, end, &path)?;
                content.extend_from_slice(data);
            }
        }
        node.mod_time = now();
        Ok(data.len() as u64)
    }

    async fn create(&self, path: &str) -> FsResult<()> {
        let path = normalize(path)?;
        let mut nodes = self.nodes.write();
        match nodes.get_mut(&path) {
            Some(node) if node.is_dir() => Err(FsError::is_directory(path)),
            Some(node) => {
                node.content = Content::File(Vec::new());
                node.mod_time = now();
                Ok(())
            }
            None => {
                Self::check_parent(&nodes, &path)?;
                nodes.insert(path, Node::file(Vec::new()));
                Ok(())
            }
        }
    }

    async fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        let path = normalize(path)?;
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&path) {
            return Err(FsError::already_exists(path));
        }
        Self::check_parent(&nodes, &path)?;
        let mode = if mode == 0 { DEFAULT_DIR_MODE } else { mode };
        nodes.insert(path, Node::dir(mode));
        Ok(())
    }

    async fn remove(&self, path: &str, recursive: bool) -> FsResult<()> {
        let path = normalize(path)?;
        if path == "/" {
            return Err(FsError::invalid_argument("cannot remove the root directory"));
        }
        let mut nodes = self.nodes.write();
        let node = nodes.get(&path).ok_or_else(|| FsError::not_found(path.as_str()))?;
        if node.is_dir() {
            let has_children = nodes.keys().any(|p| is_child(&path, p));
            if has_children && !recursive {
                return Err(FsError::not_empty(path));
            }
            nodes.retain(|p, _| !is_within(&path, p));
        } else {
            nodes.remove(&path);
        }
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        let from = normalize(from)?;
        let to = normalize(to)?;
        if from == "/" || to == "/" {
            return Err(FsError::invalid_argument("cannot rename the root directory"));
        }
        if from == to {
            return Ok(());
        }
        let mut nodes = self.nodes.write();
        let source = nodes.get(&from).ok_or_else(|| FsError::not_found(from.as_str()))?;
        let moving_dir = source.is_dir();
        if moving_dir && is_within(&from, &to) {
            return Err(FsError::invalid_argument(format!("cannot move {from} into itself")));
        }
        Self::check_parent(&nodes, &to)?;
        match nodes.get(&to) {
            Some(target) if target.is_dir() => return Err(FsError::is_directory(to)),
            Some(_) if moving_dir => return Err(FsError::not_a_directory(to)),
            _ => {}
        }

        let moved: Vec<String> = nodes.keys().filter(|p| is_within(&from, p)).cloned().collect();
        for old in moved {
            if let Some(node) = nodes.remove(&old) {
                let new = format!("{to}{}", &old[from.len()..]);
                nodes.insert(new, node);
            }
        }
        Ok(())
    }

    async fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        let path = normalize(path)?;
        let mut nodes = self.nodes.write();
        let node = nodes.get_mut(&path).ok_or_else(|| FsError::not_found(path.as_str()))?;
        node.mode = mode;
        node.mod_time = now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agfs_types::ErrorKind;
    use pretty_assertions::assert_eq;

    fn create() -> WriteFlag {
        WriteFlag::CREATE
    }

    #[tokio::test]
    async fn huge_offsets_are_refused_without_allocating() {
        let fs = MemFs::new();
        let err = fs.write("/f", b"x", i64::MAX - 1, create()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        // Nothing was created by the rejected write.
        assert_eq!(fs.stat("/f").await.unwrap_err().kind, ErrorKind::NotFound);

        fs.write("/f", b"ab", -1, create()).await.unwrap();
        let err = fs.write("/f", b"x", MAX_FILE_SIZE as i64, WriteFlag::NONE).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert_eq!(fs.read("/f", 0, -1).await.unwrap(), b"ab");

        fs.write("/f", b"z", 3, WriteFlag::NONE).await.unwrap();
        assert_eq!(fs.read("/f", 0, -1).await.unwrap(), b"ab\0z");
    }

    #[tokio::test]
    async fn write_read_stat() {
        let fs = MemFs::new();
        assert_eq!(fs.write("/a.txt", b"hello", -1, create()).await.unwrap(), 5);
        assert_eq!(fs.read("/a.txt", 0, 5).await.unwrap(), b"hello");
        assert_eq!(fs.read("/a.txt", 1, -1).await.unwrap(), b"ello");
        assert!(fs.read("/a.txt", 10, 5).await.unwrap().is_empty());
        let info = fs.stat("/a.txt").await.unwrap();
        assert_eq!(info.name, "a.txt");
        assert_eq!(info.size, 5);
        assert!(!info.is_dir);
    }

    #[tokio::test]
    async fn write_flags() {
        let fs = MemFs::new();
        let err = fs.write("/f", b"x", -1, WriteFlag::NONE).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);

        fs.write("/f", b"abc", -1, create()).await.unwrap();
        fs.write("/f", b"de", -1, WriteFlag::APPEND).await.unwrap();
        assert_eq!(fs.read("/f", 0, -1).await.unwrap(), b"abcde");

        fs.write("/f", b"Z", 1, WriteFlag::NONE).await.unwrap();
        assert_eq!(fs.read("/f", 0, -1).await.unwrap(), b"aZcde");

        fs.write("/f", b"!", 7, WriteFlag::NONE).await.unwrap();
        assert_eq!(fs.read("/f", 0, -1).await.unwrap(), b"aZcde\0\0!");

        fs.write("/f", b"new", -1, WriteFlag::NONE).await.unwrap();
        assert_eq!(fs.read("/f", 0, -1).await.unwrap(), b"new");

        fs.write("/f", b"xy", 0, WriteFlag::TRUNCATE).await.unwrap();
        assert_eq!(fs.read("/f", 0, -1).await.unwrap(), b"xy");

        let err = fs
            .write("/f", b"x", -1, WriteFlag::CREATE | WriteFlag::EXCLUSIVE)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn directories() {
        let fs = MemFs::new();
        fs.mkdir("/d", 0o700).await.unwrap();
        fs.write("/d/one", b"1", -1, create()).await.unwrap();
        fs.mkdir("/d/sub", 0).await.unwrap();
        fs.write("/d/sub/two", b"2", -1, create()).await.unwrap();

        let names: Vec<String> = fs.readdir("/d").await.unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["one", "sub"]);
        assert_eq!(fs.stat("/d").await.unwrap().mode, 0o700);
        assert_eq!(fs.stat("/d/sub").await.unwrap().mode, 0o755);

        assert_eq!(fs.mkdir("/d", 0).await.unwrap_err().kind, ErrorKind::AlreadyExists);
        assert_eq!(fs.mkdir("/x/y", 0).await.unwrap_err().kind, ErrorKind::NotFound);
        assert_eq!(fs.read("/d", 0, -1).await.unwrap_err().kind, ErrorKind::IsDirectory);
        assert_eq!(fs.readdir("/d/one").await.unwrap_err().kind, ErrorKind::NotADirectory);
        assert_eq!(
            fs.write("/d/one/x", b"", -1, create()).await.unwrap_err().kind,
            ErrorKind::NotADirectory
        );
    }

    #[tokio::test]
    async fn remove_rules() {
        let fs = MemFs::new();
        fs.mkdir("/d", 0).await.unwrap();
        fs.write("/d/f", b"1", -1, create()).await.unwrap();
        fs.write("/dx", b"keep", -1, create()).await.unwrap();

        assert_eq!(fs.remove("/d", false).await.unwrap_err().kind, ErrorKind::NotEmpty);
        fs.remove("/d", true).await.unwrap();
        assert_eq!(fs.stat("/d/f").await.unwrap_err().kind, ErrorKind::NotFound);
        assert_eq!(fs.read("/dx", 0, -1).await.unwrap(), b"keep");

        assert_eq!(fs.remove("/", true).await.unwrap_err().kind, ErrorKind::InvalidArgument);
        assert_eq!(fs.remove("/nope", false).await.unwrap_err().kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn rename_moves_subtree() {
        let fs = MemFs::new();
        fs.mkdir("/a", 0).await.unwrap();
        fs.write("/a/f", b"data", -1, create()).await.unwrap();
        fs.rename("/a", "/b").await.unwrap();
        assert_eq!(fs.read("/b/f", 0, -1).await.unwrap(), b"data");
        assert_eq!(fs.stat("/a").await.unwrap_err().kind, ErrorKind::NotFound);

        assert_eq!(fs.rename("/b", "/b/c").await.unwrap_err().kind, ErrorKind::InvalidArgument);

        fs.write("/g", b"old", -1, create()).await.unwrap();
        fs.rename("/b/f", "/g").await.unwrap();
        assert_eq!(fs.read("/g", 0, -1).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn create_and_chmod() {
        let fs = MemFs::new();
        fs.write("/f", b"abc", -1, create()).await.unwrap();
        fs.create("/f").await.unwrap();
        assert_eq!(fs.stat("/f").await.unwrap().size, 0);
        fs.chmod("/f", 0o600).await.unwrap();
        assert_eq!(fs.stat("/f").await.unwrap().mode, 0o600);
        assert_eq!(fs.chmod("/none", 0o600).await.unwrap_err().kind, ErrorKind::NotFound);
    }
}
