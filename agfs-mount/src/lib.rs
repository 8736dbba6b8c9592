//! AGFS mount router.
//!
//! Maps absolute paths onto providers by longest mounted prefix. Providers
//! are native ([`ProviderHandle::ReadOnly`], [`ProviderHandle::ReadWrite`])
//! or sandboxed plugins loaded through `agfs-plugin-host`; the router treats
//! them alike.
//!
//! ```no_run
//! # async fn demo() -> agfs_types::FsResult<()> {
//! use agfs_mount::{MountRouter, ProviderSpec, RouterConfig};
//! use agfs_types::MountConfig;
//!
//! let router = MountRouter::new(RouterConfig::default());
//! router.mount("/mem", ProviderSpec::native("memfs"), MountConfig::new()).await?;
//! router.write("/mem/a.txt", b"hello").await?;
//! assert_eq!(router.read("/mem/a.txt", 0, 5).await?, b"hello");
//! # Ok(())
//! # }
//! ```

mod inflight;
pub mod memfs;
pub mod path;
pub mod provider;
pub mod router;

pub use memfs::MemFs;
pub use provider::{ProviderFactory, ProviderHandle, ProviderKind, ProviderRegistry, ProviderSpec};
pub use router::{DEFAULT_UNMOUNT_GRACE, MountInfo, MountRouter, OpOutput, Operation, RouterConfig};
