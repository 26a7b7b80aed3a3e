//! our block filesystem
pub mod attr;
pub mod block_group;
pub mod error;
pub mod filekind;
pub mod fs_layout;
pub mod inode;
pub mod inode_cache;
pub mod superblock;
mod directory;
mod file_data;
mod fs_api_impl;
mod namespace;
pub use attr::{Credentials, SetAttr, TimeChange};
pub(crate) use block_group::*;
pub use directory::{validate_name, DirEntry, DIR_ENTRY_SIZE, MAX_NAME_LEN};
pub use error::{FsError, FsResult};
pub use filekind::*;
pub use fs_layout::{BlockFs, Layout};
pub use inode::*;
pub use inode_cache::{CachedInode, InodeCache};
pub use namespace::{LinkTarget, RenameFlags};
pub use superblock::*;

pub type InodeId = u64;

const FS_MAGIC: u32 = 0xb10c_f5;
pub const ROOT_INODE: InodeId = 1;
pub const INODE_SIZE: u32 = 256;
/// longest symlink target kept inside the inode record
pub const INLINE_TARGET_MAX: usize = 64;
pub const DIRECT_POINTERS: usize = 12;
