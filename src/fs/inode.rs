use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::utils::{
    time_util::{self, TimeDurationStruct},
    traits::{DigestInSelf, SerializeAndDigest},
};

use super::{filekind::FileKind, InodeId, DIRECT_POINTERS};

/// the on-disk inode record, one per slot of the inode table
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Inode {
    pub inode_number: InodeId,
    pub file_size: u64,
    /// permission bits together with the `S_IFMT` kind bits
    pub mode: u32,
    pub hard_links: u32,
    pub user_id: libc::uid_t,
    pub group_id: libc::gid_t,
    pub block_size: u32,
    /// data blocks owned by this inode, the indirect block included
    pub block_count: u32,
    pub file_kind: FileKind,
    pub created_at: TimeDurationStruct,
    pub accessed_at: TimeDurationStruct,
    pub modified_at: TimeDurationStruct,
    pub metadata_changed_at: TimeDurationStruct,
    pub direct_blocks: [u32; DIRECT_POINTERS],
    pub indirect_block: u32,
    /// short symlink targets live here instead of in a data block
    pub inline_data: Vec<u8>,
    pub digest: [u8; 32],
}

/// Convert [Inode] to [FileAttr](fuser::FileAttr)
impl From<&Inode> for fuser::FileAttr {
    fn from(attrs: &Inode) -> Self {
        fuser::FileAttr {
            ino: attrs.inode_number,
            size: attrs.file_size,
            // `blocks` is counted in 512 bytes units
            blocks: attrs.block_count as u64 * attrs.block_size as u64 / 512,
            atime: attrs.accessed_at.into(),
            mtime: attrs.modified_at.into(),
            ctime: attrs.metadata_changed_at.into(),
            crtime: attrs.created_at.into(),
            kind: attrs.file_kind.into(),
            perm: (attrs.mode & 0o7777) as u16,
            nlink: attrs.hard_links,
            uid: attrs.user_id,
            gid: attrs.group_id,
            rdev: 0,
            blksize: attrs.block_size,
            flags: 0,
        }
    }
}

impl DigestInSelf for Inode {
    fn digest_slot(&mut self) -> &mut [u8; 32] {
        &mut self.digest
    }
}
// This block is about serialization and deserialization
impl SerializeAndDigest for Inode {}

impl Inode {
    /// a fresh record with no names pointing at it yet,
    /// the kind is derived from `mode`
    pub fn new(index: InodeId, mode: u32, block_size: u32) -> Self {
        let now = time_util::now();
        Inode {
            inode_number: index,
            mode,
            hard_links: 0,
            file_kind: FileKind::from_mode(mode),
            created_at: now,
            accessed_at: now,
            modified_at: now,
            metadata_changed_at: now,
            block_size,
            // don't calculate digest and other fields now
            ..Inode::default()
        }
    }
}

/// This block is about file metadata operations
impl Inode {
    pub fn is_regular_file(&self) -> bool {
        self.file_kind == FileKind::RegularFile
    }

    pub fn is_dir(&self) -> bool {
        self.file_kind == FileKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.file_kind == FileKind::SymbolicLink
    }

    /// permission bits without the kind
    pub fn permissions(&self) -> u32 {
        self.mode & !libc::S_IFMT
    }

    /// content changed: mtime and ctime
    pub fn update_modified_at(&mut self) {
        let now = time_util::now();
        self.metadata_changed_at = now;
        self.modified_at = now;
    }

    /// metadata changed: ctime only
    pub fn update_changed_at(&mut self) {
        self.metadata_changed_at = time_util::now();
    }

    pub fn update_accessed_at(&mut self) {
        self.accessed_at = time_util::now();
    }
}

/// This block is about the block pointers
impl Inode {
    /// the allocated direct blocks, holes skipped
    pub fn direct_blocks(&self) -> Vec<u32> {
        self.direct_blocks
            .iter()
            .filter_map(|x| if *x != 0 { Some(*x) } else { None })
            .collect()
    }

    /// index of the first unused direct pointer
    pub fn next_free_direct(&self) -> Option<usize> {
        self.direct_blocks.iter().position(|b| *b == 0)
    }
}

impl Inode {
    /// Get the size of the inode in disk
    /// #Example
    /// ```
    /// use blockfs::Inode;
    /// let size = Inode::inode_size_in_disk();
    /// assert_eq!(size, 184);
    /// ```
    pub fn inode_size_in_disk() -> usize {
        let mut inode = Inode::default();
        let mut serialized_inode = Vec::new();
        let mut cursor = Cursor::new(&mut serialized_inode);
        inode
            .serialize_into(&mut cursor)
            .map(|_| serialized_inode.len())
            .unwrap_or_default()
    }
}
