use serde::{Deserialize, Serialize};

use crate::utils::{
    fs_size_calculator,
    time_util::{self, *},
    traits::{DigestInSelf, SerializeAndDigest},
};

use super::{FS_MAGIC, INLINE_TARGET_MAX};

type InodeCountType = u64;
type BlockCountType = u64;
/// The superblock of this filesystem
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SuperBlock {
    /// magic number
    pub magic: u32,
    /// data block size
    pub block_size: u32,
    pub created_at: TimeDurationStruct,
    pub modified_at: Option<TimeDurationStruct>,
    pub last_mounted_at: Option<TimeDurationStruct>,
    /// data block count over all groups
    pub block_count: BlockCountType,
    pub free_blocks_count: BlockCountType,
    /// inodes this filesystem hands out, at most one inode table worth per group
    pub inode_count: InodeCountType,
    /// longest symlink target stored inside the inode record
    pub inline_target_size: u8,
    pub free_inodes: InodeCountType,
    pub groups: u32,
    pub data_blocks_per_group: u32,
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
    /// to verify the integrity of this superblock
    /// intend to use a fast secure hash function,like [blake3]
    pub digest: [u8; 32],
}
impl SuperBlock {
    pub fn new(inode_count: u64, block_size: u32, groups: u32, uid: u32, gid: u32) -> Self {
        let per_group = fs_size_calculator::items_per_group(block_size);
        let total_block_count = per_group * groups as u64;
        // the inode tables can't hold more than this
        let inode_count = inode_count.min(per_group * groups as u64);
        Self {
            inode_count,
            block_size,
            groups,
            uid,
            gid,
            magic: FS_MAGIC,
            created_at: time_util::now(),
            modified_at: None,
            last_mounted_at: None,
            free_inodes: inode_count,
            inline_target_size: INLINE_TARGET_MAX as u8,
            block_count: total_block_count,
            free_blocks_count: total_block_count,
            data_blocks_per_group: per_group as u32, // 1 byte has 8 bits to store block index
            digest: [0u8; 32],
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == FS_MAGIC && self.block_size >= 512 && self.block_size.is_power_of_two()
    }
}
impl SuperBlock {
    pub fn update_last_mounted_at(&mut self) {
        self.last_mounted_at = Some(time_util::now());
    }

    pub fn update_modified_at(&mut self) {
        self.modified_at = Some(time_util::now());
    }
}

impl DigestInSelf for SuperBlock {
    fn digest_slot(&mut self) -> &mut [u8; 32] {
        &mut self.digest
    }
}

impl SerializeAndDigest for SuperBlock {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_superblock_counters() {
        let superblock = SuperBlock::new(1024, 512, 3, 0, 0);
        assert!(superblock.is_valid());
        assert_eq!(superblock.block_count, 512 * 8 * 3);
        assert_eq!(superblock.free_blocks_count, superblock.block_count);
        assert_eq!(superblock.free_inodes, 1024);
        assert_eq!(superblock.data_blocks_per_group, 4096);
    }

    #[test]
    fn test_inode_count_is_capped_by_tables() {
        let superblock = SuperBlock::new(1_000_000, 512, 1, 0, 0);
        assert_eq!(superblock.inode_count, 4096);
    }

    #[test]
    fn test_serialization_round_trip() {
        let mut superblock = SuperBlock::new(64, 1024, 1, 1000, 1000);
        let bytes = SerializeAndDigest::serialize(&mut superblock).unwrap();
        assert!(bytes.len() <= 512);
        let (restored, _) = <SuperBlock as SerializeAndDigest>::deserialize(&bytes).unwrap();
        assert_eq!(restored, superblock);
    }
}
