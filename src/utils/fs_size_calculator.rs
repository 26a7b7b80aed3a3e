//! This module contains functions to calculate the size of differennt fs components

use crate::fs::INODE_SIZE;

/// how many inodes (and how many data blocks) a single block group holds,
/// one bitmap block has `block_size * 8` bits
/// # Example
/// ```
/// use blockfs::utils::fs_size_calculator::items_per_group;
/// assert_eq!(items_per_group(512), 4096);
/// ```
pub const fn items_per_group(block_size: u32) -> u64 {
    block_size as u64 * 8
}

/// calculate needed bitmap size in bytes
/// # Example
/// ```
/// use blockfs::utils::fs_size_calculator::bitmap_size;
/// let inode_count = 100;
/// let bitmap_size = bitmap_size(inode_count);
/// assert_eq!(bitmap_size, 13);
/// ```
pub const fn bitmap_size(element_count: u32) -> u64 {
    element_count.div_ceil(8) as u64
}

/// calculate needed Inode Table size
/// # Example
/// ```
/// use blockfs::utils::fs_size_calculator::inode_table_size;
/// use blockfs::INODE_SIZE;
/// let block_size = 512;
/// let table_size = inode_table_size(block_size);
/// assert_eq!(table_size, 512 * 8 * INODE_SIZE as u64);
/// ```
pub const fn inode_table_size(block_size: u32) -> u64 {
    items_per_group(block_size) * INODE_SIZE as u64
}

/// calculate data table size
/// # Example
/// ```
/// use blockfs::utils::fs_size_calculator::data_table_size;
/// let block_size = 512;
/// let table_size = data_table_size(block_size);
/// assert_eq!(table_size, 2 << 20);
/// ```
pub const fn data_table_size(block_size: u32) -> u64 {
    items_per_group(block_size) * block_size as u64
}

/// caculate block group size
/// # Example
/// ```
/// use blockfs::utils::fs_size_calculator::block_group_size;
/// use blockfs::INODE_SIZE;
/// let block_size = 512;
/// let group_size = block_group_size(block_size);
/// assert_eq!(group_size, 2 * 512 + 512 * 8 * INODE_SIZE as u64 + 512 * 512 * 8);
/// ```
pub const fn block_group_size(block_size: u32) -> u64 {
    block_size as u64 + // inode bitmap
            block_size as u64 + // data bitmap
            inode_table_size(block_size) +
            data_table_size(block_size)
}

/// the smallest image able to hold a superblock and one block group
pub const fn min_image_size(block_size: u32) -> u64 {
    block_size as u64 + block_group_size(block_size)
}

/// how many whole block groups fit into an image of `image_size` bytes
pub const fn group_count(image_size: u64, block_size: u32) -> u32 {
    if image_size < block_size as u64 {
        return 0;
    }
    ((image_size - block_size as u64) / block_group_size(block_size)) as u32
}

/// the exact image length for `groups` block groups
pub const fn image_size(groups: u32, block_size: u32) -> u64 {
    block_size as u64 + groups as u64 * block_group_size(block_size)
}
