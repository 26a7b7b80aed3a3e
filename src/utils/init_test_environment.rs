use std::ffi::OsString;

use crate::fs::{BlockFs, Credentials, InodeId, ROOT_INODE};

use super::fs_size_calculator;

pub const TEST_BLOCK_SIZE: u32 = 512;
pub const ROOT: InodeId = ROOT_INODE;
pub const USER: Credentials = Credentials {
    uid: 1000,
    gid: 1000,
};

/// a freshly formatted single group filesystem living in memory
pub fn test_fs(inode_count: u64) -> BlockFs<Vec<u8>> {
    let image = vec![0u8; fs_size_calculator::min_image_size(TEST_BLOCK_SIZE) as usize];
    BlockFs::format(image, inode_count, TEST_BLOCK_SIZE, USER.uid, USER.gid)
        .expect("Failed to format the test image")
}

/// sorted entry names of directory `dir`
pub fn names_of(fs: &BlockFs<Vec<u8>>, dir: InodeId) -> Vec<OsString> {
    let mut names: Vec<_> = fs
        .readdir(dir)
        .expect("Failed to read the directory")
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    names.sort();
    names
}
