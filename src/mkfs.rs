//! create our filesystem
use std::{fs::OpenOptions, path::Path};

use anyhow::{anyhow, Context};
use byte_unit::{Byte, ByteUnit};
use log::info;
use memmap2::MmapMut;

use crate::{fs::BlockFs, utils::fs_size_calculator};

/// create a new filesystem,given the path of the image file,image file size and block size,
/// # Params
/// - `image_file_path`: the path of the image file, created here
/// - `file_size`: the size of the image file
/// - `inode_count`: the number of inodes
/// - `block_size`: the block size of the filesystem
///
/// # Return
/// an [anyhow::Result] type to indicate whether the operation is successful
pub fn mkfs<P>(
    image_file_path: P,
    file_size: u64,
    inode_count: u64,
    block_size: u32,
) -> anyhow::Result<()>
where
    P: AsRef<Path>,
{
    if block_size < 512 || !block_size.is_power_of_two() {
        return Err(anyhow!(
            "block size must be a power of two of at least 512, not {block_size}"
        ));
    }
    // check if specified image_file_size is enough
    let space_needed = fs_size_calculator::min_image_size(block_size);
    if file_size < space_needed {
        return Err(anyhow!(
            "File size must be at least {} for block size {}",
            Byte::from_bytes(space_needed as _).get_appropriate_unit(true),
            Byte::from_bytes(block_size as _).get_adjusted_unit(ByteUnit::B),
        ));
    }

    // use `users` crate to get the uid and gid of this program
    let uid = users::get_effective_uid();
    let gid = users::get_effective_gid();

    // if file size is 1.3x block groups(for example),we will create 1 block group
    // and shrink the file size to fit 1x block group
    let groups = fs_size_calculator::group_count(file_size, block_size);
    let file_len = fs_size_calculator::image_size(groups, block_size);

    let image_file_path = image_file_path.as_ref();
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(image_file_path)
        .with_context(|| format!("can't create image {}", image_file_path.display()))?;
    // all other region are set to zero using `set_len` method
    file.set_len(file_len)?;

    // Safety
    // the file was created above and nobody else knows about it yet
    let file_mmap_area = unsafe { MmapMut::map_mut(&file)? };
    let fs = BlockFs::format(file_mmap_area, inode_count, block_size, uid, gid)?;
    let superblock = fs.superblock();
    info!(
        "created {} with {} block group(s), {} inodes and {} of data",
        image_file_path.display(),
        superblock.groups,
        superblock.inode_count,
        Byte::from_bytes((superblock.block_count * block_size as u64) as _)
            .get_appropriate_unit(true),
    );
    Ok(())
}
