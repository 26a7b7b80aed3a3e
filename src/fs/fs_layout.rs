//! what does our filesystem look like on the device
//!
//! it has the following layout:
//! - superblock, one block
//! - block groups, each one made of
//!   - inode bitmap, one block
//!   - data bitmap, one block
//!   - inode table, `block_size * 8` slots of [INODE_SIZE] bytes
//!   - `block_size * 8` data blocks
use std::{
    fs::OpenOptions,
    io::Cursor,
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::{debug, error, info, warn};
use memmap2::MmapMut;

use crate::{
    device::BlockDevice,
    utils::{
        fs_size_calculator,
        traits::SerializeAndDigest,
    },
};

use super::{
    attr::Credentials, CachedInode, FileKind, FsError, FsResult, Group, Inode, InodeCache,
    InodeId, SuperBlock, DIRECT_POINTERS, INLINE_TARGET_MAX, INODE_SIZE, ROOT_INODE,
};

const DIRECT_POINTERS_U64: u64 = DIRECT_POINTERS as u64;

/// byte positions of inodes and data blocks for a given block size
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub block_size: u32,
}

impl Layout {
    #[inline]
    fn per_group(&self) -> u64 {
        fs_size_calculator::items_per_group(self.block_size)
    }

    /// (group index, index inside the group starting at 0),
    /// inode numbers start at 1
    #[inline]
    pub fn inode_offsets(&self, index: InodeId) -> (u64, u64) {
        ((index - 1) / self.per_group(), (index - 1) % self.per_group())
    }

    #[inline]
    pub fn inode_seek_position(&self, index: InodeId) -> u64 {
        let (group_index, slot) = self.inode_offsets(index);
        Group::offset(self.block_size, group_index as u32)
            + 2 * self.block_size as u64 // inode bitmap and data bitmap
            + slot * INODE_SIZE as u64
    }

    /// same as [Layout::inode_offsets], for data block numbers
    #[inline]
    pub fn data_block_offsets(&self, block: u32) -> (u64, u64) {
        let block = block as u64;
        ((block - 1) / self.per_group(), (block - 1) % self.per_group())
    }

    #[inline]
    pub fn data_block_seek_position(&self, block: u32) -> u64 {
        let (group_index, slot) = self.data_block_offsets(block);
        Group::offset(self.block_size, group_index as u32)
            + 2 * self.block_size as u64 // inode bitmap and data bitmap
            + fs_size_calculator::inode_table_size(self.block_size)
            + slot * self.block_size as u64
    }

    /// global number of the `local`th (starting at 1) item of a group
    #[inline]
    fn global_index(&self, group_index: usize, local: usize) -> u64 {
        local as u64 + group_index as u64 * self.per_group()
    }
}

/// allocation state, guarded together so counters and bitmaps never disagree
#[derive(Debug)]
struct Meta {
    superblock: SuperBlock,
    groups: Vec<Group>,
}

/// a filesystem living on a [BlockDevice]
///
/// every operation takes `&self`, the locks inside are taken in this order:
/// rename lock, directory namespace locks (ascending inode number),
/// one inode record lock, the inode cache, allocation metadata, device.
pub struct BlockFs<D: BlockDevice = MmapMut> {
    device: Mutex<D>,
    meta: Mutex<Meta>,
    pub(crate) cache: InodeCache,
    rename_lock: Mutex<()>,
    layout: Layout,
}

impl BlockFs<MmapMut> {
    /// open an image file created by [mkfs](crate::mkfs::mkfs)
    /// # Params
    /// - `image_path`: the path of the image file,\
    /// something like `Block Device`,like **/dev/sda1**
    pub fn open_image<P>(image_path: P) -> FsResult<Self>
    where
        P: AsRef<Path>,
    {
        // open the "device" for read and write
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(image_path.as_ref())?;
        // Safety
        // the mapping stays valid as long as nobody shrinks the image file
        // while it is mounted
        let file_mmap_area = unsafe { MmapMut::map_mut(&file)? };
        BlockFs::open(file_mmap_area)
    }
}

impl<D: BlockDevice> BlockFs<D> {
    /// restore the filesystem state stored on `device`,
    /// creating the root directory "/" if it is missing
    pub fn open(device: D) -> FsResult<Self> {
        let superblock = SuperBlock::deserialize_from(&mut Cursor::new(device.as_ref()))
            .map_err(|e| FsError::corrupt(format!("superblock: {e}")))?;
        if !superblock.is_valid() {
            return Err(FsError::corrupt("bad superblock magic or block size"));
        }
        let needed = fs_size_calculator::image_size(superblock.groups, superblock.block_size);
        if device.len_bytes() < needed {
            return Err(FsError::corrupt(format!(
                "image holds {} bytes, its superblock describes {needed}",
                device.len_bytes()
            )));
        }
        let groups = Group::deserialize_from(
            Cursor::new(device.as_ref()),
            superblock.block_size,
            superblock.groups,
        )?;
        let layout = Layout {
            block_size: superblock.block_size,
        };
        let fs = BlockFs {
            device: Mutex::new(device),
            meta: Mutex::new(Meta { superblock, groups }),
            cache: InodeCache::default(),
            rename_lock: Mutex::new(()),
            layout,
        };
        fs.create_root()?;
        Ok(fs)
    }

    /// write an empty filesystem onto `device` and open it
    /// # Params
    /// - `inode_count`: the number of inodes
    /// - `block_size`: the block size of the filesystem
    /// - `uid`/`gid`: owner of the root directory
    pub fn format(
        mut device: D,
        inode_count: u64,
        block_size: u32,
        uid: u32,
        gid: u32,
    ) -> FsResult<Self> {
        if block_size < 512 || !block_size.is_power_of_two() {
            return Err(FsError::invalid(format!(
                "block size must be a power of two of at least 512, not {block_size}"
            )));
        }
        if inode_count == 0 {
            return Err(FsError::invalid("a filesystem needs at least one inode"));
        }
        let groups = fs_size_calculator::group_count(device.len_bytes(), block_size);
        if groups == 0 {
            return Err(FsError::invalid(format!(
                "image of {} bytes can't hold a block group, at least {} bytes needed",
                device.len_bytes(),
                fs_size_calculator::min_image_size(block_size)
            )));
        }

        let mut superblock = SuperBlock::new(inode_count, block_size, groups, uid, gid);
        let serialized = superblock
            .serialize()
            .map_err(|e| FsError::corrupt(format!("superblock: {e}")))?;
        let mut first_block = vec![0u8; block_size as usize];
        first_block[..serialized.len()].copy_from_slice(&serialized);
        device.write_at(0, &first_block)?;

        let empty_group = Group::empty(block_size);
        for idx in 0..groups {
            empty_group.serialize_into(Cursor::new(device.as_mut()), block_size, idx)?;
        }
        device.sync()?;
        info!(
            "formatted {} bytes: {groups} group(s) of {block_size} bytes blocks, {} inodes",
            device.len_bytes(),
            superblock.inode_count
        );
        BlockFs::open(device)
    }

    /// create root directory "/"
    fn create_root(&self) -> FsResult<()> {
        let (uid, gid) = {
            let meta = self.meta();
            let has_root = meta
                .groups
                .first()
                .map_or(false, |g| g.has_inode(ROOT_INODE as usize));
            // if already has root inode, do nothing
            if has_root {
                return Ok(());
            }
            (meta.superblock.uid, meta.superblock.gid)
        };
        let index = self.allocate_inode()?;
        if index != ROOT_INODE {
            return Err(FsError::corrupt(format!(
                "root inode index must be {ROOT_INODE}, not {index}"
            )));
        }
        let mut root = Inode::new(ROOT_INODE, libc::S_IFDIR | 0o755, self.block_size());
        root.user_id = uid;
        root.group_id = gid;
        // the root directory is its own parent
        self.add_dentry(&mut root, ROOT_INODE, ".".as_ref())?;
        self.add_dentry(&mut root, ROOT_INODE, "..".as_ref())?;
        root.hard_links = 2;
        self.write_record(&mut root)?;
        info!("root directory created");
        Ok(())
    }
}

/// get [SuperBlock], [Layout] and the device of this filesystem
impl<D: BlockDevice> BlockFs<D> {
    #[inline]
    fn meta(&self) -> MutexGuard<'_, Meta> {
        self.meta.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    fn device(&self) -> MutexGuard<'_, D> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub(crate) fn rename_lock(&self) -> MutexGuard<'_, ()> {
        self.rename_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn block_size(&self) -> u32 {
        self.layout.block_size
    }

    /// a copy of the current superblock
    pub fn superblock(&self) -> SuperBlock {
        self.meta().superblock.clone()
    }

    pub fn update_last_mounted_at(&self) -> FsResult<()> {
        let mut meta = self.meta();
        meta.superblock.update_last_mounted_at();
        self.persist_superblock(&mut meta)
    }

    /// the largest file the block map can address
    pub fn max_file_size(&self) -> u64 {
        (DIRECT_POINTERS_U64 + self.pointers_per_block()) * self.block_size() as u64
    }

    #[inline]
    fn pointers_per_block(&self) -> u64 {
        self.block_size() as u64 / std::mem::size_of::<u32>() as u64
    }

    fn persist_superblock(&self, meta: &mut Meta) -> FsResult<()> {
        let serialized = meta
            .superblock
            .serialize()
            .map_err(|e| FsError::corrupt(format!("superblock: {e}")))?;
        self.device().write_at(0, &serialized)?;
        Ok(())
    }

    fn persist_group(&self, meta: &mut Meta, group_index: usize) -> FsResult<()> {
        self.persist_superblock(meta)?;
        let mut device = self.device();
        meta.groups[group_index].serialize_into(
            Cursor::new(device.as_mut()),
            self.block_size(),
            group_index as u32,
        )?;
        Ok(())
    }

    /// write every dirty inode and the allocation state down to the device
    pub fn sync_all(&self) -> FsResult<()> {
        for cached in self.cache.resident() {
            self.sync_inode(&cached)?;
        }
        {
            let mut meta = self.meta();
            meta.superblock.update_modified_at();
            self.persist_superblock(&mut meta)?;
        }
        self.device().sync()?;
        let pruned = self.cache.prune();
        debug!("synced, {pruned} clean inode(s) dropped from the cache");
        Ok(())
    }
}

/// allocation of inodes and data blocks,
/// bitmaps and counters are written through on every change
impl<D: BlockDevice> BlockFs<D> {
    pub(crate) fn allocate_inode(&self) -> FsResult<InodeId> {
        let mut meta = self.meta();
        if meta.superblock.free_inodes == 0 {
            return Err(FsError::NoFreeInode);
        }
        let group_index = meta
            .groups
            .iter()
            .position(|g| g.free_inodes() > 0)
            .ok_or(FsError::NoFreeInode)?;
        let local = meta.groups[group_index]
            .allocate_inode()
            .ok_or(FsError::NoFreeInode)?;
        meta.superblock.free_inodes -= 1;
        if let Err(e) = self.persist_group(&mut meta, group_index) {
            meta.groups[group_index].release_inode(local);
            meta.superblock.free_inodes += 1;
            return Err(e);
        }
        let index = self.layout.global_index(group_index, local);
        debug!("inode {index} allocated");
        Ok(index)
    }

    /// free the on-disk slot of inode `index` for reuse
    pub(crate) fn release_inode_slot(&self, index: InodeId) -> FsResult<()> {
        let (group_index, slot) = self.layout.inode_offsets(index);
        let mut meta = self.meta();
        let group = meta
            .groups
            .get_mut(group_index as usize)
            .ok_or_else(|| FsError::corrupt(format!("inode {index} is out of range")))?;
        if !group.has_inode(slot as usize + 1) {
            return Err(FsError::corrupt(format!(
                "inode {index} released twice"
            )));
        }
        group.release_inode(slot as usize + 1);
        meta.superblock.free_inodes += 1;
        self.persist_group(&mut meta, group_index as usize)
    }

    /// a zero filled data block
    pub(crate) fn allocate_data_block(&self) -> FsResult<u32> {
        let mut meta = self.meta();
        let group_index = meta
            .groups
            .iter()
            .position(|g| g.free_data_blocks() > 0)
            .ok_or(FsError::NoSpace)?;
        let local = meta.groups[group_index]
            .allocate_data_block()
            .ok_or(FsError::NoSpace)?;
        meta.superblock.free_blocks_count -= 1;
        let block = self.layout.global_index(group_index, local) as u32;
        let zeroed = self.persist_group(&mut meta, group_index).and_then(|_| {
            let zeros = vec![0u8; self.block_size() as usize];
            self.device()
                .write_at(self.layout.data_block_seek_position(block), &zeros)
                .map_err(FsError::from)
        });
        if let Err(e) = zeroed {
            meta.groups[group_index].release_data_block(local);
            meta.superblock.free_blocks_count += 1;
            return Err(e);
        }
        Ok(block)
    }

    pub(crate) fn release_data_blocks(&self, blocks: &[u32]) -> FsResult<()> {
        if blocks.is_empty() {
            return Ok(());
        }
        let mut meta = self.meta();
        let mut touched = Vec::new();
        for block in blocks {
            let (group_index, slot) = self.layout.data_block_offsets(*block);
            let group_index = group_index as usize;
            let Some(group) = meta.groups.get_mut(group_index) else {
                warn!("data block {block} is out of range, not released");
                continue;
            };
            if !group.has_data_block(slot as usize + 1) {
                warn!("data block {block} is already free");
                continue;
            }
            group.release_data_block(slot as usize + 1);
            meta.superblock.free_blocks_count += 1;
            if !touched.contains(&group_index) {
                touched.push(group_index);
            }
        }
        for group_index in touched {
            self.persist_group(&mut meta, group_index)?;
        }
        Ok(())
    }
}

/// [Inode] records
impl<D: BlockDevice> BlockFs<D> {
    /// read the record of inode `index` from the inode table
    pub(crate) fn read_record(&self, index: InodeId) -> FsResult<Inode> {
        if index == 0 {
            return Err(FsError::NotFound);
        }
        let (group_index, slot) = self.layout.inode_offsets(index);
        let allocated = self
            .meta()
            .groups
            .get(group_index as usize)
            .map_or(false, |g| g.has_inode(slot as usize + 1));
        if !allocated {
            return Err(FsError::NotFound);
        }

        let mut buf = vec![0u8; INODE_SIZE as usize];
        self.device()
            .read_at(self.layout.inode_seek_position(index), &mut buf)?;
        // recover the inode
        let (inode, _) = Inode::deserialize(&buf)
            .map_err(|e| FsError::corrupt(format!("inode {index}: {e}")))?;
        Ok(inode)
    }

    pub(crate) fn write_record(&self, inode: &mut Inode) -> FsResult<()> {
        inode.block_size = self.block_size();
        let serialized = inode
            .serialize()
            .map_err(|e| FsError::corrupt(format!("inode {}: {e}", inode.inode_number)))?;
        if serialized.len() > INODE_SIZE as usize {
            return Err(FsError::corrupt(format!(
                "inode {} record of {} bytes overflows its slot",
                inode.inode_number,
                serialized.len()
            )));
        }
        self.device()
            .write_at(self.layout.inode_seek_position(inode.inode_number), &serialized)?;
        Ok(())
    }

    /// write a cached inode through and mark it clean
    pub(crate) fn write_inode(&self, cached: &CachedInode, record: &mut Inode) -> FsResult<()> {
        self.write_record(record)?;
        cached.mark_clean();
        Ok(())
    }

    /// write `cached` back if it has unsaved attribute changes
    pub fn sync_inode(&self, cached: &CachedInode) -> FsResult<()> {
        if !cached.is_dirty() {
            return Ok(());
        }
        let mut record = cached.write();
        // it was released meanwhile, its slot may belong to someone else
        if !self.cache.is_current(cached) {
            cached.mark_clean();
            return Ok(());
        }
        self.write_inode(cached, &mut record)
    }

    /// write back inode `index` and flush the device
    pub fn fsync(&self, index: InodeId) -> FsResult<()> {
        let inode = self.get(index)?;
        self.sync_inode(&inode)?;
        self.device().sync()?;
        Ok(())
    }

    /// apply an attribute change to a cached inode and write it through,
    /// when the write fails the change stays in memory, marked dirty.
    /// a released inode only changes in memory
    pub(crate) fn reflect<F, R>(&self, cached: &CachedInode, change: F) -> R
    where
        F: FnOnce(&mut Inode) -> R,
    {
        let mut record = cached.write();
        let result = change(&mut record);
        if !self.cache.is_current(cached) {
            debug!("inode {} is released, not written", cached.id());
            return result;
        }
        cached.mark_dirty();
        if let Err(e) = self.write_inode(cached, &mut record) {
            warn!("inode {} stays dirty: {e}", cached.id());
        }
        result
    }
}

/// the inode allocator and cache
impl<D: BlockDevice> BlockFs<D> {
    /// the single cached representative of inode `index`
    pub fn get(&self, index: InodeId) -> FsResult<Arc<CachedInode>> {
        self.cache
            .get_or_load(index, |index| self.read_record(index))
    }

    /// allocate and write a fresh inode with no links yet.
    ///
    /// the caller bumps `hard_links` once a directory entry names it,
    /// until then [BlockFs::release] reclaims it
    pub fn new_inode(
        &self,
        parent: &CachedInode,
        mode: u32,
        inline_data: &[u8],
        owner: &Credentials,
    ) -> FsResult<Arc<CachedInode>> {
        let kind = FileKind::from_mode(mode);
        if kind == FileKind::Unknown {
            return Err(FsError::invalid(format!("unsupported file type in mode {mode:o}")));
        }
        if !inline_data.is_empty() && !kind.supports_symlink_target() {
            return Err(FsError::invalid("only symbolic links carry inline data"));
        }
        if inline_data.len() > self.block_size() as usize {
            return Err(FsError::NameTooLong {
                len: inline_data.len(),
                max: self.block_size() as usize,
            });
        }

        let index = self.allocate_inode()?;
        let mut record = Inode::new(index, mode, self.block_size());
        record.user_id = owner.uid;
        record.group_id = owner.gid;
        {
            let parent = parent.read();
            // set-group-ID directories hand their group down
            if parent.mode & libc::S_ISGID != 0 {
                record.group_id = parent.group_id;
                if kind == FileKind::Directory {
                    record.mode |= libc::S_ISGID;
                }
            }
        }

        let mut built = false;
        let cached = self.cache.insert_new(index, || {
            built = true;
            let seeded = self
                .seed_payload(&mut record, inline_data)
                .and_then(|_| self.write_record(&mut record));
            if let Err(e) = seeded {
                self.discard_record(&mut record);
                return Err(e);
            }
            Ok(record)
        });
        match cached {
            Ok(cached) => {
                debug!("new inode {index} of kind {kind:?} in directory {}", parent.id());
                Ok(cached)
            }
            Err(e) => {
                if !built {
                    if let Err(leak) = self.release_inode_slot(index) {
                        error!("inode {index} leaked: {leak}");
                    }
                }
                Err(e)
            }
        }
    }

    fn seed_payload(&self, record: &mut Inode, inline_data: &[u8]) -> FsResult<()> {
        if !record.is_symlink() {
            return Ok(());
        }
        record.file_size = inline_data.len() as u64;
        if inline_data.len() <= INLINE_TARGET_MAX {
            record.inline_data = inline_data.to_vec();
            return Ok(());
        }
        let block = self.ensure_block(record, 0)?;
        self.write_block(block, 0, inline_data)
    }

    /// undo [BlockFs::new_inode] for a record that never reached the cache
    fn discard_record(&self, record: &mut Inode) {
        let released = self
            .release_all_blocks(record)
            .and_then(|_| self.release_inode_slot(record.inode_number));
        if let Err(e) = released {
            error!("inode {} leaked: {e}", record.inode_number);
        }
    }

    /// free the data blocks and the slot of an inode nobody names any more,
    /// and drop it from the cache
    pub fn release(&self, cached: &CachedInode) -> FsResult<()> {
        let mut record = cached.write();
        let released = self.cache.evict_with(cached, || {
            record.hard_links = 0;
            self.release_all_blocks(&mut record)?;
            self.release_inode_slot(cached.id())
        })?;
        if !released {
            // someone else released it already
            return Ok(());
        }
        cached.mark_clean();
        debug!("inode {} released", cached.id());
        Ok(())
    }
}

/// data blocks and the block map: direct pointers, then one indirect block
impl<D: BlockDevice> BlockFs<D> {
    fn check_block(&self, block: u32) -> FsResult<()> {
        let total = self.meta().superblock.block_count;
        if block == 0 || block as u64 > total {
            return Err(FsError::corrupt(format!("data block {block} is out of range")));
        }
        Ok(())
    }

    pub(crate) fn read_block(&self, block: u32) -> FsResult<Vec<u8>> {
        self.check_block(block)?;
        let mut data = vec![0u8; self.block_size() as usize];
        self.device()
            .read_at(self.layout.data_block_seek_position(block), &mut data)?;
        Ok(data)
    }

    pub(crate) fn read_from_block(&self, block: u32, offset: usize, buf: &mut [u8]) -> FsResult<()> {
        self.check_block(block)?;
        if offset + buf.len() > self.block_size() as usize {
            return Err(FsError::invalid("read crosses a block boundary"));
        }
        self.device().read_at(
            self.layout.data_block_seek_position(block) + offset as u64,
            buf,
        )?;
        Ok(())
    }

    /// write `data` into `block` starting `offset` bytes in
    pub(crate) fn write_block(&self, block: u32, offset: usize, data: &[u8]) -> FsResult<()> {
        self.check_block(block)?;
        if offset + data.len() > self.block_size() as usize {
            return Err(FsError::invalid("write crosses a block boundary"));
        }
        self.device().write_at(
            self.layout.data_block_seek_position(block) + offset as u64,
            data,
        )?;
        Ok(())
    }

    fn read_pointer(&self, indirect: u32, index: u64) -> FsResult<u32> {
        let mut data = [0u8; 4];
        self.read_from_block(indirect, index as usize * 4, &mut data)?;
        Ok(u32::from_le_bytes(data))
    }

    fn write_pointer(&self, indirect: u32, index: u64, block: u32) -> FsResult<()> {
        self.write_block(indirect, index as usize * 4, &block.to_le_bytes())
    }

    /// the data block holding the `index`th block of `inode`, `None` for a hole
    pub(crate) fn block_at(&self, inode: &Inode, index: u64) -> FsResult<Option<u32>> {
        let block = if index < DIRECT_POINTERS_U64 {
            inode.direct_blocks[index as usize]
        } else if index < DIRECT_POINTERS_U64 + self.pointers_per_block() {
            if inode.indirect_block == 0 {
                0
            } else {
                self.read_pointer(inode.indirect_block, index - DIRECT_POINTERS_U64)?
            }
        } else {
            return Err(FsError::invalid(format!(
                "block {index} is beyond the largest file size"
            )));
        };
        Ok((block != 0).then_some(block))
    }

    /// like [BlockFs::block_at], allocating the block when it is a hole
    pub(crate) fn ensure_block(&self, inode: &mut Inode, index: u64) -> FsResult<u32> {
        if let Some(block) = self.block_at(inode, index)? {
            return Ok(block);
        }
        if index < DIRECT_POINTERS_U64 {
            let block = self.allocate_data_block()?;
            inode.direct_blocks[index as usize] = block;
            inode.block_count += 1;
            return Ok(block);
        }

        let fresh_indirect = inode.indirect_block == 0;
        if fresh_indirect {
            inode.indirect_block = self.allocate_data_block()?;
            inode.block_count += 1;
        }
        let linked = self.allocate_data_block().and_then(|block| {
            match self.write_pointer(inode.indirect_block, index - DIRECT_POINTERS_U64, block) {
                Ok(()) => Ok(block),
                Err(e) => {
                    self.release_data_blocks(&[block])?;
                    Err(e)
                }
            }
        });
        match linked {
            Ok(block) => {
                inode.block_count += 1;
                Ok(block)
            }
            Err(e) => {
                if fresh_indirect {
                    self.release_data_blocks(&[inode.indirect_block])?;
                    inode.indirect_block = 0;
                    inode.block_count -= 1;
                }
                Err(e)
            }
        }
    }

    /// free every block past `new_size` bytes
    pub(crate) fn truncate_blocks(&self, inode: &mut Inode, new_size: u64) -> FsResult<()> {
        let block_size = self.block_size() as u64;
        let keep = new_size.div_ceil(block_size);
        let mut freed = Vec::new();

        for pointer in inode.direct_blocks.iter_mut().skip(keep as usize) {
            if *pointer != 0 {
                freed.push(*pointer);
                *pointer = 0;
            }
        }
        if inode.indirect_block != 0 {
            let first = keep.saturating_sub(DIRECT_POINTERS_U64);
            for index in first..self.pointers_per_block() {
                let block = self.read_pointer(inode.indirect_block, index)?;
                if block == 0 {
                    continue;
                }
                freed.push(block);
                if first > 0 {
                    self.write_pointer(inode.indirect_block, index, 0)?;
                }
            }
            if first == 0 {
                freed.push(inode.indirect_block);
                inode.indirect_block = 0;
            }
        }

        // a later extension must read zeros past the old end
        let tail = (new_size % block_size) as usize;
        if tail != 0 {
            if let Some(block) = self.block_at(inode, new_size / block_size)? {
                self.write_block(block, tail, &vec![0u8; block_size as usize - tail])?;
            }
        }

        inode.block_count = inode.block_count.saturating_sub(freed.len() as u32);
        self.release_data_blocks(&freed)
    }

    pub(crate) fn release_all_blocks(&self, inode: &mut Inode) -> FsResult<()> {
        self.truncate_blocks(inode, 0)
    }
}

impl BlockFs<Vec<u8>> {
    /// a synced copy of an in-memory image, to be opened again
    pub fn snapshot_image(&self) -> FsResult<Vec<u8>> {
        self.sync_all()?;
        Ok(self.device().clone())
    }
}

impl<D: BlockDevice> Drop for BlockFs<D> {
    fn drop(&mut self) {
        if let Err(e) = self.sync_all() {
            error!("final sync failed: {e}");
        }
    }
}
