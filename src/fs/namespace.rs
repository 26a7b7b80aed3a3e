//! name level operations: create, lookup, link, unlink, mkdir, rmdir,
//! rename, symlink and readlink.
//!
//! every operation takes the namespace lock of the directories it changes.
//! operations touching more than one inode lock them in ascending inode
//! number and check their lookups again once everything is locked.
//! a structural step that fails undoes the steps before it, so a failed
//! operation leaves the tree as it found it.
use std::ffi::OsStr;
use std::ops::Deref;
use std::os::unix::ffi::OsStrExt;
use std::sync::{Arc, MutexGuard};

use bitflags::bitflags;
use log::{debug, error};
use smallvec::{smallvec, SmallVec};

use crate::device::BlockDevice;
use crate::utils::time_util::TimeDurationStruct;

use super::directory::is_dot_or_dotdot;
use super::{
    validate_name, BlockFs, CachedInode, Credentials, DirEntry, FileKind, FsError, FsResult,
    Inode, InodeId, SetAttr, INLINE_TARGET_MAX, ROOT_INODE,
};

bitflags! {
    /// behaviour switches of [BlockFs::rename]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RenameFlags: u32 {
        /// fail with `AlreadyExists` instead of replacing the target
        const NOREPLACE = libc::RENAME_NOREPLACE;
        /// swap source and target, both must exist
        const EXCHANGE = libc::RENAME_EXCHANGE;
    }
}

/// the target of a symbolic link, the link stays cached while this lives
#[derive(Debug)]
pub struct LinkTarget {
    inode: Arc<CachedInode>,
    target: Vec<u8>,
}

impl LinkTarget {
    pub fn inode(&self) -> InodeId {
        self.inode.id()
    }

    pub fn as_os_str(&self) -> &OsStr {
        OsStr::from_bytes(&self.target)
    }
}

impl Deref for LinkTarget {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.target
    }
}

/// namespace locks of `inodes`, taken in ascending inode number, each once
fn lock_in_order<'a>(inodes: &[&'a CachedInode]) -> SmallVec<[MutexGuard<'a, ()>; 4]> {
    let mut ordered: SmallVec<[&CachedInode; 4]> = inodes.iter().copied().collect();
    ordered.sort_by_key(|inode| inode.id());
    ordered.dedup_by_key(|inode| inode.id());
    ordered.into_iter().map(|inode| inode.lock_namespace()).collect()
}

/// lookups and attributes
impl<D: BlockDevice> BlockFs<D> {
    /// inode `index`, which has to be a directory
    fn directory(&self, index: InodeId) -> FsResult<Arc<CachedInode>> {
        let dir = self.get(index)?;
        if !dir.kind().supports_lookup() {
            return Err(FsError::NotADirectory(index));
        }
        Ok(dir)
    }

    /// a removed directory takes no new entries
    fn ensure_live(dir: &CachedInode) -> FsResult<()> {
        if dir.hard_links() == 0 {
            return Err(FsError::NotFound);
        }
        Ok(())
    }

    /// the inode `name` refers to in directory `parent`, `None` when absent
    pub fn lookup(&self, parent: InodeId, name: &OsStr) -> FsResult<Option<Arc<CachedInode>>> {
        let dir = self.directory(parent)?;
        let _namespace = dir.lock_namespace();
        let Some(index) = self.find_dentry(&dir.read(), name)? else {
            return Ok(None);
        };
        let inode = self.get(index)?;
        if inode.hard_links() == 0 {
            return Err(FsError::corrupt(format!(
                "{name:?} in directory {parent} names unlinked inode {index}"
            )));
        }
        Ok(Some(inode))
    }

    pub fn getattr(&self, index: InodeId) -> FsResult<Inode> {
        Ok(self.get(index)?.snapshot())
    }

    /// apply `changes` to inode `index` on behalf of `cred`,
    /// returns the attributes afterwards
    pub fn setattr(&self, index: InodeId, changes: &SetAttr, cred: &Credentials) -> FsResult<Inode> {
        let inode = self.get(index)?;
        let mut record = inode.write();
        super::attr::check(&record, changes, cred, self.max_file_size())?;
        // work on a copy, the cached record only changes once everything worked
        let mut updated = record.clone();
        super::attr::apply(&mut updated, changes, cred);
        match changes.size {
            Some(size) if size != updated.file_size => {
                if size < updated.file_size {
                    self.truncate_blocks(&mut updated, size)?;
                }
                updated.file_size = size;
                updated.update_modified_at();
                // the block map changed, don't leave it to a later sync
                if let Err(e) = self.write_inode(&inode, &mut updated) {
                    // released blocks must not stay reachable
                    record.direct_blocks = updated.direct_blocks;
                    record.indirect_block = updated.indirect_block;
                    record.block_count = updated.block_count;
                    record.file_size = record.file_size.min(size);
                    inode.mark_dirty();
                    return Err(e);
                }
            }
            _ => inode.mark_dirty(),
        }
        *record = updated;
        Ok(record.clone())
    }

    /// every entry of directory `index`, `.` and `..` included
    pub fn readdir(&self, index: InodeId) -> FsResult<Vec<DirEntry>> {
        let dir = self.directory(index)?;
        let _namespace = dir.lock_namespace();
        let entries = self.read_dentries(&dir.read())?;
        dir.write().update_accessed_at();
        dir.mark_dirty();
        Ok(entries)
    }
}

/// creating names
impl<D: BlockDevice> BlockFs<D> {
    /// a new empty regular file `name` in directory `parent`
    pub fn create(
        &self,
        parent: InodeId,
        name: &OsStr,
        mode: u32,
        cred: &Credentials,
    ) -> FsResult<Arc<CachedInode>> {
        let mode = libc::S_IFREG | cred.creation_mode(mode);
        self.make_node(parent, name, mode, &[], cred)
    }

    /// a new empty directory `name` in directory `parent`
    pub fn mkdir(
        &self,
        parent: InodeId,
        name: &OsStr,
        mode: u32,
        cred: &Credentials,
    ) -> FsResult<Arc<CachedInode>> {
        let mode = libc::S_IFDIR | cred.creation_mode(mode);
        self.make_node(parent, name, mode, &[], cred)
    }

    /// a new symbolic link `name` in directory `parent` pointing at `target`
    pub fn symlink(
        &self,
        parent: InodeId,
        name: &OsStr,
        target: &OsStr,
        cred: &Credentials,
    ) -> FsResult<Arc<CachedInode>> {
        if target.is_empty() {
            return Err(FsError::invalid("empty symlink target"));
        }
        self.make_node(parent, name, libc::S_IFLNK | 0o777, target.as_bytes(), cred)
    }

    fn make_node(
        &self,
        parent: InodeId,
        name: &OsStr,
        mode: u32,
        payload: &[u8],
        cred: &Credentials,
    ) -> FsResult<Arc<CachedInode>> {
        validate_name(name)?;
        let dir = self.directory(parent)?;
        let _namespace = dir.lock_namespace();
        Self::ensure_live(&dir)?;
        if self.find_dentry(&dir.read(), name)?.is_some() {
            return Err(FsError::AlreadyExists);
        }

        let inode = self.new_inode(&dir, mode, payload, cred)?;
        let links = if inode.kind() == FileKind::Directory {
            let seeded = self.reflect(&inode, |record| {
                self.add_dentry(record, inode.id(), ".".as_ref())?;
                self.add_dentry(record, dir.id(), "..".as_ref())
            });
            if let Err(e) = seeded {
                self.discard(&inode);
                return Err(e);
            }
            // its entry in the parent and its own `.`
            2
        } else {
            1
        };

        let linked = self.reflect(&dir, |record| {
            self.add_dentry(record, inode.id(), name)?;
            record.update_modified_at();
            Ok::<_, FsError>(record.metadata_changed_at)
        });
        let changed_at = match linked {
            Ok(time) => time,
            Err(e) => {
                self.discard(&inode);
                return Err(e);
            }
        };
        self.reflect(&inode, |record| {
            record.hard_links = links;
            record.metadata_changed_at = changed_at;
        });
        debug!("{name:?} -> inode {} created in directory {parent}", inode.id());
        Ok(inode)
    }

    /// give inode `index` one more name, `new_name` in directory `new_parent`
    pub fn link(&self, index: InodeId, new_parent: InodeId, new_name: &OsStr) -> FsResult<Arc<CachedInode>> {
        validate_name(new_name)?;
        let inode = self.get(index)?;
        if !inode.kind().supports_link_management() {
            return Err(FsError::PermissionDenied);
        }
        let dir = self.directory(new_parent)?;
        let _namespace = dir.lock_namespace();
        Self::ensure_live(&dir)?;
        if inode.hard_links() == 0 {
            return Err(FsError::NotFound);
        }

        let changed_at = self.reflect(&dir, |record| {
            self.add_dentry(record, index, new_name)?;
            record.update_modified_at();
            Ok::<_, FsError>(record.metadata_changed_at)
        })?;
        let linked = self.reflect(&inode, |record| {
            // the last name went away in between
            if record.hard_links == 0 {
                return false;
            }
            record.hard_links += 1;
            record.metadata_changed_at = changed_at;
            true
        });
        if !linked {
            self.restore_entry(&dir, new_name, None);
            return Err(FsError::NotFound);
        }
        Ok(inode)
    }

    /// undo [BlockFs::new_inode] for an inode no entry refers to
    fn discard(&self, inode: &CachedInode) {
        if let Err(e) = self.release(inode) {
            error!("inode {} leaked: {e}", inode.id());
        }
    }

    /// put `name` back the way it was: pointing at `previous`, or absent
    fn restore_entry(&self, dir: &CachedInode, name: &OsStr, previous: Option<InodeId>) {
        let restored = self.reflect(dir, |record| match previous {
            Some(index) => match self.replace_dentry(record, name, index) {
                Err(FsError::NotFound) => self.add_dentry(record, index, name),
                other => other.map(|_| ()),
            },
            None => self.remove_dentry(record, name).map(|_| ()),
        });
        if let Err(e) = restored {
            error!("can't restore {name:?} in directory {}: {e}", dir.id());
        }
    }
}

/// removing names
impl<D: BlockDevice> BlockFs<D> {
    /// one name less for `inode`, released once nothing names it.
    /// directories only ever have one name left to drop
    fn drop_link(&self, inode: &CachedInode, changed_at: TimeDurationStruct) -> FsResult<()> {
        let remaining = self.reflect(inode, |record| {
            record.hard_links = if record.is_dir() {
                0
            } else {
                record.hard_links.saturating_sub(1)
            };
            record.metadata_changed_at = changed_at;
            record.hard_links
        });
        if remaining == 0 {
            self.release(inode)?;
        }
        Ok(())
    }

    /// remove the name `name` of a non-directory from directory `parent`
    pub fn unlink(&self, parent: InodeId, name: &OsStr) -> FsResult<()> {
        let dir = self.directory(parent)?;
        let _namespace = dir.lock_namespace();
        let index = self
            .find_dentry(&dir.read(), name)?
            .ok_or(FsError::NotFound)?;
        let target = self.get(index)?;
        if !target.kind().supports_link_management() {
            return Err(FsError::IsADirectory(index));
        }

        let changed_at = self.reflect(&dir, |record| {
            self.remove_dentry(record, name)?;
            record.update_modified_at();
            Ok::<_, FsError>(record.metadata_changed_at)
        })?;
        self.drop_link(&target, changed_at)?;
        debug!("{name:?} unlinked from directory {parent}");
        Ok(())
    }

    /// remove the empty directory `name` from directory `parent`
    pub fn rmdir(&self, parent: InodeId, name: &OsStr) -> FsResult<()> {
        if is_dot_or_dotdot(name) {
            return Err(FsError::invalid(format!("can't remove {name:?}")));
        }
        let dir = self.directory(parent)?;
        loop {
            let index = {
                let _namespace = dir.lock_namespace();
                self.find_dentry(&dir.read(), name)?
                    .ok_or(FsError::NotFound)?
            };
            let target = self.get(index)?;
            if !target.kind().supports_lookup() {
                return Err(FsError::NotADirectory(index));
            }

            let _namespaces = lock_in_order(&[&*dir, &*target]);
            if self.find_dentry(&dir.read(), name)? != Some(index) {
                debug!("{name:?} in directory {parent} changed while locking, retrying");
                continue;
            }
            if !self.is_empty_dir(&target.read())? {
                return Err(FsError::NotEmpty(index));
            }
            let changed_at = self.reflect(&dir, |record| {
                self.remove_dentry(record, name)?;
                record.update_modified_at();
                Ok::<_, FsError>(record.metadata_changed_at)
            })?;
            self.drop_link(&target, changed_at)?;
            debug!("directory {name:?} removed from directory {parent}");
            return Ok(());
        }
    }
}

/// rename
impl<D: BlockDevice> BlockFs<D> {
    /// move `old_name` of `old_parent` to `new_name` of `new_parent`,
    /// replacing whatever `new_name` named unless `flags` says otherwise
    pub fn rename(
        &self,
        old_parent: InodeId,
        old_name: &OsStr,
        new_parent: InodeId,
        new_name: &OsStr,
        flags: RenameFlags,
    ) -> FsResult<()> {
        if flags.contains(RenameFlags::NOREPLACE | RenameFlags::EXCHANGE) {
            return Err(FsError::invalid("NOREPLACE and EXCHANGE exclude each other"));
        }
        if is_dot_or_dotdot(old_name) || is_dot_or_dotdot(new_name) {
            return Err(FsError::invalid("can't rename `.` or `..`"));
        }
        validate_name(new_name)?;
        let old_dir = self.directory(old_parent)?;
        let new_dir = self.directory(new_parent)?;
        // moves between directories may change the shape of the tree
        let _tree = (old_parent != new_parent).then(|| self.rename_lock());

        loop {
            let moved_index = {
                let _namespace = old_dir.lock_namespace();
                self.find_dentry(&old_dir.read(), old_name)?
                    .ok_or(FsError::NotFound)?
            };
            let victim_index = {
                let _namespace = new_dir.lock_namespace();
                self.find_dentry(&new_dir.read(), new_name)?
            };
            let moved = self.get(moved_index)?;
            let victim = victim_index.map(|index| self.get(index)).transpose()?;

            let mut involved: SmallVec<[&CachedInode; 4]> = smallvec![&*old_dir, &*new_dir];
            if moved.kind().supports_lookup() {
                involved.push(&moved);
            }
            if let Some(victim) = victim.as_deref() {
                if victim.kind().supports_lookup() {
                    involved.push(victim);
                }
            }
            let _namespaces = lock_in_order(&involved);
            if self.find_dentry(&old_dir.read(), old_name)? != Some(moved_index)
                || self.find_dentry(&new_dir.read(), new_name)? != victim_index
            {
                debug!("rename of {old_name:?} raced with another change, retrying");
                continue;
            }
            Self::ensure_live(&new_dir)?;

            let request = Move {
                old_dir: &old_dir,
                old_name,
                new_dir: &new_dir,
                new_name,
                moved: &moved,
            };
            return if flags.contains(RenameFlags::EXCHANGE) {
                let victim = victim.as_deref().ok_or(FsError::NotFound)?;
                self.exchange_locked(&request, victim)
            } else {
                if victim.is_some() && flags.contains(RenameFlags::NOREPLACE) {
                    return Err(FsError::AlreadyExists);
                }
                self.rename_locked(&request, victim.as_deref())
            };
        }
    }

    /// fail if `ancestor` is `start` or one of its parents,
    /// a directory can't move below itself
    fn check_not_ancestor(&self, ancestor: InodeId, start: InodeId) -> FsResult<()> {
        let limit = self.superblock().inode_count;
        let mut current = start;
        for _ in 0..=limit {
            if current == ancestor {
                return Err(FsError::invalid("can't move a directory below itself"));
            }
            if current == ROOT_INODE {
                return Ok(());
            }
            let dir = self.get(current)?;
            let parent = self
                .find_dentry(&dir.read(), "..".as_ref())?
                .ok_or_else(|| FsError::corrupt(format!("directory {current} has no `..`")))?;
            if parent == current {
                return Ok(());
            }
            current = parent;
        }
        Err(FsError::corrupt("cycle in the directory tree"))
    }

    fn rename_locked(&self, request: &Move<'_>, victim: Option<&CachedInode>) -> FsResult<()> {
        let Move {
            old_dir,
            old_name,
            new_dir,
            new_name,
            moved,
        } = *request;
        let moving_dir = moved.kind().supports_lookup();
        if let Some(victim) = victim {
            // both names already refer to the same inode
            if victim.id() == moved.id() {
                return Ok(());
            }
            match (moving_dir, victim.kind().supports_lookup()) {
                (true, false) => return Err(FsError::NotADirectory(victim.id())),
                (false, true) => return Err(FsError::IsADirectory(victim.id())),
                (true, true) if !self.is_empty_dir(&victim.read())? => {
                    return Err(FsError::NotEmpty(victim.id()))
                }
                _ => {}
            }
        }
        let reparent = moving_dir && old_dir.id() != new_dir.id();
        if reparent {
            self.check_not_ancestor(moved.id(), new_dir.id())?;
        }

        let previous = victim.map(|victim| victim.id());
        self.reflect(new_dir, |record| match previous {
            Some(_) => self.replace_dentry(record, new_name, moved.id()).map(|_| ()),
            None => self.add_dentry(record, moved.id(), new_name),
        })?;
        let removed = self.reflect(old_dir, |record| self.remove_dentry(record, old_name));
        if let Err(e) = removed {
            self.restore_entry(new_dir, new_name, previous);
            return Err(e);
        }
        if reparent {
            let updated = self.reflect(moved, |record| {
                self.replace_dentry(record, "..".as_ref(), new_dir.id())
            });
            if let Err(e) = updated {
                self.restore_entry(old_dir, old_name, Some(moved.id()));
                self.restore_entry(new_dir, new_name, previous);
                return Err(e);
            }
        }

        let changed_at = self.touch_directories(old_dir, new_dir);
        self.reflect(moved, |record| record.metadata_changed_at = changed_at);
        if let Some(victim) = victim {
            self.drop_link(victim, changed_at)?;
        }
        debug!(
            "{old_name:?} in directory {} renamed to {new_name:?} in directory {}",
            old_dir.id(),
            new_dir.id()
        );
        Ok(())
    }

    fn exchange_locked(&self, request: &Move<'_>, victim: &CachedInode) -> FsResult<()> {
        let Move {
            old_dir,
            old_name,
            new_dir,
            new_name,
            moved,
        } = *request;
        if victim.id() == moved.id() {
            return Ok(());
        }
        let across = old_dir.id() != new_dir.id();
        let moved_reparent = across && moved.kind().supports_lookup();
        let victim_reparent = across && victim.kind().supports_lookup();
        if moved_reparent {
            self.check_not_ancestor(moved.id(), new_dir.id())?;
        }
        if victim_reparent {
            self.check_not_ancestor(victim.id(), old_dir.id())?;
        }

        self.reflect(old_dir, |record| {
            self.replace_dentry(record, old_name, victim.id()).map(|_| ())
        })?;
        let swapped = self.reflect(new_dir, |record| {
            self.replace_dentry(record, new_name, moved.id()).map(|_| ())
        });
        if let Err(e) = swapped {
            self.restore_entry(old_dir, old_name, Some(moved.id()));
            return Err(e);
        }
        let parents_fixed = self.repoint_parent(moved, moved_reparent, new_dir.id())
            .and_then(|_| {
                self.repoint_parent(victim, victim_reparent, old_dir.id())
                    .map_err(|e| {
                        // undo the first one
                        if let Err(undo) = self.repoint_parent(moved, moved_reparent, old_dir.id()) {
                            error!("can't restore `..` of inode {}: {undo}", moved.id());
                        }
                        e
                    })
            });
        if let Err(e) = parents_fixed {
            self.restore_entry(new_dir, new_name, Some(victim.id()));
            self.restore_entry(old_dir, old_name, Some(moved.id()));
            return Err(e);
        }

        let changed_at = self.touch_directories(old_dir, new_dir);
        self.reflect(moved, |record| record.metadata_changed_at = changed_at);
        self.reflect(victim, |record| record.metadata_changed_at = changed_at);
        Ok(())
    }

    fn repoint_parent(&self, dir: &CachedInode, needed: bool, parent: InodeId) -> FsResult<()> {
        if !needed {
            return Ok(());
        }
        self.reflect(dir, |record| {
            self.replace_dentry(record, "..".as_ref(), parent).map(|_| ())
        })
    }

    /// both directories changed content, returns the change time used
    fn touch_directories(&self, old_dir: &CachedInode, new_dir: &CachedInode) -> TimeDurationStruct {
        let changed_at = self.reflect(old_dir, |record| {
            record.update_modified_at();
            record.metadata_changed_at
        });
        if new_dir.id() != old_dir.id() {
            self.reflect(new_dir, |record| {
                record.modified_at = changed_at;
                record.metadata_changed_at = changed_at;
            });
        }
        changed_at
    }
}

/// both ends of a rename, all of them locked
#[derive(Clone, Copy)]
struct Move<'a> {
    old_dir: &'a CachedInode,
    old_name: &'a OsStr,
    new_dir: &'a CachedInode,
    new_name: &'a OsStr,
    moved: &'a CachedInode,
}

/// symbolic links
impl<D: BlockDevice> BlockFs<D> {
    /// the target of symbolic link `index`
    pub fn readlink(&self, index: InodeId) -> FsResult<LinkTarget> {
        let inode = self.get(index)?;
        let target = {
            let record = inode.read();
            if !record.file_kind.supports_symlink_target() {
                return Err(FsError::NotASymlink(index));
            }
            if record.file_size as usize <= INLINE_TARGET_MAX {
                record.inline_data.clone()
            } else {
                let block = self.block_at(&record, 0)?.ok_or_else(|| {
                    FsError::corrupt(format!("symlink {index} lost its target block"))
                })?;
                let mut target = self.read_block(block)?;
                target.truncate(record.file_size as usize);
                target
            }
        };
        inode.write().update_accessed_at();
        inode.mark_dirty();
        Ok(LinkTarget { inode, target })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::init_test_environment::{names_of, test_fs, ROOT, USER};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn name(s: &str) -> &OsStr {
        OsStr::new(s)
    }

    #[test]
    fn test_create_then_lookup() {
        let fs = test_fs(64);
        let file = fs.create(ROOT, name("a"), 0o644, &USER).unwrap();
        let found = fs.lookup(ROOT, name("a")).unwrap().unwrap();
        assert!(Arc::ptr_eq(&file, &found));

        let record = file.snapshot();
        assert_eq!(record.hard_links, 1);
        assert_eq!(record.mode, libc::S_IFREG | 0o644);
        assert_eq!(record.user_id, USER.uid);
        assert!(fs.lookup(ROOT, name("b")).unwrap().is_none());
    }

    #[test]
    fn test_create_existing_name() {
        let fs = test_fs(64);
        fs.create(ROOT, name("a"), 0o644, &USER).unwrap();
        let free = fs.superblock().free_inodes;
        assert!(matches!(
            fs.create(ROOT, name("a"), 0o644, &USER),
            Err(FsError::AlreadyExists)
        ));
        assert_eq!(fs.superblock().free_inodes, free);
    }

    #[test]
    fn test_create_bad_names() {
        let fs = test_fs(64);
        let long = "x".repeat(200);
        assert!(matches!(
            fs.create(ROOT, name(&long), 0o644, &USER),
            Err(FsError::NameTooLong { .. })
        ));
        assert!(matches!(
            fs.create(ROOT, name("a/b"), 0o644, &USER),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_create_in_a_file() {
        let fs = test_fs(64);
        let file = fs.create(ROOT, name("f"), 0o644, &USER).unwrap();
        let err = fs.create(file.id(), name("x"), 0o644, &USER).unwrap_err();
        assert!(err.is_invalid_kind());
    }

    #[test]
    fn test_create_failure_releases_inode() {
        let fs = test_fs(256);
        // fill every slot of the root directory
        let per_block = fs.block_size() as usize / crate::fs::DIR_ENTRY_SIZE;
        let slots = per_block * crate::fs::DIRECT_POINTERS - 2;
        for i in 0..slots {
            fs.create(ROOT, name(&format!("f{i}")), 0o644, &USER).unwrap();
        }
        let free_inodes = fs.superblock().free_inodes;
        let free_blocks = fs.superblock().free_blocks_count;

        assert!(matches!(
            fs.create(ROOT, name("one-too-many"), 0o644, &USER),
            Err(FsError::NoSpace)
        ));
        assert_eq!(fs.superblock().free_inodes, free_inodes);
        assert_eq!(fs.superblock().free_blocks_count, free_blocks);
        assert!(fs.lookup(ROOT, name("one-too-many")).unwrap().is_none());
    }

    /// a directory `full` in root whose entry blocks are all used up
    fn full_directory(fs: &BlockFs<Vec<u8>>) -> InodeId {
        let full = fs.mkdir(ROOT, name("full"), 0o755, &USER).unwrap().id();
        let per_block = fs.block_size() as usize / crate::fs::DIR_ENTRY_SIZE;
        for i in 0..per_block * crate::fs::DIRECT_POINTERS - 2 {
            fs.create(full, name(&format!("f{i}")), 0o644, &USER).unwrap();
        }
        full
    }

    #[test]
    fn test_failed_mkdir_symlink_and_rename_change_nothing() {
        let fs = test_fs(256);
        let full = full_directory(&fs);
        let src = fs.mkdir(ROOT, name("src"), 0o755, &USER).unwrap();
        fs.create(src.id(), name("x"), 0o644, &USER).unwrap();

        let free_inodes = fs.superblock().free_inodes;
        let free_blocks = fs.superblock().free_blocks_count;
        let root_names = names_of(&fs, ROOT);
        let full_names = names_of(&fs, full);

        assert!(matches!(
            fs.mkdir(full, name("sub"), 0o755, &USER),
            Err(FsError::NoSpace)
        ));
        // long enough to need a data block of its own
        let target = "t".repeat(300);
        assert!(matches!(
            fs.symlink(full, name("link"), name(&target), &USER),
            Err(FsError::NoSpace)
        ));
        assert!(matches!(
            fs.rename(ROOT, name("src"), full, name("src"), RenameFlags::empty()),
            Err(FsError::NoSpace)
        ));

        assert_eq!(fs.superblock().free_inodes, free_inodes);
        assert_eq!(fs.superblock().free_blocks_count, free_blocks);
        assert_eq!(names_of(&fs, ROOT), root_names);
        assert_eq!(names_of(&fs, full), full_names);
        let still_there = fs.lookup(ROOT, name("src")).unwrap().unwrap();
        assert!(Arc::ptr_eq(&still_there, &src));
        assert_eq!(fs.lookup(src.id(), name("..")).unwrap().unwrap().id(), ROOT);
        assert_eq!(names_of(&fs, src.id()), [".", "..", "x"]);
    }

    #[test]
    fn test_inode_exhaustion() {
        let fs = test_fs(3);
        fs.create(ROOT, name("a"), 0o644, &USER).unwrap();
        fs.mkdir(ROOT, name("b"), 0o755, &USER).unwrap();
        assert!(matches!(
            fs.create(ROOT, name("c"), 0o644, &USER),
            Err(FsError::NoFreeInode)
        ));
        assert_eq!(names_of(&fs, ROOT), [".", "..", "a", "b"]);
    }

    #[test]
    fn test_mkdir_links() {
        let fs = test_fs(64);
        let dir = fs.mkdir(ROOT, name("d"), 0o755, &USER).unwrap();
        assert_eq!(dir.hard_links(), 2);
        assert_eq!(dir.kind(), FileKind::Directory);
        assert_eq!(names_of(&fs, dir.id()), [".", ".."]);
        assert_eq!(
            fs.lookup(dir.id(), name("..")).unwrap().unwrap().id(),
            ROOT
        );
        assert!(Arc::ptr_eq(
            &fs.lookup(dir.id(), name(".")).unwrap().unwrap(),
            &dir
        ));
        // `..` of a child doesn't count towards its parent
        assert_eq!(fs.getattr(ROOT).unwrap().hard_links, 2);
    }

    #[test]
    fn test_setgid_directory_hands_down_group() {
        let fs = test_fs(64);
        let shared = fs.mkdir(ROOT, name("shared"), 0o775, &USER).unwrap();
        fs.setattr(
            shared.id(),
            &SetAttr {
                mode: Some(libc::S_ISGID | 0o775),
                gid: Some(USER.gid),
                ..Default::default()
            },
            &USER,
        )
        .unwrap();
        let other = Credentials::new(2000, 2000);
        let sub = fs.mkdir(shared.id(), name("sub"), 0o755, &other).unwrap();
        let record = sub.snapshot();
        assert_eq!(record.group_id, USER.gid);
        assert_ne!(record.mode & libc::S_ISGID, 0);
    }

    #[test]
    fn test_unlink_releases_last_link() {
        let fs = test_fs(64);
        let free_inodes = fs.superblock().free_inodes;
        let file = fs.create(ROOT, name("a"), 0o644, &USER).unwrap();
        let id = file.id();
        drop(file);

        fs.unlink(ROOT, name("a")).unwrap();
        assert!(fs.lookup(ROOT, name("a")).unwrap().is_none());
        assert_eq!(fs.superblock().free_inodes, free_inodes);
        assert!(matches!(fs.get(id), Err(FsError::NotFound)));
        assert!(matches!(fs.unlink(ROOT, name("a")), Err(FsError::NotFound)));
    }

    #[test]
    fn test_unlink_directory_is_refused() {
        let fs = test_fs(64);
        fs.mkdir(ROOT, name("d"), 0o755, &USER).unwrap();
        assert!(matches!(
            fs.unlink(ROOT, name("d")),
            Err(FsError::IsADirectory(_))
        ));
        assert!(fs.lookup(ROOT, name("d")).unwrap().is_some());
    }

    #[test]
    fn test_hard_links() {
        let fs = test_fs(64);
        let dir = fs.mkdir(ROOT, name("d"), 0o755, &USER).unwrap();
        let file = fs.create(ROOT, name("a"), 0o644, &USER).unwrap();
        fs.link(file.id(), dir.id(), name("b")).unwrap();
        assert_eq!(file.hard_links(), 2);
        assert!(Arc::ptr_eq(
            &fs.lookup(dir.id(), name("b")).unwrap().unwrap(),
            &file
        ));

        fs.unlink(ROOT, name("a")).unwrap();
        assert_eq!(file.hard_links(), 1);
        assert!(fs.get(file.id()).is_ok());
        fs.unlink(dir.id(), name("b")).unwrap();
        assert_eq!(file.hard_links(), 0);

        assert!(matches!(
            fs.link(dir.id(), ROOT, name("alias")),
            Err(FsError::PermissionDenied)
        ));
        assert!(matches!(
            fs.link(file.id(), ROOT, name("zombie")),
            Err(FsError::NotFound)
        ));
    }

    #[test]
    fn test_rmdir() {
        let fs = test_fs(64);
        let dir = fs.mkdir(ROOT, name("d"), 0o755, &USER).unwrap();
        fs.create(dir.id(), name("f"), 0o644, &USER).unwrap();
        assert!(matches!(
            fs.rmdir(ROOT, name("d")),
            Err(FsError::NotEmpty(id)) if id == dir.id()
        ));
        fs.unlink(dir.id(), name("f")).unwrap();
        fs.rmdir(ROOT, name("d")).unwrap();
        assert!(fs.lookup(ROOT, name("d")).unwrap().is_none());
        assert_eq!(dir.hard_links(), 0);
        // a removed directory takes no new entries
        assert!(matches!(
            fs.create(dir.id(), name("g"), 0o644, &USER),
            Err(FsError::NotFound)
        ));

        fs.create(ROOT, name("f"), 0o644, &USER).unwrap();
        assert!(matches!(
            fs.rmdir(ROOT, name("f")),
            Err(FsError::NotADirectory(_))
        ));
        assert!(matches!(
            fs.rmdir(ROOT, name(".")),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_rename_within_directory() {
        let fs = test_fs(64);
        let file = fs.create(ROOT, name("a"), 0o644, &USER).unwrap();
        fs.rename(ROOT, name("a"), ROOT, name("b"), RenameFlags::empty())
            .unwrap();
        assert!(fs.lookup(ROOT, name("a")).unwrap().is_none());
        assert_eq!(fs.lookup(ROOT, name("b")).unwrap().unwrap().id(), file.id());
        assert_eq!(file.hard_links(), 1);
        assert!(matches!(
            fs.rename(ROOT, name("a"), ROOT, name("c"), RenameFlags::empty()),
            Err(FsError::NotFound)
        ));
    }

    #[test]
    fn test_cross_directory_rename_keeps_inode() {
        let fs = test_fs(64);
        let src = fs.mkdir(ROOT, name("src"), 0o755, &USER).unwrap();
        let dst = fs.mkdir(ROOT, name("dst"), 0o755, &USER).unwrap();
        let file = fs.create(src.id(), name("f"), 0o640, &USER).unwrap();
        fs.write(file.id(), 0, b"payload").unwrap();
        let before = file.snapshot();

        fs.rename(src.id(), name("f"), dst.id(), name("g"), RenameFlags::empty())
            .unwrap();
        let moved = fs.lookup(dst.id(), name("g")).unwrap().unwrap();
        assert!(Arc::ptr_eq(&moved, &file));
        let after = moved.snapshot();
        assert_eq!(after.mode, before.mode);
        assert_eq!(after.hard_links, 1);
        assert_eq!(after.file_size, 7);
        assert_eq!(after.direct_blocks, before.direct_blocks);
        assert!(fs.lookup(src.id(), name("f")).unwrap().is_none());
    }

    #[test]
    fn test_rename_replaces_target() {
        let fs = test_fs(64);
        let a = fs.create(ROOT, name("a"), 0o644, &USER).unwrap();
        let b = fs.create(ROOT, name("b"), 0o644, &USER).unwrap();
        let free_inodes = fs.superblock().free_inodes;
        assert!(matches!(
            fs.rename(ROOT, name("a"), ROOT, name("b"), RenameFlags::NOREPLACE),
            Err(FsError::AlreadyExists)
        ));

        fs.rename(ROOT, name("a"), ROOT, name("b"), RenameFlags::empty())
            .unwrap();
        assert_eq!(fs.lookup(ROOT, name("b")).unwrap().unwrap().id(), a.id());
        assert_eq!(b.hard_links(), 0);
        assert_eq!(fs.superblock().free_inodes, free_inodes + 1);
        assert_eq!(names_of(&fs, ROOT), [".", "..", "b"]);
    }

    #[test]
    fn test_rename_directory_moves_dotdot() {
        let fs = test_fs(64);
        let src = fs.mkdir(ROOT, name("src"), 0o755, &USER).unwrap();
        let dst = fs.mkdir(ROOT, name("dst"), 0o755, &USER).unwrap();
        let moved = fs.mkdir(src.id(), name("m"), 0o755, &USER).unwrap();

        fs.rename(src.id(), name("m"), dst.id(), name("m2"), RenameFlags::empty())
            .unwrap();
        assert_eq!(names_of(&fs, src.id()), [".", ".."]);
        assert_eq!(
            fs.lookup(moved.id(), name("..")).unwrap().unwrap().id(),
            dst.id()
        );
        assert_eq!(moved.hard_links(), 2);
    }

    #[test]
    fn test_rename_kind_mismatch_and_non_empty_target() {
        let fs = test_fs(64);
        let dir = fs.mkdir(ROOT, name("d"), 0o755, &USER).unwrap();
        fs.create(ROOT, name("f"), 0o644, &USER).unwrap();
        assert!(matches!(
            fs.rename(ROOT, name("f"), ROOT, name("d"), RenameFlags::empty()),
            Err(FsError::IsADirectory(_))
        ));
        assert!(matches!(
            fs.rename(ROOT, name("d"), ROOT, name("f"), RenameFlags::empty()),
            Err(FsError::NotADirectory(_))
        ));

        fs.mkdir(ROOT, name("e"), 0o755, &USER).unwrap();
        fs.create(dir.id(), name("inside"), 0o644, &USER).unwrap();
        assert!(matches!(
            fs.rename(ROOT, name("e"), ROOT, name("d"), RenameFlags::empty()),
            Err(FsError::NotEmpty(_))
        ));
        // an empty directory may be replaced
        fs.rename(ROOT, name("d"), ROOT, name("e"), RenameFlags::empty())
            .unwrap();
        assert_eq!(names_of(&fs, ROOT), [".", "..", "e", "f"]);
    }

    #[test]
    fn test_rename_into_own_subtree() {
        let fs = test_fs(64);
        let a = fs.mkdir(ROOT, name("a"), 0o755, &USER).unwrap();
        let b = fs.mkdir(a.id(), name("b"), 0o755, &USER).unwrap();
        assert!(matches!(
            fs.rename(ROOT, name("a"), b.id(), name("a"), RenameFlags::empty()),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(matches!(
            fs.rename(ROOT, name("a"), a.id(), name("self"), RenameFlags::empty()),
            Err(FsError::InvalidArgument(_))
        ));
        assert_eq!(names_of(&fs, ROOT), [".", "..", "a"]);
    }

    #[test]
    fn test_rename_exchange() {
        let fs = test_fs(64);
        let dir = fs.mkdir(ROOT, name("d"), 0o755, &USER).unwrap();
        let file = fs.create(ROOT, name("f"), 0o644, &USER).unwrap();
        let other = fs.mkdir(ROOT, name("o"), 0o755, &USER).unwrap();
        let inner = fs.create(other.id(), name("x"), 0o644, &USER).unwrap();

        fs.rename(ROOT, name("d"), other.id(), name("x"), RenameFlags::EXCHANGE)
            .unwrap();
        assert_eq!(fs.lookup(ROOT, name("d")).unwrap().unwrap().id(), inner.id());
        assert_eq!(
            fs.lookup(other.id(), name("x")).unwrap().unwrap().id(),
            dir.id()
        );
        assert_eq!(
            fs.lookup(dir.id(), name("..")).unwrap().unwrap().id(),
            other.id()
        );
        assert!(matches!(
            fs.rename(ROOT, name("f"), ROOT, name("nope"), RenameFlags::EXCHANGE),
            Err(FsError::NotFound)
        ));
        assert_eq!(file.hard_links(), 1);
    }

    #[test]
    fn test_symlink_targets() {
        let fs = test_fs(64);
        let short = fs
            .symlink(ROOT, name("short"), name("/etc/hosts"), &USER)
            .unwrap();
        assert_eq!(short.snapshot().block_count, 0);
        assert_eq!(&*fs.readlink(short.id()).unwrap(), b"/etc/hosts");

        let long_target = "l".repeat(300);
        let long = fs
            .symlink(ROOT, name("long"), name(&long_target), &USER)
            .unwrap();
        assert_eq!(long.snapshot().block_count, 1);
        let target = fs.readlink(long.id()).unwrap();
        assert_eq!(target.as_os_str(), name(&long_target));
        assert_eq!(target.inode(), long.id());

        let too_long = "l".repeat(fs.block_size() as usize + 1);
        assert!(matches!(
            fs.symlink(ROOT, name("huge"), name(&too_long), &USER),
            Err(FsError::NameTooLong { .. })
        ));
        assert!(matches!(
            fs.readlink(ROOT),
            Err(FsError::NotASymlink(ROOT))
        ));
    }

    #[test]
    fn test_setattr_truncate() {
        let fs = test_fs(64);
        let file = fs.create(ROOT, name("f"), 0o644, &USER).unwrap();
        fs.write(file.id(), 0, &vec![7u8; 3000]).unwrap();
        let free = fs.superblock().free_blocks_count;

        let shrink = SetAttr {
            size: Some(100),
            ..Default::default()
        };
        let record = fs.setattr(file.id(), &shrink, &USER).unwrap();
        assert_eq!(record.file_size, 100);
        assert_eq!(record.block_count, 1);
        assert_eq!(fs.superblock().free_blocks_count, free + 5);

        let grow = SetAttr {
            size: Some(1000),
            ..Default::default()
        };
        fs.setattr(file.id(), &grow, &USER).unwrap();
        let data = fs.read(file.id(), 0, 1000).unwrap();
        assert_eq!(&data[..100], &[7u8; 100][..]);
        assert!(data[100..].iter().all(|b| *b == 0));

        let stranger = Credentials::new(4000, 4000);
        let chmod = SetAttr {
            mode: Some(0o777),
            ..Default::default()
        };
        assert!(matches!(
            fs.setattr(file.id(), &chmod, &stranger),
            Err(FsError::PermissionDenied)
        ));
        assert_eq!(file.snapshot().mode, libc::S_IFREG | 0o644);
    }

    #[test]
    fn test_failed_truncate_changes_nothing() {
        let fs = test_fs(64);
        let file = fs.create(ROOT, name("f"), 0o644, &USER).unwrap();
        fs.write(file.id(), 0, &[7u8; 2048]).unwrap();
        let free_blocks = fs.superblock().free_blocks_count;
        let before = {
            let mut record = file.write();
            // a broken indirect pointer makes the truncation fail half way
            record.indirect_block = u32::MAX;
            record.clone()
        };

        let changes = SetAttr {
            mode: Some(0o600),
            size: Some(10),
            ..Default::default()
        };
        assert!(matches!(
            fs.setattr(file.id(), &changes, &USER),
            Err(FsError::Corrupt(_))
        ));
        let after = file.snapshot();
        assert_eq!(after.mode, before.mode);
        assert_eq!(after.file_size, 2048);
        assert_eq!(after.direct_blocks, before.direct_blocks);
        assert_eq!(after.metadata_changed_at, before.metadata_changed_at);
        assert_eq!(fs.superblock().free_blocks_count, free_blocks);

        file.write().indirect_block = 0;
        assert_eq!(fs.read(file.id(), 0, 4).unwrap(), [7u8; 4]);
    }

    #[test]
    fn test_concurrent_creates_in_one_directory() {
        let fs = Arc::new(test_fs(512));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let fs = Arc::clone(&fs);
                thread::spawn(move || {
                    for i in 0..8 {
                        let file_name = format!("t{t}-{i}");
                        fs.create(ROOT, name(&file_name), 0o644, &USER).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(names_of(&fs, ROOT).len(), 2 + 64);
    }

    #[test]
    fn test_concurrent_creates_of_one_name() {
        let fs = Arc::new(test_fs(64));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let fs = Arc::clone(&fs);
                thread::spawn(move || {
                    fs.create(ROOT, name("contended"), 0o644, &USER)
                        .map(|inode| inode.id())
                })
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .filter_map(|outcome| outcome.as_ref().err())
            .all(|e| matches!(e, FsError::AlreadyExists)));
        assert_eq!(names_of(&fs, ROOT), [".", "..", "contended"]);
        assert_eq!(fs.superblock().free_inodes, 64 - 2);
    }

    #[test]
    fn test_loads_racing_unlink_keep_one_representative() {
        let fs = test_fs(8);
        let free_inodes = fs.superblock().free_inodes;
        let done = AtomicBool::new(false);
        let failures = thread::scope(|scope| {
            scope.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    // NotFound whenever the slot is free
                    let _ = fs.get(2);
                }
            });
            let failures: Vec<_> = (0..200)
                .filter_map(|round| {
                    fs.create(ROOT, name("f"), 0o644, &USER)
                        .and_then(|_| fs.unlink(ROOT, name("f")))
                        .err()
                        .map(|e| (round, e.to_string()))
                })
                .collect();
            done.store(true, Ordering::Release);
            failures
        });
        assert!(failures.is_empty(), "{failures:?}");
        assert_eq!(fs.superblock().free_inodes, free_inodes);
        assert!(!fs.cache.contains(2));
    }

    #[test]
    fn test_concurrent_cross_renames_finish() {
        let fs = Arc::new(test_fs(64));
        let a = fs.mkdir(ROOT, name("a"), 0o755, &USER).unwrap().id();
        let b = fs.mkdir(ROOT, name("b"), 0o755, &USER).unwrap().id();
        fs.create(a, name("x"), 0o644, &USER).unwrap();
        fs.create(b, name("y"), 0o644, &USER).unwrap();

        let handles: Vec<_> = [(a, b, "x"), (b, a, "y")]
            .into_iter()
            .map(|(from, to, file)| {
                let fs = Arc::clone(&fs);
                thread::spawn(move || {
                    for _ in 0..50 {
                        fs.rename(from, name(file), to, name(file), RenameFlags::empty())
                            .unwrap();
                        fs.rename(to, name(file), from, name(file), RenameFlags::empty())
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(names_of(&fs, a), [".", "..", "x"]);
        assert_eq!(names_of(&fs, b), [".", "..", "y"]);
    }
}
