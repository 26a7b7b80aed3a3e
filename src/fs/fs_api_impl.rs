use std::{ffi::OsStr, path::Path, time::Duration};

use fuser::{Filesystem, KernelConfig, Request, TimeOrNow};
use log::{error, info};

use crate::device::BlockDevice;

use super::{
    BlockFs, Credentials, FileKind, FsResult, RenameFlags, SetAttr, TimeChange,
    MAX_NAME_LEN,
};

/// attributes and entries may change behind the kernel's back, never cache them
const TTL: Duration = Duration::new(0, 0);

fn time_change(time: Option<TimeOrNow>) -> FsResult<Option<TimeChange>> {
    time.map(TimeChange::try_from).transpose()
}

impl<D: BlockDevice> Filesystem for BlockFs<D> {
    // to init the filesystem
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        self.update_last_mounted_at().map_err(|e| {
            error!("can't record the mount time: {e}");
            e.errno()
        })
    }

    // to umount the filesystem
    fn destroy(&mut self) {
        info!("destroy() called, writing everything back");
        if let Err(e) = self.sync_all() {
            error!("final sync failed: {e}");
        }
    }

    // to show FS information
    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        let superblock = self.superblock();
        reply.statfs(
            superblock.block_count,
            superblock.free_blocks_count,
            superblock.free_blocks_count,
            superblock.inode_count,
            superblock.free_inodes,
            superblock.block_size,
            MAX_NAME_LEN as u32,
            superblock.block_size,
        )
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: fuser::ReplyEntry) {
        info!("lookup() called with parent inode number: {parent} and name: {name:?}");
        match BlockFs::lookup(self, parent, name) {
            Ok(Some(inode)) => reply.entry(&TTL, &(&inode.snapshot()).into(), 0),
            Ok(None) => reply.error(libc::ENOENT),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: fuser::ReplyAttr) {
        info!("getattr() called with inode number: {:?}", ino);
        match BlockFs::getattr(self, ino) {
            Ok(inode) => reply.attr(&TTL, &(&inode).into()),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: fuser::ReplyAttr,
    ) {
        info!(
            "setattr() called with inode number: {:?}, mode: {:?}, uid: {:?}, gid: {:?}, size: {:?}, atime: {:?}, mtime: {:?}, fh: {:?}",
            ino, mode, uid, gid, size, atime, mtime, fh
        );
        let changes = time_change(atime).and_then(|atime| {
            Ok(SetAttr {
                mode,
                uid,
                gid,
                size,
                atime,
                mtime: time_change(mtime)?,
            })
        });
        let updated = changes
            .and_then(|changes| BlockFs::setattr(self, ino, &changes, &Credentials::from(req)));
        match updated {
            Ok(inode) => reply.attr(&TTL, &(&inode).into()),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: fuser::ReplyData) {
        info!("readlink() called with inode number: {ino}");
        match BlockFs::readlink(self, ino) {
            Ok(target) => reply.data(&target),
            Err(e) => reply.error(e.errno()),
        }
    }

    // to create a dir
    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: fuser::ReplyEntry,
    ) {
        info!("mkdir() called with parent inode number: {parent} and name: {name:?}");
        match BlockFs::mkdir(self, parent, name, mode & !umask, &Credentials::from(req)) {
            Ok(inode) => reply.entry(&TTL, &(&inode.snapshot()).into(), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: fuser::ReplyEmpty) {
        info!("rmdir() called with parent inode number: {parent} and name: {name:?}");
        match BlockFs::rmdir(self, parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn symlink(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        link: &Path,
        reply: fuser::ReplyEntry,
    ) {
        info!("symlink() called with parent inode number: {parent} and name: {name:?} and link: {link:?}");
        match BlockFs::symlink(self, parent, name, link.as_os_str(), &Credentials::from(req)) {
            Ok(inode) => reply.entry(&TTL, &(&inode.snapshot()).into(), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    // to create a new file
    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        info!("create() called with parent inode number: {parent} and name: {name:?}");
        match BlockFs::create(self, parent, name, mode & !umask, &Credentials::from(req)) {
            Ok(inode) => reply.created(&TTL, &(&inode.snapshot()).into(), 0, 0, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: fuser::ReplyEmpty) {
        info!("unlink() called with parent inode number: {parent} and name: {name:?}");
        match BlockFs::unlink(self, parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        info!("link() called with inode number: {ino}, new parent: {newparent} and new name: {newname:?}");
        match BlockFs::link(self, ino, newparent, newname) {
            Ok(inode) => reply.entry(&TTL, &(&inode.snapshot()).into(), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: fuser::ReplyEmpty,
    ) {
        info!(
            "rename() called with parent: {parent}, name: {name:?}, new parent: {newparent}, new name: {newname:?}, flags: {flags:#x}"
        );
        let Some(flags) = RenameFlags::from_bits(flags) else {
            reply.error(libc::EINVAL);
            return;
        };
        match BlockFs::rename(self, parent, name, newparent, newname, flags) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        info!("readdir() called with inode number: {ino}");
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let entries = match BlockFs::readdir(self, ino) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };
        for (index, entry) in entries.iter().enumerate().skip(offset as usize) {
            let kind = self
                .get(entry.inode_number)
                .map(|inode| inode.kind())
                .unwrap_or(FileKind::Unknown);
            let buffer_full = reply.add(
                entry.inode_number,
                index as i64 + 1,
                kind.into(),
                &entry.name,
            );
            if buffer_full {
                break;
            }
        }
        reply.ok();
    }

    // to read from a file
    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        info!("read() called with inode number: {ino}, fh: {fh}, offset: {offset}, size: {size}");
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        match BlockFs::read(self, ino, offset as u64, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        info!(
            "write() called with inode number: {ino}, fh: {fh}, offset: {offset}, size: {}",
            data.len()
        );
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        match BlockFs::write(self, ino, offset as u64, data) {
            Ok(written) => reply.written(written),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, datasync: bool, reply: fuser::ReplyEmpty) {
        info!("fsync() called with inode number: {ino}, datasync: {datasync}");
        match BlockFs::fsync(self, ino) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }
}
