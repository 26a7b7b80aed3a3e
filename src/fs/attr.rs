//! who asks for a change, and which attribute changes they may make
use crate::utils::time_util::{self, TimeDurationStruct};

use super::{FsError, FsResult, Inode};

/// identity of the caller of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
}

impl Credentials {
    pub fn new(uid: libc::uid_t, gid: libc::gid_t) -> Self {
        Credentials { uid, gid }
    }

    pub fn root() -> Self {
        Credentials { uid: 0, gid: 0 }
    }

    pub fn is_root(&self) -> bool {
        self.uid == 0
    }

    fn owns(&self, record: &Inode) -> bool {
        self.is_root() || self.uid == record.user_id
    }

    /// permission bits a new inode gets, only root may create set-id files
    pub(crate) fn creation_mode(&self, mode: u32) -> u32 {
        let mode = mode & 0o7777;
        if self.is_root() {
            mode
        } else {
            mode & !(libc::S_ISUID | libc::S_ISGID)
        }
    }
}

impl From<&fuser::Request<'_>> for Credentials {
    fn from(req: &fuser::Request<'_>) -> Self {
        Credentials::new(req.uid(), req.gid())
    }
}

/// a new access or modification time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeChange {
    Now,
    At(TimeDurationStruct),
}

impl TimeChange {
    fn resolve(self) -> TimeDurationStruct {
        match self {
            TimeChange::Now => time_util::now(),
            TimeChange::At(time) => time,
        }
    }
}

impl TryFrom<fuser::TimeOrNow> for TimeChange {
    type Error = FsError;

    fn try_from(time: fuser::TimeOrNow) -> FsResult<Self> {
        match time {
            fuser::TimeOrNow::Now => Ok(TimeChange::Now),
            fuser::TimeOrNow::SpecificTime(time) => TimeDurationStruct::try_from(time)
                .map(TimeChange::At)
                .map_err(|_| FsError::invalid("time before the unix epoch")),
        }
    }
}

/// the attribute changes of one `setattr` call, `None` leaves a field alone
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SetAttr {
    pub mode: Option<u32>,
    pub uid: Option<libc::uid_t>,
    pub gid: Option<libc::gid_t>,
    pub size: Option<u64>,
    pub atime: Option<TimeChange>,
    pub mtime: Option<TimeChange>,
}

impl SetAttr {
    pub fn is_empty(&self) -> bool {
        *self == SetAttr::default()
    }
}

/// reject the whole request if any single change is not allowed,
/// nothing has been applied at that point
pub(crate) fn check(record: &Inode, changes: &SetAttr, cred: &Credentials, max_size: u64) -> FsResult<()> {
    let owner = cred.owns(record);
    if let Some(mode) = changes.mode {
        if !owner {
            return Err(FsError::PermissionDenied);
        }
        let kind_bits = mode & libc::S_IFMT;
        if kind_bits != 0 && kind_bits != record.mode & libc::S_IFMT {
            return Err(FsError::invalid("chmod can't change the file type"));
        }
    }
    if let Some(uid) = changes.uid {
        if uid != record.user_id && !cred.is_root() {
            return Err(FsError::PermissionDenied);
        }
    }
    if let Some(gid) = changes.gid {
        if gid != record.group_id && !owner {
            return Err(FsError::PermissionDenied);
        }
    }
    if let Some(size) = changes.size {
        if record.is_dir() {
            return Err(FsError::IsADirectory(record.inode_number));
        }
        if !record.is_regular_file() {
            return Err(FsError::invalid("only regular files can be resized"));
        }
        if size > max_size {
            return Err(FsError::invalid(format!(
                "size {size} is beyond the largest file size {max_size}"
            )));
        }
    }
    if (changes.atime.is_some() || changes.mtime.is_some()) && !owner {
        return Err(FsError::PermissionDenied);
    }
    Ok(())
}

/// apply everything but the size, which needs the block map
pub(crate) fn apply(record: &mut Inode, changes: &SetAttr, cred: &Credentials) {
    if let Some(mode) = changes.mode {
        let mut mode = (record.mode & libc::S_IFMT) | (mode & 0o7777);
        // a non-root owner outside the file's group can't keep set-group-ID
        if !cred.is_root() && cred.gid != record.group_id {
            mode &= !libc::S_ISGID;
        }
        record.mode = mode;
    }
    if let Some(uid) = changes.uid {
        if uid != record.user_id {
            record.user_id = uid;
            record.mode &= !libc::S_ISUID;
        }
    }
    if let Some(gid) = changes.gid {
        if gid != record.group_id {
            record.group_id = gid;
            if !cred.is_root() {
                record.mode &= !libc::S_ISGID;
            }
        }
    }
    if let Some(atime) = changes.atime {
        record.accessed_at = atime.resolve();
    }
    if let Some(mtime) = changes.mtime {
        record.modified_at = mtime.resolve();
    }
    if !changes.is_empty() {
        record.update_changed_at();
    }
}
