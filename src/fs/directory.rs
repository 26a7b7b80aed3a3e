//! directory contents: fixed size entry records packed into data blocks.
//!
//! a record is [DIR_ENTRY_SIZE] bytes: the inode number (little endian u64,
//! 0 marks a free slot), one byte of name length, then the name padded with zeros.
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};

use smallvec::SmallVec;

use crate::device::BlockDevice;

use super::{BlockFs, FsError, FsResult, Inode, InodeId, DIRECT_POINTERS};

pub const DIR_ENTRY_SIZE: usize = 64;
pub const MAX_NAME_LEN: usize = DIR_ENTRY_SIZE - 8 - 1;

/// one name of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inode_number: InodeId,
    pub name: OsString,
}

/// where a record lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotPosition {
    block: u32,
    offset: usize,
}

#[derive(Debug)]
struct Slot {
    position: SlotPosition,
    /// `None` for a free slot
    entry: Option<(InodeId, SmallVec<[u8; DIR_ENTRY_SIZE]>)>,
}

/// names are non empty, at most [MAX_NAME_LEN] bytes, without `/` or NUL
pub fn validate_name(name: &OsStr) -> FsResult<()> {
    let bytes = name.as_bytes();
    if bytes.len() > MAX_NAME_LEN {
        return Err(FsError::NameTooLong {
            len: bytes.len(),
            max: MAX_NAME_LEN,
        });
    }
    if bytes.is_empty() || bytes.iter().any(|b| *b == b'/' || *b == 0) {
        return Err(FsError::invalid(format!("bad entry name {name:?}")));
    }
    Ok(())
}

pub(crate) fn is_dot_or_dotdot(name: &OsStr) -> bool {
    name == "." || name == ".."
}

fn encode_record(inode_number: InodeId, name: &[u8]) -> [u8; DIR_ENTRY_SIZE] {
    let mut record = [0u8; DIR_ENTRY_SIZE];
    record[..8].copy_from_slice(&inode_number.to_le_bytes());
    record[8] = name.len() as u8;
    record[9..9 + name.len()].copy_from_slice(name);
    record
}

fn decode_record(record: &[u8]) -> FsResult<Option<(InodeId, &[u8])>> {
    let mut number = [0u8; 8];
    number.copy_from_slice(&record[..8]);
    let inode_number = InodeId::from_le_bytes(number);
    if inode_number == 0 {
        return Ok(None);
    }
    let len = record[8] as usize;
    if len == 0 || len > MAX_NAME_LEN {
        return Err(FsError::corrupt(format!(
            "directory record of inode {inode_number} has a name of {len} bytes"
        )));
    }
    Ok(Some((inode_number, &record[9..9 + len])))
}

impl<D: BlockDevice> BlockFs<D> {
    /// every record slot of directory `dir`, in on-disk order
    fn scan(&self, dir: &Inode) -> FsResult<Vec<Slot>> {
        if !dir.is_dir() {
            return Err(FsError::NotADirectory(dir.inode_number));
        }
        let block_size = self.block_size() as u64;
        let mut slots = Vec::new();
        for index in 0..dir.file_size / block_size {
            let block = self.block_at(dir, index)?.ok_or_else(|| {
                FsError::corrupt(format!(
                    "directory {} has a hole at block {index}",
                    dir.inode_number
                ))
            })?;
            let data = self.read_block(block)?;
            for (i, record) in data.chunks_exact(DIR_ENTRY_SIZE).enumerate() {
                let entry = decode_record(record)?
                    .map(|(number, name)| (number, SmallVec::from_slice(name)));
                slots.push(Slot {
                    position: SlotPosition {
                        block,
                        offset: i * DIR_ENTRY_SIZE,
                    },
                    entry,
                });
            }
        }
        Ok(slots)
    }

    /// the slot holding `name`, at most one may exist
    fn find_slot(&self, dir: &Inode, name: &OsStr) -> FsResult<Option<(SlotPosition, InodeId)>> {
        let mut found = None;
        for slot in self.scan(dir)? {
            let Some((number, entry_name)) = slot.entry else {
                continue;
            };
            if entry_name.as_slice() != name.as_bytes() {
                continue;
            }
            if found.is_some() {
                return Err(FsError::corrupt(format!(
                    "directory {} holds {name:?} twice",
                    dir.inode_number
                )));
            }
            found = Some((slot.position, number));
        }
        Ok(found)
    }

    fn write_slot(&self, position: SlotPosition, inode_number: InodeId, name: &[u8]) -> FsResult<()> {
        self.write_block(
            position.block,
            position.offset,
            &encode_record(inode_number, name),
        )
    }

    /// the inode `name` refers to inside `dir`
    pub(crate) fn find_dentry(&self, dir: &Inode, name: &OsStr) -> FsResult<Option<InodeId>> {
        Ok(self.find_slot(dir, name)?.map(|(_, number)| number))
    }

    /// add `name -> inode_number` to `dir`, growing it by one block when it is full
    pub(crate) fn add_dentry(&self, dir: &mut Inode, inode_number: InodeId, name: &OsStr) -> FsResult<()> {
        validate_name(name)?;
        let slots = self.scan(dir)?;
        let mut free = None;
        for slot in &slots {
            match &slot.entry {
                Some((_, entry_name)) if entry_name.as_slice() == name.as_bytes() => {
                    return Err(FsError::AlreadyExists)
                }
                None if free.is_none() => free = Some(slot.position),
                _ => {}
            }
        }
        if let Some(position) = free {
            return self.write_slot(position, inode_number, name.as_bytes());
        }

        let block_size = self.block_size() as u64;
        let index = dir.file_size / block_size;
        if index >= DIRECT_POINTERS as u64 {
            return Err(FsError::NoSpace);
        }
        let block = self.ensure_block(dir, index)?;
        let position = SlotPosition { block, offset: 0 };
        if let Err(e) = self.write_slot(position, inode_number, name.as_bytes()) {
            self.truncate_blocks(dir, dir.file_size)?;
            return Err(e);
        }
        dir.file_size += block_size;
        Ok(())
    }

    /// drop `name` from `dir`, returns the inode it referred to
    pub(crate) fn remove_dentry(&self, dir: &Inode, name: &OsStr) -> FsResult<InodeId> {
        let (position, number) = self.find_slot(dir, name)?.ok_or(FsError::NotFound)?;
        self.write_block(position.block, position.offset, &[0u8; DIR_ENTRY_SIZE])?;
        Ok(number)
    }

    /// point the existing `name` at `inode_number`, returns the inode it referred to
    pub(crate) fn replace_dentry(&self, dir: &Inode, name: &OsStr, inode_number: InodeId) -> FsResult<InodeId> {
        let (position, old) = self.find_slot(dir, name)?.ok_or(FsError::NotFound)?;
        self.write_slot(position, inode_number, name.as_bytes())?;
        Ok(old)
    }

    /// every entry of `dir`, `.` and `..` included
    pub(crate) fn read_dentries(&self, dir: &Inode) -> FsResult<Vec<DirEntry>> {
        Ok(self
            .scan(dir)?
            .into_iter()
            .filter_map(|slot| slot.entry)
            .map(|(inode_number, name)| DirEntry {
                inode_number,
                name: OsString::from_vec(name.into_vec()),
            })
            .collect())
    }

    /// whether `dir` holds nothing but `.` and `..`
    pub(crate) fn is_empty_dir(&self, dir: &Inode) -> FsResult<bool> {
        Ok(self
            .read_dentries(dir)?
            .iter()
            .all(|entry| is_dot_or_dotdot(&entry.name)))
    }
}
