//! contents of regular files, reached through the block map
use crate::device::BlockDevice;

use super::{BlockFs, FsError, FsResult, InodeId};

impl<D: BlockDevice> BlockFs<D> {
    /// read at most `size` bytes at `offset` of regular file `index`,
    /// holes read as zeros
    pub fn read(&self, index: InodeId, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        let inode = self.get(index)?;
        let data = {
            let record = inode.read();
            if record.is_dir() {
                return Err(FsError::IsADirectory(index));
            }
            if !record.is_regular_file() {
                return Err(FsError::invalid("only regular files hold data"));
            }
            if offset >= record.file_size {
                return Ok(Vec::new());
            }
            let end = record.file_size.min(offset + size as u64);
            let block_size = self.block_size() as u64;
            let mut data = vec![0u8; (end - offset) as usize];

            let mut position = offset;
            while position < end {
                let in_block = (position % block_size) as usize;
                let chunk = (block_size - in_block as u64).min(end - position) as usize;
                let start = (position - offset) as usize;
                if let Some(block) = self.block_at(&record, position / block_size)? {
                    self.read_from_block(block, in_block, &mut data[start..start + chunk])?;
                }
                position += chunk as u64;
            }
            data
        };
        inode.write().update_accessed_at();
        inode.mark_dirty();
        Ok(data)
    }

    /// write `data` at `offset` of regular file `index`, allocating blocks on demand.
    /// returns how many bytes were written
    pub fn write(&self, index: InodeId, offset: u64, data: &[u8]) -> FsResult<u32> {
        let inode = self.get(index)?;
        let mut record = inode.write();
        if record.is_dir() {
            return Err(FsError::IsADirectory(index));
        }
        if !record.is_regular_file() {
            return Err(FsError::invalid("only regular files hold data"));
        }
        let end = offset + data.len() as u64;
        if end > self.max_file_size() {
            return Err(FsError::invalid(format!(
                "write up to {end} passes the largest file size {}",
                self.max_file_size()
            )));
        }

        let block_size = self.block_size() as u64;
        let mut position = offset;
        let mut outcome = Ok(());
        while position < end {
            let in_block = (position % block_size) as usize;
            let chunk = (block_size - in_block as u64).min(end - position) as usize;
            let start = (position - offset) as usize;
            let written = self
                .ensure_block(&mut record, position / block_size)
                .and_then(|block| self.write_block(block, in_block, &data[start..start + chunk]));
            if let Err(e) = written {
                outcome = Err(e);
                break;
            }
            position += chunk as u64;
        }

        // keep whatever made it, like a short write
        let written = position - offset;
        if written == 0 {
            outcome?;
        }
        record.file_size = record.file_size.max(position);
        record.update_modified_at();
        self.write_inode(&inode, &mut record)?;
        Ok(written as u32)
    }
}
