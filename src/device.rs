//! the "block device" this filesystem lives on: a byte image addressed by offset.
//!
//! An image file is mapped with [memmap2], tests use a plain [Vec].
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use memmap2::MmapMut;

/// backing storage of a filesystem image
pub trait BlockDevice: AsRef<[u8]> + AsMut<[u8]> + Send {
    /// push written bytes down to stable storage
    fn sync(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    fn len_bytes(&self) -> u64 {
        self.as_ref().len() as u64
    }

    /// fill `buf` with the bytes at `offset`
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        let mut cursor = Cursor::new(self.as_ref());
        cursor.seek(SeekFrom::Start(offset))?;
        cursor.read_exact(buf)
    }

    /// write all of `data` at `offset`, never past the end of the image
    fn write_at(&mut self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        let mut cursor = Cursor::new(self.as_mut());
        cursor.seek(SeekFrom::Start(offset))?;
        cursor.write_all(data)
    }
}

impl BlockDevice for MmapMut {
    fn sync(&mut self) -> std::io::Result<()> {
        self.flush()
    }
}

impl BlockDevice for Vec<u8> {}
