use std::io::{Read, Seek, SeekFrom, Write};

use bitvec::prelude::*;

use crate::utils::fs_size_calculator;

/// allocation state of one block group: an inode bitmap and a data bitmap,
/// both one block long
#[derive(Debug, Default)]
pub struct Group {
    pub data_bitmap: BitVec<u8, Lsb0>,
    pub inode_bitmap: BitVec<u8, Lsb0>,
    next_inode: Option<usize>,
    next_data_block: Option<usize>,
}
/// for serialize and deserialize
impl Group {
    /// byte offset of group `idx` inside the image
    pub fn offset(block_size: u32, idx: u32) -> u64 {
        block_size as u64 + // for `SuperBlock`
            fs_size_calculator::block_group_size(block_size) * idx as u64
    }

    /// write the two bitmaps of this group at its position
    pub fn serialize_into<W>(&self, mut w: W, block_size: u32, idx: u32) -> std::io::Result<()>
    where
        W: Write + Seek,
    {
        w.seek(SeekFrom::Start(Group::offset(block_size, idx)))?;
        w.write_all(self.inode_bitmap.as_raw_slice())?;
        w.write_all(self.data_bitmap.as_raw_slice())
    }

    pub fn deserialize_from<R>(
        mut r: R,
        block_size: u32,
        group_count: u32,
    ) -> std::io::Result<Vec<Group>>
    where
        R: Read + Seek,
    {
        let mut groups = Vec::with_capacity(group_count as usize);
        let mut buf = vec![0; block_size as usize];

        for idx in 0..group_count {
            r.seek(SeekFrom::Start(Group::offset(block_size, idx)))?;
            r.read_exact(&mut buf)?;
            let inode_bitmap = BitVec::<u8, Lsb0>::from_slice(&buf);
            r.read_exact(&mut buf)?;
            let data_bitmap = BitVec::<u8, Lsb0>::from_slice(&buf);
            groups.push(Group::new(inode_bitmap, data_bitmap));
        }

        Ok(groups)
    }
}
impl Group {
    pub fn new(inode_bitmap: BitVec<u8, Lsb0>, data_bitmap: BitVec<u8, Lsb0>) -> Self {
        let mut group = Group {
            inode_bitmap,
            data_bitmap,
            ..Default::default()
        };

        group.next_data_block = group.next_free_data_block();
        group.next_inode = group.next_free_inode();

        group
    }

    /// an empty group for a fresh filesystem
    pub fn empty(block_size: u32) -> Self {
        let bits = fs_size_calculator::items_per_group(block_size) as usize;
        Group::new(bitvec![u8, Lsb0; 0; bits], bitvec![u8, Lsb0; 0; bits])
    }
}
/// for inode and data block allocation,
/// every index here is local to the group and starts at 1
impl Group {
    pub fn has_inode(&self, i: usize) -> bool {
        i > 0 && self.inode_bitmap.get(i - 1).map_or(false, |bit| *bit)
    }

    pub fn has_data_block(&self, i: usize) -> bool {
        i > 0 && self.data_bitmap.get(i - 1).map_or(false, |bit| *bit)
    }

    pub fn free_inodes(&self) -> usize {
        self.inode_bitmap.count_zeros()
    }

    pub fn free_data_blocks(&self) -> usize {
        self.data_bitmap.count_zeros()
    }

    pub fn allocate_inode(&mut self) -> Option<usize> {
        let index = self.next_inode?;
        self.inode_bitmap.set(index - 1, true);
        self.next_inode = self.next_free_inode();
        Some(index)
    }

    pub fn allocate_data_block(&mut self) -> Option<usize> {
        let index = self.next_data_block?;
        self.data_bitmap.set(index - 1, true);
        self.next_data_block = self.next_free_data_block();
        Some(index)
    }

    pub fn release_data_block(&mut self, index: usize) {
        self.data_bitmap.set(index - 1, false);
        self.next_data_block = self.next_free_data_block();
    }

    pub fn release_inode(&mut self, index: usize) {
        self.inode_bitmap.set(index - 1, false);
        self.next_inode = self.next_free_inode();
    }

    fn next_free_data_block(&self) -> Option<usize> {
        self.data_bitmap.first_zero().map(|p| p + 1)
    }

    fn next_free_inode(&self) -> Option<usize> {
        self.inode_bitmap.first_zero().map(|p| p + 1)
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn full_bitmap_with_hole(len: usize, hole: Option<usize>) -> BitVec<u8, Lsb0> {
        let mut bitmap = bitvec![u8, Lsb0; 1; len];
        if let Some(hole) = hole {
            bitmap.set(hole, false);
        }
        bitmap
    }

    #[test]
    fn test_has_inode() {
        let group = Group::new(full_bitmap_with_hole(10, None), BitVec::new());
        assert!(!group.has_inode(0));
        assert!(group.has_inode(1));
        assert!(group.has_inode(10));
        assert!(!group.has_inode(11));
    }

    #[test]
    fn test_has_data_block() {
        let group = Group::new(BitVec::new(), full_bitmap_with_hole(10, Some(4)));
        assert!(group.has_data_block(1));
        assert!(!group.has_data_block(5));
        assert!(!group.has_data_block(11));
    }

    #[test]
    fn test_allocate_takes_first_hole() {
        for hole in [0, 6, 14] {
            let mut group = Group::new(
                full_bitmap_with_hole(15, Some(hole)),
                full_bitmap_with_hole(15, Some(hole)),
            );
            assert_eq!(group.allocate_inode(), Some(hole + 1));
            assert!(group.inode_bitmap[hole]);
            assert_eq!(group.allocate_inode(), None);

            assert_eq!(group.allocate_data_block(), Some(hole + 1));
            assert!(group.data_bitmap[hole]);
            assert_eq!(group.allocate_data_block(), None);
        }
    }

    #[test]
    fn test_release_makes_slot_reusable() {
        let mut group = Group::empty(512);
        assert_eq!(group.allocate_inode(), Some(1));
        assert_eq!(group.allocate_inode(), Some(2));
        group.release_inode(1);
        assert_eq!(group.free_inodes(), 4095);
        assert_eq!(group.allocate_inode(), Some(1));

        assert_eq!(group.allocate_data_block(), Some(1));
        group.release_data_block(1);
        assert_eq!(group.free_data_blocks(), 4096);
    }

    #[test]
    fn test_bitmaps_round_trip() {
        let block_size = 512;
        let mut image = Cursor::new(vec![0u8; Group::offset(block_size, 1) as usize + 1024]);
        let mut group = Group::empty(block_size);
        group.allocate_inode();
        group.allocate_data_block();
        group.allocate_data_block();
        group.serialize_into(&mut image, block_size, 0).unwrap();

        let groups = Group::deserialize_from(&mut image, block_size, 1).unwrap();
        assert_eq!(groups[0].free_inodes(), 4095);
        assert_eq!(groups[0].free_data_blocks(), 4094);
        assert!(groups[0].has_data_block(2));
    }
}
