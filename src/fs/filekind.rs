use serde::{Deserialize, Serialize};

/// an enum to describe the type of a file
#[derive(Serialize, Deserialize, Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// an regular file
    RegularFile,
    /// a directory
    Directory,
    /// a symbolic link
    SymbolicLink,
    /// never written by this filesystem, only seen in zeroed records
    #[default]
    Unknown,
}

impl FileKind {
    /// derive the kind from the `S_IFMT` bits of a mode
    pub fn from_mode(mode: u32) -> Self {
        match mode & libc::S_IFMT {
            libc::S_IFREG => FileKind::RegularFile,
            libc::S_IFDIR => FileKind::Directory,
            libc::S_IFLNK => FileKind::SymbolicLink,
            _ => FileKind::Unknown,
        }
    }
}

/// capabilities of each kind,
/// in place of one operation table per kind
impl FileKind {
    /// holds directory entries: lookup, create, mkdir, unlink...
    pub fn supports_lookup(self) -> bool {
        self == FileKind::Directory
    }

    /// may gain or lose names through link/unlink
    pub fn supports_link_management(self) -> bool {
        matches!(self, FileKind::RegularFile | FileKind::SymbolicLink)
    }

    /// carries a symlink target for readlink
    pub fn supports_symlink_target(self) -> bool {
        self == FileKind::SymbolicLink
    }
}

/// implement a trait to convert [FileKind] to [fuser::FileType]
impl From<FileKind> for fuser::FileType {
    fn from(kind: FileKind) -> Self {
        match kind {
            FileKind::RegularFile => fuser::FileType::RegularFile,
            FileKind::Directory => fuser::FileType::Directory,
            FileKind::SymbolicLink => fuser::FileType::Symlink,
            // Unknown Types are treated as regular files
            FileKind::Unknown => fuser::FileType::RegularFile,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_mode() {
        assert_eq!(FileKind::from_mode(libc::S_IFREG | 0o644), FileKind::RegularFile);
        assert_eq!(FileKind::from_mode(libc::S_IFDIR | 0o755), FileKind::Directory);
        assert_eq!(FileKind::from_mode(libc::S_IFLNK | 0o777), FileKind::SymbolicLink);
        assert_eq!(FileKind::from_mode(libc::S_IFIFO | 0o644), FileKind::Unknown);
        assert_eq!(FileKind::from_mode(0o644), FileKind::Unknown);
    }

    #[test]
    fn test_capabilities() {
        assert!(FileKind::Directory.supports_lookup());
        assert!(!FileKind::Directory.supports_link_management());
        assert!(FileKind::RegularFile.supports_link_management());
        assert!(FileKind::SymbolicLink.supports_symlink_target());
        assert!(!FileKind::RegularFile.supports_symlink_target());
    }
}
