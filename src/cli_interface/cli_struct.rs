use byte_unit::Byte;
use clap::Parser;

#[derive(Parser, Debug, PartialEq)]
#[command(name = "blockfs", author, version, about, long_about)]
pub enum BlockFsCli {
    /// create a new file system
    Mkfs(MkfsArgs),
    /// register a filesystem to `FUSE` and mount it
    Mount(MountArgs),
}

/// accept plain byte counts as well as sizes like `64MiB` or `1GB`
fn parse_size(size: &str) -> Result<u64, String> {
    let bytes = Byte::from_str(size).map_err(|e| e.to_string())?.get_bytes();
    u64::try_from(bytes).map_err(|_| format!("{size} is too large"))
}

///make a new fs subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "make a new file system")]
pub struct MkfsArgs {
    /// the path of the file system image file, it must not exist yet
    #[clap(short = 'p', long)]
    pub image_file_path: String,
    /// the size of the file system, rounded down to whole block groups
    #[clap(short, long, value_parser = parse_size)]
    pub size: u64,
    /// the inode count of the file system
    #[clap(short, long)]
    pub inode_count: u64,
    /// the block size of the file system, a power of two of at least 512
    #[clap(short, long)]
    pub block_size: u32,
}

/// mount a fs subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "mount a file system")]
pub struct MountArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long)]
    pub image_file_path: String,
    /// the mount point of the file system
    #[clap(short, long)]
    pub mount_point: String,
    /// let users other than the mounting one access the file system
    #[clap(long)]
    pub allow_other: bool,
    /// unmount when the process exits
    #[clap(long)]
    pub auto_unmount: bool,
}
