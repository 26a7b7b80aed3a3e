use blockfs::cli_interface::BlockFsCli;
use clap::Parser;
/// a CLI interface to users to choose create our filesystem,
/// or register it to `FUSE` and mount it.
///
/// The latter will block the program until we umount our filesystem ourselves,
///
/// or specify `--auto-unmount` when mounting this fs.
fn main() -> anyhow::Result<()> {
    env_logger::builder().format_timestamp_nanos().init();
    let args = BlockFsCli::parse();
    match args {
        BlockFsCli::Mkfs(args) => {
            //create a new file system
            blockfs::mkfs::mkfs(
                args.image_file_path,
                args.size,
                args.inode_count,
                args.block_size,
            )?;
        }
        BlockFsCli::Mount(args) => {
            //register a filesystem to `FUSE` and mount it
            blockfs::mount::mount(
                args.image_file_path,
                args.mount_point,
                args.allow_other,
                args.auto_unmount,
            )?;
        }
    }
    Ok(())
}
