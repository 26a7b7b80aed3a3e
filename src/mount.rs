//! register our filesystem to `FUSE` and mount it
use fuser::MountOption;
use log::info;
use std::path::Path;

use crate::fs::BlockFs;

/// mount the image at `image_path` on `mountpoint`,
/// blocks until the filesystem is unmounted
pub fn mount<P>(image_path: P, mountpoint: P, allow_other: bool, auto_unmount: bool) -> anyhow::Result<()>
where
    P: AsRef<Path>,
{
    let fs = BlockFs::open_image(image_path.as_ref())?;
    info!(
        "mounting {} on {}",
        image_path.as_ref().display(),
        mountpoint.as_ref().display()
    );

    let mut opts = vec![
        MountOption::FSName("blockfs".to_string()),
        MountOption::DefaultPermissions,
        MountOption::RW,
    ];
    if allow_other {
        opts.push(MountOption::AllowOther);
    }
    if auto_unmount {
        opts.push(MountOption::AutoUnmount);
    }

    Ok(fuser::mount2(fs, mountpoint, &opts)?)
}
