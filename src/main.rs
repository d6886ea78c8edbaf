//! CLI front-end: mounts the filesystem engine onto a FUSE mountpoint.
//!
//! Argument parsing is hand-rolled, matching the busybox-style dispatcher
//! this binary grew out of, rather than pulling in an argument-parsing
//! crate for a single required option and one positional argument.

use std::env;
use std::path::PathBuf;
use std::process::exit;

use ext2fsd::block::FileBlockDevice;
use ext2fsd::fuse_glue::Ext2Fuse;
use ext2fsd::mount::Mount;
use fuser::MountOption;

struct Args {
    device: PathBuf,
    mountpoint: PathBuf,
}

fn print_usage() {
    eprintln!("Usage: ext2fsd --device=<path> <mountpoint>");
}

fn error(msg: &str) -> ! {
    eprintln!("ext2fsd: {msg}");
    exit(1);
}

fn parse_args() -> Args {
    let mut device = None;
    let mut mountpoint = None;
    for arg in env::args().skip(1) {
        if let Some(path) = arg.strip_prefix("--device=") {
            device = Some(PathBuf::from(path));
        } else if arg == "-h" || arg == "--help" {
            print_usage();
            exit(0);
        } else if mountpoint.is_none() {
            mountpoint = Some(PathBuf::from(arg));
        } else {
            print_usage();
            exit(1);
        }
    }
    match (device, mountpoint) {
        (Some(device), Some(mountpoint)) => Args { device, mountpoint },
        _ => {
            print_usage();
            exit(1);
        }
    }
}

fn main() {
    env_logger::init();
    let args = parse_args();

    let device = FileBlockDevice::open(&args.device)
        .unwrap_or_else(|e| error(&format!("cannot open device {:?}: {e}", args.device)));
    let mount = Mount::open_device(device)
        .unwrap_or_else(|e| error(&format!("cannot mount {:?}: {e}", args.device)));

    let options = [
        MountOption::FSName("ext2fsd".to_string()),
        MountOption::DefaultPermissions,
    ];

    log::info!("mounting {:?} at {:?}", args.device, args.mountpoint);
    if let Err(e) = fuser::mount2(Ext2Fuse::new(mount), &args.mountpoint, &options) {
        error(&format!("mount failed: {e}"));
    }
}
