//! ramdisk — mount an in-memory filesystem bounded by a byte budget.
//!
//! Usage: `ramdisk <mount_point> <capacity_mib> [<snapshot_path>]`
//!
//! With a snapshot path, a readable snapshot file is decoded into the tree
//! on startup and the whole tree is written back to that path on unmount.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use ramfuse::MountController;

fn usage(prog: &str) {
    eprintln!("usage: {prog} <mount_point> <capacity_mib> [<snapshot_path>]");
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let prog = args.first().map(String::as_str).unwrap_or("ramdisk");
    if args.len() < 3 {
        eprintln!("{prog}: too few arguments");
        usage(prog);
        return ExitCode::FAILURE;
    }
    if args.len() > 4 {
        eprintln!("{prog}: too many arguments");
        usage(prog);
        return ExitCode::FAILURE;
    }

    // Non-numeric input parses to 0 and lands in the same rejection.
    let capacity_mib = args[2].parse::<i64>().unwrap_or(0);
    if capacity_mib <= 0 {
        eprintln!("Invalid Memory Size");
        return ExitCode::FAILURE;
    }
    let capacity = (capacity_mib as u64) << 20;

    let mount_point = PathBuf::from(&args[1]);
    let snapshot_path = args.get(3).map(PathBuf::from);

    let controller = MountController::new(mount_point, capacity, snapshot_path);
    if let Err(e) = controller.run() {
        tracing::error!("{e:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
