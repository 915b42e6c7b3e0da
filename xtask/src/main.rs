//! Thin build/run runner: assembles the bootable ISO via `make` (which drives
//! the external `limine` deploy tool and `xorriso`) and launches it in QEMU.
//!
//! This crate intentionally contains no kernel logic; it is the operator
//! surface around the kernel binary, same as this codebase's previous
//! bootloader-image-building `main.rs`.

use std::env;
use std::path::PathBuf;
use std::process::Command;

fn main() {
    let root_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("xtask has a parent directory")
        .to_path_buf();

    let debug = env::args().any(|arg| arg == "DEBUG");

    let status = Command::new("make")
        .arg("iso")
        .current_dir(&root_dir)
        .status()
        .expect("failed to invoke make (is the ISO build Makefile present?)");
    assert!(status.success(), "ISO build failed");

    let iso_path = root_dir.join("target").join("benchix.iso");

    let mut cmd = Command::new("qemu-system-x86_64");
    if debug {
        cmd.arg("-s").arg("-S");
    }
    cmd.arg("-debugcon").arg("stdio");
    cmd.arg("-bios").arg(ovmf_prebuilt::ovmf_pure_efi());
    cmd.arg("-cdrom").arg(&iso_path);
    cmd.arg("-m").arg("256M");

    let mut child = cmd.spawn().expect("failed to launch qemu-system-x86_64");
    child.wait().expect("qemu exited abnormally");
}
