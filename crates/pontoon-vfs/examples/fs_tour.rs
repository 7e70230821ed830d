//! Builds a filesystem view from the declarative mount config, then
//! walks it with the POSIX-shaped call set.
//!
//! Usage:
//!   cargo run --example fs_tour

use std::sync::Arc;

use anyhow::{bail, Result};
use pontoon_config::logging::{init_logging, LogLevel};
use pontoon_vfs::{KernelProxy, MemMount, OpenFlags, Whence};

fn main() -> Result<()> {
    init_logging(LogLevel::Debug);

    let cfg = pontoon_config::config();
    if cfg.vfs.root_mount != "mem" {
        bail!("unknown root mount kind {:?}", cfg.vfs.root_mount);
    }
    let kp = KernelProxy::new(Arc::new(MemMount::new()));

    // Attach the configured mounts, creating intermediate directories on
    // the root store as we go.
    for decl in &cfg.vfs.mounts {
        if decl.kind != "mem" {
            bail!("unknown mount kind {:?} at {}", decl.kind, decl.point);
        }
        if kp.stat(&decl.point).is_err() {
            kp.mkdir(&decl.point, 0o755)?;
        }
        kp.mount(&decl.point, Arc::new(MemMount::new()))?;
        println!("mounted {} ({})", decl.point, decl.kind);
    }

    kp.mkdir("/home", 0o755)?;
    kp.chdir("/home")?;

    let fd = kp.open("greeting.txt", OpenFlags::CREATE | OpenFlags::RDWR, 0o644)?;
    kp.write(fd, b"hello from the pontoon vfs\n")?;

    kp.lseek(fd, 0, Whence::Set)?;
    let mut buf = vec![0u8; 64];
    let n = kp.read(fd, &mut buf)?;
    print!("read back: {}", String::from_utf8_lossy(&buf[..n]));
    kp.close(fd)?;

    let root = kp.open("/", OpenFlags::empty(), 0)?;
    println!("listing of / :");
    for entry in kp.getdents(root, 64)? {
        println!("  {:>4}  {:?}  {}", entry.ino, entry.kind, entry.name);
    }
    kp.close(root)?;

    Ok(())
}
