//! ╔═══════════════════════════════════════════════════════════════════════════╗
//! ║                          PI KERNEL - MAIN                                 ║
//! ║                  Boot, Heap, and the Filesystem Switch                    ║
//! ╚═══════════════════════════════════════════════════════════════════════════╝
//!
//! Boot stub and `kernel_main` for `aarch64-unknown-none`:
//!
//!   cargo build -p pi-kernel --release --target aarch64-unknown-none --features bare-metal
//!
//! On any other target this binary is empty; everything testable lives in
//! the library.

#![cfg_attr(all(target_arch = "aarch64", target_os = "none"), no_std)]
#![cfg_attr(all(target_arch = "aarch64", target_os = "none"), no_main)]

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod boot {
    extern crate alloc;

    use alloc::sync::Arc;
    use core::panic::PanicInfo;

    use pi_kernel::drivers::{self, RamDisk};
    use pi_kernel::fs::{self, fat32, Vfs, VfsResult, SeekFrom, O_CREAT, O_RDONLY, O_RDWR};
    use pi_kernel::{arch, kernel, kprint, kprintln};

    /// 1 MiB scratch disk mounted at /mnt
    const BOOT_DISK_SECTORS: u32 = 2048;

    // ═══════════════════════════════════════════════════════════════════════════
    // BOOT STUB
    // ═══════════════════════════════════════════════════════════════════════════

    core::arch::global_asm!(
        ".section .text.boot",
        ".global _start",
        "_start:",
        // Only core 0 boots; the others sleep forever
        "    mrs     x1, mpidr_el1",
        "    and     x1, x1, #3",
        "    cbz     x1, .Lprimary",
        ".Lpark:",
        "    wfe",
        "    b       .Lpark",
        ".Lprimary:",
        "    ldr     x0, =0x30D00800", // SCTLR_EL1: RES1 bits, MMU and caches off
        "    msr     sctlr_el1, x0",
        "    mrs     x0, CurrentEL",
        "    lsr     x0, x0, #2",
        "    cmp     x0, #2",
        "    b.ne    .Lel1",
        // EL2 -> EL1h, AArch64 at EL1, DAIF masked
        "    mov     x0, #(1 << 31)",
        "    msr     hcr_el2, x0",
        "    mov     x0, #0x3c5",
        "    msr     spsr_el2, x0",
        "    adr     x0, .Lel1",
        "    msr     elr_el2, x0",
        "    eret",
        ".Lel1:",
        "    ldr     x0, =__stack_top",
        "    mov     sp, x0",
        // No FP/SIMD traps
        "    mov     x0, #(3 << 20)",
        "    msr     cpacr_el1, x0",
        "    isb",
        "    ldr     x0, =__bss_start",
        "    ldr     x1, =__bss_end",
        ".Lzero_bss:",
        "    cmp     x0, x1",
        "    b.hs    .Lbss_done",
        "    str     xzr, [x0], #8",
        "    b       .Lzero_bss",
        ".Lbss_done:",
        "    bl      kernel_main",
        ".Lhang:",
        "    wfe",
        "    b       .Lhang",
        ".text",
    );

    // ═══════════════════════════════════════════════════════════════════════════
    // KERNEL ENTRY POINT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Main kernel entry, called from `_start` on core 0 at EL1
    #[no_mangle]
    pub extern "C" fn kernel_main() -> ! {
        drivers::uart::early_init();
        print_banner();
        kprintln!("[CPU]  Core {} running at EL{}", arch::core_id(), arch::exception_level());

        kprintln!("[INIT] Heap...");
        // SAFETY: first and only call, nothing has allocated yet
        unsafe { kernel::memory::init() };
        let (start, end) = kernel::memory::heap_region();
        kprintln!("       {:#x} - {:#x} ({} KiB)", start, end, (end - start) / 1024);

        kprintln!("[INIT] Filesystems...");
        let vfs = match fs::init() {
            Ok(vfs) => vfs,
            Err(e) => halt(e),
        };
        if let Err(e) = mount_boot_disk(vfs) {
            kprintln!("[INIT] Boot disk unavailable: {}", e);
        }
        if let Err(e) = vfs_test(vfs) {
            kprintln!("[TEST] VFS self-test failed: {}", e);
        }

        let stats = kernel::memory::stats();
        kprintln!(
            "[MEM]  {} allocations, {} freed, {} KiB available",
            stats.total_allocations,
            stats.frees,
            kernel::memory::heap_available() / 1024
        );
        kprintln!();

        console(vfs)
    }

    fn halt(reason: fs::VfsError) -> ! {
        kprintln!("[INIT] Fatal: {}", reason);
        loop {
            arch::wfi();
        }
    }

    fn print_banner() {
        kprintln!();
        kprintln!("╔═══════════════════════════════════════════════════════════╗");
        kprintln!("║                      PI KERNEL                            ║");
        kprintln!("║          tmpfs root  ·  FAT32  ·  pipes                   ║");
        kprintln!("╚═══════════════════════════════════════════════════════════╝");
        kprintln!();
    }

    /// Format a RAM disk as FAT32 and mount it at /mnt.
    fn mount_boot_disk(vfs: &Vfs) -> VfsResult<()> {
        let disk = Arc::new(RamDisk::new(BOOT_DISK_SECTORS));
        fat32::format(disk.as_ref(), 1)?;
        vfs.register(fat32::Fat32::descriptor(disk)?)?;
        vfs.mkdir("/mnt")?;
        vfs.mount("/mnt", "fat32")?;
        Ok(())
    }

    /// Create, write and read back one file on each filesystem.
    fn vfs_test(vfs: &Vfs) -> VfsResult<()> {
        vfs.mkdir("/lll")?;
        for path in ["/lll/ddd", "/mnt/ddd"] {
            let fd = vfs.open(path, O_CREAT | O_RDWR)?;
            let written = vfs.write(fd, b"hello, vfs")?;
            vfs.seek(fd, SeekFrom::Start(0))?;

            let mut buf = [0u8; 32];
            let n = vfs.read(fd, &mut buf)?;
            vfs.close(fd)?;
            kprintln!(
                "[TEST] {}: wrote {}, read {:?}",
                path,
                written,
                core::str::from_utf8(&buf[..n]).unwrap_or("<binary>")
            );
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CONSOLE
    // ═══════════════════════════════════════════════════════════════════════════

    fn console(vfs: &Vfs) -> ! {
        drivers::uart::put_line("Commands: ls <dir>, cat <file>, mkdir <dir>, mounts");
        let mut line = [0u8; 128];
        loop {
            kprint!("> ");
            let len = drivers::uart::get_line(&mut line);
            let input = core::str::from_utf8(&line[..len]).unwrap_or("");
            let mut words = input.split_whitespace();

            let result = match (words.next(), words.next()) {
                (Some("ls"), path) => list(vfs, path.unwrap_or("/")),
                (Some("cat"), Some(path)) => cat(vfs, path),
                (Some("mkdir"), Some(path)) => vfs.mkdir(path),
                (Some("mounts"), _) => {
                    for mount in vfs.mounts() {
                        kprintln!("{}  {:<8} {}", mount.id(), mount.filesystem(), mount.target());
                    }
                    Ok(())
                }
                (None, _) => Ok(()),
                _ => {
                    drivers::uart::put_line("?");
                    Ok(())
                }
            };
            if let Err(e) = result {
                kprintln!("error: {}", e);
            }
        }
    }

    fn list(vfs: &Vfs, path: &str) -> VfsResult<()> {
        for entry in vfs.read_dir(path)? {
            kprintln!("{:?}  {:>6}  {}", entry.kind, entry.size, entry.name);
        }
        Ok(())
    }

    fn cat(vfs: &Vfs, path: &str) -> VfsResult<()> {
        let fd = vfs.open(path, O_RDONLY)?;
        let mut buf = [0u8; 64];
        let result = loop {
            match vfs.read(fd, &mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => kprint!("{}", core::str::from_utf8(&buf[..n]).unwrap_or("?")),
                Err(e) => break Err(e),
            }
        };
        kprintln!();
        vfs.close(fd)?;
        result
    }

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        arch::irq_disable();

        kprintln!();
        kprintln!("╔═══════════════════════════════════════════════════════════╗");
        kprintln!("║                    KERNEL PANIC                           ║");
        kprintln!("╚═══════════════════════════════════════════════════════════╝");
        if let Some(location) = info.location() {
            kprintln!("Location: {}:{}", location.file(), location.line());
        }
        kprintln!("PANIC: {}", info.message());
        kprintln!("System halted. Reset to restart.");

        loop {
            arch::wfi();
        }
    }
}

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
fn main() {}
