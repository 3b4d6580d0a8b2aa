//! CinderOS kernel binary
//!
//! OpenSBI hands control to `_start` (see `arch::riscv64::boot`), which
//! calls `kmain` on the boot stack. `kmain` brings the machine up in
//! dependency order, spawns init, and then becomes the idle task.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_arch = "riscv64")]
mod kernel_main {
    use cinder_kernel::arch::riscv64::{boot, plic, sbi, timer, trap, uart};
    use cinder_kernel::{config, fs, logger, mm, process, sched};

    #[no_mangle]
    pub extern "C" fn kmain(hartid: usize, _dtb: usize) -> ! {
        cinder_kernel::println!();
        cinder_kernel::println!("CinderOS starting on hart {}", hartid);

        trap::init();
        logger::init();

        mm::init(boot::kernel_end()).expect("memory management init failed");

        uart::init();
        plic::init();
        plic::enable(plic::IRQ_UART0);
        timer::init();

        process::table::init_idle().expect("idle task init failed");
        fs::init().expect("root filesystem init failed");

        let init_pid = process::creation::spawn_from_path(process::IDLE_PID, "/bin/init")
            .expect("spawning init failed");
        wire_console_fds(init_pid);

        log::info!(
            target: "boot",
            "up: {} procs, slice {} ticks",
            process::table::count(),
            config::TIME_SLICE_TICKS
        );

        // The boot stack becomes the idle stack.
        sched::scheduler::idle_loop()
    }

    /// Give a freshly spawned process stdin/stdout/stderr on the
    /// console device.
    fn wire_console_fds(pid: cinder_kernel::Pid) {
        use cinder_kernel::process::fd::{OpenFile, OpenFlags};

        let Some(proc) = process::table::get(pid) else {
            return;
        };
        let console = fs::resolve("/", "/dev/console").expect("console device missing");
        let mut files = proc.files.lock();
        for flags in [OpenFlags::RDONLY, OpenFlags::WRONLY, OpenFlags::WRONLY] {
            files
                .install(OpenFile::from_node(console.clone(), OpenFlags(flags)))
                .expect("installing console fd failed");
        }
    }

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        cinder_kernel::println!();
        cinder_kernel::println!("KERNEL PANIC: {}", info);
        cinder_kernel::println!(
            "  ticks={} current={:?}",
            cinder_kernel::sched::clock::ticks(),
            cinder_kernel::sched::current_pid()
        );
        sbi::shutdown();
        loop {
            cinder_kernel::arch::wait_for_interrupt();
        }
    }
}

/// Host builds only exist so `cargo test` can compile the workspace;
/// the kernel does nothing as a host process.
#[cfg(not(target_os = "none"))]
fn main() {
    println!("cinder-kernel: bare-metal image; build with --target riscv64gc-unknown-none-elf");
}
