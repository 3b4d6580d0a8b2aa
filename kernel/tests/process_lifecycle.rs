//! Cross-module lifecycle flows driven through the public kernel API
//! on the host target: signal delivery around exit codes, pipe
//! parent/child hand-off, ELF rejection, and zombie reaping.

use cinder_kernel::error::{ElfError, KernelError};
use cinder_kernel::ipc::Pipe;
use cinder_kernel::process::fd::{FdTable, OpenFile};
use cinder_kernel::process::{table, Pid, ProcessState, WaitOptions, WaitStatus};
use cinder_kernel::signal::{self, Delivery, Handler, SignalState};
use cinder_kernel::trap::TrapFrame;

fn setup() {
    cinder_kernel::mm::heap::init_for_host_tests();
}

#[test]
fn sigterm_default_produces_signal_exit_status() {
    // A process with no handler installed receives SIGTERM: delivery
    // decides on termination, and the recorded exit code 128 + 15
    // round-trips through the waitpid status encoding.
    let mut state = SignalState::new();
    state.post(signal::SIGTERM).unwrap();
    let mut frame = TrapFrame::zero();
    let decision = state.deliver(&mut frame);
    assert_eq!(decision, Delivery::Terminate(signal::SIGTERM));

    let exit_code = 128 + signal::SIGTERM as i32;
    assert_eq!(WaitStatus::Exited(exit_code).to_raw(), (128 + 15) << 8);
}

#[test]
fn sigkill_is_uncatchable_and_unblockable() {
    let mut state = SignalState::new();
    // Installing a handler for signal 9 fails.
    assert_eq!(
        state.set_handler(signal::SIGKILL, Handler::User(0x4000_2000)),
        Err(KernelError::InvalidArgument)
    );
    // A full blocked mask does not stop delivery.
    state.set_blocked(u64::MAX);
    state.post(signal::SIGKILL).unwrap();
    let mut frame = TrapFrame::zero();
    assert_eq!(state.deliver(&mut frame), Delivery::Terminate(signal::SIGKILL));
}

#[test]
fn handler_redirect_resumes_interrupted_instruction() {
    // Install a handler, deliver, and check the return path: ra holds
    // the interrupted pc so the handler's `ret` resumes it.
    let mut state = SignalState::new();
    state
        .set_handler(signal::SIGUSR1, Handler::User(0x4000_8000))
        .unwrap();
    state.post(signal::SIGUSR1).unwrap();

    let mut frame = TrapFrame::zero();
    frame.sepc = 0x4000_1234;
    assert_eq!(state.deliver(&mut frame), Delivery::Handler(signal::SIGUSR1));
    assert_eq!(frame.sepc, 0x4000_8000);
    assert_eq!(frame.ra, 0x4000_1234);
    assert_eq!(frame.a0, signal::SIGUSR1 as usize);
    // Exactly once per posting.
    assert_eq!(state.deliver(&mut frame), Delivery::None);
}

#[test]
fn pipe_hello_between_two_fd_tables() {
    // The "pipe hello" flow at the FD layer: parent creates the pipe,
    // the tables fork-share it, each side closes the end it does not
    // use, the child writes, the parent reads to EOF.
    setup();
    let pipe = Pipe::new();
    let mut parent = FdTable::new();
    let rfd = parent.install(OpenFile::pipe_reader(pipe.clone())).unwrap();
    let wfd = parent.install(OpenFile::pipe_writer(pipe.clone())).unwrap();

    let mut child = parent.clone_for_fork();

    child.close(rfd).unwrap();
    parent.close(wfd).unwrap();

    let child_write = child.get(wfd).unwrap();
    assert_eq!(child_write.write(b"hello").unwrap(), 5);
    child.close(wfd).unwrap();

    let parent_read = parent.get(rfd).unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(parent_read.read(&mut buf).unwrap(), 5);
    assert_eq!(&buf[..5], b"hello");
    // Second read: EOF.
    assert_eq!(parent_read.read(&mut buf).unwrap(), 0);
}

#[test]
fn rejected_elf_reports_magic_kind() {
    // execve("/bad") where the first bytes are zero: the parse fails
    // with the ELF-magic kind before anything is torn down.
    let bad = vec![0u8; 4096];
    match cinder_kernel::elf::parse(&bad) {
        Err(KernelError::Elf(ElfError::BadMagic)) => {}
        other => panic!("expected BadMagic, got {:?}", other),
    }
    // The errno code for that kind is distinct from the other ELF kinds.
    let magic = KernelError::Elf(ElfError::BadMagic).code();
    let arch = KernelError::Elf(ElfError::WrongArchitecture).code();
    assert_ne!(magic, arch);
}

#[test]
fn fork_wait_reap_cycle() {
    // Table-level fork-and-wait: child exits with 7, parent's waitpid
    // returns the pid and (7 << 8), and the slot is reclaimed.
    setup();
    let parent = table::spawn_embryo(Pid(0), String::from("parent")).unwrap();
    let child = table::spawn_embryo(parent.pid, String::from("child")).unwrap();
    let child_pid = child.pid;

    child
        .exit_code
        .store(7, core::sync::atomic::Ordering::Release);
    child.set_state(ProcessState::Zombie);
    drop(child);

    let (reaped, status) =
        cinder_kernel::process::wait::waitpid(&parent, None, WaitOptions::default()).unwrap();
    assert_eq!(reaped, child_pid);
    assert_eq!(status, 7 << 8);
    assert!(table::get(child_pid).is_none());

    // A second wait has no children left to report.
    assert!(matches!(
        cinder_kernel::process::wait::waitpid(&parent, None, WaitOptions::default()),
        Err(KernelError::NoChild)
    ));
    table::remove(parent.pid);
}

#[test]
fn broken_pipe_write_after_readers_close() {
    setup();
    let pipe = Pipe::new();
    let mut fds = FdTable::new();
    let rfd = fds.install(OpenFile::pipe_reader(pipe.clone())).unwrap();
    let wfd = fds.install(OpenFile::pipe_writer(pipe.clone())).unwrap();
    fds.close(rfd).unwrap();
    let writer = fds.get(wfd).unwrap();
    assert!(matches!(writer.write(b"x"), Err(KernelError::BrokenPipe)));
}
