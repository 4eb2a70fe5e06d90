//! The fault boundary: turns process-fatal signals into a jump back to the
//! top-level driver loop.
//!
//! The handler does the minimum that's async-signal-safe: it records the
//! signal in atomics and `siglongjmp`s to the checkpoint armed by the driver.
//! No unwind-protect cleanups run on this path; after a SIGSEGV or SIGABRT
//! the runtime's state is untrusted and executing user cleanup code in it
//! would be worse than skipping it. The driver resets the context to its
//! primordial frame instead.
//!
//! SIGINT is handled separately and cooperatively: it only sets a flag that
//! the driver polls between top-level forms.

/// A process-fatal fault intercepted by the boundary
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// A SIGSEGV, with the faulting address
    Segv {
        /// The address whose access faulted
        addr: usize,
    },
    /// A SIGABRT
    Abort,
}

#[cfg(unix)]
mod platform {
    use super::Fault;
    use std::{
        cell::UnsafeCell,
        ffi::c_void,
        ptr,
        sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering},
    };

    // The handler runs on its own stack so it works even when the fault is a
    // stack overflow.
    const ALT_STACK_SIZE: usize = 128 * 1024;

    /// An opaque `sigjmp_buf`, over-sized and over-aligned to cover the
    /// layouts of the supported platforms
    #[repr(C, align(16))]
    pub struct SigJmpBuf {
        _buf: [u8; 512],
    }

    impl SigJmpBuf {
        const fn zeroed() -> Self {
            Self { _buf: [0; 512] }
        }
    }

    unsafe extern "C" {
        #[cfg_attr(target_os = "linux", link_name = "__sigsetjmp")]
        pub fn sigsetjmp(env: *mut SigJmpBuf, savemask: libc::c_int) -> libc::c_int;
        fn siglongjmp(env: *mut SigJmpBuf, value: libc::c_int) -> !;
    }

    struct JmpBufCell(UnsafeCell<SigJmpBuf>);

    // The driver and the handler both run on the main thread; the buffer is
    // never touched from anywhere else.
    unsafe impl Sync for JmpBufCell {}

    static CHECKPOINT: JmpBufCell = JmpBufCell(UnsafeCell::new(SigJmpBuf::zeroed()));

    static CHECKPOINT_ARMED: AtomicBool = AtomicBool::new(false);
    static FAULT_SIGNAL: AtomicI32 = AtomicI32::new(0);
    static FAULT_ADDR: AtomicUsize = AtomicUsize::new(0);
    static INTERRUPTED: AtomicBool = AtomicBool::new(false);

    /// The process-wide checkpoint buffer, for [checkpoint!](crate::fault::checkpoint)
    pub fn jmp_buf_ptr() -> *mut SigJmpBuf {
        CHECKPOINT.0.get()
    }

    /// Marks the checkpoint buffer as holding a valid jump destination
    pub fn arm() {
        CHECKPOINT_ARMED.store(true, Ordering::Release);
    }

    /// Takes the fault recorded by the handler, if one fired
    pub fn take_fault() -> Option<Fault> {
        match FAULT_SIGNAL.swap(0, Ordering::Acquire) {
            0 => None,
            libc::SIGABRT => Some(Fault::Abort),
            _ => Some(Fault::Segv {
                addr: FAULT_ADDR.load(Ordering::Acquire),
            }),
        }
    }

    /// Takes the SIGINT flag, clearing it
    pub fn interrupted() -> bool {
        INTERRUPTED.swap(false, Ordering::Acquire)
    }

    extern "C" fn fault_handler(
        signal: libc::c_int,
        info: *mut libc::siginfo_t,
        _ucontext: *mut c_void,
    ) {
        // Only atomics and siglongjmp from here on; anything else is not
        // async-signal-safe.
        if !CHECKPOINT_ARMED.swap(false, Ordering::Acquire) {
            unsafe { libc::_exit(128 + signal) };
        }
        FAULT_SIGNAL.store(signal, Ordering::Release);
        if signal == libc::SIGSEGV && !info.is_null() {
            let addr = fault_address(info);
            FAULT_ADDR.store(addr, Ordering::Release);
        }
        unsafe { siglongjmp(jmp_buf_ptr(), 1) };
    }

    #[cfg(target_os = "linux")]
    fn fault_address(info: *mut libc::siginfo_t) -> usize {
        unsafe { (*info).si_addr() as usize }
    }

    #[cfg(not(target_os = "linux"))]
    fn fault_address(info: *mut libc::siginfo_t) -> usize {
        unsafe { (*info).si_addr as usize }
    }

    extern "C" fn interrupt_handler(_signal: libc::c_int) {
        INTERRUPTED.store(true, Ordering::Release);
    }

    /// Installs the alternate signal stack and the handlers
    ///
    /// Failure to install is reported but not fatal; the process simply runs
    /// without fault recovery.
    pub fn install() {
        unsafe {
            let stack_memory = libc::mmap(
                ptr::null_mut(),
                ALT_STACK_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            );
            if stack_memory != libc::MAP_FAILED {
                let alt_stack = libc::stack_t {
                    ss_sp: stack_memory,
                    ss_flags: 0,
                    ss_size: ALT_STACK_SIZE,
                };
                libc::sigaltstack(&raw const alt_stack, ptr::null_mut());
            }

            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
            libc::sigfillset(&raw mut action.sa_mask);
            action.sa_sigaction = fault_handler
                as extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut c_void)
                as usize;
            for signal in [libc::SIGSEGV, libc::SIGABRT] {
                if libc::sigaction(signal, &raw const action, ptr::null_mut()) != 0 {
                    eprintln!("warning: couldn't install the handler for signal {signal}");
                }
            }

            libc::signal(
                libc::SIGINT,
                interrupt_handler as extern "C" fn(libc::c_int) as libc::sighandler_t,
            );
        }
    }
}

#[cfg(not(unix))]
mod platform {
    use super::Fault;

    /// No fault recovery off unix; faults terminate the process as usual
    pub fn install() {}

    /// Always `None` off unix
    pub fn take_fault() -> Option<Fault> {
        None
    }

    /// Always false off unix
    pub fn interrupted() -> bool {
        false
    }
}

#[cfg(unix)]
pub use platform::{arm, jmp_buf_ptr, sigsetjmp};
pub use platform::{install, interrupted, take_fault};

/// Establishes the recovery checkpoint in the caller's own stack frame and
/// reports the fault that resumed it, if any
///
/// This has to be a macro: `sigsetjmp`'s caller must still be on the stack
/// when `siglongjmp` fires, so the call can't be hidden behind a function
/// boundary. Expand it at the top of the driver loop and nowhere else.
#[cfg(unix)]
macro_rules! checkpoint {
    () => {{
        // SAFETY: the buffer is the process-wide checkpoint, and the
        // expansion site (the driver loop) outlives every jump to it.
        if unsafe { $crate::fault::sigsetjmp($crate::fault::jmp_buf_ptr(), 1) } == 0 {
            $crate::fault::arm();
            None
        } else {
            // The handler disarmed the checkpoint before jumping here; the
            // buffer is still valid, so re-arm it for the next fault.
            $crate::fault::arm();
            $crate::fault::take_fault()
        }
    }};
}

#[cfg(not(unix))]
macro_rules! checkpoint {
    () => {
        Option::<$crate::fault::Fault>::None
    };
}

pub(crate) use checkpoint;

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // The count lives in a static: locals changed between sigsetjmp and a
    // siglongjmp back to it have indeterminate values.
    static RECOVERIES: AtomicUsize = AtomicUsize::new(0);

    #[test]
    fn the_checkpoint_recovers_from_repeated_faults() {
        install();
        // One expansion, as in the driver loop; every fault resumes here
        if let Some(fault) = checkpoint!() {
            assert!(matches!(fault, Fault::Segv { .. }));
            RECOVERIES.fetch_add(1, Ordering::SeqCst);
        }
        if RECOVERIES.load(Ordering::SeqCst) < 2 {
            unsafe { libc::raise(libc::SIGSEGV) };
        }
        assert_eq!(RECOVERIES.load(Ordering::SeqCst), 2);
    }
}
