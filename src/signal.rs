//! Interrupt masking around pinger execution.
//!
//! A console interrupt aimed at the hosting process would otherwise also
//! kill the pinger mid-sweep and leave half-parsed statistics behind.
//! SIGINT and SIGQUIT stay blocked while the subprocess runs; the previous
//! mask is restored when the guard drops, on every exit path.

/// RAII guard holding SIGINT/SIGQUIT blocked.
///
/// Failure to change the mask is logged and tolerated — the sweep still
/// runs, it just loses interrupt protection.
#[cfg(unix)]
#[derive(Debug)]
pub struct InterruptGuard {
    prev: Option<libc::sigset_t>,
}

#[cfg(unix)]
impl InterruptGuard {
    /// Block SIGINT and SIGQUIT for the current thread.
    pub fn block() -> Self {
        // SAFETY: sigset_t is plain data; the sigset calls only write into
        // the locals passed to them.
        unsafe {
            let mut mask: libc::sigset_t = std::mem::zeroed();
            let mut prev: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut mask);
            libc::sigaddset(&mut mask, libc::SIGINT);
            libc::sigaddset(&mut mask, libc::SIGQUIT);

            if libc::pthread_sigmask(libc::SIG_BLOCK, &mask, &mut prev) != 0 {
                tracing::warn!("cannot set signal mask to block the user signal");
                return Self { prev: None };
            }
            Self { prev: Some(prev) }
        }
    }
}

#[cfg(unix)]
impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if let Some(prev) = self.prev {
            // SAFETY: prev was produced by pthread_sigmask above.
            let rc = unsafe { libc::pthread_sigmask(libc::SIG_SETMASK, &prev, std::ptr::null_mut()) };
            if rc != 0 {
                tracing::warn!("cannot restore signal mask");
            }
        }
    }
}

/// No-op guard on platforms without POSIX signals.
#[cfg(not(unix))]
#[derive(Debug)]
pub struct InterruptGuard;

#[cfg(not(unix))]
impl InterruptGuard {
    pub fn block() -> Self {
        Self
    }
}
