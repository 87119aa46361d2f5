//! Signal masking for offload threads.
//!
//! Pool workers handle no signals; the reactor thread keeps the
//! process's disposition.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        use evio_core::{EvioError, Result};

        /// Block every signal on the calling thread.
        pub fn block_all() -> Result<()> {
            unsafe {
                let mut set: libc::sigset_t = std::mem::zeroed();
                libc::sigfillset(&mut set);
                let err = libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
                if err != 0 {
                    return Err(EvioError::SigmaskFailed(err));
                }
            }
            Ok(())
        }
    } else {
        use evio_core::Result;

        pub fn block_all() -> Result<()> {
            Ok(())
        }
    }
}
