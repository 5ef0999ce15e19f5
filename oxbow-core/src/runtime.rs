//! Per-worker runtime construction: io_uring when the kernel supports it,
//! epoll/kqueue legacy driver otherwise.

use std::future::Future;

#[cfg(target_os = "linux")]
use monoio::IoUringDriver;
use monoio::{LegacyDriver, Runtime, RuntimeBuilder};

pub enum RuntimeWrapper {
    #[cfg(target_os = "linux")]
    IoUring(Runtime<IoUringDriver>),
    Legacy(Runtime<LegacyDriver>),
}

impl RuntimeWrapper {
    /// `entries` is the completion ring depth
    /// (`Config::size_completions_reap_max`).
    pub fn new(entries: u32) -> Self {
        #[cfg(target_os = "linux")]
        if monoio::utils::detect_uring() {
            let runtime = RuntimeBuilder::<IoUringDriver>::new()
                .with_entries(entries)
                .build()
                .expect("build io_uring runtime");
            return RuntimeWrapper::IoUring(runtime);
        }

        let _ = entries;
        let runtime = RuntimeBuilder::<LegacyDriver>::new()
            .build()
            .expect("build legacy runtime");
        RuntimeWrapper::Legacy(runtime)
    }

    pub fn block_on<F>(&mut self, future: F) -> F::Output
    where
        F: Future,
    {
        match self {
            #[cfg(target_os = "linux")]
            RuntimeWrapper::IoUring(driver) => driver.block_on(future),
            RuntimeWrapper::Legacy(driver) => driver.block_on(future),
        }
    }
}
