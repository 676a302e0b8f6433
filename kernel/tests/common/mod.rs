//! A booted kernel plus a drained terminal surface for end-to-end tests.

use coral_kernel::Kernel;
use coral_kernel::KernelOptions;
use coral_streams::StreamReader;

pub struct TestKernel {
    pub kernel: Kernel,
    output: StreamReader,
}

impl TestKernel {
    pub async fn boot() -> Self {
        Self::boot_with(KernelOptions::default()).await
    }

    pub async fn boot_with(options: KernelOptions) -> Self {
        let kernel = Kernel::boot(options).await.expect("kernel boot");
        let output = kernel
            .terminal()
            .take_output()
            .await
            .expect("terminal output stream")
            .lock()
            .expect("lock terminal output");
        Self { kernel, output }
    }

    /// Runs one command line through the login shell and returns its exit
    /// status plus whatever reached the terminal surface.
    pub async fn run(&mut self, line: &str) -> (i32, String) {
        let status = self.kernel.shell().execute_detached(line).await;
        (status, self.drain())
    }

    /// Everything written to the terminal since the last drain.
    pub fn drain(&mut self) -> String {
        let mut bytes = Vec::new();
        while let Some(chunk) = self.output.try_read() {
            bytes.extend_from_slice(&chunk);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
