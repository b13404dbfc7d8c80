//! The contract with the external LaTeX compiler.
//!
//! One pass is one process run: `<executable> <args...> <document>` with the
//! scratch directory as working directory. Exit code 0 is success; anything
//! else (including death by signal) is failure. The wait is an async process
//! exit notification, so a long compile only suspends its own request.

use crate::config::CompilerConfig;
use crate::error::FormError;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassStatus {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl PassStatus {
    pub fn success(self) -> bool {
        self.code == Some(0)
    }
}

pub trait Compiler: Send + Sync {
    fn compile(
        &self,
        workdir: &Path,
        document: &Path,
    ) -> impl Future<Output = Result<PassStatus, FormError>> + Send;
}

/// Runs a real compiler binary.
#[derive(Debug, Clone)]
pub struct ProcessCompiler {
    executable: PathBuf,
    args: Vec<String>,
}

impl ProcessCompiler {
    pub fn new(config: &CompilerConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            args: config.args.clone(),
        }
    }
}

/// Last lines of compiler output, enough to see why LaTeX gave up.
fn tail(output: &[u8], lines: usize) -> String {
    let text = String::from_utf8_lossy(output);
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

impl Compiler for ProcessCompiler {
    async fn compile(&self, workdir: &Path, document: &Path) -> Result<PassStatus, FormError> {
        log::debug!(
            "running {} on {} in {}",
            self.executable.display(),
            document.display(),
            workdir.display()
        );
        let output = Command::new(&self.executable)
            .args(&self.args)
            .arg(document)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .output()
            .await?;
        let status = PassStatus {
            code: output.status.code(),
        };
        if !status.success() {
            log::warn!(
                "{} exited with {:?}:\n{}",
                self.executable.display(),
                status.code,
                tail(&output.stdout, 20)
            );
        }
        Ok(status)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// In-process compiler double.
    ///
    /// Each pass pops the next scripted exit code (0 once the script runs
    /// out). A successful pass writes `<document stem>.pdf` into the working
    /// directory, like pdflatex does. A compiler built with `holding_first_pass`
    /// parks its first pass until `release` is called.
    #[derive(Default)]
    pub(crate) struct ScriptedCompiler {
        codes: Mutex<VecDeque<Option<i32>>>,
        passes: AtomicUsize,
        hold_first: AtomicBool,
        release: Notify,
    }

    impl ScriptedCompiler {
        pub(crate) fn with_codes(codes: &[Option<i32>]) -> Self {
            Self {
                codes: Mutex::new(codes.iter().copied().collect()),
                ..Self::default()
            }
        }

        pub(crate) fn holding_first_pass() -> Self {
            Self {
                hold_first: AtomicBool::new(true),
                ..Self::default()
            }
        }

        pub(crate) fn release(&self) {
            self.release.notify_one();
        }

        pub(crate) fn passes(&self) -> usize {
            self.passes.load(Ordering::SeqCst)
        }
    }

    impl Compiler for ScriptedCompiler {
        async fn compile(&self, workdir: &Path, document: &Path) -> Result<PassStatus, FormError> {
            self.passes.fetch_add(1, Ordering::SeqCst);
            if self.hold_first.swap(false, Ordering::SeqCst) {
                self.release.notified().await;
            }
            let code = self
                .codes
                .lock()
                .map(|mut c| c.pop_front().unwrap_or(Some(0)))
                .unwrap_or(Some(0));
            let status = PassStatus { code };
            if status.success() {
                let stem = document.file_stem().unwrap_or_default();
                let pdf = workdir.join(stem).with_extension("pdf");
                std::fs::write(pdf, b"%PDF-1.5 scripted")?;
            }
            Ok(status)
        }
    }
}
