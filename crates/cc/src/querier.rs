//! Compiler querier
//!
//! Asks a GCC-compatible compiler for its target, version and PIC default.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use kubecc_core::{Toolchain, ToolchainKind, ToolchainLang};
use kubecc_run::{Querier, ToolchainError};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

const PIC_CHECK: &[u8] = b"#if defined __PIC__ || defined __pic__\n# error\n#endif\n";

/// Queries compilers by running them
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecQuerier;

impl ExecQuerier {
    pub fn new() -> Self {
        Self
    }
}

/// Toolchain kind and language from the executable's file name.
pub fn classify(executable: &Path) -> Option<(ToolchainKind, ToolchainLang)> {
    let name = executable.file_name()?.to_str()?;
    if name.contains("clang") {
        Some((ToolchainKind::Clang, ToolchainLang::Multi))
    } else if name.contains("++") {
        Some((ToolchainKind::Gnu, ToolchainLang::Cxx))
    } else if name.contains("cc") {
        Some((ToolchainKind::Gnu, ToolchainLang::C))
    } else {
        None
    }
}

/// Architecture from a target triple such as `x86_64-pc-linux-gnu`.
pub fn target_arch(triple: &str) -> Option<&str> {
    let parts: Vec<&str> = triple.trim().split('-').collect();
    if parts.len() <= 2 {
        return None;
    }
    Some(parts[0])
}

fn query_error(executable: &Path, message: impl Into<String>) -> ToolchainError {
    ToolchainError::Query {
        path: executable.to_path_buf(),
        message: message.into(),
    }
}

async fn dump(executable: &Path, flag: &str) -> Result<String, ToolchainError> {
    let output = Command::new(executable)
        .arg(flag)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| query_error(executable, e.to_string()))?;
    if !output.status.success() {
        return Err(query_error(
            executable,
            format!("{flag} failed: {}", String::from_utf8_lossy(&output.stderr).trim()),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Whether the compiler defines `__PIC__` without any flags.
async fn pic_default(executable: &Path) -> Result<bool, ToolchainError> {
    let mut child = Command::new(executable)
        .args(["-E", "-o", "/dev/null", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| query_error(executable, e.to_string()))?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(PIC_CHECK)
            .await
            .map_err(|e| query_error(executable, e.to_string()))?;
    }
    let output = child
        .wait_with_output()
        .await
        .map_err(|e| query_error(executable, e.to_string()))?;
    Ok(String::from_utf8_lossy(&output.stderr).contains("#error"))
}

#[async_trait]
impl Querier for ExecQuerier {
    async fn query(&self, executable: &Path) -> Result<Toolchain, ToolchainError> {
        let (kind, lang) = classify(executable)
            .ok_or_else(|| query_error(executable, "unknown compiler"))?;
        let triple = dump(executable, "-dumpmachine").await?;
        let arch = target_arch(&triple)
            .ok_or_else(|| query_error(executable, format!("unexpected target triple: {triple}")))?
            .to_string();
        let version = dump(executable, "-dumpversion").await?;
        let pic = pic_default(executable).await?;
        debug!(
            executable = %executable.display(),
            %kind,
            %arch,
            %version,
            pic,
            "Queried toolchain"
        );
        Ok(Toolchain::new(executable, kind)
            .with_lang(lang)
            .with_target_arch(arch)
            .with_version(version)
            .with_pic_default(pic))
    }
}
