//! Toolchain descriptors.
//!
//! A [`Toolchain`] describes a compiler executable on a particular host. Two
//! hosts may have the same compiler installed in different locations, so
//! remote matching uses [`Toolchain::equivalent_to`], which ignores the path.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Family of compiler a toolchain belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolchainKind {
    #[default]
    Unknown,
    Gnu,
    Clang,
    /// Simulation toolchain whose "compiles" are timed sleeps
    Sleep,
}

impl ToolchainKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolchainKind::Unknown => "unknown",
            ToolchainKind::Gnu => "gnu",
            ToolchainKind::Clang => "clang",
            ToolchainKind::Sleep => "sleep",
        }
    }
}

impl fmt::Display for ToolchainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source language a toolchain accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolchainLang {
    #[default]
    Unknown,
    C,
    Cxx,
    /// Driver that accepts both C and C++ (e.g. `gcc`, `clang`)
    Multi,
}

impl fmt::Display for ToolchainLang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolchainLang::Unknown => "unknown",
            ToolchainLang::C => "c",
            ToolchainLang::Cxx => "c++",
            ToolchainLang::Multi => "multi",
        };
        f.write_str(s)
    }
}

/// A compiler executable and the properties that determine its output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Toolchain {
    /// Absolute path to the executable on the host that owns this descriptor
    pub executable: PathBuf,
    pub kind: ToolchainKind,
    pub lang: ToolchainLang,
    /// Target triple, e.g. `x86_64-linux-gnu`
    pub target_arch: String,
    pub version: String,
    /// Whether the compiler emits position independent code by default
    pub pic_default: bool,
}

impl Toolchain {
    pub fn new(executable: impl Into<PathBuf>, kind: ToolchainKind) -> Self {
        Self {
            executable: executable.into(),
            kind,
            ..Default::default()
        }
    }

    pub fn with_lang(mut self, lang: ToolchainLang) -> Self {
        self.lang = lang;
        self
    }

    pub fn with_target_arch(mut self, arch: impl Into<String>) -> Self {
        self.target_arch = arch.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_pic_default(mut self, pic: bool) -> Self {
        self.pic_default = pic;
        self
    }

    /// Compares every field except the executable path.
    pub fn equivalent_to(&self, other: &Toolchain) -> bool {
        self.kind == other.kind
            && self.lang == other.lang
            && self.target_arch == other.target_arch
            && self.pic_default == other.pic_default
            && self.version == other.version
    }
}

impl fmt::Display for Toolchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} {} {}, {})",
            self.executable.display(),
            self.kind,
            self.lang,
            self.version,
            self.target_arch
        )
    }
}
