//! GCC / Clang command line classifier
//!
//! [`CcArgs`] records where the interesting arguments are (action, input,
//! output) and decides whether an invocation can be compiled on a remote
//! agent. Anything that depends on files only this host has (profile data,
//! dependency files written by the preprocessor, native CPU tuning, linking)
//! forces the invocation to run locally.
//!
//! The mutators rewrite the command line for the send-remote pipeline:
//! preprocess locally with `-E`, strip preprocessor and linker arguments,
//! then compile the preprocessed source elsewhere.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use kubecc_core::Toolchain;
use kubecc_run::{ArgParser, RunMode};
use tracing::{debug, warn};

use crate::error::ArgsError;
use crate::filename::{
    dir, extension, is_source_file, replace_extension, should_run_local, source_file_language,
};

/// Arguments (`--arg` or `--arg value`) that instrument for profiling
pub const PROFILE_ARGS: &[&str] = &[
    "-fprofile-arcs",
    "-ftest-coverage",
    "--coverage",
    "-fprofile-correction",
];

/// Profiling arguments of the form `--arg=value`
pub const PROFILE_PREFIX_ARGS: &[&str] = &["-fprofile-generate", "-fprofile-use", "-fauto-profile"];

/// Preprocessor and linker arguments followed by a separate value
pub const LOCAL_ARGS_WITH_VALUES: &[&str] = &[
    "-D",
    "-I",
    "-U",
    "-L",
    "-l",
    "-MF",
    "-MT",
    "-MQ",
    "-include",
    "-imacros",
    "-iprefix",
    "-iwithprefix",
    "-isystem",
    "-imultilib",
    "-iplugindir",
    "-iquote",
    "-isysroot",
    "-iwithprefixbefore",
    "-idirafter",
];

/// Preprocessor arguments without a value
pub const LOCAL_ARGS_NO_VALUES: &[&str] = &["-undef", "-nostdinc", "-nostdinc++", "-MD", "-MMD", "-MG", "-MP"];

/// Preprocessor and linker arguments with the value attached
pub const LOCAL_PREFIX_ARGS: &[&str] = &[
    "-Wp,", "-Wl,", "-D", "-U", "-I", "-l", "-L", "-MF", "-MT", "-MQ", "-isystem", "-stdlib",
];

const PIC_ARGS: &[&str] = &[
    "-fpic", "-fPIC", "-fno-pic", "-fno-PIC", "-fpie", "-fPIE", "-fno-pie", "-fno-PIE",
];

/// What the compiler is asked to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionOpt {
    /// `-c`
    Compile,
    /// `-E`
    Preprocess,
    /// `-S`
    GenAssembly,
    /// No action argument; the compiler links
    None,
}

impl ActionOpt {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionOpt::Compile => "-c",
            ActionOpt::Preprocess => "-E",
            ActionOpt::GenAssembly => "-S",
            ActionOpt::None => "",
        }
    }

    pub fn is_action_opt(arg: &str) -> bool {
        matches!(arg, "-c" | "-E" | "-S")
    }
}

impl fmt::Display for ActionOpt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed GCC-style command line, excluding the compiler itself
#[derive(Debug, Clone, Default)]
pub struct CcArgs {
    args: Vec<String>,
    mode: RunMode,
    input_index: Option<usize>,
    output_index: Option<usize>,
    flag_index: HashMap<String, usize>,
}

impl CcArgs {
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            ..Default::default()
        }
    }

    /// Creates and parses in one step.
    pub fn parsed(args: Vec<String>) -> Self {
        let mut parsed = Self::new(args);
        parsed.parse();
        parsed
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn into_args(self) -> Vec<String> {
        self.args
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn input_index(&self) -> Option<usize> {
        self.input_index
    }

    pub fn output_index(&self) -> Option<usize> {
        self.output_index
    }

    pub fn input_path(&self) -> Option<&str> {
        self.input_index.map(|i| self.args[i].as_str())
    }

    pub fn output_path(&self) -> Option<&str> {
        self.output_index.map(|i| self.args[i].as_str())
    }

    /// Position of a recorded flag (`-c`, `-o`, `-MF`, ...).
    pub fn flag_index(&self, flag: &str) -> Option<usize> {
        self.flag_index.get(flag).copied()
    }

    pub fn can_run_remote(&self) -> bool {
        self.mode == RunMode::RunRemote
    }

    /// Splits `-o/path/to/file` into `-o` `/path/to/file`.
    fn standardize(&mut self) {
        if let Some(i) = self.args.iter().position(|a| a.starts_with("-o/")) {
            let path = self.args[i][2..].to_string();
            self.args[i] = "-o".to_string();
            self.args.insert(i + 1, path);
        }
    }

    /// Records argument positions and classifies the invocation.
    pub fn parse(&mut self) {
        self.input_index = None;
        self.output_index = None;
        self.flag_index.clear();
        self.standardize();

        let mut local = false;
        let mut skip = false;
        let (mut seen_c, mut seen_s, mut seen_e) = (false, false, false);
        let mut input: Option<String> = None;
        let mut output: Option<String> = None;

        for i in 0..self.args.len() {
            if skip {
                skip = false;
                continue;
            }
            let a = self.args[i].clone();

            if a.len() > 1 && a.starts_with('-') {
                if a == "-E" {
                    self.flag_index.insert(a, i);
                    local = true;
                    seen_e = true;
                } else if matches!(a.as_str(), "-MD" | "-MMD" | "-MG" | "-MP") {
                    self.flag_index.insert(a, i);
                } else if a.starts_with("-MF") || a.starts_with("-MT") || a.starts_with("-MQ") {
                    if a.len() == 3 {
                        skip = true;
                    }
                    self.flag_index.insert(a[..3].to_string(), i);
                } else if a.starts_with("-M") {
                    debug!(arg = %a, "-E possibly implied, compiling locally");
                    self.flag_index.insert(a, i);
                    local = true;
                } else if a == "-march=native" || a == "-mtune=native" {
                    debug!(arg = %a, "Native codegen, compiling locally");
                    local = true;
                } else if a.starts_with("-Wa,") {
                    self.flag_index.insert("-Wa".to_string(), i);
                    if a.contains(",-a") || a.contains("--MD") {
                        local = true;
                    }
                } else if a.starts_with("-specs=") {
                    local = true;
                } else if a == "-S" {
                    self.flag_index.insert(a, i);
                    seen_s = true;
                } else if PROFILE_ARGS.contains(&a.as_str())
                    || PROFILE_PREFIX_ARGS.iter().any(|p| a.starts_with(p))
                {
                    debug!(arg = %a, "Compiling locally for profiling");
                    local = true;
                } else if a == "-frepo" {
                    debug!("Compiling locally, compiler will emit .rpo files");
                    local = true;
                } else if a.starts_with("-x") {
                    let lang = if a == "-x" {
                        skip = true;
                        self.args.get(i + 1).map(String::as_str).unwrap_or("")
                    } else {
                        &a[2..]
                    };
                    if !(lang.starts_with('c') || lang.starts_with("objective-c") || lang.starts_with("go")) {
                        debug!(lang, "Compiling locally, possibly complex -x arguments");
                        local = true;
                    }
                } else if a.starts_with("-dr") {
                    local = true;
                } else if LOCAL_ARGS_WITH_VALUES.contains(&a.as_str()) {
                    skip = true;
                } else if a == "-c" {
                    self.flag_index.insert(a, i);
                    seen_c = true;
                } else if a == "-o" {
                    self.flag_index.insert(a, i);
                    let Some(next) = self.args.get(i + 1).cloned() else {
                        warn!("-o found as the last argument");
                        local = true;
                        continue;
                    };
                    match extension(&next) {
                        ".o" => {
                            if output.is_some() {
                                warn!(path = %next, "Found multiple output files, possible invalid arguments");
                                local = true;
                            }
                        }
                        "" => {
                            debug!(path = %next, "Found executable target");
                            local = true;
                        }
                        _ => {}
                    }
                    output = Some(next);
                    self.output_index = Some(i + 1);
                    skip = true;
                }
            } else if is_source_file(&a) || a == "-" {
                if input.is_some() {
                    debug!(path = %a, "Found multiple input files, compiling locally");
                    local = true;
                }
                input = Some(a);
                self.input_index = Some(i);
            }
        }

        if !seen_c && !seen_s && input.is_none() {
            debug!("Compiler not called for a compile operation");
        }
        if input.is_none() {
            debug!("No input file given");
            local = true;
        }
        if let Some(path) = input.as_deref().filter(|p| should_run_local(p)) {
            debug!(input = %path, "Compiling locally as a special case");
            local = true;
        }

        if output.is_none() {
            if seen_c || seen_s {
                // GCC names the output after the input's file name, in the working directory.
                if let Some(input) = input.as_deref() {
                    let base = input.rsplit('/').next().unwrap_or(input);
                    let ext = if seen_s { ".s" } else { ".o" };
                    let implied = replace_extension(base, ext);
                    debug!(output = %implied, "No output file specified, adding one to match input");
                    self.args.push("-o".to_string());
                    self.args.push(implied);
                    self.output_index = Some(self.args.len() - 1);
                }
            } else if input.is_some() && !seen_e {
                self.args.push("-o".to_string());
                self.args.push("a.out".to_string());
                self.output_index = Some(self.args.len() - 1);
                local = true;
            }
        }

        self.mode = if local {
            RunMode::RunLocal
        } else {
            RunMode::RunRemote
        };
        debug!(mode = %self.mode, args = ?self.args, "Parsed compiler arguments");
    }

    /// Replaces the action argument with `opt`.
    pub fn set_action_opt(&mut self, opt: ActionOpt) -> Result<(), ArgsError> {
        if opt == ActionOpt::None {
            return Err(ArgsError::NoActionOpt);
        }
        let current = self.action_opt();
        let index = self
            .flag_index
            .remove(current.as_str())
            .ok_or(ArgsError::NoActionOpt)?;
        self.args[index] = opt.as_str().to_string();
        self.flag_index.insert(opt.as_str().to_string(), index);
        Ok(())
    }

    /// Current action, checked in the order `-c`, `-S`, `-E`.
    pub fn action_opt(&self) -> ActionOpt {
        [ActionOpt::Compile, ActionOpt::GenAssembly, ActionOpt::Preprocess]
            .into_iter()
            .find(|opt| self.flag_index.contains_key(opt.as_str()))
            .unwrap_or(ActionOpt::None)
    }

    pub fn replace_output_path(&mut self, path: &str) -> Result<(), ArgsError> {
        let index = self.output_index.ok_or(ArgsError::NoOutputArg)?;
        self.args[index] = path.to_string();
        Ok(())
    }

    /// Replaces the input path and maps the new directory back to the old
    /// one with `-ffile-prefix-map`, so debug info names the original
    /// location.
    pub fn replace_input_path(&mut self, path: &str) -> Result<(), ArgsError> {
        let index = self.input_index.ok_or(ArgsError::NoInputArg)?;
        if path == "-" {
            return Err(ArgsError::StdinInput);
        }
        let old = std::mem::replace(&mut self.args[index], path.to_string());
        if old != path {
            self.args
                .push(format!("-ffile-prefix-map={}={}", dir(path), dir(&old)));
        }
        Ok(())
    }

    /// Expands `-Wp,` arguments.
    ///
    /// `-Wp,-X,-Y` becomes `-X -Y`, and `-Wp,-MD,path` (or `-MMD`) becomes
    /// `-MD -MF path` so the dependency file is still written when the
    /// arguments are passed to the compiler driver directly.
    pub fn configure_preprocessor_options(&mut self) {
        let mut expanded = Vec::with_capacity(self.args.len());
        for arg in self.args.drain(..) {
            if !arg.starts_with("-Wp") {
                expanded.push(arg);
                continue;
            }
            let parts: Vec<&str> = arg.split(',').skip(1).collect();
            for (k, part) in parts.iter().enumerate() {
                expanded.push(part.to_string());
                if *part == "-MD" || *part == "-MMD" {
                    match parts.get(k + 1) {
                        Some(next) if !next.starts_with('-') => expanded.push("-MF".to_string()),
                        _ => warn!(arg = %part, "Possibly invalid options, missing path after -Wp"),
                    }
                }
            }
        }
        self.args = expanded;
        self.parse();
    }

    /// Drops preprocessor and linker arguments that the remote compile of
    /// preprocessed source does not need.
    pub fn remove_local_args(&mut self) {
        let mut kept = Vec::with_capacity(self.args.len());
        let mut args = std::mem::take(&mut self.args).into_iter();
        while let Some(arg) = args.next() {
            if LOCAL_ARGS_WITH_VALUES.contains(&arg.as_str()) {
                args.next();
                continue;
            }
            if LOCAL_ARGS_NO_VALUES.contains(&arg.as_str())
                || LOCAL_PREFIX_ARGS.iter().any(|p| arg.starts_with(p))
            {
                continue;
            }
            kept.push(arg);
        }
        self.args = kept;
        self.parse();
    }

    /// Prepends `-x <lang>` for the language of `input`.
    pub fn prepend_language_flag(&mut self, input: &str) -> Result<(), ArgsError> {
        let lang = source_file_language(input)
            .ok_or_else(|| ArgsError::UnknownExtension(extension(input).to_string()))?;
        self.args.splice(0..0, ["-x".to_string(), lang.to_string()]);
        self.parse();
        Ok(())
    }

    /// Makes the local compiler's PIC default explicit, so a remote compiler
    /// with a different default produces the same code.
    pub fn prepend_explicit_pic_args(&mut self, toolchain: &Toolchain) {
        if self.args.iter().any(|a| PIC_ARGS.contains(&a.as_str())) {
            return;
        }
        let arg = if toolchain.pic_default { "-fPIC" } else { "-fno-PIC" };
        self.args.insert(0, arg.to_string());
        self.parse();
    }

    /// Removes `-Wpedantic`, which warns about line markers in preprocessed source.
    pub fn remove_w_pedantic(&mut self) {
        let before = self.args.len();
        self.args.retain(|a| a != "-Wpedantic" && a != "-pedantic");
        if self.args.len() != before {
            self.parse();
        }
    }
}

impl ArgParser for CcArgs {
    fn parse(&mut self) {
        CcArgs::parse(self);
    }

    fn can_run_remote(&self) -> bool {
        CcArgs::can_run_remote(self)
    }

    fn args(&self) -> &[String] {
        &self.args
    }

    fn box_clone(&self) -> Box<dyn ArgParser> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubecc_core::ToolchainKind;

    fn split(s: &str) -> Vec<String> {
        s.split(' ').map(String::from).collect()
    }

    fn parse(s: &str) -> CcArgs {
        CcArgs::parsed(split(s))
    }

    #[test]
    fn test_basic_parsing() {
        let args = parse("-Werror -g -O2 -MD -W -Wall -o src/test.o -c src/test.c");
        assert_eq!(args.action_opt(), ActionOpt::Compile);
        assert_eq!(args.input_index(), Some(9));
        assert_eq!(args.output_index(), Some(7));
        assert_eq!(args.flag_index("-o"), Some(6));
        assert_eq!(args.flag_index("-c"), Some(8));
        assert_eq!(args.mode(), RunMode::RunRemote);
    }

    #[test]
    fn test_set_action_opt() {
        let mut args = parse("-Werror -g -O2 -MD -W -Wall -o src/test.o -c src/test.c");
        args.set_action_opt(ActionOpt::GenAssembly).unwrap();
        assert_eq!(args.action_opt(), ActionOpt::GenAssembly);
        args.set_action_opt(ActionOpt::Preprocess).unwrap();
        assert_eq!(args.action_opt(), ActionOpt::Preprocess);
        assert_eq!(args.args()[8], "-E");
        args.set_action_opt(ActionOpt::Compile).unwrap();
        assert_eq!(args.args()[8], "-c");

        let mut link = parse("main.o util.o -o app");
        assert_eq!(link.action_opt(), ActionOpt::None);
        assert_eq!(link.set_action_opt(ActionOpt::Preprocess), Err(ArgsError::NoActionOpt));
    }

    #[test]
    fn test_configure_preprocessor_options() {
        let mut args = parse("-Werror -g -O2 -MD -W -Wall -o src/test.o -c src/test.c");
        args.configure_preprocessor_options();
        assert_eq!(args.args(), split("-Werror -g -O2 -MD -W -Wall -o src/test.o -c src/test.c"));

        let mut args = parse("-Werror -g -O2 -MD -Wp,-X -Wp,-Y -Wp,-MD,path -o src/test.o -c src/test.c");
        args.configure_preprocessor_options();
        assert_eq!(
            args.args(),
            split("-Werror -g -O2 -MD -X -Y -MD -MF path -o src/test.o -c src/test.c")
        );

        let mut args = parse(
            "-Werror -g -O2 -MD -Wp,-X -Wp,-Y,-YY -Wp,-MD,path,-MMD,path2 -o src/test.o -c src/test.c",
        );
        args.configure_preprocessor_options();
        assert_eq!(
            args.args(),
            split("-Werror -g -O2 -MD -X -Y -YY -MD -MF path -MMD -MF path2 -o src/test.o -c src/test.c")
        );
        assert_eq!(args.output_path(), Some("src/test.o"));
    }

    #[test]
    fn test_replace_output_path() {
        let mut args = parse("-Werror -g -O2 -MD -W -Wall -o src/test.o -c src/test.c");
        args.replace_output_path("-").unwrap();
        assert_eq!(args.args(), split("-Werror -g -O2 -MD -W -Wall -o - -c src/test.c"));
        args.replace_output_path("src/test.o").unwrap();
        assert_eq!(args.args(), split("-Werror -g -O2 -MD -W -Wall -o src/test.o -c src/test.c"));

        let mut none = CcArgs::new(split("-c"));
        assert_eq!(none.replace_output_path("x.o"), Err(ArgsError::NoOutputArg));
    }

    #[test]
    fn test_replace_input_path_maps_prefix() {
        let mut args = parse("-o src/test.o -c src/test.c");
        args.replace_input_path("src2/test.c").unwrap();
        assert_eq!(
            args.args(),
            split("-o src/test.o -c src2/test.c -ffile-prefix-map=src2=src")
        );
        args.replace_input_path("/test.c").unwrap();
        args.replace_input_path("test.c").unwrap();
        assert_eq!(
            args.args(),
            split("-o src/test.o -c test.c -ffile-prefix-map=src2=src -ffile-prefix-map=/=src2 -ffile-prefix-map=.=/")
        );

        // Same path is a no-op
        args.replace_input_path("test.c").unwrap();
        assert_eq!(args.args().len(), 7);
        assert_eq!(args.replace_input_path("-"), Err(ArgsError::StdinInput));
    }

    #[test]
    fn test_remove_local_args() {
        let mut args = parse(
            "-Wp,a,b -MD -L test -Ltest -l test -ltest -Da=b -I. -I test -D a=b -o src/test.o -c src/test.c",
        );
        args.remove_local_args();
        assert_eq!(args.args(), split("-o src/test.o -c src/test.c"));
        assert_eq!(args.input_index(), Some(3));
    }

    #[test]
    fn test_prepend_language_flag() {
        let mut args = parse("-o src/test.o -c src/test.cpp");
        args.prepend_language_flag("src/test.cpp").unwrap();
        assert_eq!(args.args(), split("-x c++ -o src/test.o -c src/test.cpp"));
        assert_eq!(args.input_index(), Some(5));
        assert_eq!(
            args.prepend_language_flag("data.bin"),
            Err(ArgsError::UnknownExtension(".bin".into()))
        );
    }

    #[test]
    fn test_explicit_pic_and_pedantic() {
        let tc = Toolchain::new("/usr/bin/gcc", ToolchainKind::Gnu).with_pic_default(true);
        let mut args = parse("-Wpedantic -o a.o -c a.c");
        args.prepend_explicit_pic_args(&tc);
        args.remove_w_pedantic();
        assert_eq!(args.args(), split("-fPIC -o a.o -c a.c"));
        assert_eq!(args.output_index(), Some(2));

        let mut explicit = parse("-fno-pic -o a.o -c a.c");
        explicit.prepend_explicit_pic_args(&tc);
        assert_eq!(explicit.args(), split("-fno-pic -o a.o -c a.c"));
    }

    #[test]
    fn test_standardize_output() {
        let args = parse("-o/path/to/test.o -c src/test.cpp");
        assert_eq!(args.args(), split("-o /path/to/test.o -c src/test.cpp"));
        assert_eq!(args.output_path(), Some("/path/to/test.o"));
    }

    #[test]
    fn test_implicit_outputs() {
        let args = parse("-c src/foo.c");
        assert_eq!(args.args(), split("-c src/foo.c -o foo.o"));
        assert!(args.can_run_remote());

        let args = parse("-S foo.cc");
        assert_eq!(args.output_path(), Some("foo.s"));

        let args = parse("foo.c");
        assert_eq!(args.output_path(), Some("a.out"));
        assert_eq!(args.mode(), RunMode::RunLocal);
    }

    #[test]
    fn test_remote_eligible() {
        for cmd in [
            "-O2 -g -o obj/x.o -c src/x.c",
            "-std=c++17 -fPIC -DNDEBUG -I include -o x.o -c x.cpp",
            "-MD -MF x.d -MT x.o -o x.o -c x.c",
            "-x c++ -o x.o -c x.h",
            "-Wa,--noexecstack -o x.o -c x.c",
        ] {
            assert!(parse(cmd).can_run_remote(), "{cmd} should run remote");
        }
    }

    #[test]
    fn test_forced_local() {
        for cmd in [
            "-E x.c",
            "-M x.c",
            "-march=native -o x.o -c x.c",
            "-mtune=native -o x.o -c x.c",
            "-fprofile-arcs -o x.o -c x.c",
            "-fprofile-generate=dir -o x.o -c x.c",
            "--coverage -o x.o -c x.c",
            "-frepo -o x.o -c x.c",
            "-Wa,-adhln -o x.o -c x.c",
            "-specs=foo.specs -o x.o -c x.c",
            "-x assembler-with-cpp -o x.o -c x.S",
            "-drA -o x.o -c x.c",
            "-o x.o -c x.c y.c",
            "-o x.o -o y.o -c x.c",
            "-o app x.c",
            "-c -o x.o",
            "-o conftest.o -c conftest.c",
            "x.o y.o",
            "-c x.c -o",
        ] {
            assert_eq!(parse(cmd).mode(), RunMode::RunLocal, "{cmd} should run local");
        }
    }
}
