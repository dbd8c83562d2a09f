//! Source file name helpers.

/// Extension of the last path component including the dot, or `""`.
pub fn extension(path: &str) -> &str {
    let name_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[name_start..].rfind('.') {
        Some(dot) => &path[name_start + dot..],
        None => "",
    }
}

/// Language name GCC uses for `-x` given a source file's extension.
pub fn source_file_language(path: &str) -> Option<&'static str> {
    let lang = match extension(path) {
        ".i" | ".c" => "c",
        ".ii" | ".cc" | ".cpp" | ".CPP" | ".cxx" | ".cp" | ".c++" | ".C" => "c++",
        ".m" | ".mi" => "objective-c",
        ".mm" | ".mii" | ".M" => "objective-c++",
        ".s" | ".S" => "assembler",
        ".go" => "go",
        ".h" => "c-header",
        ".H" | ".hpp" | ".hp" | ".hxx" | ".h++" | ".HPP" | ".tcc" | ".hh" => "c++-header",
        _ => return None,
    };
    Some(lang)
}

/// Whether GCC recognizes `path` as a source file.
pub fn is_source_file(path: &str) -> bool {
    source_file_language(path).is_some()
}

/// Configure scripts probe the compiler with throwaway sources whose
/// results must come from this host.
pub fn should_run_local(path: &str) -> bool {
    let base = path.rsplit('/').next().unwrap_or(path);
    base.starts_with("conftest.") || base.starts_with("tmp.conftest.")
}

/// Replaces the extension of `path` with `new_ext` (which includes the dot).
pub fn replace_extension(path: &str, new_ext: &str) -> String {
    let ext = extension(path);
    format!("{}{}", &path[..path.len() - ext.len()], new_ext)
}

/// Directory part of a slash-separated path, `"."` when there is none.
pub(crate) fn dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(i) => &path[..i],
        None => ".",
    }
}
