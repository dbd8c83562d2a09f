use thiserror::Error;

/// Errors from rewriting a compiler command line
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArgsError {
    #[error("no -c, -S or -E argument found")]
    NoActionOpt,

    #[error("no -o argument found")]
    NoOutputArg,

    #[error("no input file argument found")]
    NoInputArg,

    /// Reading the source from stdin cannot be rewritten to a file path
    #[error("input is read from stdin")]
    StdinInput,

    #[error("unknown source file extension: {0}")]
    UnknownExtension(String),
}
