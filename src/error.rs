//! Crate-wide error types.
//!
//! `ServerError` is the `ResponseContext`'s own error type: a locked-context
//! mutation or the I/O failure underlying a socket/file write. The script
//! pipeline's error kinds (`LexerError`, `ParseError`, `InterpError`,
//! `NumericError`, `EmptyStack`) and the dispatcher's protocol-level errors
//! (`DispatchError`, translated straight to a status code) live as dedicated
//! `thiserror` enums next to the code that raises them; `InterpError` folds
//! `ServerError` in via `#[from]` since script execution writes through a
//! `ResponseContext` and must propagate its lock failures.

use thiserror::Error;

/// Errors raised by `ResponseContext` itself.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("response context is locked: headers already generated")]
    ContextLocked,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
