use std::fmt;

macro_rules! err {
    ($kind:ident, $msg:literal) => {
        ArtError::new(ErrorKind::$kind, $msg)
    };
    ($kind:ident, $fmtstr:literal, $($args:tt)*) => {
        ArtError::new(ErrorKind::$kind, &format!($fmtstr, $($args)*))
    };
    (($kind:ident, $msg:literal), ($contextfmt:literal, $($contextargs:tt)*)) => {
        ArtError::with_context(ArtError::new(ErrorKind::$kind, $msg), format!($contextfmt, $($contextargs)*))
    };
}


#[macro_export]
macro_rules! fail {
    ($kind:ident, $msg:literal) => {
        return Err(ArtError::new(ErrorKind::$kind, $msg))
    };
    ($kind:ident, $fmtstr:literal, $($args:tt)*) => {
        return Err(ArtError::new(ErrorKind::$kind, &format!($fmtstr, $($args)*)))
    };
    (($kind:ident, $fmtstr:literal, $($args:tt)*), ($contextfmt:literal, $($contextargs:tt)*)) => {
        return Err(ArtError::with_context(ArtError::new(ErrorKind::$kind, &format!($fmtstr, $($args)*)), format!($contextfmt, $($contextargs)*)))
    };
}

/// Broad class of a decode failure, for callers that need to branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind
{
    /// A read ran past the end of the supplied bytes.
    Truncated,
    /// The bytes are present but do not form a valid encoding.
    Format,
    /// No layout is known for the requested Android version.
    UnsupportedVersion,
    /// The memory source could not supply the requested bytes.
    Memory,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ArtError
{
    kind: ErrorKind,
    msg: String,
    contexts: Vec<String>,
}

impl ArtError
{
    pub(crate) fn new(kind: ErrorKind, msg: &str) -> Self
    {
        ArtError {
            kind,
            msg: msg.to_string(),
            contexts: Vec::new(),
        }
    }

    pub(crate) fn with_context(base: ArtError, context: String) -> Self
    {
        let mut contexts = base.contexts;
        contexts.push(context);
        ArtError { kind: base.kind, msg: base.msg, contexts }
    }

    pub fn kind(&self) -> ErrorKind
    {
        self.kind
    }

    /// True for the two failure classes caused by the bytes themselves.
    pub fn is_format_error(&self) -> bool
    {
        matches!(self.kind, ErrorKind::Truncated | ErrorKind::Format)
    }
}

/// Attaches a context string to the error of a `Result`, like the dex reader's
/// `err!((msg), (ctx))` form but usable with `?` chains.
pub(crate) trait ResultExt<T>
{
    fn context<F: FnOnce() -> String>(self, f: F) -> Result<T, ArtError>;
}

impl<T> ResultExt<T> for Result<T, ArtError>
{
    fn context<F: FnOnce() -> String>(self, f: F) -> Result<T, ArtError>
    {
        self.map_err(|e| ArtError::with_context(e, f()))
    }
}

impl fmt::Display for ArtError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.msg)?;
        let mut connector = " for ";
        for context in &self.contexts
        {
            write!(f, "{}{}", connector, context)?;
            connector = " of ";
        }
        Ok(())
    }
}

impl std::error::Error for ArtError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_chains_contexts() {
        let e = ArtError::new(ErrorKind::Truncated, "read past end");
        let e = ArtError::with_context(e, "stack map table".to_string());
        let e = ArtError::with_context(e, "CodeInfo at 0x1000".to_string());
        assert_eq!(e.to_string(), "read past end for stack map table of CodeInfo at 0x1000");
        assert_eq!(e.kind(), ErrorKind::Truncated);
        assert!(e.is_format_error());
    }

    #[test]
    fn result_context() {
        let r: Result<(), ArtError> = Err(err!(Memory, "unmapped address {:#x}", 0x10));
        let e = r.context(|| "method header".to_string()).unwrap_err();
        assert_eq!(e.to_string(), "unmapped address 0x10 for method header");
        assert!(!e.is_format_error());
    }
}
