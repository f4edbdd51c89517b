use std::{error, fmt, result};

pub type BoxedError = Box<dyn error::Error + Send + Sync + 'static>;
pub type BoxedErrorResult<T> = result::Result<T, BoxedError>;
pub type WhateverResult<T> = result::Result<T, snafu::Whatever>;

/// Type-erase the error of a `Result`, mostly for use at crate boundaries and
/// in tests.
pub trait BoxedErrorExt<T> {
    fn boxed(self) -> BoxedErrorResult<T>;
}

impl<T, E> BoxedErrorExt<T> for result::Result<T, E>
where
    E: error::Error + Send + Sync + 'static,
{
    fn boxed(self) -> BoxedErrorResult<T> {
        self.map_err(|e| Box::new(e) as BoxedError)
    }
}

/// Renders an error with its whole `source()` chain on a single line.
pub struct FmtCompactError<'e, E: ?Sized>(pub &'e E);

impl<E> fmt::Display for FmtCompactError<'_, E>
where
    E: error::Error + ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{}", self.0))?;

        let mut source = self.0.source();
        while let Some(err) = source {
            f.write_fmt(format_args!(": {err}"))?;
            source = err.source();
        }

        Ok(())
    }
}

pub struct FmtCompactResult<'r, O, E>(pub &'r result::Result<O, E>);

impl<O, E> fmt::Display for FmtCompactResult<'_, O, E>
where
    E: error::Error,
    O: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Ok(o) => o.fmt(f),
            Err(e) => FmtCompactError(e).fmt(f),
        }
    }
}

pub trait FmtCompact {
    type Report: fmt::Display;
    fn fmt_compact(self) -> Self::Report;
}

impl<'e, E> FmtCompact for &'e E
where
    E: error::Error + ?Sized,
{
    type Report = FmtCompactError<'e, E>;

    fn fmt_compact(self) -> Self::Report {
        FmtCompactError(self)
    }
}

#[cfg(test)]
mod tests {
    use snafu::Snafu;

    use super::*;

    #[derive(Debug, Snafu)]
    #[snafu(display("leaf failed"))]
    struct Leaf;

    #[derive(Debug, Snafu)]
    #[snafu(display("outer failed"))]
    struct Outer {
        source: Leaf,
    }

    #[test]
    fn compact_renders_whole_chain() {
        let err = Outer { source: Leaf };
        assert_eq!(err.fmt_compact().to_string(), "outer failed: leaf failed");
    }

    #[test]
    fn compact_result_renders_ok_value() {
        let ok: result::Result<u32, Leaf> = Ok(3);
        assert_eq!(FmtCompactResult(&ok).to_string(), "3");
        let err: result::Result<u32, Leaf> = Err(Leaf);
        assert_eq!(FmtCompactResult(&err).to_string(), "leaf failed");
    }
}
