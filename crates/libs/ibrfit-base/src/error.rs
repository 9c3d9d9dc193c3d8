//! Error type for ibrfit.

use std::{
    error::Error,
    fmt::{Debug, Display, Formatter},
    path::Path,
};

/// Boxed error usable across threads.
pub type BoxedError = Box<dyn Error + Send + Sync + 'static>;

/// Custom error type for ibrfit.
///
/// Carries a human readable message describing what went wrong at the call
/// site, plus the lower level error that caused it, if any.
#[derive(Debug)]
pub struct FitError {
    message: String,
    kind: FitErrorKind,
    source: Option<BoxedError>,
}

/// Coarse classification of a [`FitError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitErrorKind {
    /// Reading or writing files failed.
    Io,
    /// Invalid settings or input data.
    InvalidInput,
    /// The graphics layer failed (device, shader, readback).
    Graphics,
    /// A numerical routine failed in a way that cannot be recovered locally.
    Numerical,
    /// No valid sample contributed to an error measurement.
    NoValidSamples,
}

impl Display for FitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            Some(cause) => write!(f, "Error: {}, caused by {}", self.message, cause),
            None => write!(f, "Error: {}", self.message),
        }
    }
}

impl Error for FitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

impl FitError {
    /// Creates a new error.
    pub fn new<S>(kind: FitErrorKind, message: S, source: Option<BoxedError>) -> Self
    where
        S: Into<String>,
    {
        Self {
            message: message.into(),
            kind,
            source,
        }
    }

    /// Creates an error describing invalid input.
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::new(FitErrorKind::InvalidInput, message, None)
    }

    /// Creates an error raised by the graphics layer.
    pub fn graphics<S, E>(err: E, message: S) -> Self
    where
        S: Into<String>,
        E: Error + Send + Sync + 'static,
    {
        Self::new(FitErrorKind::Graphics, message, Some(Box::new(err)))
    }

    /// Creates an error raised by a numerical routine.
    pub fn numerical<S: Into<String>>(message: S) -> Self {
        Self::new(FitErrorKind::Numerical, message, None)
    }

    /// Creates a new error from a std::io::Error.
    pub fn from_io_error<S>(err: std::io::Error, message: S) -> Self
    where
        S: Into<String>,
    {
        Self::new(FitErrorKind::Io, message, Some(Box::new(err)))
    }

    /// Creates a new error from an image loading/saving error.
    pub fn from_image_error(err: image::ImageError, path: &Path) -> Self {
        Self::new(
            FitErrorKind::Io,
            format!("Image I/O failed for {}", path.display()),
            Some(Box::new(err)),
        )
    }

    /// Returns the classification of the error.
    pub fn kind(&self) -> FitErrorKind { self.kind }

    /// Returns the message of the error.
    pub fn message(&self) -> &str { &self.message }

    /// Returns true if the error was caused by an I/O failure.
    pub fn is_io(&self) -> bool { self.kind == FitErrorKind::Io }
}
