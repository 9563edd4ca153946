use core::fmt;

/// Errors returned by the wire codec and the transport boundary.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Packet specified an invalid length value or was too short.
    InvalidLength,

    /// Invalid value supplied for field.
    InvalidValue,

    /// Unexpectedly reached EOF while reading or writing data.
    ///
    /// This is returned when trying to fit too much data into a PDU or other
    /// fixed-size buffer, and also when reaching EOF prematurely while reading
    /// data from a buffer.
    Eof,

    /// The transport refused or failed to issue a request.
    ///
    /// Returned by [`AttClient`] implementations when a request cannot be
    /// handed to the underlying stack (link lost, controller busy, …).
    ///
    /// [`AttClient`]: ../pal/trait.AttClient.html
    Transport,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Error::InvalidLength => "invalid length value specified",
            Error::InvalidValue => "invalid value for field",
            Error::Eof => "end of buffer",
            Error::Transport => "transport failed to issue request",
        })
    }
}
