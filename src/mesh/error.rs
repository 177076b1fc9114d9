use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// The render surface required at startup is absent. Fatal: the session
    /// never starts.
    SurfaceMissing,
    /// The environment could not report the window's geometry.
    GeometryUnavailable(String),
    /// The transport handle was closed before a publish or subscribe.
    TransportClosed,
    /// A payload failed to serialize or deserialize.
    Codec(serde_json::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SurfaceMissing => {
                write!(f, "no render surface is present on the page")
            }
            Self::GeometryUnavailable(reason) => {
                write!(f, "window geometry unavailable: {reason}")
            }
            Self::TransportClosed => write!(f, "transport handle is closed"),
            Self::Codec(e) => write!(f, "payload codec error: {e}"),
        }
    }
}

impl std::error::Error for Error {}
