use std::{error::Error, fmt::Display};

#[derive(Debug, Clone)]
pub struct EncodeError {
    kind: EncodeErrorKind,
    message: String,
}

impl EncodeError {
    pub fn new(kind: EncodeErrorKind, message: String) -> Self {
        return Self { kind, message };
    }

    pub fn kind(&self) -> EncodeErrorKind {
        return self.kind;
    }

    pub fn message(&self) -> &str {
        return &self.message;
    }
}

impl Error for EncodeError {}

impl Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EncodeErrorKind {
    /// A body string exceeds the 16-bit length prefix.
    OversizedString,
    OversizedBody,
}

#[derive(Debug, Clone)]
pub struct DecodeError {
    kind: DecodeErrorKind,
    message: String,
}

impl DecodeError {
    pub fn new(kind: DecodeErrorKind, message: String) -> Self {
        return Self { kind, message };
    }

    pub fn kind(&self) -> DecodeErrorKind {
        return self.kind;
    }

    pub fn message(&self) -> &str {
        return &self.message;
    }
}

impl Error for DecodeError {}

impl Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DecodeErrorKind {
    /// Header incomplete, or the body does not match the declared length.
    MalformedFrame,
    /// A string length prefix points past the end of the body.
    MalformedString,
    InvalidUtf8,
    InvalidMessageType,
    /// A subscription pattern that does not compile or exceeds the limits.
    BadPattern,
    /// Declared body length above [MAX_BODY_LEN](crate::io::MAX_BODY_LEN).
    OversizedBody,
}

pub mod client {
    use std::fmt::Display;

    use tokio::io;

    use super::{DecodeError, EncodeError};

    #[derive(Debug)]
    pub enum ErrorKind {
        IoError(io::Error),
        ProtocolError,
        NotConnected,
        ConnectionRefused,
        DecodeError,
        EncodeError,
    }

    impl Display for ErrorKind {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            return write!(f, "{:?}", self);
        }
    }

    #[derive(Debug)]
    pub struct ClientError {
        kind: ErrorKind,
        message: String,
    }

    impl ClientError {
        pub fn new(kind: ErrorKind, message: String) -> Self {
            return Self { kind, message };
        }

        pub fn kind(&self) -> &ErrorKind {
            return &self.kind;
        }

        pub fn message(&self) -> &str {
            return &self.message;
        }
    }

    impl From<DecodeError> for ClientError {
        fn from(value: DecodeError) -> Self {
            return Self {
                kind: ErrorKind::DecodeError,
                message: value.message,
            };
        }
    }

    impl From<EncodeError> for ClientError {
        fn from(value: EncodeError) -> Self {
            return Self {
                kind: ErrorKind::EncodeError,
                message: value.message,
            };
        }
    }

    impl From<std::io::Error> for ClientError {
        fn from(value: io::Error) -> Self {
            return Self {
                kind: ErrorKind::IoError(value),
                message: String::new(),
            };
        }
    }

    impl Display for ClientError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            return write!(f, "{}. {}", self.kind, self.message);
        }
    }
}

pub mod server {
    use std::fmt::Display;

    use tokio::io;

    use super::{DecodeError, DecodeErrorKind, EncodeError};

    #[derive(Debug)]
    pub struct ServerError {
        kind: ErrorKind,
        message: String,
    }

    #[derive(Debug)]
    pub enum ErrorKind {
        DecodeError(DecodeErrorKind),
        EncodeError,
        IoError(io::Error),
        ProtocolError,
        SessionClosed,
    }

    impl Display for ErrorKind {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            return write!(f, "{:?}", self);
        }
    }

    impl From<DecodeError> for ServerError {
        fn from(value: DecodeError) -> Self {
            return Self {
                kind: ErrorKind::DecodeError(value.kind),
                message: value.message,
            };
        }
    }

    impl From<EncodeError> for ServerError {
        fn from(value: EncodeError) -> Self {
            return Self {
                kind: ErrorKind::EncodeError,
                message: value.message,
            };
        }
    }

    impl From<std::io::Error> for ServerError {
        fn from(value: io::Error) -> Self {
            return Self {
                kind: ErrorKind::IoError(value),
                message: String::new(),
            };
        }
    }

    impl ServerError {
        pub fn new(kind: ErrorKind, message: String) -> Self {
            Self { kind, message }
        }

        pub fn kind(&self) -> &ErrorKind {
            return &self.kind;
        }

        pub fn message(&self) -> &str {
            return &self.message;
        }
    }

    impl Display for ServerError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            return write!(f, "{}. {}", self.kind, self.message);
        }
    }
}
