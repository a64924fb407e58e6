//! Core error types for GameLink

#[derive(thiserror::Error, Debug)]
pub enum LinkError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Can't resolve host '{host}': {reason}")]
    Resolve { host: String, reason: String },

    #[error("Socket error while {context}: {source}")]
    Socket {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported on this platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Connection closed by remote host")]
    Closed,
}

impl LinkError {
    /// Wrap an I/O error with the socket operation that produced it
    pub fn socket(context: &'static str, source: std::io::Error) -> Self {
        Self::Socket { context, source }
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_error_message() {
        let err = LinkError::socket(
            "sending",
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed"),
        );
        assert_eq!(err.to_string(), "Socket error while sending: pipe closed");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: LinkError = io.into();
        assert!(matches!(err, LinkError::Io(_)));
    }
}
