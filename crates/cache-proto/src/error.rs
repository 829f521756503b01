/// The five error kinds from spec §7.
///
/// `Protocol` and `Unsupported` are attached to a Request/Message and
/// surfaced by the encoder; `Transport` and `Assertion` short-circuit the
/// handler loop; `Quit` closes the connection silently.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("CLIENT_ERROR bad request")]
    BadRequest,
    #[error("CLIENT_ERROR length is not a valid integer")]
    BadLength,
    #[error("SERVER_ERROR bad count")]
    BadCount,
    #[error("SERVER_ERROR assert request not ok")]
    BadAssert,
    #[error("command not support")]
    Unsupported,
    #[error("client issued quit")]
    Quit,
    #[error("io: {0}")]
    Io(#[from] cache_io::IoError),
}

pub type ProtoResult<T> = Result<T, ProtoError>;
