/// Errors that can occur while encoding or decoding envelopes.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The envelope body does not start with the expected magic.
    #[error("invalid envelope magic (expected 0x4e42 \"NB\")")]
    InvalidMagic,

    /// The envelope body is shorter than the fixed body size.
    #[error("truncated envelope ({size} bytes, expected {expected})")]
    Truncated { size: usize, expected: usize },

    /// The encoded payload length exceeds the fixed payload size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The send discriminator does not name a valid target.
    #[error("invalid send target {0}")]
    InvalidTarget(i64),
}

pub type Result<T> = std::result::Result<T, FrameError>;
