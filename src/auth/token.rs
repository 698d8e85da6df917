use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

/// Smallest token the generator will produce.
pub const MIN_TOKEN_BYTES: usize = 16;

/// Upper bound on the encoded length accepted back from a client.
pub const MAX_TOKEN_LEN: usize = 128;

/// Largest raw length whose encoding still fits in [`MAX_TOKEN_LEN`].
pub const MAX_TOKEN_BYTES: usize = MAX_TOKEN_LEN * 3 / 4;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token of {requested} bytes requested, minimum is {MIN_TOKEN_BYTES}")]
    TooShort { requested: usize },
    #[error("token of {requested} bytes requested, maximum is {MAX_TOKEN_BYTES}")]
    TooLong { requested: usize },
    #[error("entropy source unavailable: {0}")]
    Entropy(#[from] rand::Error),
}

/// Draws `byte_len` bytes from the OS CSPRNG and encodes them as unpadded
/// URL-safe base64.
pub fn new_token(byte_len: usize) -> Result<String, TokenError> {
    if byte_len < MIN_TOKEN_BYTES {
        return Err(TokenError::TooShort {
            requested: byte_len,
        });
    }
    if byte_len > MAX_TOKEN_BYTES {
        return Err(TokenError::TooLong {
            requested: byte_len,
        });
    }
    let mut buf = vec![0u8; byte_len];
    OsRng.try_fill_bytes(&mut buf)?;
    Ok(Base64UrlUnpadded::encode_string(&buf))
}

/// Cheap shape check applied before a client-supplied token touches storage.
pub fn is_well_formed(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= MAX_TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
