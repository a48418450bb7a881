//! The wire envelope: `<fernet_ciphertext_base64>\r\n`, one frame per
//! request or reply, no length prefix — the reader just accumulates bytes
//! until it sees `\r\n`.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::CodecError;

/// Generous enough for any real chat payload; stops a peer that never sends
/// `\r\n` from growing the read buffer without bound.
const MAX_FRAME_BYTES: usize = 1 << 20;

/// A Fernet key paired with encrypt/decrypt helpers. Connections keep one of
/// these per "currently active key" — the base key at first, then the
/// per-session key handed out on `login`.
pub struct Envelope {
    fernet: fernet::Fernet,
}

impl Envelope {
    pub fn new(key: &str) -> Option<Self> {
        fernet::Fernet::new(key).map(|fernet| Self { fernet })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> String {
        self.fernet.encrypt(plaintext)
    }

    pub fn decrypt(&self, token: &str) -> Result<Vec<u8>, CodecError> {
        self.fernet.decrypt(token).map_err(|_| CodecError::Decrypt)
    }
}

/// Reads one frame, stripping the trailing `\r\n` (or bare `\n`). `Ok(None)`
/// means the peer closed the connection (EOF before any bytes of a new
/// frame arrived).
pub async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<String>, CodecError> {
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.len() > MAX_FRAME_BYTES {
        return Err(CodecError::FrameTooLarge);
    }
    while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
        buf.pop();
    }
    String::from_utf8(buf).map(Some).map_err(|_| CodecError::Utf8)
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, ciphertext: &str) -> Result<(), CodecError> {
    writer.write_all(ciphertext.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn envelope_round_trips_plaintext() {
        let key = fernet::Fernet::generate_key();
        let env = Envelope::new(&key).unwrap();
        let ciphertext = env.encrypt(b"{\"operation\":\"listusers\"}");
        let plaintext = env.decrypt(&ciphertext).unwrap();
        assert_eq!(plaintext, b"{\"operation\":\"listusers\"}");
    }

    #[test]
    fn decrypt_rejects_garbage() {
        let key = fernet::Fernet::generate_key();
        let env = Envelope::new(&key).unwrap();
        assert!(env.decrypt("not-a-real-token").is_err());
    }

    #[tokio::test]
    async fn read_frame_strips_crlf() {
        let mut reader = BufReader::new(&b"abcd\r\n"[..]);
        let frame = read_frame(&mut reader).await.unwrap();
        assert_eq!(frame.as_deref(), Some("abcd"));
    }

    #[tokio::test]
    async fn read_frame_returns_none_on_eof() {
        let mut reader = BufReader::new(&b""[..]);
        let frame = read_frame(&mut reader).await.unwrap();
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn write_frame_appends_crlf() {
        let mut out = Vec::new();
        write_frame(&mut out, "abcd").await.unwrap();
        assert_eq!(out, b"abcd\r\n");
    }
}
