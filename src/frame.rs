//! Wire format for the framed session protocol
//!
//! Every frame is a u32-le length prefix followed by exactly that many
//! payload bytes; the first payload byte is a kind tag, the rest is
//! kind-specific content.

use anyhow::{bail, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum value of the length prefix (kind byte + content). Anything
/// larger means the stream is desynchronized and cannot be recovered.
pub const MAX_FRAME_LEN: usize = 40000;

/// Frame kind tags (numeric values are the wire format, keep stable)
pub mod kind {
    /// Raw stream bytes, both directions
    pub const DATA: u8 = 0;
    /// Window geometry, client to server only
    pub const RESIZE: u8 = 1;
    /// Process exit status, server to client only; ends the session
    pub const EXIT: u8 = 2;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(Vec<u8>),
    Resize { rows: u32, cols: u32 },
    Exit(u32),
}

impl Frame {
    /// Serialize as length prefix + kind tag + content. Callers keep data
    /// chunks well under `MAX_FRAME_LEN`, so encoding cannot overflow the
    /// length invariant.
    pub fn encode(&self) -> Vec<u8> {
        let content: Vec<u8> = match self {
            Frame::Data(bytes) => bytes.clone(),
            Frame::Resize { rows, cols } => {
                let mut c = Vec::with_capacity(8);
                c.extend_from_slice(&rows.to_le_bytes());
                c.extend_from_slice(&cols.to_le_bytes());
                c
            }
            Frame::Exit(code) => code.to_le_bytes().to_vec(),
        };
        let tag = match self {
            Frame::Data(_) => kind::DATA,
            Frame::Resize { .. } => kind::RESIZE,
            Frame::Exit(_) => kind::EXIT,
        };
        let mut out = Vec::with_capacity(4 + 1 + content.len());
        out.extend_from_slice(&(1 + content.len() as u32).to_le_bytes());
        out.push(tag);
        out.extend_from_slice(&content);
        out
    }

    /// Interpret a kind tag and its content bytes.
    pub fn decode(tag: u8, content: &[u8]) -> Result<Frame> {
        match tag {
            kind::DATA => Ok(Frame::Data(content.to_vec())),
            kind::RESIZE => {
                if content.len() != 8 {
                    bail!("resize frame has {} content bytes, expected 8", content.len());
                }
                let rows = u32::from_le_bytes([content[0], content[1], content[2], content[3]]);
                let cols = u32::from_le_bytes([content[4], content[5], content[6], content[7]]);
                Ok(Frame::Resize { rows, cols })
            }
            kind::EXIT => {
                if content.len() != 4 {
                    bail!("exit frame has {} content bytes, expected 4", content.len());
                }
                let code = u32::from_le_bytes([content[0], content[1], content[2], content[3]]);
                Ok(Frame::Exit(code))
            }
            other => bail!("unknown frame kind {}", other),
        }
    }
}

/// Read one frame. Returns `None` on a clean close (EOF before any length
/// byte); EOF inside a frame is an error. The length prefix is validated
/// before any payload byte is read.
pub async fn read_frame<S>(stream: &mut S) -> Result<Option<Frame>>
where
    S: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < 4 {
        let n = stream.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            bail!("connection closed inside a frame header");
        }
        filled += n;
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len == 0 || len > MAX_FRAME_LEN {
        bail!("invalid frame length {} (max {})", len, MAX_FRAME_LEN);
    }
    let mut payload = vec![0u8; len];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|e| anyhow::anyhow!("connection closed inside a frame: {}", e))?;
    let frame = Frame::decode(payload[0], &payload[1..])?;
    Ok(Some(frame))
}

/// Write one frame and flush it to the wire.
pub async fn write_frame<S>(stream: &mut S, frame: &Frame) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&frame.encode()).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn decode_bytes(bytes: &[u8]) -> Result<Option<Frame>> {
        let mut cursor = bytes;
        read_frame(&mut cursor).await
    }

    #[tokio::test]
    async fn data_frame_round_trip() {
        for payload in [&b"x"[..], &b"ls\n"[..], &[0u8; 39999][..]] {
            let frame = Frame::Data(payload.to_vec());
            let got = decode_bytes(&frame.encode()).await.unwrap().unwrap();
            assert_eq!(got, frame);
        }
    }

    #[tokio::test]
    async fn resize_and_exit_round_trip() {
        let resize = Frame::Resize { rows: 52, cols: 191 };
        assert_eq!(decode_bytes(&resize.encode()).await.unwrap().unwrap(), resize);

        let exit = Frame::Exit(u32::MAX);
        assert_eq!(decode_bytes(&exit.encode()).await.unwrap().unwrap(), exit);
    }

    #[tokio::test]
    async fn zero_length_prefix_is_rejected() {
        let err = decode_bytes(&0u32.to_le_bytes()).await.unwrap_err();
        assert!(err.to_string().contains("invalid frame length"));
    }

    #[tokio::test]
    async fn oversized_prefix_is_rejected_before_payload() {
        // No payload bytes follow the prefix at all; validation must
        // trip before the reader waits for them.
        let bytes = (MAX_FRAME_LEN as u32 + 1).to_le_bytes();
        let err = decode_bytes(&bytes).await.unwrap_err();
        assert!(err.to_string().contains("invalid frame length"));
    }

    #[tokio::test]
    async fn eof_before_prefix_is_clean_close() {
        assert_eq!(decode_bytes(&[]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn eof_inside_frame_is_an_error() {
        let mut bytes = Frame::Data(b"hello".to_vec()).encode();
        bytes.truncate(bytes.len() - 2);
        assert!(decode_bytes(&bytes).await.is_err());

        // Mid-header truncation is an error too, not a clean close.
        assert!(decode_bytes(&[6, 0]).await.is_err());
    }

    #[test]
    fn resize_content_must_be_eight_bytes() {
        assert!(Frame::decode(kind::RESIZE, &[0; 7]).is_err());
        assert!(Frame::decode(kind::RESIZE, &[0; 9]).is_err());
        assert!(Frame::decode(kind::RESIZE, &[0; 8]).is_ok());
    }

    #[test]
    fn exit_content_must_be_four_bytes() {
        assert!(Frame::decode(kind::EXIT, &[]).is_err());
        assert!(Frame::decode(kind::EXIT, &[7, 0, 0, 0]).is_ok());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(Frame::decode(3, b"x").is_err());
        assert!(Frame::decode(255, &[]).is_err());
    }

    #[test]
    fn resize_wire_layout_is_rows_then_cols_le() {
        let bytes = Frame::Resize { rows: 24, cols: 80 }.encode();
        assert_eq!(bytes[0..4], 9u32.to_le_bytes());
        assert_eq!(bytes[4], kind::RESIZE);
        assert_eq!(bytes[5..9], 24u32.to_le_bytes());
        assert_eq!(bytes[9..13], 80u32.to_le_bytes());
    }
}
