//! pkt-line framing: each packet is prefixed with its total length as four
//! hex digits, `0000` is a flush packet.

use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest packet the protocol allows, prefix included.
pub const MAX_PKT_LEN: usize = 65520;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    Data(Bytes),
    Flush,
}

impl PktLine {
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            PktLine::Data(data) => Some(data),
            PktLine::Flush => None,
        }
    }

    /// Payload as text without the trailing newline.
    pub fn as_str(&self) -> Option<&str> {
        self.data()
            .and_then(|d| std::str::from_utf8(d).ok())
            .map(|s| s.trim_end_matches('\n'))
    }
}

pub fn put_data(buf: &mut BytesMut, data: &[u8]) -> Result<()> {
    let len = data.len() + 4;
    if len > MAX_PKT_LEN {
        return Err(Error::transport(format!("pkt-line of {len} bytes is too long")));
    }
    buf.put_slice(format!("{len:04x}").as_bytes());
    buf.put_slice(data);
    Ok(())
}

/// Writes `line` followed by a newline.
pub fn put_line(buf: &mut BytesMut, line: &str) -> Result<()> {
    let mut data = Vec::with_capacity(line.len() + 1);
    data.extend_from_slice(line.as_bytes());
    data.push(b'\n');
    put_data(buf, &data)
}

pub fn put_flush(buf: &mut BytesMut) {
    buf.put_slice(b"0000");
}

/// Reads one packet; `None` on a clean end of stream.
pub async fn read_pkt<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<PktLine>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::transport(e)),
    }

    let len_str = std::str::from_utf8(&len_buf)
        .map_err(|_| Error::transport("invalid pkt-line length prefix"))?;
    let len = usize::from_str_radix(len_str, 16)
        .map_err(|_| Error::transport(format!("invalid pkt-line length `{len_str}`")))?;

    match len {
        0 => Ok(Some(PktLine::Flush)),
        1..=3 => Err(Error::transport(format!("pkt-line length {len} is too small"))),
        len if len > MAX_PKT_LEN => Err(Error::transport(format!(
            "pkt-line length {len} is too large"
        ))),
        len => {
            let mut data = vec![0u8; len - 4];
            reader
                .read_exact(&mut data)
                .await
                .map_err(Error::transport)?;
            Ok(Some(PktLine::Data(Bytes::from(data))))
        }
    }
}

/// Reads data packets up to the next flush.
pub async fn read_until_flush<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<Bytes>> {
    let mut packets = Vec::new();
    while let Some(PktLine::Data(data)) = read_pkt(reader).await? {
        packets.push(data);
    }
    Ok(packets)
}
