use crate::storage::ObjectId;
use crate::storage::objects::{LooseObjectStore, ObjectKind};
use crate::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use flate2::Compression;
use flate2::bufread::ZlibDecoder;
use flate2::write::ZlibEncoder;
use sha1::{Digest, Sha1};
use std::io::{Cursor, Read, Write};

const PACK_SIGNATURE: &[u8; 4] = b"PACK";
const PACK_VERSION: u32 = 2;

/// Leading twelve bytes of a packfile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackHeader {
    pub version: u32,
    pub object_count: u32,
}

impl PackHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 12 || &data[..4] != PACK_SIGNATURE {
            return Err(Error::transport("received data is not a packfile"));
        }
        let mut cursor = Cursor::new(&data[4..12]);
        let version = cursor.read_u32::<BigEndian>()?;
        let object_count = cursor.read_u32::<BigEndian>()?;
        if version != 2 && version != 3 {
            return Err(Error::transport(format!("unsupported pack version {version}")));
        }
        Ok(PackHeader {
            version,
            object_count,
        })
    }
}

/// Why a pack could not be exploded into loose objects.
#[derive(Debug)]
pub enum UnpackError {
    /// The pack uses `ofs-delta`/`ref-delta` entries.
    Deltified,
    Invalid(Error),
}

impl From<Error> for UnpackError {
    fn from(err: Error) -> Self {
        UnpackError::Invalid(err)
    }
}

impl From<std::io::Error> for UnpackError {
    fn from(err: std::io::Error) -> Self {
        UnpackError::Invalid(err.into())
    }
}

/// Decodes every entry of a pack that contains only whole objects.
pub fn read_entries(
    pack: &[u8],
) -> std::result::Result<Vec<(ObjectKind, Vec<u8>)>, UnpackError> {
    let header = PackHeader::parse(pack)?;
    if pack.len() < 32 {
        return Err(Error::transport("truncated packfile").into());
    }
    let (body, trailer) = pack.split_at(pack.len() - 20);
    if Sha1::digest(body).as_slice() != trailer {
        return Err(Error::transport("packfile checksum mismatch").into());
    }

    let mut entries = Vec::with_capacity(header.object_count as usize);
    let mut pos = 12;
    for _ in 0..header.object_count {
        let (type_code, size, header_len) = read_entry_header(&body[pos..])?;
        pos += header_len;
        let kind = match type_code {
            1 => ObjectKind::Commit,
            2 => ObjectKind::Tree,
            3 => ObjectKind::Blob,
            4 => ObjectKind::Tag,
            6 | 7 => return Err(UnpackError::Deltified),
            other => {
                return Err(Error::transport(format!("unknown pack entry type {other}")).into());
            }
        };

        let mut decoder = ZlibDecoder::new(&body[pos..]);
        let mut data = Vec::with_capacity(size as usize);
        decoder.read_to_end(&mut data)?;
        if data.len() as u64 != size {
            return Err(Error::transport("pack entry size mismatch").into());
        }
        pos += decoder.total_in() as usize;
        entries.push((kind, data));
    }
    Ok(entries)
}

/// Builds a version 2 packfile of undeltified objects
#[derive(Debug, Default)]
pub struct PackBuilder {
    entries: Vec<(ObjectKind, Vec<u8>)>,
}

impl PackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: ObjectKind, data: Vec<u8>) {
        self.entries.push((kind, data));
    }

    pub fn add_from_store(&mut self, store: &LooseObjectStore, ids: &[ObjectId]) -> Result<()> {
        for id in ids {
            let (kind, data) = store.read_raw(id)?;
            self.add(kind, data);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        buffer.write_all(PACK_SIGNATURE)?;
        buffer.write_u32::<BigEndian>(PACK_VERSION)?;
        buffer.write_u32::<BigEndian>(self.entries.len() as u32)?;

        for (kind, data) in &self.entries {
            write_entry_header(&mut buffer, kind.pack_code(), data.len() as u64)?;

            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            buffer.write_all(&encoder.finish()?)?;
        }

        let checksum = Sha1::digest(&buffer);
        buffer.write_all(&checksum)?;
        Ok(buffer)
    }
}

/// Type in bits 4-6 of the first byte, size as a little-endian base-128
/// varint starting with the low nibble of the first byte.
fn write_entry_header(out: &mut Vec<u8>, type_code: u8, mut size: u64) -> Result<()> {
    let mut byte = (type_code << 4) | (size & 0x0f) as u8;
    size >>= 4;
    while size != 0 {
        out.write_u8(byte | 0x80)?;
        byte = (size & 0x7f) as u8;
        size >>= 7;
    }
    out.write_u8(byte)?;
    Ok(())
}

fn read_entry_header(data: &[u8]) -> Result<(u8, u64, usize)> {
    let truncated = || Error::transport("truncated pack entry header");
    let first = *data.first().ok_or_else(truncated)?;
    let type_code = (first >> 4) & 0x07;
    let mut size = u64::from(first & 0x0f);
    let mut shift = 4;
    let mut used = 1;
    let mut byte = first;
    while byte & 0x80 != 0 {
        byte = *data.get(used).ok_or_else(truncated)?;
        size |= u64::from(byte & 0x7f) << shift;
        shift += 7;
        used += 1;
    }
    Ok((type_code, size, used))
}
