use crate::storage::objects::pack::{PackHeader, UnpackError, read_entries};
use crate::storage::objects::{Object, ObjectKind, Tag, VoxObject};
use crate::storage::utils::PACK_DIR;
use crate::storage::{ObjectId, ObjectStore};
use crate::{Error, Result};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use log::{debug, warn};
use sha1::{Digest, Sha1};
use std::collections::HashSet;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Zlib-compressed objects stored one file per id under `objects/xx/yyyy…`.
#[derive(Debug, Clone)]
pub struct LooseObjectStore {
    dir: PathBuf,
}

impl LooseObjectStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        LooseObjectStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn object_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.dir.join(&hex[..2]).join(&hex[2..])
    }

    pub fn read_raw(&self, id: &ObjectId) -> Result<(ObjectKind, Vec<u8>)> {
        let compressed = match fs::read(self.object_path(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::ObjectMissing(*id)),
            Err(e) => return Err(e.into()),
        };

        let mut decoder = ZlibDecoder::new(&compressed[..]);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| Error::corrupt(id, e.to_string()))?;

        // Skip the header (everything before the first null byte)
        let null_pos = decompressed
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::corrupt(id, "missing header terminator"))?;
        let header = std::str::from_utf8(&decompressed[..null_pos])
            .map_err(|_| Error::corrupt(id, "header is not UTF-8"))?;
        let (kind, size) = header
            .split_once(' ')
            .ok_or_else(|| Error::corrupt(id, "malformed header"))?;
        let kind: ObjectKind = kind.parse()?;
        let size: usize = size
            .parse()
            .map_err(|_| Error::corrupt(id, "malformed size"))?;

        let content = decompressed.split_off(null_pos + 1);
        if content.len() != size {
            return Err(Error::corrupt(id, "size mismatch"));
        }
        Ok((kind, content))
    }

    pub fn read(&self, id: &ObjectId) -> Result<Object> {
        let (kind, data) = self.read_raw(id)?;
        Object::parse(kind, &data).map_err(|e| match e {
            Error::CorruptObject { reason, .. } => Error::corrupt(id, reason),
            other => other,
        })
    }

    /// Stores `data` and returns its id; writing an existing object is a no-op.
    pub fn write_raw(&self, kind: ObjectKind, data: &[u8]) -> Result<ObjectId> {
        let id = ObjectId::hash_object(kind, data);
        let path = self.object_path(&id);
        if path.exists() {
            return Ok(id);
        }

        let header = format!("{} {}\0", kind, data.len());
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(header.as_bytes())?;
        encoder.write_all(data)?;
        let compressed = encoder.finish()?;

        let parent = path
            .parent()
            .ok_or_else(|| Error::corrupt(id, "object path has no parent"))?;
        fs::create_dir_all(parent)?;
        let tmp = parent.join(format!("tmp_obj_{}", &id.to_hex()[2..]));
        fs::write(&tmp, compressed)?;
        fs::rename(&tmp, &path)?;

        Ok(id)
    }

    pub fn write(&self, object: &dyn VoxObject) -> Result<ObjectId> {
        self.write_raw(object.kind(), &object.serialize()?)
    }

    pub fn references(&self, id: &ObjectId) -> Result<Vec<ObjectId>> {
        Ok(self.read(id)?.references())
    }

    /// Every object reachable from `tips`, not descending into ids in `exclude`.
    pub fn collect_closure(
        &self,
        tips: &[ObjectId],
        exclude: &HashSet<ObjectId>,
    ) -> Result<Vec<ObjectId>> {
        let mut seen = HashSet::new();
        let mut stack: Vec<ObjectId> = tips.to_vec();
        let mut out = Vec::new();

        while let Some(id) = stack.pop() {
            if exclude.contains(&id) || !seen.insert(id) {
                continue;
            }
            stack.extend(self.references(&id)?);
            out.push(id);
        }
        Ok(out)
    }

    /// Copies everything reachable from `tips` that `target` lacks.
    ///
    /// Objects already present in `target` are assumed to have their whole
    /// closure present as well, so the walk stops there.
    pub fn copy_closure(&self, target: &LooseObjectStore, tips: &[ObjectId]) -> Result<usize> {
        let mut seen = HashSet::new();
        let mut stack: Vec<ObjectId> = tips.to_vec();
        let mut copied = 0;

        while let Some(id) = stack.pop() {
            if !seen.insert(id) || target.has(&id) {
                continue;
            }
            let (kind, data) = self.read_raw(&id)?;
            stack.extend(Object::parse(kind, &data)?.references());
            target.write_raw(kind, &data)?;
            copied += 1;
        }

        debug!("copied {copied} objects into {}", target.dir.display());
        Ok(copied)
    }

    /// Explodes a received packfile into loose objects and returns how many
    /// were written.
    ///
    /// Packs with deltified entries are kept verbatim under `objects/pack/`
    /// instead; their objects stay unreadable until something indexes them.
    pub fn ingest_pack(&self, pack: &[u8]) -> Result<usize> {
        match read_entries(pack) {
            Ok(entries) => {
                for (kind, data) in &entries {
                    self.write_raw(*kind, data)?;
                }
                debug!("unpacked {} objects into {}", entries.len(), self.dir.display());
                Ok(entries.len())
            }
            Err(UnpackError::Deltified) => {
                let header = PackHeader::parse(pack)?;
                let checksum = hex::encode(Sha1::digest(pack));
                let pack_dir = self.dir.join(PACK_DIR);
                fs::create_dir_all(&pack_dir)?;

                let path = pack_dir.join(format!("pack-{checksum}.pack"));
                fs::write(&path, pack)?;
                warn!(
                    "pack with {} objects has deltas, stored as {}",
                    header.object_count,
                    path.display()
                );
                Ok(0)
            }
            Err(UnpackError::Invalid(e)) => Err(e),
        }
    }
}

impl ObjectStore for LooseObjectStore {
    fn kind_of(&self, id: &ObjectId) -> Result<ObjectKind> {
        Ok(self.read_raw(id)?.0)
    }

    fn tag_target(&self, id: &ObjectId) -> Result<ObjectId> {
        let (kind, data) = self.read_raw(id)?;
        if kind != ObjectKind::Tag {
            return Err(Error::corrupt(id, format!("expected tag, found {kind}")));
        }
        let text = std::str::from_utf8(&data).map_err(|e| Error::corrupt(id, e.to_string()))?;
        Ok(Tag::parse(text)?.object)
    }

    fn has(&self, id: &ObjectId) -> bool {
        self.object_path(id).is_file()
    }

    fn commit_parents(&self, id: &ObjectId) -> Result<Vec<ObjectId>> {
        match self.read(id)? {
            Object::Commit(commit) => Ok(commit.parents),
            other => Err(Error::corrupt(
                id,
                format!("expected commit, found {}", other.kind()),
            )),
        }
    }
}
