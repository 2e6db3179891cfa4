use crate::Result;
use crate::storage::objects::{ObjectKind, VoxObject};

/// Raw file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Blob { data: data.into() }
    }
}

impl VoxObject for Blob {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Blob
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(self.data.clone())
    }
}
