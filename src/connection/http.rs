use crate::advertisement::{Advertisement, RemoteHead};
use crate::connection::pack_for_push;
use crate::connection::transport::{Direction, PushCommand, PushReport, Transport};
use crate::storage::utils::REFS_PREFIX;
use crate::storage::{ObjectId, ObjectStore, Repository};
use crate::{Error, Result};
use log::{debug, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::runtime::{Builder, Runtime};
use url::Url;

pub const REFS_ENDPOINT: &str = "api/v1/refs";
pub const PACKFILE_ENDPOINT: &str = "api/v1/packfile";
pub const PUSH_ENDPOINT: &str = "api/v1/push";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefInfo {
    pub name: String,
    pub id: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peeled: Option<ObjectId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PackfileRequest {
    pub wants: Vec<ObjectId>,
    pub haves: Vec<ObjectId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PackfileResponse {
    pub data: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PushRequest {
    pub commands: Vec<PushCommand>,
    #[serde(default)]
    pub pack: Option<Vec<u8>>,
}

/// Talks to a vox server's JSON API over HTTP(S).
pub struct HttpTransport {
    base_url: Url,
    client: Client,
    runtime: Runtime,
    refs: Option<Vec<RefInfo>>,
    direction: Option<Direction>,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self> {
        // Endpoints are joined relative to the repository path.
        let mut base_url = Url::parse(base_url).map_err(Error::transport)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            base_url,
            client: Client::new(),
            runtime: Builder::new_current_thread().enable_all().build()?,
            refs: None,
            direction: None,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(Error::transport)
    }

    fn list_remote_refs(&self) -> Result<Vec<RefInfo>> {
        let url = self.endpoint(REFS_ENDPOINT)?;
        self.runtime.block_on(async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(Error::transport)?;
            if !response.status().is_success() {
                return Err(Error::transport(format!(
                    "failed to fetch refs: {}",
                    response.status()
                )));
            }
            response.json().await.map_err(Error::transport)
        })
    }

    fn require(&self, direction: Direction) -> Result<&[RefInfo]> {
        let refs = self.refs.as_deref().ok_or(Error::NotConnected)?;
        match self.direction {
            Some(actual) if actual != direction => Err(Error::WrongDirection {
                expected: direction,
                actual,
            }),
            _ => Ok(refs),
        }
    }
}

impl Transport for HttpTransport {
    fn url(&self) -> &str {
        self.base_url.as_str()
    }

    fn connect(&mut self, direction: Direction) -> Result<()> {
        let refs = self.list_remote_refs()?;
        debug!("{} advertised {} refs", self.base_url, refs.len());
        self.refs = Some(refs);
        self.direction = Some(direction);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.refs.is_some()
    }

    fn list_refs(&mut self) -> Result<Advertisement> {
        let refs = self.refs.as_ref().ok_or(Error::NotConnected)?;
        Ok(Advertisement::from_heads(refs.iter().map(|r| RemoteHead {
            name: r.name.clone(),
            id: r.id,
            peeled: r.peeled,
        })))
    }

    fn negotiate_and_fetch(&mut self, local: &Repository, wants: &[ObjectId]) -> Result<()> {
        self.require(Direction::Fetch)?;
        if wants.is_empty() {
            return Ok(());
        }

        let mut haves: Vec<ObjectId> = local
            .refs()
            .list(REFS_PREFIX)?
            .into_iter()
            .map(|(_, id)| id)
            .filter(|id| local.objects().has(id))
            .collect();
        haves.sort();
        haves.dedup();

        let url = self.endpoint(PACKFILE_ENDPOINT)?;
        let request = PackfileRequest {
            wants: wants.to_vec(),
            haves,
        };
        let pack: PackfileResponse = self.runtime.block_on(async {
            let response = self
                .client
                .post(url)
                .json(&request)
                .send()
                .await
                .map_err(Error::transport)?;
            if !response.status().is_success() {
                return Err(Error::transport(format!(
                    "failed to fetch packfile: {}",
                    response.status()
                )));
            }
            response.json().await.map_err(Error::transport)
        })?;

        let unpacked = local.objects().ingest_pack(&pack.data)?;
        info!("received {unpacked} objects from {}", self.base_url);
        Ok(())
    }

    fn negotiate_and_push(
        &mut self,
        local: &Repository,
        commands: &[PushCommand],
    ) -> Result<PushReport> {
        let remote_tips: Vec<ObjectId> = self
            .require(Direction::Push)?
            .iter()
            .map(|r| r.id)
            .collect();
        let request = PushRequest {
            commands: commands.to_vec(),
            pack: pack_for_push(local, &remote_tips, commands)?,
        };

        let url = self.endpoint(PUSH_ENDPOINT)?;
        self.runtime.block_on(async {
            let response = self
                .client
                .post(url)
                .json(&request)
                .send()
                .await
                .map_err(Error::transport)?;
            if !response.status().is_success() {
                return Err(Error::transport(format!(
                    "push rejected: {}",
                    response.status()
                )));
            }
            response.json().await.map_err(Error::transport)
        })
    }

    fn close(&mut self) -> Result<()> {
        self.refs = None;
        self.direction = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let transport = HttpTransport::new("https://example.com/team/repo").unwrap();
        assert_eq!(transport.url(), "https://example.com/team/repo/");
        assert_eq!(
            transport.endpoint(REFS_ENDPOINT).unwrap().as_str(),
            "https://example.com/team/repo/api/v1/refs"
        );
    }

    #[test]
    fn test_not_connected() {
        let mut transport = HttpTransport::new("http://127.0.0.1:1/repo").unwrap();
        assert!(!transport.is_connected());
        assert!(matches!(transport.list_refs(), Err(Error::NotConnected)));
    }

    #[test]
    fn test_ref_info_json() {
        let id = ObjectId::hash_object(crate::storage::ObjectKind::Blob, b"x");
        let json = serde_json::to_string(&RefInfo {
            name: "refs/heads/master".to_string(),
            id,
            peeled: None,
        })
        .unwrap();
        assert_eq!(json, format!(r#"{{"name":"refs/heads/master","id":"{id}"}}"#));
    }
}
