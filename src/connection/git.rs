use crate::advertisement::Advertisement;
use crate::connection::protocol::git::{
    self as wire, GitUrl, RECEIVE_PACK, RefAdvertisement, UPLOAD_PACK,
};
use crate::connection::protocol::pktline;
use crate::connection::pack_for_push;
use crate::connection::transport::{Direction, PushCommand, PushReport, RefStatus, Transport};
use crate::storage::utils::REFS_PREFIX;
use crate::storage::{ObjectId, ObjectStore, Repository};
use crate::{Error, Result};
use bytes::BytesMut;
use log::{debug, info};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::runtime::{Builder, Runtime};

struct Session {
    stream: TcpStream,
    direction: Direction,
    server: RefAdvertisement,
    /// The request phase is over; nothing more may be sent.
    finished: bool,
}

/// Talks to a git daemon (`git://`) over TCP.
pub struct GitTransport {
    url: String,
    endpoint: GitUrl,
    runtime: Runtime,
    session: Option<Session>,
}

impl GitTransport {
    pub fn new(url: &str) -> Result<Self> {
        Ok(GitTransport {
            url: url.to_string(),
            endpoint: GitUrl::parse(url)?,
            runtime: Builder::new_current_thread().enable_all().build()?,
            session: None,
        })
    }
}

/// The live session, if it is open in `direction` and still unused.
fn active(session: &mut Option<Session>, direction: Direction) -> Result<&mut Session> {
    let session = session.as_mut().ok_or(Error::NotConnected)?;
    if session.direction != direction {
        return Err(Error::WrongDirection {
            expected: direction,
            actual: session.direction,
        });
    }
    if session.finished {
        return Err(Error::transport("connection was already used for a transfer"));
    }
    Ok(session)
}

async fn send(stream: &mut TcpStream, buf: &BytesMut) -> Result<()> {
    stream.write_all(buf).await.map_err(Error::transport)?;
    stream.flush().await.map_err(Error::transport)
}

impl Transport for GitTransport {
    fn url(&self) -> &str {
        &self.url
    }

    fn connect(&mut self, direction: Direction) -> Result<()> {
        let service = match direction {
            Direction::Fetch => UPLOAD_PACK,
            Direction::Push => RECEIVE_PACK,
        };
        let request = wire::service_request(service, &self.endpoint)?;
        let (host, port) = (self.endpoint.host.as_str(), self.endpoint.port);

        let session = self.runtime.block_on(async {
            let mut stream = TcpStream::connect((host, port)).await.map_err(|e| {
                Error::transport(format!("failed to connect to {host}:{port}: {e}"))
            })?;
            send(&mut stream, &request).await?;
            let server = wire::read_advertisement(&mut stream).await?;
            Ok::<_, Error>(Session {
                stream,
                direction,
                server,
                finished: false,
            })
        })?;

        debug!("{service} connected to {}", self.url);
        self.session = Some(session);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn list_refs(&mut self) -> Result<Advertisement> {
        let session = self.session.as_ref().ok_or(Error::NotConnected)?;
        Ok(Advertisement::from_wire(session.server.refs.clone()))
    }

    fn negotiate_and_fetch(&mut self, local: &Repository, wants: &[ObjectId]) -> Result<()> {
        let mut haves: Vec<ObjectId> = local
            .refs()
            .list(REFS_PREFIX)?
            .into_iter()
            .map(|(_, id)| id)
            .filter(|id| local.objects().has(id))
            .collect();
        haves.sort();
        haves.dedup();

        let runtime = &self.runtime;
        let session = active(&mut self.session, Direction::Fetch)?;
        session.finished = true;

        if wants.is_empty() {
            let mut flush = BytesMut::new();
            pktline::put_flush(&mut flush);
            return runtime.block_on(send(&mut session.stream, &flush));
        }

        let request = wire::upload_request(wants, &haves, &session.server)?;
        let (ack, pack) = runtime.block_on(async {
            send(&mut session.stream, &request).await?;
            wire::read_pack_response(&mut session.stream, &session.server).await
        })?;
        debug!("negotiation ended with {ack:?}, {} pack bytes", pack.len());

        let unpacked = local.objects().ingest_pack(&pack)?;
        info!("received {unpacked} objects from {}", self.url);
        Ok(())
    }

    fn negotiate_and_push(
        &mut self,
        local: &Repository,
        commands: &[PushCommand],
    ) -> Result<PushReport> {
        let remote_tips: Vec<ObjectId> = active(&mut self.session, Direction::Push)?
            .server
            .refs
            .iter()
            .map(|(_, id)| *id)
            .collect();
        let pack = pack_for_push(local, &remote_tips, commands)?;

        let runtime = &self.runtime;
        let session = active(&mut self.session, Direction::Push)?;
        session.finished = true;
        let request = wire::push_request(commands, &session.server)?;
        let wants_report = wire::wants_report(&session.server);

        runtime.block_on(async {
            send(&mut session.stream, &request).await?;
            if let Some(pack) = &pack {
                session
                    .stream
                    .write_all(pack)
                    .await
                    .map_err(Error::transport)?;
            }
            session.stream.flush().await.map_err(Error::transport)?;

            if wants_report {
                wire::read_report(&mut session.stream).await
            } else {
                Ok(PushReport {
                    unpack_ok: true,
                    unpack_message: None,
                    refs: commands
                        .iter()
                        .map(|c| RefStatus {
                            name: c.remote_ref.clone(),
                            error: None,
                        })
                        .collect(),
                })
            }
        })
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        let runtime = &self.runtime;
        runtime.block_on(async {
            if !session.finished {
                let mut flush = BytesMut::new();
                pktline::put_flush(&mut flush);
                // The daemon may already have hung up.
                let _ = send(&mut session.stream, &flush).await;
            }
            let _ = session.stream.shutdown().await;
        });
        debug!("closed connection to {}", self.url);
        Ok(())
    }
}
