//! Messages of the git daemon protocol (`git-upload-pack` and
//! `git-receive-pack` over pkt-lines).

use crate::connection::protocol::pktline::{self, PktLine};
use crate::connection::transport::{PushCommand, PushReport, RefStatus};
use crate::storage::ObjectId;
use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt};
use url::Url;

pub const DEFAULT_PORT: u16 = 9418;
pub const UPLOAD_PACK: &str = "git-upload-pack";
pub const RECEIVE_PACK: &str = "git-receive-pack";

const SIDE_BAND_64K: &str = "side-band-64k";
const REPORT_STATUS: &str = "report-status";

/// `git://host[:port]/path`, split into what the daemon needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitUrl {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl GitUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(Error::transport)?;
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::transport(format!("`{url}` has no host")))?
            .to_string();
        let port = parsed.port().unwrap_or(DEFAULT_PORT);

        let path = parsed.path();
        if path.trim_start_matches('/').is_empty() {
            return Err(Error::transport(format!("`{url}` has no repository path")));
        }

        Ok(GitUrl {
            host,
            port,
            path: path.to_string(),
        })
    }
}

/// Server acknowledgment during negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckStatus {
    Ack(ObjectId),
    Nak,
}

/// The refs and capabilities a daemon sends right after the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefAdvertisement {
    pub refs: Vec<(String, ObjectId)>,
    pub capabilities: Vec<String>,
}

impl RefAdvertisement {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// First packet of a connection: `<service> <path>\0host=<host>\0`.
pub fn service_request(service: &str, url: &GitUrl) -> Result<BytesMut> {
    let mut payload = Vec::new();
    payload.extend_from_slice(service.as_bytes());
    payload.push(b' ');
    payload.extend_from_slice(url.path.as_bytes());
    payload.extend_from_slice(b"\0host=");
    payload.extend_from_slice(url.host.as_bytes());
    if url.port != DEFAULT_PORT {
        payload.extend_from_slice(format!(":{}", url.port).as_bytes());
    }
    payload.push(0);

    let mut buf = BytesMut::new();
    pktline::put_data(&mut buf, &payload)?;
    Ok(buf)
}

pub async fn read_advertisement<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<RefAdvertisement> {
    let mut advertisement = RefAdvertisement::default();
    let packets = pktline::read_until_flush(reader).await?;

    for (index, packet) in packets.iter().enumerate() {
        let line = trim_newline(packet);
        if let Some(message) = line.strip_prefix(b"ERR ") {
            return Err(Error::transport(format!(
                "remote error: {}",
                String::from_utf8_lossy(message)
            )));
        }
        let line = if index == 0 {
            // "<id> <name>\0<cap> <cap>..."
            let mut parts = line.splitn(2, |&b| b == 0);
            let refs_part = parts.next().unwrap_or_default();
            if let Some(caps) = parts.next() {
                advertisement.capabilities = String::from_utf8_lossy(caps)
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
            }
            refs_part
        } else {
            line
        };

        let (name, id) = split_ref_line(line)?;
        // An empty repository advertises only its capabilities.
        if name == "capabilities^{}" && id.is_zero() {
            continue;
        }
        advertisement.refs.push((name, id));
    }

    debug!(
        "daemon advertised {} refs, capabilities: {}",
        advertisement.refs.len(),
        advertisement.capabilities.join(" ")
    );
    Ok(advertisement)
}

/// `want` lines, our `have`s, then `done`.
pub fn upload_request(
    wants: &[ObjectId],
    haves: &[ObjectId],
    server: &RefAdvertisement,
) -> Result<BytesMut> {
    let mut buf = BytesMut::new();
    for (index, want) in wants.iter().enumerate() {
        if index == 0 && server.supports(SIDE_BAND_64K) {
            pktline::put_line(&mut buf, &format!("want {want} {SIDE_BAND_64K}"))?;
        } else {
            pktline::put_line(&mut buf, &format!("want {want}"))?;
        }
    }
    pktline::put_flush(&mut buf);

    for have in haves {
        pktline::put_line(&mut buf, &format!("have {have}"))?;
    }
    pktline::put_line(&mut buf, "done")?;
    Ok(buf)
}

/// Reads the final ACK/NAK and the packfile that follows it.
pub async fn read_pack_response<R: AsyncRead + Unpin>(
    reader: &mut R,
    server: &RefAdvertisement,
) -> Result<(AckStatus, Bytes)> {
    let ack = loop {
        let packet = pktline::read_pkt(reader)
            .await?
            .ok_or_else(|| Error::transport("connection closed before the pack"))?;
        let Some(line) = packet.as_str() else {
            continue;
        };
        if let Some(status) = parse_ack(line)? {
            break status;
        }
    };

    let mut pack = BytesMut::new();
    if server.supports(SIDE_BAND_64K) {
        while let Some(PktLine::Data(data)) = pktline::read_pkt(reader).await? {
            match data.first() {
                Some(1) => pack.put_slice(&data[1..]),
                Some(2) => debug!("remote: {}", String::from_utf8_lossy(&data[1..]).trim_end()),
                Some(3) => {
                    return Err(Error::transport(format!(
                        "remote error: {}",
                        String::from_utf8_lossy(&data[1..]).trim_end()
                    )));
                }
                _ => return Err(Error::transport("unexpected side-band packet")),
            }
        }
    } else {
        let mut raw = Vec::new();
        reader
            .read_to_end(&mut raw)
            .await
            .map_err(Error::transport)?;
        pack.put_slice(&raw);
    }
    Ok((ack, pack.freeze()))
}

/// `ACK <id> ...` or `NAK`; `None` for anything else.
fn parse_ack(line: &str) -> Result<Option<AckStatus>> {
    if line == "NAK" {
        return Ok(Some(AckStatus::Nak));
    }
    if let Some(rest) = line.strip_prefix("ACK ") {
        let id = rest
            .split_whitespace()
            .next()
            .ok_or_else(|| Error::transport("missing id in ACK"))?;
        return Ok(Some(AckStatus::Ack(id.parse()?)));
    }
    if let Some(message) = line.strip_prefix("ERR ") {
        return Err(Error::transport(format!("remote error: {message}")));
    }
    Ok(None)
}

/// Ref update commands for `git-receive-pack`, terminated by a flush.
pub fn push_request(commands: &[PushCommand], server: &RefAdvertisement) -> Result<BytesMut> {
    let mut buf = BytesMut::new();
    for (index, command) in commands.iter().enumerate() {
        let old = command.old.unwrap_or(ObjectId::ZERO);
        let new = command.new.unwrap_or(ObjectId::ZERO);
        let mut line = format!("{old} {new} {}", command.remote_ref).into_bytes();
        if index == 0 && server.supports(REPORT_STATUS) {
            line.push(0);
            line.extend_from_slice(REPORT_STATUS.as_bytes());
        }
        line.push(b'\n');
        pktline::put_data(&mut buf, &line)?;
    }
    pktline::put_flush(&mut buf);
    Ok(buf)
}

pub fn wants_report(server: &RefAdvertisement) -> bool {
    server.supports(REPORT_STATUS)
}

/// Parses `unpack ok|<error>` followed by `ok <ref>` / `ng <ref> <reason>`.
pub async fn read_report<R: AsyncRead + Unpin>(reader: &mut R) -> Result<PushReport> {
    let packets = pktline::read_until_flush(reader).await?;
    let mut lines = packets
        .iter()
        .map(|packet| String::from_utf8_lossy(trim_newline(packet)).into_owned());

    let unpack = lines
        .next()
        .ok_or_else(|| Error::transport("empty push report"))?;
    let unpack = unpack
        .strip_prefix("unpack ")
        .ok_or_else(|| Error::transport(format!("unexpected report line `{unpack}`")))?;

    let mut report = PushReport {
        unpack_ok: unpack == "ok",
        unpack_message: (unpack != "ok").then(|| unpack.to_string()),
        refs: Vec::new(),
    };

    for line in lines {
        if let Some(name) = line.strip_prefix("ok ") {
            report.refs.push(RefStatus {
                name: name.to_string(),
                error: None,
            });
        } else if let Some(rest) = line.strip_prefix("ng ") {
            let (name, reason) = rest.split_once(' ').unwrap_or((rest, "rejected"));
            report.refs.push(RefStatus {
                name: name.to_string(),
                error: Some(reason.to_string()),
            });
        } else {
            return Err(Error::transport(format!("unexpected report line `{line}`")));
        }
    }
    Ok(report)
}

fn trim_newline(packet: &[u8]) -> &[u8] {
    packet.strip_suffix(b"\n").unwrap_or(packet)
}

fn split_ref_line(line: &[u8]) -> Result<(String, ObjectId)> {
    let line = std::str::from_utf8(line).map_err(Error::transport)?;
    let (id, name) = line
        .split_once(' ')
        .ok_or_else(|| Error::transport(format!("malformed ref line `{line}`")))?;
    Ok((name.to_string(), id.parse()?))
}
