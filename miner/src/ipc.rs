//! Supervisor <-> worker IPC over the child's standard I/O.
//!
//! A request is a method byte followed by a length-prefixed payload; the
//! reply is a single acknowledgement byte. Requests are triggers, not
//! queries, so a call blocks only until the worker has taken the message.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use kopach_common::{
    message::Job,
    serializer::{ReaderError, Serializer},
    wire::Container,
};

// Payloads are one job container at most; anything bigger is a framing bug.
const MAX_PAYLOAD: usize = 1 << 20;

const ACK: u8 = 1;
const NAK: u8 = 0;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("unknown IPC method {0}")]
    UnknownMethod(u8),
    #[error("{0} command not acknowledged")]
    NotAcknowledged(&'static str),
    #[error("oversized IPC payload ({0} bytes)")]
    OversizedPayload(usize),
    #[error(transparent)]
    Serialization(#[from] ReaderError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpcMethod {
    NewJob = 1,
    Pause = 2,
    Stop = 3,
    SendPass = 4,
}

impl TryFrom<u8> for IpcMethod {
    type Error = IpcError;

    fn try_from(value: u8) -> Result<Self, IpcError> {
        match value {
            1 => Ok(IpcMethod::NewJob),
            2 => Ok(IpcMethod::Pause),
            3 => Ok(IpcMethod::Stop),
            4 => Ok(IpcMethod::SendPass),
            other => Err(IpcError::UnknownMethod(other)),
        }
    }
}

#[derive(Debug)]
pub struct IpcRequest {
    pub method: IpcMethod,
    pub payload: Vec<u8>,
}

impl IpcRequest {
    pub fn job(&self) -> Result<Job, IpcError> {
        let container = Container::from_bytes(&self.payload)?;
        Ok(Job::from_container(&container)?)
    }

    pub fn passphrase(&self) -> Result<String, IpcError> {
        String::from_utf8(self.payload.clone())
            .map_err(|_| IpcError::Serialization(ReaderError::InvalidValue))
    }
}

/// Read one request frame. `Ok(None)` means the peer closed the stream.
pub async fn read_request<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<IpcRequest>, IpcError> {
    let mut method = [0u8; 1];
    match reader.read_exact(&mut method).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let method = IpcMethod::try_from(method[0])?;

    let len = reader.read_u32().await? as usize;
    if len > MAX_PAYLOAD {
        return Err(IpcError::OversizedPayload(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(IpcRequest { method, payload }))
}

pub async fn write_ack<W: AsyncWrite + Unpin>(writer: &mut W, ack: bool) -> Result<(), IpcError> {
    writer.write_all(&[if ack { ACK } else { NAK }]).await?;
    writer.flush().await?;
    Ok(())
}

/// The supervisor's handle on one worker. Any read/write pair works here;
/// in production it is the child's piped standard I/O.
pub struct IpcClient<W, R> {
    writer: W,
    reader: R,
}

impl<W: AsyncWrite + Unpin, R: AsyncRead + Unpin> IpcClient<W, R> {
    pub fn new(writer: W, reader: R) -> Self {
        Self { writer, reader }
    }

    /// Deliver a new job; the worker starts or restarts mining on it.
    pub async fn new_job(&mut self, job: &Job) -> Result<(), IpcError> {
        let payload = job.to_container().to_bytes();
        self.call(IpcMethod::NewJob, &payload, "new job").await
    }

    pub async fn pause(&mut self) -> Result<(), IpcError> {
        self.call(IpcMethod::Pause, &[], "pause").await
    }

    pub async fn stop(&mut self) -> Result<(), IpcError> {
        self.call(IpcMethod::Stop, &[], "stop").await
    }

    /// Hand the worker the bus passphrase so it can open its own
    /// authenticated dispatch channel.
    pub async fn send_pass(&mut self, passphrase: &str) -> Result<(), IpcError> {
        self.call(IpcMethod::SendPass, passphrase.as_bytes(), "send pass")
            .await
    }

    async fn call(
        &mut self,
        method: IpcMethod,
        payload: &[u8],
        name: &'static str,
    ) -> Result<(), IpcError> {
        self.writer.write_all(&[method as u8]).await?;
        self.writer.write_u32(payload.len() as u32).await?;
        self.writer.write_all(payload).await?;
        self.writer.flush().await?;

        let mut reply = [0u8; 1];
        self.reader.read_exact(&mut reply).await?;
        if reply[0] != ACK {
            return Err(IpcError::NotAcknowledged(name));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_request_round_trip() {
        let (client_side, server_side) = duplex(64 * 1024);
        let (server_read, mut server_write) = tokio::io::split(server_side);
        let (client_read, client_write) = tokio::io::split(client_side);
        let mut client = IpcClient::new(client_write, client_read);

        let server = tokio::spawn(async move {
            let mut reader = server_read;
            let request = read_request(&mut reader).await.unwrap().unwrap();
            assert_eq!(request.method, IpcMethod::SendPass);
            assert_eq!(request.passphrase().unwrap(), "hunter2");
            write_ack(&mut server_write, true).await.unwrap();

            let request = read_request(&mut reader).await.unwrap().unwrap();
            assert_eq!(request.method, IpcMethod::Pause);
            write_ack(&mut server_write, false).await.unwrap();

            assert!(read_request(&mut reader).await.unwrap().is_none());
        });

        client.send_pass("hunter2").await.unwrap();
        assert!(matches!(
            client.pause().await,
            Err(IpcError::NotAcknowledged("pause"))
        ));
        drop(client);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_job_payload_round_trip() {
        use kopach_common::crypto::hash;
        use kopach_common::fork::TargetBits;
        use kopach_common::message::NodeAnnouncement;

        let mut bitses = TargetBits::new();
        bitses.insert(2, 0x1d00ffff);
        let mut merkles = indexmap::IndexMap::new();
        merkles.insert(2, hash(b"root"));
        let job = Job {
            announcement: NodeAnnouncement {
                ips: vec!["127.0.0.1".parse().unwrap()],
                p2p_port: 1,
                rpc_port: 2,
                controller_port: 3,
            },
            height: 10,
            prev_block: hash(b"prev"),
            bitses,
            merkles,
        };

        let request = IpcRequest {
            method: IpcMethod::NewJob,
            payload: job.to_container().to_bytes(),
        };
        assert_eq!(request.job().unwrap(), job);
    }

    #[tokio::test]
    async fn test_unknown_method_rejected() {
        let (mut a, mut b) = duplex(64);
        a.write_all(&[99, 0, 0, 0, 0]).await.unwrap();
        assert!(matches!(
            read_request(&mut b).await,
            Err(IpcError::UnknownMethod(99))
        ));
    }
}
