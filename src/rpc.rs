use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::scenarios::ClientTest;

/// Largest frame written to or accepted from a peer.
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Opaque handle of a rendered fragment, unique within one page view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub String);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum RpcRequest {
    LoadPage,
    Call {
        call_id: CallId,
        object_id: ObjectId,
        method: String,
        args: Vec<Value>,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum RpcResponse {
    Page(PageView),
    Result {
        call_id: CallId,
        value: Value,
    },
    Error {
        call_id: Option<CallId>,
        kind: FailureKind,
        message: String,
    },
}

/// Classification of a failed call as it travels on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    AssertionFailure,
    RemoteFailure,
    BadArguments,
    NoSuchObject,
    NoSuchMethod,
    Protocol,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::AssertionFailure => "AssertionFailure",
            FailureKind::RemoteFailure => "RemoteFailure",
            FailureKind::BadArguments => "BadArguments",
            FailureKind::NoSuchObject => "NoSuchObject",
            FailureKind::NoSuchMethod => "NoSuchMethod",
            FailureKind::Protocol => "Protocol",
        };
        f.write_str(name)
    }
}

/// A rendered page as delivered to the client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PageView {
    pub markup: String,
    pub fragments: Vec<FragmentView>,
}

impl PageView {
    pub fn fragment(&self, name: &str) -> Option<&FragmentView> {
        self.fragments.iter().find(|f| f.name == name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FragmentView {
    pub object_id: ObjectId,
    pub name: String,
    pub controls: Vec<Control>,
}

/// A triggerable control and the client test it fires.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Control {
    pub label: String,
    pub test: ClientTest,
}

/// Write one length-prefixed frame.
pub async fn write_packet<W>(writer: &mut W, data: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    check_packet_size(data.len())?;
    let len = data.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await
}

/// Refuse a frame the peer would reject, before any byte of it is written.
pub fn check_packet_size(len: usize) -> std::io::Result<()> {
    if len > MAX_PACKET_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("packet of {len} bytes exceeds limit"),
        ));
    }
    Ok(())
}

/// Read one length-prefixed frame.
pub async fn read_packet<R>(reader: &mut R) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_PACKET_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("packet of {len} bytes exceeds limit"),
        ));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn packets_keep_boundaries() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_packet(&mut a, b"first").await.unwrap();
        write_packet(&mut a, b"").await.unwrap();
        write_packet(&mut a, b"third").await.unwrap();

        assert_eq!(read_packet(&mut b).await.unwrap(), b"first");
        assert_eq!(read_packet(&mut b).await.unwrap(), b"");
        assert_eq!(read_packet(&mut b).await.unwrap(), b"third");
    }

    #[tokio::test]
    async fn oversized_packet_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let len = (MAX_PACKET_SIZE as u32 + 1).to_be_bytes();
        a.write_all(&len).await.unwrap();

        let err = read_packet(&mut b).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn oversized_write_is_refused_locally() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let data = vec![b'x'; MAX_PACKET_SIZE + 1];

        let err = write_packet(&mut a, &data).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);

        // Nothing reached the stream, so the next frame still lines up.
        write_packet(&mut a, b"after").await.unwrap();
        assert_eq!(read_packet(&mut b).await.unwrap(), b"after");
    }

    #[test]
    fn mapping_keys_keep_insertion_order() {
        let req = RpcRequest::Call {
            call_id: CallId("c1".into()),
            object_id: ObjectId(2),
            method: "test".into(),
            args: vec![json!({"zeta": "z", "alpha": "a", "mid": "m"})],
        };
        let text = serde_json::to_string(&req).unwrap();
        let zeta = text.find("zeta").unwrap();
        let alpha = text.find("alpha").unwrap();
        let mid = text.find("mid").unwrap();
        assert!(zeta < alpha && alpha < mid);

        let back: RpcRequest = serde_json::from_str(&text).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn numbers_keep_their_type() {
        let bytes = serde_json::to_vec(&json!([1, 1.0, 0.1])).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value[0].is_i64() || value[0].is_u64());
        assert!(value[1].is_f64());
        assert_eq!(value[2].as_f64(), Some(0.1));
    }
}
