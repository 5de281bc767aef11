use std::collections::{HashMap, VecDeque};
#[cfg(unix)]
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::{Mutex, mpsc, oneshot},
};

use crate::config::Config;
use crate::error::{ClientError, ClientResult, RemoteError};
use crate::rpc::{
    CallId, Control, FragmentView, ObjectId, PageView, RpcRequest, RpcResponse,
    check_packet_size, read_packet, write_packet,
};

trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Requests waiting for their response.
#[derive(Default)]
struct Pending {
    calls: HashMap<CallId, oneshot::Sender<RpcResponse>>,
    pages: VecDeque<oneshot::Sender<PageView>>,
}

/// `None` once the connection is gone.
type SharedPending = Arc<Mutex<Option<Pending>>>;

fn closed() -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::ConnectionAborted,
        "Connection closed by server",
    )
}

/// Cheap, cloneable handle to a connection with the page server.
///
/// Calls may overlap; each one waits on its own channel and responses are
/// matched by call id, whatever order the server answers in.
#[derive(Clone)]
pub struct ClientHandle {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    pending: SharedPending,
}

impl ClientHandle {
    pub async fn connect(addr: &str) -> std::io::Result<Self> {
        let tcp = TcpStream::connect(addr).await?;
        log::info!("Client connected via TCP {addr}");
        Ok(Self::spawn(tcp))
    }

    #[cfg(unix)]
    pub async fn connect_unix(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let unix = UnixStream::connect(path).await?;
        log::info!("Client connected via Unix socket {}", path.display());
        Ok(Self::spawn(unix))
    }

    /// TCP when an address was configured, otherwise the Unix socket.
    pub async fn connect_with(config: &Config) -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            if let (false, Some(path)) = (config.prefer_tcp, &config.socket) {
                return Self::connect_unix(path).await;
            }
        }
        Self::connect(&config.addr).await
    }

    pub async fn from_env() -> std::io::Result<Self> {
        Self::connect_with(&Config::from_env()).await
    }

    fn spawn<S>(stream: S) -> Self
    where
        S: AsyncStream + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let pending: SharedPending = Arc::new(Mutex::new(Some(Pending::default())));

        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if let Err(e) = write_packet(&mut writer, &bytes).await {
                    log::error!("Client write error: {e:?}");
                    break;
                }
            }
            // Last handle gone: let the server see EOF so it drops the page view.
            if let Err(e) = writer.shutdown().await {
                log::debug!("Client shutdown error: {e}");
            }
        });

        tokio::spawn({
            let pending = pending.clone();
            async move {
                loop {
                    let buf = match read_packet(&mut reader).await {
                        Ok(buf) => buf,
                        Err(e) => {
                            log::debug!("Client reader stopped: {e}");
                            break;
                        }
                    };
                    match serde_json::from_slice::<RpcResponse>(&buf) {
                        Ok(resp) => route_response(&pending, resp).await,
                        Err(e) => log::error!("Invalid response from server: {e}"),
                    }
                }
                // Dropping the senders fails every call still waiting.
                pending.lock().await.take();
            }
        });

        Self { tx, pending }
    }

    fn send(&self, req: &RpcRequest) -> ClientResult<()> {
        let data = serde_json::to_vec(req)?;
        check_packet_size(data.len())?;
        self.tx.send(data).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "Actor dropped").into()
        })
    }

    /// Ask the server to render the page for this connection.
    pub async fn load_page(&self) -> ClientResult<PageView> {
        let (resp_tx, resp_rx) = oneshot::channel();
        {
            // Queue the waiter only once the request is out; holding the lock
            // keeps the reader from routing the page before it is queued.
            let mut guard = self.pending.lock().await;
            let pending = guard.as_mut().ok_or_else(closed)?;
            self.send(&RpcRequest::LoadPage)?;
            pending.pages.push_back(resp_tx);
        }
        resp_rx.await.map_err(|_| closed().into())
    }

    /// Invoke `method` on a rendered fragment.
    ///
    /// The returned future resolves once the server answers: to the value on
    /// success, to [`ClientError::Remote`] when the method failed.
    pub async fn remote_call(
        &self,
        object_id: ObjectId,
        method: &str,
        args: Vec<Value>,
    ) -> ClientResult<Value> {
        let call_id = CallId::new();
        let (resp_tx, resp_rx) = oneshot::channel();
        {
            let mut guard = self.pending.lock().await;
            let pending = guard.as_mut().ok_or_else(closed)?;
            pending.calls.insert(call_id.clone(), resp_tx);
        }

        let req = RpcRequest::Call {
            call_id: call_id.clone(),
            object_id,
            method: method.into(),
            args,
        };
        if let Err(e) = self.send(&req) {
            if let Some(pending) = self.pending.lock().await.as_mut() {
                pending.calls.remove(&call_id);
            }
            return Err(e);
        }

        match resp_rx.await.map_err(|_| closed())? {
            RpcResponse::Result { value, .. } => Ok(value),
            RpcResponse::Error { kind, message, .. } => Err(RemoteError { kind, message }.into()),
            other => Err(ClientError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Run the client test bound to `control` against its fragment.
    pub async fn run_control(
        &self,
        fragment: &FragmentView,
        control: &Control,
    ) -> ClientResult<Value> {
        control.test.run(self, fragment.object_id).await
    }
}

async fn route_response(pending: &SharedPending, resp: RpcResponse) {
    let mut guard = pending.lock().await;
    let Some(pending) = guard.as_mut() else {
        return;
    };

    match resp {
        RpcResponse::Page(view) => match pending.pages.pop_front() {
            Some(tx) => {
                let _ = tx.send(view);
            }
            None => log::warn!("Unrequested page from server"),
        },
        RpcResponse::Error {
            call_id: None,
            kind,
            message,
        } => log::error!("Server reported {kind}: {message}"),
        resp => {
            let call_id = match &resp {
                RpcResponse::Result { call_id, .. }
                | RpcResponse::Error {
                    call_id: Some(call_id),
                    ..
                } => call_id.clone(),
                _ => return,
            };
            match pending.calls.remove(&call_id) {
                Some(tx) => {
                    let _ = tx.send(resp);
                }
                None => log::warn!("No caller found for call_id {call_id:?}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// A handle whose writer is already gone.
    fn detached() -> ClientHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        ClientHandle {
            tx,
            pending: Arc::new(Mutex::new(Some(Pending::default()))),
        }
    }

    #[tokio::test]
    async fn failed_page_request_leaves_no_waiter() {
        let client = detached();
        let err = client.load_page().await.unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));

        let guard = client.pending.lock().await;
        assert!(guard.as_ref().unwrap().pages.is_empty());
    }

    #[tokio::test]
    async fn failed_call_leaves_no_waiter() {
        let client = detached();
        let err = client
            .remote_call(ObjectId(1), "test", vec![json!(1)])
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));

        let guard = client.pending.lock().await;
        assert!(guard.as_ref().unwrap().calls.is_empty());
    }
}
