use std::net::SocketAddr;
#[cfg(unix)]
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::config::Config;
use crate::fragment::{CallResult, Registry};
use crate::page::LivePage;
use crate::rpc::{
    CallId, FailureKind, RpcRequest, RpcResponse, check_packet_size, read_packet, write_packet,
};

/// Pause after a failed `accept` so a persistent error (e.g. EMFILE) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ConnectionId(String);

/// Message to a connection's writer
#[derive(Debug)]
enum ConnectionMsg {
    Outgoing(Vec<u8>),
}

type Outbox = mpsc::UnboundedSender<ConnectionMsg>;

/// Trait alias for supported stream types
trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// Actor that owns one connection, and with it one page view.
struct ConnectionActor<S> {
    connection_id: ConnectionId,
    stream: S,
    page: Arc<LivePage>,
}

impl<S> ConnectionActor<S>
where
    S: Stream + 'static,
{
    async fn run(self) {
        let (reader, mut writer) = tokio::io::split(self.stream);
        let connection_id = self.connection_id;
        let (tx, mut rx) = mpsc::unbounded_channel::<ConnectionMsg>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let reader_task = tokio::spawn({
            let view = PageViewState {
                connection_id: connection_id.clone(),
                page: self.page,
                registry: Registry::new(),
                outbox: tx,
            };
            async move {
                view.reader_loop(reader).await;
                let _ = shutdown_tx.send(());
            }
        });

        Self::writer_loop(&mut writer, &connection_id, &mut rx, shutdown_rx).await;

        let _ = reader_task.await;
        log::info!("Connection {connection_id:?} closed, page view dropped");
    }

    async fn writer_loop<W>(
        writer: &mut W,
        connection_id: &ConnectionId,
        rx: &mut mpsc::UnboundedReceiver<ConnectionMsg>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) where
        W: AsyncWrite + Unpin,
    {
        tokio::select! {
            _ = &mut shutdown_rx => {
                log::debug!("Shutdown signal received by writer for {connection_id:?}");
            }
            _ = async {
                while let Some(msg) = rx.recv().await {
                    match msg {
                        ConnectionMsg::Outgoing(bytes) => {
                            if let Err(e) = write_packet(writer, &bytes).await {
                                log::error!("Write error {connection_id:?}: {e:?}");
                                break;
                            }
                        }
                    }
                }
            } => {}
        }
    }
}

/// State owned by a connection's reader.
struct PageViewState {
    connection_id: ConnectionId,
    page: Arc<LivePage>,
    registry: Registry,
    outbox: Outbox,
}

impl PageViewState {
    async fn reader_loop<R>(mut self, mut reader: R)
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let buf = match read_packet(&mut reader).await {
                Ok(buf) => buf,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    log::info!("Client {:?} disconnected", self.connection_id);
                    break;
                }
                Err(e) => {
                    log::error!("Read error {:?}: {e:?}", self.connection_id);
                    break;
                }
            };

            match serde_json::from_slice::<RpcRequest>(&buf) {
                Ok(req) => self.handle_request(req),
                Err(e) => {
                    log::warn!("Invalid request from {:?}: {e}", self.connection_id);
                    let resp = RpcResponse::Error {
                        call_id: None,
                        kind: FailureKind::Protocol,
                        message: format!("invalid request: {e}"),
                    };
                    send_to_client(&self.outbox, &resp);
                }
            }
        }
    }

    /// Dispatch logic for RpcRequest
    fn handle_request(&mut self, req: RpcRequest) {
        match req {
            RpcRequest::LoadPage => {
                let (registry, view) = self.page.render();
                log::info!(
                    "Rendered page for {:?} with {} fragments",
                    self.connection_id,
                    registry.len()
                );
                self.registry = registry;
                send_to_client(&self.outbox, &RpcResponse::Page(view));
            }

            RpcRequest::Call {
                call_id,
                object_id,
                method,
                args,
            } => match self.registry.resolve(object_id, &method) {
                Ok(fragment) => {
                    log::debug!(
                        "Calling {}#{object_id}.{method} for {call_id:?}",
                        fragment.name()
                    );
                    let outbox = self.outbox.clone();
                    tokio::spawn(async move {
                        let result = fragment.call(&method, args).await;
                        send_call_response(&outbox, call_id, result);
                    });
                }
                Err(e) => {
                    log::warn!("Refused call {call_id:?}: {e}");
                    send_call_response(&self.outbox, call_id, Err(e));
                }
            },
        }
    }
}

fn call_response(call_id: CallId, result: CallResult) -> RpcResponse {
    match result {
        Ok(value) => RpcResponse::Result { call_id, value },
        Err(e) => RpcResponse::Error {
            call_id: Some(call_id),
            kind: e.kind(),
            message: e.to_string(),
        },
    }
}

/// Answer a call, turning a result too large for one frame into a failure of that call.
fn send_call_response(outbox: &Outbox, call_id: CallId, result: CallResult) {
    let bytes = match serde_json::to_vec(&call_response(call_id.clone(), result)) {
        Ok(b) => b,
        Err(e) => {
            log::error!("Failed to serialize response to {call_id:?}: {e}");
            return;
        }
    };
    if let Err(e) = check_packet_size(bytes.len()) {
        log::warn!("Response to {call_id:?} dropped: {e}");
        let resp = RpcResponse::Error {
            call_id: Some(call_id),
            kind: FailureKind::Protocol,
            message: format!("result {e}"),
        };
        send_to_client(outbox, &resp);
        return;
    }
    let _ = outbox.send(ConnectionMsg::Outgoing(bytes));
}

fn send_to_client<T: serde::Serialize>(outbox: &Outbox, msg: &T) {
    let bytes = match serde_json::to_vec(msg) {
        Ok(b) => b,
        Err(e) => {
            log::error!("Failed to serialize message: {e}");
            return;
        }
    };
    let _ = outbox.send(ConnectionMsg::Outgoing(bytes));
}

fn spawn_connection<S>(stream: S, page: Arc<LivePage>)
where
    S: Stream + 'static,
{
    let connection_id = ConnectionId(Uuid::new_v4().to_string());
    log::info!("New connection: {connection_id:?}");

    let actor = ConnectionActor {
        connection_id,
        stream,
        page,
    };
    tokio::spawn(actor.run());
}

/// Bound listeners, ready to serve pages.
pub struct Server {
    tcp: TcpListener,
    #[cfg(unix)]
    unix: Option<(UnixListener, PathBuf)>,
    page: Arc<LivePage>,
}

impl Server {
    pub async fn bind(config: &Config, page: LivePage) -> std::io::Result<Self> {
        let tcp = TcpListener::bind(config.addr.as_str()).await?;
        log::info!("Listening on TCP {}", tcp.local_addr()?);

        #[cfg(unix)]
        let unix = match &config.socket {
            Some(path) => {
                let _ = std::fs::remove_file(path);
                let listener = UnixListener::bind(path)?;
                log::info!("Also listening on {}", path.display());
                Some((listener, path.clone()))
            }
            None => None,
        };

        Ok(Self {
            tcp,
            #[cfg(unix)]
            unix,
            page: Arc::new(page),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    /// Accept connections until the task is dropped.
    pub async fn run(self) -> std::io::Result<()> {
        #[cfg(unix)]
        start_unix_acceptor(self.unix, self.page.clone());

        loop {
            match self.tcp.accept().await {
                Ok((stream, peer)) => {
                    log::debug!("Accepted TCP connection from {peer}");
                    spawn_connection(stream, self.page.clone());
                }
                Err(e) => accept_failed("TCP", &e).await,
            }
        }
    }
}

async fn accept_failed(listener: &str, e: &std::io::Error) {
    log::error!("Accept error on {listener}: {e:?}");
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

#[cfg(unix)]
fn start_unix_acceptor(unix: Option<(UnixListener, PathBuf)>, page: Arc<LivePage>) {
    let Some((listener, path)) = unix else {
        return;
    };

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => spawn_connection(stream, page.clone()),
                Err(e) => accept_failed(&path.display().to_string(), &e).await,
            }
        }
    });
}

/// Serve the default page until Ctrl-C.
pub async fn run_server(config: &Config) -> std::io::Result<()> {
    let server = Server::bind(config, LivePage::default()).await?;

    tokio::select! {
        res = server.run() => res,
        res = tokio::signal::ctrl_c() => {
            res?;
            log::info!("Server shutting down...");
            if let Some(path) = &config.socket {
                let _ = std::fs::remove_file(path);
            }
            Ok(())
        }
    }
}
