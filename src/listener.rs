//! Socket frontend: accepts connections and hands every request to the controller

use crate::config::ListenerConfig;
use crate::controller::RequestController;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;
#[cfg(unix)]
use std::path::{Path, PathBuf};
#[cfg(unix)]
use tokio::net::UnixListener;

/// Serves the controller on the configured socket until shutdown is signalled
pub struct Frontend {
    listener: ListenerConfig,
    controller: Arc<RequestController>,
    shutdown_rx: watch::Receiver<bool>,
}

/// A frontend whose socket is bound and ready to accept
pub struct BoundFrontend {
    socket: BoundSocket,
    controller: Arc<RequestController>,
    shutdown_rx: watch::Receiver<bool>,
}

enum BoundSocket {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener, PathBuf),
}

impl Frontend {
    pub fn new(
        listener: ListenerConfig,
        controller: Arc<RequestController>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            listener,
            controller,
            shutdown_rx,
        }
    }

    /// Bind the socket without accepting yet
    pub async fn bind(self) -> anyhow::Result<BoundFrontend> {
        let socket = match &self.listener {
            ListenerConfig::Tcp { .. } => {
                let addr = self
                    .listener
                    .socket_addr()
                    .ok_or_else(|| anyhow::anyhow!("Listener has no TCP address"))?
                    .map_err(|e| anyhow::anyhow!(e))?;
                let listener = TcpListener::bind(addr)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;
                BoundSocket::Tcp(listener)
            }
            #[cfg(unix)]
            ListenerConfig::Unix { path, owner, group } => {
                let listener = bind_unix(path, owner.as_deref(), group.as_deref())?;
                BoundSocket::Unix(listener, path.clone())
            }
            #[cfg(not(unix))]
            ListenerConfig::Unix { .. } => {
                anyhow::bail!("Unix socket listeners are not supported on this platform")
            }
        };

        Ok(BoundFrontend {
            socket,
            controller: self.controller,
            shutdown_rx: self.shutdown_rx,
        })
    }

    /// Bind and serve until the shutdown channel flips to `true`
    pub async fn run(self) -> anyhow::Result<()> {
        self.bind().await?.serve().await
    }
}

impl BoundFrontend {
    /// Address of a TCP listener, `None` for Unix sockets
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.socket {
            BoundSocket::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            BoundSocket::Unix(..) => None,
        }
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();

        match &self.socket {
            BoundSocket::Tcp(listener) => {
                info!(addr = %listener.local_addr()?, "Frontend listening (HTTP/1.1 and HTTP/2)");
                loop {
                    tokio::select! {
                        result = listener.accept() => {
                            match result {
                                Ok((stream, addr)) => {
                                    debug!(addr = %addr, "Accepted connection");
                                    spawn_connection(stream, Arc::clone(&self.controller));
                                }
                                Err(e) => {
                                    error!(error = %e, "Failed to accept connection");
                                }
                            }
                        }
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                info!("Frontend shutting down");
                                break;
                            }
                        }
                    }
                }
            }
            #[cfg(unix)]
            BoundSocket::Unix(listener, path) => {
                info!(path = %path.display(), "Frontend listening (HTTP/1.1 and HTTP/2)");
                loop {
                    tokio::select! {
                        result = listener.accept() => {
                            match result {
                                Ok((stream, _)) => {
                                    spawn_connection(stream, Arc::clone(&self.controller));
                                }
                                Err(e) => {
                                    error!(error = %e, "Failed to accept connection");
                                }
                            }
                        }
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                info!("Frontend shutting down");
                                break;
                            }
                        }
                    }
                }

                if let Err(e) = std::fs::remove_file(path) {
                    warn!(path = %path.display(), error = %e, "Failed to remove socket file");
                }
            }
        }

        Ok(())
    }
}

fn spawn_connection<S>(stream: S, controller: Arc<RequestController>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = serve_connection(stream, controller).await {
            debug!(error = %e, "Connection error");
        }
    });
}

async fn serve_connection<S>(stream: S, controller: Arc<RequestController>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let controller = Arc::clone(&controller);
        async move { Ok::<_, Infallible>(controller.handle(req).await) }
    });

    AutoBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

#[cfg(unix)]
fn bind_unix(path: &Path, owner: Option<&str>, group: Option<&str>) -> anyhow::Result<UnixListener> {
    // A socket file left by a previous run blocks bind; anything else is left alone
    if let Ok(metadata) = std::fs::symlink_metadata(path) {
        if !metadata.file_type().is_socket() {
            anyhow::bail!(
                "Refusing to replace '{}': it exists and is not a socket",
                path.display()
            );
        }
        std::fs::remove_file(path).map_err(|e| {
            anyhow::anyhow!("Failed to remove stale socket '{}': {}", path.display(), e)
        })?;
    }

    let listener = UnixListener::bind(path)
        .map_err(|e| anyhow::anyhow!("Failed to bind unix socket '{}': {}", path.display(), e))?;

    if owner.is_some() || group.is_some() {
        let uid = owner.map(lookup_user).transpose()?;
        let gid = group.map(lookup_group).transpose()?;
        std::os::unix::fs::chown(path, uid, gid).map_err(|e| {
            anyhow::anyhow!("Failed to change ownership of '{}': {}", path.display(), e)
        })?;
        debug!(path = %path.display(), ?uid, ?gid, "Socket ownership changed");
    }

    Ok(listener)
}

/// Initial scratch buffer for the reentrant passwd/group lookups
#[cfg(unix)]
const LOOKUP_BUFFER_SIZE: usize = 1024;
#[cfg(unix)]
const LOOKUP_BUFFER_LIMIT: usize = 1 << 20;

/// Resolve a user name or numeric uid
#[cfg(unix)]
fn lookup_user(name: &str) -> anyhow::Result<u32> {
    if let Ok(uid) = name.parse::<u32>() {
        return Ok(uid);
    }
    let c_name = std::ffi::CString::new(name)
        .map_err(|_| anyhow::anyhow!("Invalid user name '{}'", name))?;

    let mut buf: Vec<libc::c_char> = vec![0; LOOKUP_BUFFER_SIZE];
    loop {
        // SAFETY: all-zero is a valid passwd; getpwnam_r fills it and only
        // points its strings into `buf`, which outlives the read below
        let mut entry: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        let rc = unsafe {
            libc::getpwnam_r(
                c_name.as_ptr(),
                &mut entry,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };

        if rc == libc::ERANGE && buf.len() < LOOKUP_BUFFER_LIMIT {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc == libc::ENOENT || (rc == 0 && result.is_null()) {
            anyhow::bail!("Unknown user '{}'", name);
        }
        if rc != 0 {
            anyhow::bail!(
                "Failed to look up user '{}': {}",
                name,
                std::io::Error::from_raw_os_error(rc)
            );
        }
        return Ok(entry.pw_uid);
    }
}

/// Resolve a group name or numeric gid
#[cfg(unix)]
fn lookup_group(name: &str) -> anyhow::Result<u32> {
    if let Ok(gid) = name.parse::<u32>() {
        return Ok(gid);
    }
    let c_name = std::ffi::CString::new(name)
        .map_err(|_| anyhow::anyhow!("Invalid group name '{}'", name))?;

    let mut buf: Vec<libc::c_char> = vec![0; LOOKUP_BUFFER_SIZE];
    loop {
        // SAFETY: as in lookup_user, with getgrnam_r
        let mut entry: libc::group = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::group = std::ptr::null_mut();
        let rc = unsafe {
            libc::getgrnam_r(
                c_name.as_ptr(),
                &mut entry,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };

        if rc == libc::ERANGE && buf.len() < LOOKUP_BUFFER_LIMIT {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc == libc::ENOENT || (rc == 0 && result.is_null()) {
            anyhow::bail!("Unknown group '{}'", name);
        }
        if rc != 0 {
            anyhow::bail!(
                "Failed to look up group '{}': {}",
                name,
                std::io::Error::from_raw_os_error(rc)
            );
        }
        return Ok(entry.gr_gid);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_numeric_ids() {
        assert_eq!(lookup_user("1000").unwrap(), 1000);
        assert_eq!(lookup_group("33").unwrap(), 33);
    }

    #[test]
    fn test_lookup_root() {
        assert_eq!(lookup_user("root").unwrap(), 0);
    }

    #[test]
    fn test_lookup_unknown_user() {
        let err = lookup_user("no-such-user-fpmgate").unwrap_err();
        assert!(err.to_string().contains("Unknown user"));
    }

    #[test]
    fn test_lookup_root_group() {
        assert_eq!(lookup_group("root").unwrap(), 0);
    }

    #[test]
    fn test_lookup_unknown_group() {
        let err = lookup_group("no-such-group-fpmgate").unwrap_err();
        assert!(err.to_string().contains("Unknown group"));
    }

    #[tokio::test]
    async fn test_bind_unix_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        // Bound and dropped: the file stays behind, nothing listens
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let listener = bind_unix(&path, None, None).unwrap();
        assert!(std::fs::symlink_metadata(&path).unwrap().file_type().is_socket());
        drop(listener);
    }

    #[tokio::test]
    async fn test_bind_unix_keeps_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"keep me").unwrap();

        let err = bind_unix(&path, None, None).unwrap_err();
        assert!(err.to_string().contains("is not a socket"));
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }
}
