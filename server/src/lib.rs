#![allow(clippy::collapsible_else_if)]

use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    pin::pin,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context as _, Result, ensure};
use chrono::{TimeDelta, Utc};
use derive_more::Display;
use http_body_util::{BodyExt, Limited};
use hyper::{
    Method, Request, StatusCode,
    body::{Bytes, Incoming},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::{rt::TokioIo, server::graceful::GracefulShutdown};
use kleister_core::{
    DateTimeUtc, PasteCode, PlaintextPaste,
    db::{self, SledStore},
    guard::{AbuseGuard, Decision, GuardConfig, RequestClass},
    keyring::{self, KeyRing},
    media::{self, MediaKind},
    vault::PasteVault,
};
use serde::Serialize;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    time::{MissedTickBehavior, interval, sleep, timeout},
};
use tracing::{info, warn};

use cli::Cli;
use response::{HandlerError, HttpResponse};

pub mod cli;
pub mod multipart;
pub mod pages;
pub mod response;
mod sandbox;

/// Whole-request budget, guard decision through the last response byte.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// How long open connections get to finish after a shutdown signal.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub enum Listen {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

#[derive(Debug)]
pub struct Config {
    pub listen: Listen,
    pub base_path: String,
    pub store_path: PathBuf,
    pub debug: bool,
    pub guard: GuardConfig,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        ensure!(
            cli.base_path.is_empty()
                || (cli.base_path.starts_with('/') && !cli.base_path.ends_with('/')),
            "base path must be empty, or start with '/' and not end with '/'"
        );
        let listen = match cli.socket {
            Some(path) => Listen::Unix(path),
            None => Listen::Tcp(cli.bind),
        };
        Ok(Self {
            listen,
            base_path: cli.base_path,
            store_path: cli.store_path,
            debug: cli.debug,
            guard: GuardConfig {
                rate_limit: TimeDelta::seconds(i64::from(cli.rate_limit)),
                ban_duration: TimeDelta::days(i64::from(cli.ban_days)),
            },
        })
    }
}

#[derive(Debug, Clone)]
struct Context {
    vault: Arc<PasteVault<SledStore>>,
    guard: Arc<AbuseGuard<SledStore>>,
    config: Arc<Config>,
}

pub async fn run(config: Config) -> Result<()> {
    sandbox::enter(&config)?;

    let store = SledStore::open(&config.store_path).context("failed to open the paste store")?;
    let keyring = Arc::new(KeyRing::new());
    let config = Arc::new(config);
    let ctx = Context {
        vault: Arc::new(PasteVault::new(store.clone(), Arc::clone(&keyring))),
        guard: Arc::new(AbuseGuard::new(store.clone(), config.guard)),
        config: Arc::clone(&config),
    };

    let listener = Listener::bind(&config.listen).await?;
    match &config.listen {
        Listen::Tcp(addr) => info!("listening on {addr}"),
        Listen::Unix(path) => info!("listening on {}", path.display()),
    }

    let purge_task = tokio::spawn(purge_loop(Arc::clone(&keyring)));
    let sweep_task = tokio::spawn(sweep_loop(store.clone()));

    let graceful = GracefulShutdown::new();
    let mut shutdown = pin!(shutdown_signal());
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(Accepted::Tcp(stream, peer)) => {
                    spawn_connection(&graceful, ctx.clone(), Some(peer.ip()), stream);
                }
                #[cfg(unix)]
                Ok(Accepted::Unix(stream)) => {
                    // No peer address on a unix socket; the reverse proxy
                    // in front supplies X-Forwarded-For.
                    spawn_connection(&graceful, ctx.clone(), None, stream);
                }
                Err(err) => warn!(?err, "failed to accept"),
            },
            result = &mut shutdown => {
                match result {
                    Ok(signal) => info!(%signal, "shutdown requested"),
                    Err(err) => warn!(?err, "failed to listen for shutdown signals"),
                }
                break;
            }
        }
    }

    tokio::select! {
        () = graceful.shutdown() => info!("connections drained"),
        () = sleep(SHUTDOWN_TIMEOUT) => warn!("timed out waiting for connections to close"),
    }
    purge_task.abort();
    sweep_task.abort();

    // Keys must not outlive the process. Pastes still in the store become
    // permanently unreadable, which is the intended trade.
    let wiped = keyring.wipe_all();
    info!(wiped, "wiped key ring");
    if let Err(err) = store.flush().await {
        warn!(?err, "failed to flush the store");
    }
    Ok(())
}

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

enum Accepted {
    Tcp(tokio::net::TcpStream, SocketAddr),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl Listener {
    async fn bind(listen: &Listen) -> Result<Self> {
        match listen {
            Listen::Tcp(addr) => {
                let listener = TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("failed to bind {addr}"))?;
                Ok(Self::Tcp(listener))
            }
            Listen::Unix(path) => bind_unix(path),
        }
    }

    async fn accept(&self) -> std::io::Result<Accepted> {
        match self {
            Self::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok(Accepted::Tcp(stream, peer))
            }
            #[cfg(unix)]
            Self::Unix(listener) => {
                let (stream, _addr) = listener.accept().await?;
                Ok(Accepted::Unix(stream))
            }
        }
    }
}

#[cfg(unix)]
fn bind_unix(path: &Path) -> Result<Listener> {
    use std::os::unix::fs::PermissionsExt;

    if let Err(err) = fs_err::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            return Err(err).context("failed to remove a stale socket");
        }
    }
    let listener = tokio::net::UnixListener::bind(path)
        .with_context(|| format!("failed to bind {}", path.display()))?;
    fs_err::set_permissions(path, std::fs::Permissions::from_mode(0o660))
        .context("failed to set socket permissions")?;
    Ok(Listener::Unix(listener))
}

#[cfg(not(unix))]
fn bind_unix(_path: &Path) -> Result<Listener> {
    anyhow::bail!("unix sockets are not supported on this platform");
}

fn spawn_connection<I>(graceful: &GracefulShutdown, ctx: Context, peer: Option<IpAddr>, stream: I)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |request| handle_request(ctx.clone(), peer, request));
    let conn = http1::Builder::new()
        .keep_alive(true)
        .serve_connection(TokioIo::new(stream), service);
    let conn = graceful.watch(conn);
    tokio::spawn(async move {
        if let Err(err) = conn.await {
            warn!(?err, "error while serving HTTP connection");
        }
    });
}

async fn handle_request(
    ctx: Context,
    peer: Option<IpAddr>,
    request: Request<Incoming>,
) -> Result<HttpResponse, Infallible> {
    let debug = ctx.config.debug;
    let result = match timeout(REQUEST_TIMEOUT, try_handle_request(ctx, peer, request)).await {
        Ok(result) => result,
        Err(_elapsed) => Err(HandlerError::Timeout),
    };
    Ok(result.unwrap_or_else(|err| response::error_response(&err, debug)))
}

async fn try_handle_request(
    ctx: Context,
    peer: Option<IpAddr>,
    request: Request<Incoming>,
) -> Result<HttpResponse, HandlerError> {
    let remote_addr = client_addr(peer, &request)?;
    let path = request.uri().path().to_owned();
    let rest = strip_base(&path, &ctx.config.base_path);

    let class = if request.method() == Method::POST && rest == Some("/post") {
        RequestClass::Submit
    } else {
        RequestClass::Read
    };
    let now = Utc::now();

    // The guard sees the raw path: probes for /wp-admin and friends land
    // outside the base path by definition, but must still trigger a ban
    // before any 404 is considered.
    match ctx
        .guard
        .on_request(&remote_addr, &path, class, now)
        .await?
    {
        Decision::Allowed => {}
        Decision::RateLimited {
            retry_after_seconds,
        } => {
            drain_body(request).await;
            return response::rate_limited(retry_after_seconds);
        }
        Decision::Forbidden(_reason) => {
            drain_body(request).await;
            return Ok(response::access_denied());
        }
    }

    let Some(rest) = rest else {
        drain_body(request).await;
        return Ok(response::not_found());
    };

    if request.method() == Method::GET {
        if rest == "/" {
            Ok(response::html(pages::form_page(&ctx.config.base_path)))
        } else if rest == "/robots.txt" {
            Ok(response::plain(StatusCode::OK, pages::ROBOTS_TXT))
        } else if let Some(code) = rest.strip_prefix("/attachment/") {
            serve_attachment(&ctx, code, now).await
        } else if let Some(code) = rest.strip_prefix('/') {
            serve_paste(&ctx, code, now).await
        } else {
            Ok(response::not_found())
        }
    } else if class == RequestClass::Submit {
        submit(&ctx, request, now).await
    } else {
        drain_body(request).await;
        Ok(response::not_found())
    }
}

/// TCP connections identify themselves; unix socket clients are only
/// reachable through a reverse proxy, which is trusted to fill in
/// `X-Forwarded-For`. A request with neither cannot be guarded and is
/// refused rather than waved through.
fn client_addr<B>(peer: Option<IpAddr>, request: &Request<B>) -> Result<String, HandlerError> {
    if let Some(ip) = peer {
        return Ok(ip.to_string());
    }
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(ToOwned::to_owned)
        .ok_or(HandlerError::NoClientAddr)
}

fn strip_base<'a>(path: &'a str, base_path: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(base_path)?;
    if rest.is_empty() {
        Some("/")
    } else if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

/// What a rendering frontend needs to show one paste.
#[derive(Debug, Serialize)]
pub struct RenderRecord {
    pub base_path: String,
    pub text: String,
    pub filename: String,
    pub inline_image: bool,
    pub inline_audio: bool,
    pub inline_video: bool,
    pub attachment_path: String,
}

impl RenderRecord {
    fn new(base_path: &str, paste: &PlaintextPaste, code: &PasteCode) -> Self {
        let (filename, kind, attachment_path) = match &paste.attachment {
            Some(attachment) => (
                attachment.file_name.clone(),
                media::classify(&attachment.content_type),
                format!("{base_path}/attachment/{code}"),
            ),
            None => (String::new(), None, String::new()),
        };
        Self {
            base_path: base_path.to_owned(),
            text: paste.text.clone(),
            filename,
            inline_image: kind == Some(MediaKind::Image),
            inline_audio: kind == Some(MediaKind::Audio),
            inline_video: kind == Some(MediaKind::Video),
            attachment_path,
        }
    }
}

async fn serve_paste(
    ctx: &Context,
    code: &str,
    now: DateTimeUtc,
) -> Result<HttpResponse, HandlerError> {
    let Ok(code) = code.parse::<PasteCode>() else {
        return Ok(response::not_found());
    };
    let paste = ctx.vault.open(&code, now).await?;
    let record = RenderRecord::new(&ctx.config.base_path, &paste, &code);
    Ok(response::json(serde_json::to_vec(&record)?))
}

async fn serve_attachment(
    ctx: &Context,
    code: &str,
    now: DateTimeUtc,
) -> Result<HttpResponse, HandlerError> {
    let Ok(code) = code.parse::<PasteCode>() else {
        return Ok(response::not_found());
    };
    let paste = ctx.vault.open(&code, now).await?;
    let Some(attachment) = &paste.attachment else {
        return Ok(response::not_found());
    };
    response::attachment(
        &media::response_content_type(&attachment.content_type),
        &sanitize_filename(&attachment.file_name),
        Bytes::copy_from_slice(&attachment.bytes),
    )
}

async fn submit(
    ctx: &Context,
    request: Request<Incoming>,
    now: DateTimeUtc,
) -> Result<HttpResponse, HandlerError> {
    let form = multipart::read_submit_form(request).await?;
    let code = ctx.vault.seal(&form.paste, form.ttl_seconds, now).await?;
    response::redirect_found(&format!("{}/{code}", ctx.config.base_path))
}

/// Rejected submissions still read the body, bounded, so the connection
/// stays usable for whatever the client sends next.
async fn drain_body(request: Request<Incoming>) {
    let mut body = Limited::new(request.into_body(), multipart::MAX_FORM_BYTES);
    while let Some(frame) = body.frame().await {
        if frame.is_err() {
            break;
        }
    }
}

/// Keeps the header parseable no matter what the uploader named the file.
fn sanitize_filename(file_name: &str) -> String {
    let cleaned: String = file_name
        .chars()
        .map(|symbol| match symbol {
            '"' | '\\' | '/' => '_',
            symbol if symbol.is_ascii_graphic() || symbol == ' ' => symbol,
            _ => '_',
        })
        .collect();
    if cleaned.is_empty() {
        "attachment".to_owned()
    } else {
        cleaned
    }
}

async fn purge_loop(keyring: Arc<KeyRing>) {
    let mut ticks = interval(keyring::PURGE_INTERVAL);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticks.tick().await;
        let purged = keyring.purge_expired(Utc::now());
        if purged > 0 {
            info!(purged, "purged expired keys");
        }
    }
}

async fn sweep_loop(store: SledStore) {
    let mut ticks = interval(db::SWEEP_INTERVAL);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticks.tick().await;
        match store.evict_expired(Utc::now()).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "swept expired records"),
            Err(err) => warn!(?err, "store sweep failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Display)]
enum ShutdownSignal {
    #[display("SIGINT")]
    Sigint,
    #[display("SIGTERM")]
    Sigterm,
}

async fn shutdown_signal() -> Result<ShutdownSignal> {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for SIGINT")?;
            Ok(ShutdownSignal::Sigint)
        }
        result = sigterm() => {
            result?;
            Ok(ShutdownSignal::Sigterm)
        }
    }
}

#[cfg(unix)]
async fn sigterm() -> Result<()> {
    let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to install the SIGTERM handler")?;
    signal.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn sigterm() -> Result<()> {
    std::future::pending().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use kleister_core::Attachment;

    #[test]
    fn base_path_stripping() {
        assert_eq!(strip_base("/", ""), Some("/"));
        assert_eq!(strip_base("/abc234", ""), Some("/abc234"));
        assert_eq!(strip_base("/paste", "/paste"), Some("/"));
        assert_eq!(strip_base("/paste/abc234", "/paste"), Some("/abc234"));
        assert_eq!(strip_base("/pastel/abc234", "/paste"), None);
        assert_eq!(strip_base("/other", "/paste"), None);
    }

    #[test]
    fn peer_address_wins_over_headers() {
        let request = Request::builder()
            .header("x-forwarded-for", "198.51.100.7")
            .body(())
            .unwrap();
        let peer = Some(IpAddr::from([203, 0, 113, 9]));
        assert_eq!(client_addr(peer, &request).unwrap(), "203.0.113.9");
    }

    #[test]
    fn forwarded_header_is_used_without_a_peer() {
        let request = Request::builder()
            .header("x-forwarded-for", " 198.51.100.7 , 10.0.0.1")
            .body(())
            .unwrap();
        assert_eq!(client_addr(None, &request).unwrap(), "198.51.100.7");
    }

    #[test]
    fn missing_client_address_is_refused() {
        let request = Request::builder().body(()).unwrap();
        assert!(matches!(
            client_addr(None, &request),
            Err(HandlerError::NoClientAddr)
        ));
    }

    #[test]
    fn filenames_are_safe_for_headers() {
        assert_eq!(sanitize_filename("notes.txt"), "notes.txt");
        assert_eq!(sanitize_filename("my \"file\".txt"), "my _file_.txt");
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename("r\u{e9}sum\u{e9}.pdf"), "r_sum_.pdf");
        assert_eq!(sanitize_filename(""), "attachment");
    }

    #[test]
    fn render_record_describes_the_attachment() {
        let paste = PlaintextPaste {
            text: "hello".to_owned(),
            attachment: Some(Attachment {
                file_name: "track.mp3".to_owned(),
                content_type: "audio/mpeg".to_owned(),
                bytes: vec![1, 2, 3],
            }),
        };
        let code: PasteCode = "abc234".parse().unwrap();
        let record = RenderRecord::new("/paste", &paste, &code);
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            serde_json::json!({
                "base_path": "/paste",
                "text": "hello",
                "filename": "track.mp3",
                "inline_image": false,
                "inline_audio": true,
                "inline_video": false,
                "attachment_path": "/paste/attachment/abc234",
            }),
        );
    }

    #[test]
    fn render_record_without_attachment_is_blank() {
        let paste = PlaintextPaste {
            text: "only text".to_owned(),
            attachment: None,
        };
        let code: PasteCode = "abc234".parse().unwrap();
        let record = RenderRecord::new("", &paste, &code);
        assert_eq!(record.filename, "");
        assert_eq!(record.attachment_path, "");
        assert!(!record.inline_image && !record.inline_audio && !record.inline_video);
    }

    #[test]
    fn cli_maps_into_config() {
        use clap::Parser;

        let cli = Cli::parse_from([
            "kleister-server",
            "-p",
            "0.0.0.0:8080",
            "-b",
            "/paste",
            "-r",
            "30",
            "-x",
            "7",
            "-d",
        ]);
        let config = Config::from_cli(cli).unwrap();
        assert!(matches!(
            config.listen,
            Listen::Tcp(addr) if addr.port() == 8080
        ));
        assert_eq!(config.base_path, "/paste");
        assert!(config.debug);
        assert_eq!(config.guard.rate_limit, TimeDelta::seconds(30));
        assert_eq!(config.guard.ban_duration, TimeDelta::days(7));
    }

    #[test]
    fn socket_flag_overrides_the_tcp_listener() {
        use clap::Parser;

        let cli = Cli::parse_from(["kleister-server", "-s", "/run/kleister.sock"]);
        let config = Config::from_cli(cli).unwrap();
        assert!(matches!(config.listen, Listen::Unix(path) if path.ends_with("kleister.sock")));
    }

    #[test]
    fn bad_base_paths_are_rejected() {
        use clap::Parser;

        for base in ["paste", "/paste/"] {
            let cli = Cli::parse_from(["kleister-server", "-b", base]);
            assert!(Config::from_cli(cli).is_err(), "accepted {base:?}");
        }
    }
}
