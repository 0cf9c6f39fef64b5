//! Gopher relay.
//!
//! One request is fetched from a gopher server, optionally through an HTTP
//! proxy tunnel, and relayed under a synthesised HTTP head.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use logging::targets;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info};

use crate::backend::stream::StreamProducer;
use crate::backend::{OpenError, Producer, Request, ResponseHead, Service};
use crate::error::DaemonError;
use crate::status::ErrorStatus;

/// Scheme served by [`GopherService`].
pub const GOPHER_SCHEME: &str = "gopher";

/// Port used when the url names none.
pub const DEFAULT_PORT: u16 = 70;

/// Item type assumed when the url carries none.
pub const DEFAULT_ITEM_TYPE: char = '1';

/// Size of each relayed chunk.
pub const RELAY_CHUNK_LEN: usize = 4096;

/// Time allowed for each connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest proxy reply head accepted.
const MAX_PROXY_REPLY: usize = 8 * 1024;

/// Why a gopher url could not be fetched.
#[derive(Debug, thiserror::Error)]
pub enum GopherError {
    /// The url is not a usable gopher url.
    #[error("invalid gopher url '{0}'")]
    InvalidUrl(String),
    /// The host name did not resolve.
    #[error("cannot resolve {host}: {source}")]
    Resolve {
        /// Host that failed.
        host: String,
        /// Resolver failure.
        #[source]
        source: io::Error,
    },
    /// No resolved address accepted the connection.
    #[error("cannot connect to {target}: {source}")]
    Connect {
        /// `host:port` that failed.
        target: String,
        /// Last connection failure.
        #[source]
        source: io::Error,
    },
    /// The proxy refused the tunnel.
    #[error("proxy refused the tunnel: {0}")]
    ProxyRefused(String),
    /// Reading or writing the server connection failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A parsed `gopher://[<type>::]host[:port]/<selector>[?q=<query>]` url.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GopherUrl {
    item_type: char,
    host: String,
    port: u16,
    selector: String,
    search: Option<String>,
}

impl GopherUrl {
    /// Parses `url`.
    pub fn parse(url: &str) -> Result<Self, GopherError> {
        let invalid = || GopherError::InvalidUrl(url.to_owned());
        let rest = url
            .get(..9)
            .filter(|prefix| prefix.eq_ignore_ascii_case("gopher://"))
            .map(|_| &url[9..])
            .ok_or_else(invalid)?;

        let (authority, path) = match rest.find('/') {
            Some(slash) => rest.split_at(slash),
            None => (rest, "/"),
        };
        let (item_type, authority) = match authority.split_once("::") {
            Some((prefix, host)) => (prefix.chars().last().ok_or_else(invalid)?, host),
            None => (DEFAULT_ITEM_TYPE, authority),
        };
        let (host, port) = match authority.split_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
            None => (authority, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(invalid());
        }
        let (selector, search) = match path.split_once("?q=") {
            Some((selector, query)) => (selector, Some(query.to_owned())),
            None => (path, None),
        };

        Ok(Self {
            item_type,
            host: host.to_owned(),
            port,
            selector: selector.to_owned(),
            search,
        })
    }

    /// The item type character.
    pub const fn item_type(&self) -> char {
        self.item_type
    }

    /// Server host name.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Server port.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// The line sent to the server, including its CRLF.
    pub fn request_line(&self) -> String {
        match &self.search {
            Some(search) => format!("{}\t{search}\r\n", self.selector),
            None => format!("{}\r\n", self.selector),
        }
    }

    /// Content type of the reply.
    pub const fn content_type(&self) -> &'static str {
        content_type(self.item_type)
    }
}

impl fmt::Display for GopherUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{}", self.host, self.port, self.selector)
    }
}

/// Content type for a gopher item type.
pub const fn content_type(item_type: char) -> &'static str {
    match item_type {
        '0' => "text/plain; charset=UTF-8",
        'g' => "image/gif",
        'p' => "image/png",
        'h' => "text/html; charset=UTF-8",
        'X' => "text/xml; charset=UTF-8",
        '1' | '7' => "text/gopher; charset=UTF-8",
        _ => "application/octet-stream",
    }
}

/// Proxy settings carried by a request.
#[derive(Clone, Copy, Debug, Default)]
pub struct Proxy<'a> {
    /// `host:port` of the proxy.
    pub url: Option<&'a str>,
    /// Raw `CONNECT` request written to the proxy.
    pub connect: Option<&'a str>,
}

/// Connects to the first address of `host:port` that accepts.
fn connect_to(host: &str, port: u16) -> Result<TcpStream, GopherError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|source| GopherError::Resolve {
            host: host.to_owned(),
            source,
        })?
        .collect();
    let mut last = io::Error::new(io::ErrorKind::NotFound, "no addresses");
    for addr in addrs {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        match socket.connect_timeout(&addr.into(), CONNECT_TIMEOUT) {
            Ok(()) => return Ok(socket.into()),
            Err(error) => last = error,
        }
    }
    Err(GopherError::Connect {
        target: format!("{host}:{port}"),
        source: last,
    })
}

/// Splits a `host:port` proxy address.
fn proxy_target(proxy: &str) -> Result<(&str, u16), GopherError> {
    let invalid = || GopherError::InvalidUrl(proxy.to_owned());
    let (host, port) = proxy.rsplit_once(':').ok_or_else(invalid)?;
    Ok((host, port.parse().map_err(|_| invalid())?))
}

/// Opens the tunnel on `stream` and checks for a `2xx` reply.
fn open_tunnel<S: Read + Write>(stream: &mut S, request: &str) -> Result<(), GopherError> {
    stream.write_all(request.as_bytes())?;
    let mut reply = Vec::new();
    let mut buf = [0u8; 200];
    while !reply.windows(4).any(|window| window == b"\r\n\r\n") {
        let read = stream.read(&mut buf)?;
        if read == 0 || reply.len() > MAX_PROXY_REPLY {
            return Err(GopherError::ProxyRefused(
                String::from_utf8_lossy(&reply).into_owned(),
            ));
        }
        reply.extend_from_slice(&buf[..read]);
    }
    if reply.len() >= 12 && reply[9] == b'2' {
        Ok(())
    } else {
        let status = reply.split(|&byte| byte == b'\r').next().unwrap_or_default();
        Err(GopherError::ProxyRefused(
            String::from_utf8_lossy(status).into_owned(),
        ))
    }
}

/// Connects to the server for `url`, sends its request line and returns the
/// stream positioned at the start of the reply.
pub fn fetch(url: &GopherUrl, proxy: Proxy<'_>) -> Result<TcpStream, GopherError> {
    let mut stream = match proxy.url {
        Some(proxy_url) => {
            let (host, port) = proxy_target(proxy_url)?;
            connect_to(host, port)?
        }
        None => connect_to(url.host(), url.port())?,
    };
    if let Some(request) = proxy.connect {
        open_tunnel(&mut stream, request)?;
        debug!(target: targets::HELPER, "proxy tunnel established");
    }
    stream.write_all(url.request_line().as_bytes())?;
    info!(target: targets::HELPER, %url, "gopher request sent");
    Ok(stream)
}

/// Fetches `url` into the file at `output`, returning the bytes written.
pub fn download(url: &str, output: &Path) -> Result<u64, DaemonError> {
    let failed = |reason: String| DaemonError::Download {
        url: url.to_owned(),
        output: output.to_path_buf(),
        reason,
    };
    let parsed = GopherUrl::parse(url).map_err(|error| failed(error.to_string()))?;
    let mut file = File::create(output).map_err(|error| failed(error.to_string()))?;
    let mut stream =
        fetch(&parsed, Proxy::default()).map_err(|error| failed(error.to_string()))?;
    io::copy(&mut stream, &mut file).map_err(|error| failed(error.to_string()))
}

/// Serves `gopher:` urls.
#[derive(Clone, Copy, Debug, Default)]
pub struct GopherService;

impl Service for GopherService {
    fn scheme(&self) -> &'static str {
        GOPHER_SCHEME
    }

    fn open(&self, request: &Request<'_>) -> Result<Box<dyn Producer>, OpenError> {
        let url = GopherUrl::parse(request.url)
            .map_err(|error| OpenError::Rejected(error.to_string()))?;
        let proxy = Proxy {
            url: request.record.get("proxy_url"),
            connect: request.record.get("proxy_connect"),
        };
        let stream = fetch(&url, proxy).map_err(|error| ErrorStatus::internal(error.to_string()))?;
        Ok(Box::new(
            StreamProducer::new(ResponseHead::new(url.content_type()), stream)
                .with_chunk_len(RELAY_CHUNK_LEN),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Cursor};
    use std::net::TcpListener;
    use std::thread;

    mod urls {
        use super::*;

        #[test]
        fn typed_url_with_port() {
            let url = GopherUrl::parse("gopher://0::gopher.club:7070/phlogs/a.txt").unwrap();
            assert_eq!(url.item_type(), '0');
            assert_eq!(url.host(), "gopher.club");
            assert_eq!(url.port(), 7070);
            assert_eq!(url.request_line(), "/phlogs/a.txt\r\n");
            assert_eq!(url.content_type(), "text/plain; charset=UTF-8");
        }

        #[test]
        fn defaults_and_missing_selector() {
            let url = GopherUrl::parse("GOPHER://example.org").unwrap();
            assert_eq!(url.item_type(), '1');
            assert_eq!(url.port(), DEFAULT_PORT);
            assert_eq!(url.request_line(), "/\r\n");
        }

        #[test]
        fn search_query_becomes_tab() {
            let url = GopherUrl::parse("gopher://7::example.org/find?q=rust lang").unwrap();
            assert_eq!(url.request_line(), "/find\trust lang\r\n");
        }

        #[test]
        fn malformed_urls_are_rejected() {
            for bad in ["http://example.org/", "gopher://", "gopher://host:port/", "gopher://::host/"] {
                assert!(GopherUrl::parse(bad).is_err(), "{bad}");
            }
        }

        #[test]
        fn item_types_map_to_content_types() {
            assert_eq!(content_type('g'), "image/gif");
            assert_eq!(content_type('p'), "image/png");
            assert_eq!(content_type('h'), "text/html; charset=UTF-8");
            assert_eq!(content_type('X'), "text/xml; charset=UTF-8");
            assert_eq!(content_type('7'), "text/gopher; charset=UTF-8");
            assert_eq!(content_type('9'), "application/octet-stream");
        }
    }

    mod tunnel {
        use super::*;

        struct Proxy {
            reply: Cursor<Vec<u8>>,
            sent: Vec<u8>,
        }

        impl Read for Proxy {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                self.reply.read(buf)
            }
        }

        impl Write for Proxy {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.sent.extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        fn proxy(reply: &str) -> Proxy {
            Proxy {
                reply: Cursor::new(reply.as_bytes().to_vec()),
                sent: Vec::new(),
            }
        }

        #[test]
        fn success_reply_opens_tunnel() {
            let mut stream = proxy("HTTP/1.1 200 Connection established\r\n\r\n");
            open_tunnel(&mut stream, "CONNECT h:70 HTTP/1.1\r\n\r\n").unwrap();
            assert_eq!(stream.sent, b"CONNECT h:70 HTTP/1.1\r\n\r\n");
        }

        #[test]
        fn refusal_reports_status_line() {
            let mut stream = proxy("HTTP/1.1 403 Forbidden\r\n\r\n");
            match open_tunnel(&mut stream, "CONNECT h:70 HTTP/1.1\r\n\r\n") {
                Err(GopherError::ProxyRefused(status)) => {
                    assert_eq!(status, "HTTP/1.1 403 Forbidden");
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        #[test]
        fn truncated_reply_is_refused() {
            let mut stream = proxy("HTTP/1.1 200 OK\r\n");
            assert!(matches!(
                open_tunnel(&mut stream, "CONNECT"),
                Err(GopherError::ProxyRefused(_))
            ));
        }
    }

    #[test]
    fn download_writes_reply_to_file() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            reader.get_mut().write_all(b"iHello\tfake\t(NULL)\t0\r\n.\r\n").unwrap();
            line
        });

        let temp = tempfile::tempdir().unwrap();
        let output = temp.path().join("menu");
        let url = format!("gopher://127.0.0.1:{port}/menu");
        let written = download(&url, &output).unwrap();

        assert_eq!(server.join().unwrap(), "/menu\r\n");
        assert_eq!(written, 25);
        assert_eq!(
            std::fs::read(&output).unwrap(),
            b"iHello\tfake\t(NULL)\t0\r\n.\r\n"
        );
    }

    #[test]
    fn unreachable_server_is_a_download_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let temp = tempfile::tempdir().unwrap();
        let error = download(&format!("gopher://127.0.0.1:{port}/"), &temp.path().join("x"))
            .unwrap_err();
        assert!(matches!(error, DaemonError::Download { .. }));
        assert_eq!(error.exit_code(), 1);
    }
}
