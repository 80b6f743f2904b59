#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;

use rkv_client::{
    Command, ConnectionError, ConnectionOptions, RespValue, RkvResult, Transport,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// In-process store behind the Transport trait
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<u64>,
}

/// In-memory store with a manually advanced clock.
#[derive(Debug, Default)]
pub struct FakeStore {
    entries: Mutex<HashMap<Vec<u8>, Entry>>,
    now_ms: AtomicU64,
    abort_transactions: AtomicBool,
    out_of_memory: AtomicBool,
    wrong_type: Mutex<HashSet<Vec<u8>>>,
    ping_reply: Mutex<Option<String>>,
    transactions: AtomicUsize,
    closed: AtomicBool,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Makes every following `EXEC` return nil.
    pub fn abort_transactions(&self, abort: bool) {
        self.abort_transactions.store(abort, Ordering::SeqCst);
    }

    /// Rejects writes when they are queued, like a server over `maxmemory`.
    pub fn out_of_memory(&self, oom: bool) {
        self.out_of_memory.store(oom, Ordering::SeqCst);
    }

    /// Makes `SET` on `key` fail when it executes, as if the key held a list.
    pub fn hold_wrong_type(&self, key: &str) {
        self.wrong_type.lock().unwrap().insert(key.as_bytes().to_vec());
    }

    pub fn set_ping_reply(&self, reply: &str) {
        *self.ping_reply.lock().unwrap() = Some(reply.to_string());
    }

    pub fn put_raw(&self, key: &str, value: &[u8]) {
        self.entries.lock().unwrap().insert(
            key.as_bytes().to_vec(),
            Entry {
                value: value.to_vec(),
                expires_at: None,
            },
        );
    }

    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        let now = self.now_ms.load(Ordering::SeqCst);
        self.entries
            .lock()
            .unwrap()
            .get(key.as_bytes())
            .filter(|entry| entry.expires_at.map_or(true, |at| at > now))
            .map(|entry| entry.value.clone())
    }

    pub fn ttl_ms(&self, key: &str) -> Option<u64> {
        let now = self.now_ms.load(Ordering::SeqCst);
        self.entries
            .lock()
            .unwrap()
            .get(key.as_bytes())
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_sub(now))
    }

    pub fn transactions(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> RkvResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed.into());
        }
        Ok(())
    }

    /// Rejects commands the store does not know, as a real server does at queue time.
    fn validate(&self, args: &[Vec<u8>]) -> Option<RespValue> {
        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        match name.as_str() {
            "SET" if self.out_of_memory.load(Ordering::SeqCst) => Some(RespValue::error(
                "OOM command not allowed when used memory > 'maxmemory'.",
            )),
            "GET" | "SET" | "MGET" | "DEL" | "PING" => None,
            _ => Some(RespValue::error(&format!("ERR unknown command '{}'", name))),
        }
    }

    fn apply(&self, args: &[Vec<u8>]) -> RespValue {
        if let Some(err) = self.validate(args) {
            return err;
        }
        let now = self.now_ms.load(Ordering::SeqCst);
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));

        match String::from_utf8_lossy(&args[0]).to_ascii_uppercase().as_str() {
            "GET" => RespValue::Bulk(entries.get(&args[1]).map(|e| e.value.clone())),
            "SET" if self.wrong_type.lock().unwrap().contains(&args[1]) => RespValue::error(
                "WRONGTYPE Operation against a key holding the wrong kind of value",
            ),
            "SET" => {
                let expires_at = match args.get(3).map(|a| a.as_slice()) {
                    Some(b"PX") => {
                        let ms: u64 = String::from_utf8_lossy(&args[4]).parse().unwrap();
                        Some(now + ms)
                    }
                    _ => None,
                };
                entries.insert(
                    args[1].clone(),
                    Entry {
                        value: args[2].clone(),
                        expires_at,
                    },
                );
                RespValue::simple("OK")
            }
            "MGET" => RespValue::Array(Some(
                args[1..]
                    .iter()
                    .map(|key| RespValue::Bulk(entries.get(key).map(|e| e.value.clone())))
                    .collect(),
            )),
            "DEL" => RespValue::Integer(
                args[1..]
                    .iter()
                    .filter(|key| entries.remove(*key).is_some())
                    .count() as i64,
            ),
            _ => {
                let reply = self.ping_reply.lock().unwrap().clone();
                RespValue::Simple(reply.unwrap_or_else(|| "PONG".to_string()).into_bytes())
            }
        }
    }
}

#[async_trait]
impl Transport for FakeStore {
    async fn execute(&self, command: Command) -> RkvResult<RespValue> {
        self.check_open()?;
        Ok(self.apply(command.args()))
    }

    async fn transaction(&self, commands: Vec<Command>) -> RkvResult<RespValue> {
        self.check_open()?;
        self.transactions.fetch_add(1, Ordering::SeqCst);

        if commands.iter().any(|c| self.validate(c.args()).is_some()) {
            return Ok(RespValue::error(
                "EXECABORT Transaction discarded because of previous errors.",
            ));
        }
        if self.abort_transactions.load(Ordering::SeqCst) {
            return Ok(RespValue::Array(None));
        }
        Ok(RespValue::Array(Some(
            commands.iter().map(|c| self.apply(c.args())).collect(),
        )))
    }

    async fn shutdown(&self) -> RkvResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scripted TCP server
// ---------------------------------------------------------------------------

pub type Handler = Arc<dyn Fn(&[Vec<u8>]) -> RespValue + Send + Sync>;

/// Starts a RESP server answering each command with `handler`.
///
/// Every accepted connection gets its own thread. `MULTI`/`EXEC`/`QUIT` are
/// handled here. Queued commands are answered by `handler` while queueing and
/// the answers are returned by `EXEC`; an error while queueing discards the
/// transaction.
pub fn spawn_server(handler: Handler) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(_) => return,
            };
            let handler = Arc::clone(&handler);
            thread::spawn(move || serve(stream, handler));
        }
    });

    addr
}

fn serve(mut stream: TcpStream, handler: Handler) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let mut reader = BufReader::new(stream.try_clone().expect("clone"));
    let mut queued: Option<Vec<RespValue>> = None;
    let mut discarded = false;

    while let Ok(args) = read_command(&mut reader) {
        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        let reply = match name.as_str() {
            "QUIT" => {
                write_value(&mut stream, &RespValue::simple("OK"));
                return;
            }
            "MULTI" => {
                queued = Some(Vec::new());
                discarded = false;
                RespValue::simple("OK")
            }
            "EXEC" if queued.is_some() => {
                let replies = queued.take().unwrap_or_default();
                if discarded {
                    RespValue::error("EXECABORT Transaction discarded because of previous errors.")
                } else {
                    RespValue::Array(Some(replies))
                }
            }
            _ => match queued.as_mut() {
                Some(replies) => match handler(&args) {
                    RespValue::Error(message) => {
                        discarded = true;
                        RespValue::Error(message)
                    }
                    reply => {
                        replies.push(reply);
                        RespValue::simple("QUEUED")
                    }
                },
                None => handler(&args),
            },
        };
        write_value(&mut stream, &reply);
    }
}

/// Handler answering the handshake and `PING`, rejecting anything else.
pub fn ping_handler() -> Handler {
    Arc::new(|args: &[Vec<u8>]| match args[0].to_ascii_uppercase().as_slice() {
        b"PING" => RespValue::simple("PONG"),
        b"CLIENT" | b"AUTH" | b"SELECT" => RespValue::simple("OK"),
        _ => RespValue::error("ERR unknown command"),
    })
}

/// Records every command as a space-joined line.
pub fn recording(log: Arc<Mutex<Vec<String>>>, inner: Handler) -> Handler {
    Arc::new(move |args: &[Vec<u8>]| {
        let line = args
            .iter()
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        log.lock().unwrap().push(line);
        inner(args)
    })
}

fn write_value(stream: &mut TcpStream, value: &RespValue) {
    let mut out = Vec::new();
    value.encode(&mut out);
    let _ = stream.write_all(&out);
    let _ = stream.flush();
}

fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"))?;
    if line.first() != Some(&b'*') {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"))?;
        if line.first() != Some(&b'$') {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "missing crlf"));
        }
        args.push(data);
    }
    if args.is_empty() {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "empty command"));
    }
    Ok(args)
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<Option<()>> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Ok(None);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(Some(()))
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "digit"))
}

/// Options pointing at a scripted server, retrying quickly.
pub fn options_for(addr: &str, attempts: u32) -> ConnectionOptions {
    let (host, port) = addr.rsplit_once(':').expect("host:port");
    ConnectionOptions::single(host, port.parse().expect("port"))
        .with_retry(attempts, Duration::from_millis(10))
}

/// An address nothing listens on.
pub fn refused_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    drop(listener);
    addr
}
