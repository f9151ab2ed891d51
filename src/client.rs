use std::fmt;
use std::io::{BufReader, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use serde_json::de::IoRead;
use serde_json::Deserializer;
use tracing::debug;

use crate::command::{Reply, Request, Response};
use crate::{KvsEngine, Result, SwapError};

/// `KvsClient` talks to a [`KvsServer`](crate::KvsServer) over a single TCP connection.
///
/// The client is itself a [`KvsEngine`], so a [`Marketplace`](crate::Marketplace) can run
/// against a remote store exactly as it runs against a local one. Clones share the connection.
/// A pipeline travels to the server as one request and comes back as one response.
///
/// Every transport failure, and every error reported by the server, surfaces as
/// [`SwapError::StoreUnavailable`].
#[derive(Clone)]
pub struct KvsClient {
    conn: Arc<Mutex<Connection>>,
}

struct Connection {
    reader: Deserializer<IoRead<BufReader<TcpStream>>>,
    writer: BufWriter<TcpStream>,
}

impl Connection {
    fn round_trip(&mut self, request: &Request) -> Result<Reply> {
        serde_json::to_writer(&mut self.writer, request).map_err(unavailable)?;
        self.writer.flush().map_err(unavailable)?;

        match Response::deserialize(&mut self.reader).map_err(unavailable)? {
            Response::Ok(reply) => Ok(reply),
            Response::Err(msg) => Err(SwapError::StoreUnavailable(msg)),
        }
    }
}

impl KvsClient {
    /// creates a client and establishes a socket connection to the server at the given `addr`
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let tcp_reader = TcpStream::connect(addr).map_err(unavailable)?;
        let tcp_writer = tcp_reader.try_clone().map_err(unavailable)?;
        debug!("connected to {:?}", tcp_reader.peer_addr().ok());

        Ok(KvsClient {
            conn: Arc::new(Mutex::new(Connection {
                reader: Deserializer::from_reader(BufReader::new(tcp_reader)),
                writer: BufWriter::new(tcp_writer),
            })),
        })
    }

    /// checks that the server answers
    pub fn ping(&self) -> Result<()> {
        match self.request(Request::Ping)? {
            Reply::Text(pong) if pong == "PONG" => Ok(()),
            other => Err(SwapError::StoreUnavailable(format!(
                "unexpected ping reply: {:?}",
                other
            ))),
        }
    }

    fn request(&self, request: Request) -> Result<Reply> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| SwapError::StoreUnavailable("connection lock poisoned".to_string()))?;
        conn.round_trip(&request)
    }
}

impl fmt::Debug for KvsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvsClient").finish_non_exhaustive()
    }
}

fn unavailable<E: fmt::Display>(e: E) -> SwapError {
    SwapError::StoreUnavailable(e.to_string())
}

impl KvsEngine for KvsClient {
    fn set(&self, key: String, value: String) -> Result<()> {
        self.request(Request::Set { key, value })?;
        Ok(())
    }

    fn get(&self, key: String) -> Result<Option<String>> {
        self.request(Request::Get { key })?.into_text()
    }

    fn remove(&self, key: String) -> Result<bool> {
        self.request(Request::Remove { key })?.into_bool()
    }

    fn set_add(&self, key: String, member: String) -> Result<bool> {
        self.request(Request::SetAdd { key, member })?.into_bool()
    }

    fn set_remove(&self, key: String, member: String) -> Result<bool> {
        self.request(Request::SetRemove { key, member })?.into_bool()
    }

    fn set_members(&self, key: String) -> Result<Vec<String>> {
        self.request(Request::SetMembers { key })?.into_members()
    }

    fn set_cardinality(&self, key: String) -> Result<u64> {
        self.request(Request::SetCard { key })?.into_int()
    }

    fn set_is_member(&self, key: String, member: String) -> Result<bool> {
        self.request(Request::SetIsMember { key, member })?.into_bool()
    }

    fn keys(&self, pattern: String) -> Result<Vec<String>> {
        self.request(Request::Keys { pattern })?.into_members()
    }

    fn compare_and_swap(
        &self,
        key: String,
        expected: Option<String>,
        value: String,
    ) -> Result<bool> {
        self.request(Request::CompareAndSwap {
            key,
            expected,
            value,
        })?
        .into_bool()
    }

    fn pipeline(&self, requests: Vec<Request>) -> Result<Vec<Reply>> {
        let sent = requests.len();
        let replies = self.request(Request::Pipeline(requests))?.into_batch()?;
        if replies.len() != sent {
            return Err(SwapError::StoreUnavailable(format!(
                "sent {} commands but received {} replies",
                sent,
                replies.len()
            )));
        }
        Ok(replies)
    }
}
