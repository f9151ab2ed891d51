use std::io::{BufReader, BufWriter, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};

use serde_json::Deserializer;
use tracing::{debug, error, info};

use crate::command::{Request, Response};
use crate::thread_pool::ThreadPool;
use crate::{KvsEngine, Result};

/// A TCP socket server over a key/value storage engine.
///
/// It listens for incoming [`Request`]s, and serves every connection on a thread from its
/// [`ThreadPool`]. Each connection receives its own handle to the [`KvsEngine`] and may send
/// any number of requests, pipelines included.
///
/// # Example
/// Serve an in-memory store on "127.0.0.1:4000" from a rayon pool of 4 threads.
/// ```rust,no_run
/// use spotswap::thread_pool::{RayonThreadPool, ThreadPool};
/// use spotswap::{KvsServer, MemoryStore};
/// # fn main() -> spotswap::Result<()> {
/// let pool = RayonThreadPool::new(4)?;
/// let server = KvsServer::new(MemoryStore::new(), pool);
/// server.run("127.0.0.1:4000")?;
/// # Ok(())
/// # }
/// ```
pub struct KvsServer<E: KvsEngine, P: ThreadPool> {
    /// the kvs engine to use
    engine: E,
    /// a pool of threads that will perform work using a handle to the engine
    pool: P,
}

impl<E: KvsEngine, P: ThreadPool> KvsServer<E, P> {
    /// Create a new `KvsServer` using the given [`KvsEngine`] and [`ThreadPool`] implementation.
    pub fn new(engine: E, pool: P) -> Self {
        KvsServer { engine, pool }
    }

    /// Binds to `addr` and serves connections until the process ends.
    ///
    /// # Errors
    /// returns an error if the address could not be bound
    pub fn run<A: ToSocketAddrs>(self, addr: A) -> Result<()> {
        self.serve_on(TcpListener::bind(addr)?)
    }

    /// Serves connections accepted from an already bound `listener`.
    pub fn serve_on(self, listener: TcpListener) -> Result<()> {
        info!("listening on {}", listener.local_addr()?);
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let engine = self.engine.clone();
                    self.pool.spawn(move || {
                        if let Err(e) = serve(engine, stream) {
                            error!("Error on serving client: {}", e);
                        }
                    });
                }
                Err(e) => error!("Connection failed: {}", e),
            }
        }
        Ok(())
    }
}

/// Reads [`Request`]s from `tcp` until the peer hangs up, answering each with a [`Response`].
fn serve<E: KvsEngine>(engine: E, tcp: TcpStream) -> Result<()> {
    let peer_addr = tcp.peer_addr()?;
    let stream_reader = BufReader::new(&tcp);
    let mut stream_writer = BufWriter::new(&tcp);
    let req_reader = Deserializer::from_reader(stream_reader).into_iter::<Request>();

    let mut send_resp = move |resp: Response| -> Result<()> {
        serde_json::to_writer(&mut stream_writer, &resp)?;
        stream_writer.flush()?;
        debug!("Response sent to {}: {:?}", peer_addr, resp);
        Ok(())
    };

    for req in req_reader {
        let req = req?;
        debug!("Receive request from {}: {:?}", peer_addr, req);

        match engine.execute(req) {
            Ok(reply) => send_resp(Response::Ok(reply))?,
            Err(e) => send_resp(Response::Err(e.to_string()))?,
        }
    }
    debug!("{} disconnected", peer_addr);
    Ok(())
}
