//! The reactor: a single-threaded cooperative event loop
//!
//! Interleaves the periodic player update with TCP accepts, per-client
//! reads and the interrupt signal on one thread (a tokio current-thread
//! runtime inside a `LocalSet`). Each connection gets a read task that
//! forwards raw chunks into the loop and a write task that drains an
//! outbox queue, so the loop itself never blocks on a socket.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::constants::PLAYER_UPDATE_PERIOD_MS;
use crate::error::{Error, Result};
use crate::net::connection::run_command;
use crate::player::Player;
use crate::protocol::response::{ClientId, Code, Response, ResponseSink, BROADCAST, NOREQUEST};
use crate::protocol::tokenizer::Tokenizer;

/// Events forwarded from connection tasks into the reactor loop.
enum Event {
    /// A chunk of bytes read from a client.
    Data(ClientId, Vec<u8>),
    /// The client hung up or its socket failed.
    Closed(ClientId),
}

/// Pool entry for one live client.
struct Connection {
    tokenizer: Tokenizer,
    outbox: UnboundedSender<Bytes>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Insertion-ordered sparse id → connection map with slot reuse.
///
/// Ids are 1-based; 0 is reserved for broadcasts. A freed id is handed to
/// the next new connection, and never collides with a live one.
#[derive(Default)]
struct Pool {
    slots: Vec<Option<Connection>>,
    free: Vec<ClientId>,
}

impl Pool {
    fn next_id(&mut self) -> ClientId {
        match self.free.pop() {
            Some(id) => id,
            None => {
                self.slots.push(None);
                self.slots.len()
            }
        }
    }

    fn put(&mut self, id: ClientId, conn: Connection) {
        self.slots[id - 1] = Some(conn);
    }

    fn get_mut(&mut self, id: ClientId) -> Option<&mut Connection> {
        self.slots.get_mut(id.checked_sub(1)?)?.as_mut()
    }

    fn remove(&mut self, id: ClientId) -> Option<Connection> {
        let conn = self.slots.get_mut(id.checked_sub(1)?)?.take()?;
        self.free.push(id);
        Some(conn)
    }

    fn ids(&self) -> Vec<ClientId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| i + 1))
            .collect()
    }

    fn drain(&mut self) -> Vec<Connection> {
        self.free.clear();
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
}

/// Routes responses onto connection outboxes; the reactor's
/// [`ResponseSink`] implementation.
pub(crate) struct Router {
    pool: RefCell<Pool>,
}

impl Router {
    fn new() -> Self {
        Self {
            pool: RefCell::new(Pool::default()),
        }
    }

    /// Remove a connection, stopping its reader. The writer keeps going
    /// until it has drained the outbox.
    fn drop_connection(&self, id: ClientId) {
        if let Some(conn) = self.pool.borrow_mut().remove(id) {
            conn.reader.abort();
            tracing::info!(client = id, "connection removed");
        }
    }
}

impl ResponseSink for Router {
    fn respond(&self, id: ClientId, response: &Response) {
        let mut frame = response.pack().into_bytes();
        frame.push(b'\n');
        let frame = Bytes::from(frame);

        let mut dead = Vec::new();
        {
            let mut pool = self.pool.borrow_mut();
            if id == BROADCAST {
                for cid in pool.ids() {
                    if let Some(conn) = pool.get_mut(cid) {
                        if conn.outbox.send(frame.clone()).is_err() {
                            dead.push(cid);
                        }
                    }
                }
            } else if let Some(conn) = pool.get_mut(id) {
                if conn.outbox.send(frame).is_err() {
                    dead.push(id);
                }
            }
        }

        // A closed outbox means the writer died on a socket error; a
        // failed unicast must not abort the rest of a broadcast.
        for cid in dead {
            self.drop_connection(cid);
        }
    }
}

/// The event loop. Owns the player and the connection pool.
pub struct Reactor {
    player: Player,
    router: Rc<Router>,
}

impl Reactor {
    /// Wrap a player, wiring its response sink to this reactor's pool.
    pub fn new(mut player: Player) -> Self {
        let router = Rc::new(Router::new());
        player.set_io(router.clone());
        Self { player, router }
    }

    /// Bind and serve. Blocks until quit or interrupt.
    ///
    /// Must run inside a `LocalSet` on a current-thread runtime.
    pub async fn run(&mut self, host: &str, port: u16) -> Result<()> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| Error::Net(format!("cannot listen on {host}:{port}: {e}")))?;
        tracing::info!(host, port, "listening");
        self.serve(listener).await
    }

    /// Serve an already-bound listener.
    pub async fn serve(&mut self, listener: TcpListener) -> Result<()> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let mut ticker = tokio::time::interval(Duration::from_millis(PLAYER_UPDATE_PERIOD_MS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.player.update() {
                        break;
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.accept(stream, addr, &event_tx),
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                },
                Some(event) = event_rx.recv() => self.handle_event(event),
                _ = &mut ctrl_c => {
                    tracing::info!("interrupt received");
                    break;
                }
            }
        }

        drop(listener);
        self.shutdown().await;
        Ok(())
    }

    /// Admit a new client: allocate an id, spawn its IO tasks and send
    /// it the initial state dump.
    fn accept(&mut self, stream: TcpStream, addr: SocketAddr, events: &UnboundedSender<Event>) {
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();

        let id = self.router.pool.borrow_mut().next_id();
        let reader = tokio::task::spawn_local(read_loop(id, read_half, events.clone()));
        let writer = tokio::task::spawn_local(write_loop(id, write_half, outbox_rx, events.clone()));
        self.router.pool.borrow_mut().put(
            id,
            Connection {
                tokenizer: Tokenizer::new(),
                outbox: outbox_tx,
                reader,
                writer,
            },
        );

        tracing::info!(client = id, %addr, "client connected");
        self.player.dump(id, NOREQUEST);
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Data(id, bytes) => {
                let lines = {
                    let mut pool = self.router.pool.borrow_mut();
                    match pool.get_mut(id) {
                        Some(conn) => conn.tokenizer.feed(&bytes),
                        None => return,
                    }
                };
                for line in lines {
                    tracing::debug!(client = id, ?line, "request");
                    let ack = run_command(&mut self.player, id, &line);
                    self.router.respond(id, &ack);
                }
            }
            Event::Closed(id) => self.router.drop_connection(id),
        }
    }

    /// Tell everyone goodbye, then close each connection after its
    /// pending writes have drained.
    async fn shutdown(&mut self) {
        tracing::info!("shutting down");
        self.router
            .respond(BROADCAST, &Response::new(NOREQUEST, Code::Ohai).arg("bye"));

        let connections = self.router.pool.borrow_mut().drain();
        for conn in connections {
            conn.reader.abort();
            drop(conn.outbox);
            let _ = conn.writer.await;
        }
    }
}

async fn read_loop(id: ClientId, mut read_half: OwnedReadHalf, events: UnboundedSender<Event>) {
    let mut buf = [0u8; 4096];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                let _ = events.send(Event::Closed(id));
                return;
            }
            Ok(n) => {
                if events.send(Event::Data(id, buf[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(client = id, error = %e, "read failed");
                let _ = events.send(Event::Closed(id));
                return;
            }
        }
    }
}

async fn write_loop(
    id: ClientId,
    mut write_half: OwnedWriteHalf,
    mut outbox: UnboundedReceiver<Bytes>,
    events: UnboundedSender<Event>,
) {
    while let Some(frame) = outbox.recv().await {
        if let Err(e) = write_half.write_all(&frame).await {
            tracing::debug!(client = id, error = %e, "write failed");
            let _ = events.send(Event::Closed(id));
            return;
        }
    }
    // Outbox closed: the connection is going away; flush politely.
    let _ = write_half.shutdown().await;
}
