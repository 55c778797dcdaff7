// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    io,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicI8, AtomicI64, AtomicU64, Ordering},
        mpsc,
    },
    time::Duration,
};

use bson::Bson;
use bytes::{BufMut, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::sleep,
};
use tokio_util::sync::CancellationToken;

use crate::{
    cfg::{
        logger::{self, Logger},
        settings::Settings,
    },
    client::{
        common::lock,
        future::QueryFuture,
        reactor::Reactor,
        registry::{Callback, Registry},
    },
    error::{Error, Result},
    models::{
        envelope::Command,
        value::{self, Reply, ResultSet, Row, Value},
    },
};

const IDLE: i8 = 0;
const CONNECTING: i8 = -1;
const CONNECTED: i8 = 1;

/// Client handle to one server endpoint.
///
/// Cheap to clone; every clone shares the same multiplexed TCP
/// connection, and arbitrary threads may issue requests through it
/// concurrently. Responses are correlated by ticket, never by arrival
/// order.
#[derive(Clone)]
pub struct Connection {
    state: Arc<ConnState>,
}

impl Connection {
    /// Builds the connection object and its reactor thread. No network
    /// I/O happens until [`start`](Self::start).
    pub fn create(settings: Settings) -> Result<Self> {
        Ok(Self {
            state: ConnState::create(settings)?,
        })
    }

    /// Parses an endpoint address, then creates and starts.
    pub fn connect(addr: &str) -> Result<Self> {
        Self::connect_with(Settings::from_addr(addr)?)
    }

    /// Creates and starts in one step.
    pub fn connect_with(settings: Settings) -> Result<Self> {
        let conn = Self::create(settings)?;
        conn.start()?;
        Ok(conn)
    }

    /// Establishes the TCP connection, bounded by the default timeout
    /// when one is configured, then runs the `login`/`use` handshake.
    ///
    /// Must not be called from a callback running on the reactor
    /// thread; the bounded wait would deadlock there, so the call is
    /// refused instead.
    pub fn start(&self) -> Result<()> {
        self.state.start()
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Sends `login`, remembering the credentials for reconnects. With
    /// `wait` the call blocks until the server acknowledges.
    pub fn login(
        &self,
        username: &str,
        password: &str,
        db: Option<&str>,
        wait: bool,
    ) -> Result<()> {
        self.state.login(username, password, db, wait)
    }

    /// Selects the database used by subsequent statements.
    pub fn use_db(&self, db: &str, wait: bool) -> Result<()> {
        self.state.use_db(db, wait)
    }

    /// Returns the server-side prepared id for `sql`, preparing on
    /// first use and serving repeats from the cache without a
    /// round-trip.
    pub fn prepare(&self, sql: &str) -> Result<i64> {
        self.state.prepare(sql)
    }

    /// Runs a statement and blocks for its result set, bounded by the
    /// default timeout. Non-empty `args` go through a prepared
    /// statement.
    pub fn execute(&self, sql: &str, args: &[Value]) -> Result<ResultSet> {
        self.state.execute(sql, args)
    }

    /// Runs a statement and hands back a future bound to its ticket.
    pub fn execute_async(&self, sql: &str, args: &[Value]) -> Result<QueryFuture> {
        self.state.execute_async(sql, args)
    }

    /// Runs a statement and delivers the outcome to `callback` instead
    /// of returning a future. With a positive default timeout the
    /// callback is failed with [`Error::Timeout`] when no response
    /// arrives in time, and the late response is then discarded.
    pub fn execute_callback<F>(&self, sql: &str, args: &[Value], callback: F) -> Result<()>
    where F: FnOnce(Result<ResultSet>) + Send + 'static {
        self.state.execute_callback(sql, args, Box::new(callback))
    }

    /// Inserts many argument rows through one prepared statement as a
    /// single request with a single acknowledgement; the server either
    /// applies or rejects the batch as a whole.
    pub fn batch_insert(&self, sql: &str, rows: &[Row]) -> Result<()> {
        self.state.batch_insert(sql, rows)
    }

    pub fn batch_insert_async(&self, sql: &str, rows: &[Row]) -> Result<QueryFuture> {
        self.state.batch_insert_async(sql, rows)
    }

    /// Tears the connection down: outstanding synchronous waiters wake
    /// with `ConnectionLost`, callbacks and the prepared cache are
    /// cleared. Idempotent.
    pub fn close(&self) {
        self.state.shutdown("connection closed");
    }

    /// Replaces the diagnostics sink.
    pub fn set_logger(&self, logger: Arc<dyn Logger>) {
        self.state.set_logger(logger);
    }

    /// Sets the reconnect delay in seconds; `0` disables.
    pub fn set_auto_reconnect(&self, secs: u64) {
        self.state.auto_reconnect.store(secs, Ordering::SeqCst);
    }
}

/// Credentials replayed by the reconnect handshake.
#[derive(Clone, Default)]
struct Credentials {
    username: String,
    password: String,
    db: String,
}

/// Outbound coalescing buffers. Frames accumulate in `pending` while
/// at most one chunk is being written to the socket.
#[derive(Default)]
struct Outbox {
    pending: BytesMut,
    in_flight: bool,
}

pub(crate) struct ConnState {
    settings: Settings,
    creds: Mutex<Credentials>,
    auto_reconnect: AtomicU64,
    connected: AtomicI8,
    ticket_counter: AtomicI64,
    registry: Registry,
    outbox: Mutex<Outbox>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    /// Cancelled to stop the read loop and any in-flight write of the
    /// current socket; replaced on every (re)connect.
    session: Mutex<CancellationToken>,
    reactor: Reactor,
    logger: Mutex<Arc<dyn Logger>>,
}

impl ConnState {
    fn create(settings: Settings) -> Result<Arc<Self>> {
        let reactor = Reactor::spawn("tickdb-reactor")?;
        Ok(Arc::new(Self {
            creds: Mutex::new(Credentials {
                username: settings.username.clone(),
                password: settings.password.clone(),
                db: settings.db.clone(),
            }),
            auto_reconnect: AtomicU64::new(settings.auto_reconnect),
            connected: AtomicI8::new(IDLE),
            ticket_counter: AtomicI64::new(0),
            registry: Registry::default(),
            outbox: Mutex::new(Outbox::default()),
            writer: Mutex::new(None),
            session: Mutex::new(CancellationToken::new()),
            reactor,
            logger: Mutex::new(logger::default_logger()),
            settings,
        }))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) == CONNECTED
    }

    fn next_ticket(&self) -> i64 {
        self.ticket_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn wait_reply(&self, ticket: i64, timeout: f64) -> Result<Reply> {
        self.registry.wait(ticket, timeout)
    }

    fn default_timeout(&self) -> f64 {
        self.settings.default_timeout as f64
    }

    fn start(self: &Arc<Self>) -> Result<()> {
        if self.reactor.on_reactor_thread() {
            return Err(Error::ConnectFailed(
                "start must not be called from the reactor thread".into(),
            ));
        }
        if self
            .connected
            .compare_exchange(IDLE, CONNECTING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        self.log_info("connecting");
        let host = self.settings.host.clone();
        let port = self.settings.port;
        let (tx, rx) = mpsc::channel();
        self.reactor.handle().spawn(async move {
            let _ = tx.send(TcpStream::connect((host.as_str(), port)).await);
        });
        let connected = if self.settings.default_timeout > 0 {
            rx.recv_timeout(Duration::from_secs(self.settings.default_timeout))
                .unwrap_or_else(|_| {
                    Err(io::Error::new(io::ErrorKind::TimedOut, "connect timeout"))
                })
        } else {
            rx.recv()
                .unwrap_or_else(|_| Err(io::Error::other("reactor stopped")))
        };
        let stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                self.shutdown("connection closed");
                self.log_error(&format!("failed to connect: {e}"));
                return Err(Error::ConnectFailed(e.to_string()));
            },
        };
        if let Err(e) = self.after_connected(stream, true) {
            self.shutdown("connection closed");
            self.log_error(&format!("failed to connect: {e}"));
            return Err(e);
        }
        Ok(())
    }

    /// Socket is live: install the write half, spawn the read loop,
    /// run the `login`/`use` handshake. The handshake blocks in the
    /// start path and is fire-and-forget on reconnect.
    fn after_connected(self: &Arc<Self>, stream: TcpStream, sync: bool) -> Result<()> {
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        let session = CancellationToken::new();
        *lock(&self.session) = session.clone();
        *lock(&self.writer) = Some(write_half);
        {
            let mut outbox = lock(&self.outbox);
            outbox.pending.clear();
            outbox.in_flight = false;
        }
        self.registry.revive();
        self.connected.store(CONNECTED, Ordering::SeqCst);
        self.reactor
            .handle()
            .spawn(read_loop(read_half, Arc::downgrade(self), session));
        let creds = lock(&self.creds).clone();
        if !creds.username.is_empty() {
            let db = (!creds.db.is_empty()).then_some(creds.db.as_str());
            self.login(&creds.username, &creds.password, db, sync)?;
        } else if !creds.db.is_empty() {
            self.use_db(&creds.db, sync)?;
        }
        self.log_info("connected");
        Ok(())
    }

    /// Transitions out of `Connected`, waking every synchronous waiter
    /// with `ConnectionLost`. Safe from any thread; the socket cleanup
    /// itself runs on the reactor.
    fn shutdown(self: &Arc<Self>, reason: &str) {
        if self.connected.swap(IDLE, Ordering::SeqCst) == IDLE {
            return;
        }
        self.registry.fail_all(reason);
        let conn = Arc::clone(self);
        self.reactor.handle().spawn(async move {
            conn.teardown().await;
        });
    }

    async fn teardown(self: Arc<Self>) {
        lock(&self.session).cancel();
        let writer = lock(&self.writer).take();
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
        }
        {
            let mut outbox = lock(&self.outbox);
            outbox.pending.clear();
            outbox.in_flight = false;
        }
        self.registry.clear();
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let delay = self.auto_reconnect.load(Ordering::SeqCst);
        if delay == 0 {
            return;
        }
        let conn = Arc::downgrade(self);
        self.reactor.handle().spawn(async move {
            sleep(Duration::from_secs(delay)).await;
            let Some(conn) = conn.upgrade() else { return };
            conn.reconnect().await;
        });
    }

    /// Reconnect attempt driven entirely by the reactor. Failures
    /// reschedule through the same timer.
    async fn reconnect(self: Arc<Self>) {
        if self
            .connected
            .compare_exchange(IDLE, CONNECTING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.log_info("trying reconnect");
        let attempt = TcpStream::connect((self.settings.host.as_str(), self.settings.port))
            .await
            .map_err(Error::from)
            .and_then(|stream| self.after_connected(stream, false));
        if let Err(e) = attempt {
            self.log_error(&format!("failed to connect: {e}"));
            self.connected.store(IDLE, Ordering::SeqCst);
            self.schedule_reconnect();
        }
    }

    /// Frames and queues one message. The reactor appends it to the
    /// pending outbox and keeps at most one write outstanding, so
    /// bursts of small requests coalesce into few large writes.
    fn send_frame(self: &Arc<Self>, payload: Vec<u8>) {
        let conn = Arc::clone(self);
        self.reactor.handle().spawn(async move {
            let drain = {
                let mut outbox = lock(&conn.outbox);
                outbox.pending.put_u32_le(payload.len() as u32);
                outbox.pending.extend_from_slice(&payload);
                if outbox.in_flight {
                    false
                } else {
                    outbox.in_flight = true;
                    true
                }
            };
            if drain {
                conn.drain_outbox().await;
            }
        });
    }

    /// Swap-on-idle write cycle: takes whatever accumulated in the
    /// pending buffer, writes it as one chunk, repeats until the
    /// pending buffer stays empty.
    async fn drain_outbox(self: &Arc<Self>) {
        loop {
            let session = lock(&self.session).clone();
            if session.is_cancelled() {
                lock(&self.outbox).in_flight = false;
                return;
            }
            let chunk = {
                let mut outbox = lock(&self.outbox);
                if outbox.pending.is_empty() {
                    outbox.in_flight = false;
                    return;
                }
                outbox.pending.split()
            };
            let Some(mut writer) = lock(&self.writer).take() else {
                lock(&self.outbox).in_flight = false;
                return;
            };
            let written = tokio::select! {
                biased;
                _ = session.cancelled() => {
                    // teardown mid-write; dropping the half closes the socket
                    lock(&self.outbox).in_flight = false;
                    return;
                },
                written = writer.write_all(&chunk) => written,
            };
            match written {
                Ok(()) => {
                    *lock(&self.writer) = Some(writer);
                },
                Err(e) => {
                    lock(&self.outbox).in_flight = false;
                    self.log_error(&format!("failed to send message: {e}"));
                    self.shutdown(&e.to_string());
                    return;
                },
            }
        }
    }

    /// Encodes and queues one envelope; refused while not connected so
    /// the caller fails fast instead of waiting out a timeout.
    fn send_command(self: &Arc<Self>, command: Command<'_>, ticket: i64) -> Result<()> {
        self.send_payload(command.encode(ticket)?)
    }

    fn send_payload(self: &Arc<Self>, payload: Vec<u8>) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.send_frame(payload);
        Ok(())
    }

    fn login(
        self: &Arc<Self>,
        username: &str,
        password: &str,
        db: Option<&str>,
        wait: bool,
    ) -> Result<()> {
        let mut credentials = format!("{username} {password}");
        {
            let mut creds = lock(&self.creds);
            creds.username = username.to_string();
            creds.password = password.to_string();
            if let Some(db) = db {
                creds.db = db.to_string();
            }
        }
        if let Some(db) = db {
            credentials.push(' ');
            credentials.push_str(db);
        }
        let ticket = self.next_ticket();
        self.send_command(
            Command::Login {
                credentials: &credentials,
            },
            ticket,
        )?;
        if wait {
            self.registry.wait(ticket, self.default_timeout())?;
        }
        Ok(())
    }

    fn use_db(self: &Arc<Self>, db: &str, wait: bool) -> Result<()> {
        lock(&self.creds).db = db.to_string();
        let ticket = self.next_ticket();
        self.send_command(Command::Use { db }, ticket)?;
        if wait {
            self.registry.wait(ticket, self.default_timeout())?;
        }
        Ok(())
    }

    fn prepare(self: &Arc<Self>, sql: &str) -> Result<i64> {
        if let Some(id) = self.registry.prepared_id(sql) {
            return Ok(id);
        }
        let ticket = self.next_ticket();
        self.send_command(Command::Prepare { sql }, ticket)?;
        match self.registry.wait(ticket, 0.0)? {
            Reply::Scalar(Value::I64(id)) => {
                self.registry.cache_prepared(sql, id);
                Ok(id)
            },
            other => Err(Error::Decode(format!(
                "prepare reply is not an id: {other:?}"
            ))),
        }
    }

    /// Encodes a `run` envelope, routing non-empty argument lists
    /// through a prepared statement.
    fn run_command(self: &Arc<Self>, sql: &str, args: &[Value]) -> Result<(i64, Vec<u8>)> {
        if args.is_empty() {
            let ticket = self.next_ticket();
            let payload = Command::RunSql {
                sql,
                args: Bson::Array(Vec::new()),
            }
            .encode(ticket)?;
            return Ok((ticket, payload));
        }
        let prepared = self.prepare(sql)?;
        let args = value::encode_args(args);
        let ticket = self.next_ticket();
        let payload = Command::RunPrepared { prepared, args }.encode(ticket)?;
        Ok((ticket, payload))
    }

    fn execute(self: &Arc<Self>, sql: &str, args: &[Value]) -> Result<ResultSet> {
        self.execute_async(sql, args)?.get(self.default_timeout())
    }

    fn execute_async(self: &Arc<Self>, sql: &str, args: &[Value]) -> Result<QueryFuture> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let (ticket, payload) = self.run_command(sql, args)?;
        self.send_payload(payload)?;
        Ok(QueryFuture::new(ticket, Arc::clone(self)))
    }

    fn execute_callback(
        self: &Arc<Self>,
        sql: &str,
        args: &[Value],
        callback: Callback,
    ) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let (ticket, payload) = self.run_command(sql, args)?;
        // registered before the bytes hit the wire so a fast response
        // cannot slip past the registry
        self.registry.register_callback(ticket, callback);
        if let Err(e) = self.send_payload(payload) {
            self.registry.remove_callback(ticket);
            return Err(e);
        }
        let secs = self.settings.default_timeout;
        if secs > 0 {
            let conn = Arc::downgrade(self);
            self.reactor.handle().spawn(async move {
                sleep(Duration::from_secs(secs)).await;
                let Some(conn) = conn.upgrade() else { return };
                if let Some(callback) = conn.registry.take_expired(ticket) {
                    callback(Err(Error::Timeout));
                }
            });
        }
        Ok(())
    }

    fn batch_insert(self: &Arc<Self>, sql: &str, rows: &[Row]) -> Result<()> {
        self.batch_insert_async(sql, rows)?
            .get(self.default_timeout())
            .map(|_| ())
    }

    fn batch_insert_async(self: &Arc<Self>, sql: &str, rows: &[Row]) -> Result<QueryFuture> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let prepared = self.prepare(sql)?;
        let rows = Bson::Array(
            rows.iter()
                .map(|row| value::encode_args(row.as_slice()))
                .collect(),
        );
        let ticket = self.next_ticket();
        self.send_command(Command::Batch { prepared, rows }, ticket)?;
        Ok(QueryFuture::new(ticket, Arc::clone(self)))
    }

    fn set_logger(&self, logger: Arc<dyn Logger>) {
        *lock(&self.logger) = logger;
    }

    fn log_info(&self, msg: &str) {
        let logger = Arc::clone(&*lock(&self.logger));
        logger.info(msg);
    }

    fn log_error(&self, msg: &str) {
        let logger = Arc::clone(&*lock(&self.logger));
        logger.error(msg);
    }
}

impl Drop for ConnState {
    fn drop(&mut self) {
        lock(&self.session).cancel();
        self.reactor.stop();
    }
}

/// Reactor-side read loop: 4-byte little-endian length, then that many
/// bytes of BSON. Zero-length frames are keep-alives; a single `'H'`
/// byte is a heartbeat request answered with an empty frame.
async fn read_loop(mut read: OwnedReadHalf, conn: Weak<ConnState>, session: CancellationToken) {
    let mut head = [0u8; 4];
    loop {
        let res = tokio::select! {
            _ = session.cancelled() => return,
            res = read.read_exact(&mut head) => res,
        };
        if let Err(e) = res {
            read_failed(&conn, &session, &e);
            return;
        }
        let len = u32::from_le_bytes(head) as usize;
        if len == 0 {
            continue;
        }
        let mut body = vec![0u8; len];
        let res = tokio::select! {
            _ = session.cancelled() => return,
            res = read.read_exact(&mut body) => res,
        };
        if let Err(e) = res {
            read_failed(&conn, &session, &e);
            return;
        }
        let Some(conn) = conn.upgrade() else { return };
        if len == 1 && body[0] == b'H' {
            conn.send_frame(Vec::new());
            continue;
        }
        match crate::models::envelope::parse_response(&body) {
            Ok((ticket, reply)) => conn.registry.notify(ticket, reply),
            // no ticket to correlate; the frame is dropped and reading resumes
            Err(e) => conn.log_error(&format!("dropping frame: {e}")),
        }
    }
}

fn read_failed(conn: &Weak<ConnState>, session: &CancellationToken, err: &io::Error) {
    if session.is_cancelled() {
        return;
    }
    if let Some(conn) = conn.upgrade() {
        conn.log_error(&format!("connection closed: {err}"));
        conn.shutdown(&err.to_string());
    }
}
