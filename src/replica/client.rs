use log::{debug, error, info, warn};
use tokio::{
    net::{lookup_host, TcpStream},
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    task::JoinHandle,
};

use super::Replica;
use crate::{
    action::Mutation,
    clock::MasterClock,
    config::Config,
    error::ConnectionError,
    ids::{ClientActionId, ClientId},
    network::{self, ConnectionEvent},
    wire::{read_frame, Message, MessageType},
};

/// Work marshalled from the owner context into the client reactor.
pub enum ClientCommand<M: Mutation> {
    Connect { host: String, port: u16 },
    Disconnect,
    Dispatch(M),
    Undo,
    UndoAction(ClientActionId),
    Redo,
    Inspect(Box<dyn FnOnce(&Replica<M>) + Send>),
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    ConnectionAttemptSucceeded,
    ConnectionAttemptFailed(String),
    ConnectionLost,
    /// The connection was closed on purpose, by either side.
    ConnectionShutdown,
    ClockSynchronized { offset_millis: i64 },
    UndoStatus { can_undo: bool, can_redo: bool },
}

/// Owner-side handle on a client reactor. Every call is queued, in order.
pub struct ClientHandle<M: Mutation> {
    commands: UnboundedSender<ClientCommand<M>>,
    clock: MasterClock,
}

impl<M: Mutation> Clone for ClientHandle<M> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<M: Mutation> ClientHandle<M> {
    /// Starts a disconnected reactor around a fresh replica of `state`.
    pub fn spawn(
        config: &Config,
        state: M::State,
    ) -> (Self, UnboundedReceiver<NetworkEvent>, JoinHandle<()>) {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let clock = MasterClock::new();

        let reactor = ClientReactor::new(
            config.clone(),
            Replica::new(state, config.redo_list_max_size),
            clock.clone(),
            events,
        );
        let thread = tokio::spawn(reactor.run(commands_rx));

        (Self { commands, clock }, events_rx, thread)
    }

    fn send(&self, command: ClientCommand<M>) {
        if let Err(err) = self.commands.send(command) {
            error!("Client reactor is gone: {}", err);
        }
    }

    pub fn connect(&self, host: impl Into<String>, port: u16) {
        self.send(ClientCommand::Connect {
            host: host.into(),
            port,
        });
    }

    pub fn disconnect(&self) {
        self.send(ClientCommand::Disconnect);
    }

    pub fn dispatch(&self, action: M) {
        self.send(ClientCommand::Dispatch(action));
    }

    pub fn undo(&self) {
        self.send(ClientCommand::Undo);
    }

    pub fn undo_action(&self, id: ClientActionId) {
        self.send(ClientCommand::UndoAction(id));
    }

    pub fn redo(&self) {
        self.send(ClientCommand::Redo);
    }

    pub fn quit(&self) {
        self.send(ClientCommand::Quit);
    }

    /// Runs `f` on the reactor, after everything queued before it.
    pub async fn inspect<R, F>(&self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&Replica<M>) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.send(ClientCommand::Inspect(Box::new(move |replica| {
            let _ = tx.send(f(replica));
        })));
        rx.await.ok()
    }

    pub fn clock(&self) -> &MasterClock {
        &self.clock
    }

    /// Local wall clock corrected by the last clock sync.
    pub fn master_time_millis(&self) -> i64 {
        self.clock.now_millis()
    }
}

struct Established<M> {
    stream: TcpStream,
    offset_millis: i64,
    sync: Message<M>,
}

enum ConnectionState<M> {
    Disconnected,
    Connecting(u64),
    Connected {
        generation: u64,
        queue: UnboundedSender<Message<M>>,
        reader: JoinHandle<()>,
        writer: JoinHandle<()>,
    },
}

type Attempt<M> = (u64, Result<Established<M>, ConnectionError>);

struct ClientReactor<M: Mutation> {
    replica: Replica<M>,
    config: Config,
    clock: MasterClock,
    events: UnboundedSender<NetworkEvent>,

    connection: ConnectionState<M>,
    /// Bumped on every attempt so late events from old sockets are dropped.
    generation: u64,
    attempts: (UnboundedSender<Attempt<M>>, UnboundedReceiver<Attempt<M>>),
    network: (
        UnboundedSender<ConnectionEvent<u64, M>>,
        UnboundedReceiver<ConnectionEvent<u64, M>>,
    ),

    undo_status: (bool, bool),
}

impl<M: Mutation> ClientReactor<M> {
    fn new(
        config: Config,
        replica: Replica<M>,
        clock: MasterClock,
        events: UnboundedSender<NetworkEvent>,
    ) -> Self {
        Self {
            replica,
            config,
            clock,
            events,
            connection: ConnectionState::Disconnected,
            generation: 0,
            attempts: mpsc::unbounded_channel(),
            network: mpsc::unbounded_channel(),
            undo_status: (false, false),
        }
    }

    async fn run(mut self, mut commands: UnboundedReceiver<ClientCommand<M>>) {
        info!("Replica {} reactor started", self.replica.client_id());

        loop {
            tokio::select! {
                biased;
                command = commands.recv() => {
                    let command = match command {
                        Some(command) => command,
                        None => ClientCommand::Quit,
                    };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Some((generation, result)) = self.attempts.1.recv() => {
                    self.handle_attempt(generation, result);
                }
                Some(event) = self.network.1.recv() => {
                    self.handle_connection_event(event);
                }
            }

            self.flush();
            self.notify_undo_status();
        }

        info!("Replica {} reactor stopped", self.replica.client_id());
    }

    async fn handle_command(&mut self, command: ClientCommand<M>) -> bool {
        let result = match command {
            ClientCommand::Connect { host, port } => {
                self.connect(host, port);
                Ok(())
            }
            ClientCommand::Disconnect => {
                self.disconnect().await;
                Ok(())
            }
            ClientCommand::Dispatch(action) => self.replica.dispatch(action).map(|_| ()),
            ClientCommand::Undo => self.replica.undo().map(|_| ()),
            ClientCommand::UndoAction(id) => self.replica.undo_action(id),
            ClientCommand::Redo => self.replica.redo().map(|_| ()),
            ClientCommand::Inspect(f) => {
                f(&self.replica);
                Ok(())
            }
            ClientCommand::Quit => {
                self.disconnect().await;
                return false;
            }
        };

        if let Err(err) = result {
            error!("Replica {}: {}", self.replica.client_id(), err);
        }
        true
    }

    fn connect(&mut self, host: String, port: u16) {
        if !matches!(self.connection, ConnectionState::Disconnected) {
            warn!("Replica {}: already connected", self.replica.client_id());
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        self.connection = ConnectionState::Connecting(generation);

        info!("Connecting to {}:{}", host, port);

        let timeout = self.config.connect_timeout();
        let max_body_size = self.config.max_body_size;
        let client_id = self.replica.client_id();
        let attempts = self.attempts.0.clone();

        tokio::spawn(async move {
            let attempt = establish(host, port, client_id, max_body_size);
            let result = match tokio::time::timeout(timeout, attempt).await {
                Ok(result) => result,
                Err(_) => Err(ConnectionError::Timeout(timeout)),
            };
            let _ = attempts.send((generation, result));
        });
    }

    /// Queues `QUIT` behind whatever is still pending, then lets the writer
    /// flush and close.
    async fn disconnect(&mut self) {
        self.generation += 1;

        match std::mem::replace(&mut self.connection, ConnectionState::Disconnected) {
            ConnectionState::Connected {
                queue,
                reader,
                writer,
                ..
            } => {
                for message in self.replica.take_outbox() {
                    let _ = queue.send(message);
                }
                let _ = queue.send(Message::Quit);
                drop(queue);
                reader.abort();

                if tokio::time::timeout(self.config.connect_timeout(), writer)
                    .await
                    .is_err()
                {
                    warn!("Timed out flushing the connection");
                }

                info!("Replica {} disconnected", self.replica.client_id());
                self.emit(NetworkEvent::ConnectionShutdown);
            }
            ConnectionState::Connecting(_) => {
                info!("Connection attempt abandoned");
            }
            ConnectionState::Disconnected => {}
        }
    }

    fn handle_attempt(&mut self, generation: u64, result: Result<Established<M>, ConnectionError>) {
        if !matches!(self.connection, ConnectionState::Connecting(current) if current == generation)
        {
            debug!("Dropping stale connection attempt {}", generation);
            return;
        }

        let Established {
            stream,
            offset_millis,
            sync,
        } = match result {
            Ok(established) => established,
            Err(err) => {
                warn!("Connection attempt failed: {}", err);
                self.connection = ConnectionState::Disconnected;
                self.emit(NetworkEvent::ConnectionAttemptFailed(err.to_string()));
                return;
            }
        };

        self.clock.set_offset_millis(offset_millis);

        let (read_half, write_half) = stream.into_split();
        let (queue, queue_rx) = mpsc::unbounded_channel();
        let reader = network::spawn_reader(
            read_half,
            generation,
            self.config.max_body_size,
            self.network.0.clone(),
        );
        let writer = network::spawn_writer(write_half, generation, queue_rx, self.network.0.clone());

        self.connection = ConnectionState::Connected {
            generation,
            queue,
            reader,
            writer,
        };

        info!("Replica {} connected", self.replica.client_id());
        self.emit(NetworkEvent::ClockSynchronized { offset_millis });
        self.emit(NetworkEvent::ConnectionAttemptSucceeded);

        if let Err(err) = self.replica.receive(sync) {
            error!("Replica {}: initial sync failed: {}", self.replica.client_id(), err);
            self.drop_connection();
            self.emit(NetworkEvent::ConnectionLost);
        }
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent<u64, M>) {
        let current = match &self.connection {
            ConnectionState::Connected { generation, .. } => Some(*generation),
            _ => None,
        };

        match event {
            ConnectionEvent::Inbound { key, message } if Some(key) == current => {
                if matches!(message, Message::Quit) {
                    info!("Sequencer closed the connection");
                    self.drop_connection();
                    self.emit(NetworkEvent::ConnectionShutdown);
                    return;
                }

                if let Err(err) = self.replica.receive(message) {
                    error!("Replica {}: {}", self.replica.client_id(), err);
                    self.drop_connection();
                    self.emit(NetworkEvent::ConnectionLost);
                }
            }
            ConnectionEvent::Closed { key, error } if Some(key) == current => {
                match error {
                    Some(err) => warn!("Connection lost: {}", err),
                    None => warn!("Connection closed by the sequencer"),
                }
                self.drop_connection();
                self.emit(NetworkEvent::ConnectionLost);
            }
            _ => debug!("Dropping event from a previous connection"),
        }
    }

    /// Abandons the socket and everything still queued on it.
    fn drop_connection(&mut self) {
        self.generation += 1;
        if let ConnectionState::Connected { reader, writer, .. } =
            std::mem::replace(&mut self.connection, ConnectionState::Disconnected)
        {
            reader.abort();
            writer.abort();
        }
    }

    /// Hands the replica's outgoing messages to the writer, or drops them
    /// while disconnected: the next `SYNC` re-sends what still matters.
    fn flush(&mut self) {
        if !self.replica.has_outgoing() {
            return;
        }

        let outgoing = self.replica.take_outbox();
        match &self.connection {
            ConnectionState::Connected { queue, .. } => {
                for message in outgoing {
                    if queue.send(message).is_err() {
                        warn!("Writer is gone, dropping outgoing messages");
                        break;
                    }
                }
            }
            _ => debug!(
                "Replica {} offline, dropping {} outgoing messages",
                self.replica.client_id(),
                outgoing.len()
            ),
        }
    }

    fn notify_undo_status(&mut self) {
        let status = (self.replica.can_undo(), self.replica.can_redo());
        if status != self.undo_status {
            self.undo_status = status;
            self.emit(NetworkEvent::UndoStatus {
                can_undo: status.0,
                can_redo: status.1,
            });
        }
    }

    fn emit(&self, event: NetworkEvent) {
        // The owner may have stopped listening, that is its business
        let _ = self.events.send(event);
    }
}

/// Resolve, connect, handshake, clock sync, then wait for the first `SYNC`.
async fn establish<M: Mutation>(
    host: String,
    port: u16,
    client_id: ClientId,
    max_body_size: u64,
) -> Result<Established<M>, ConnectionError> {
    let address = lookup_host((host.as_str(), port))
        .await
        .map_err(|err| ConnectionError::Resolve(format!("{}:{}: {}", host, port, err)))?
        .next()
        .ok_or_else(|| ConnectionError::Resolve(format!("{}:{}", host, port)))?;

    let mut stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;

    let offset_millis = network::join(&mut stream, client_id, max_body_size).await?;

    let frame = match read_frame(&mut stream, max_body_size).await {
        Ok(frame) => frame,
        Err(err) if err.is_eof() => return Err(ConnectionError::Closed),
        Err(err) => return Err(err.into()),
    };

    match Message::from_frame(&frame)? {
        sync @ Message::Sync { .. } => Ok(Established {
            stream,
            offset_millis,
            sync,
        }),
        other => Err(ConnectionError::UnexpectedMessage {
            expected: MessageType::Sync,
            got: other.message_type(),
        }),
    }
}
