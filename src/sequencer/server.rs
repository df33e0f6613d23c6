use std::{collections::HashMap, net::SocketAddr};

use log::{debug, error, info, warn};
use tokio::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    task::JoinHandle,
};

use super::{ParticipantId, Sequencer};
use crate::{
    action::Mutation,
    clock::MasterClock,
    config::Config,
    error::ConnectionError,
    ids::{ClientActionId, ClientId},
    network::{self, ConnectionEvent},
    replica::{NetworkEvent, Replica},
    wire::Message,
};

/// Work marshalled from the owner context into the master reactor.
pub enum MasterCommand<M: Mutation> {
    Dispatch(M),
    Undo,
    UndoAction(ClientActionId),
    Redo,
    /// Resets everyone to a new state. Only the master may do this.
    Sync(M::State),
    Inspect(Box<dyn FnOnce(&Sequencer<M>, &Replica<M>) + Send>),
    Quit,
}

/// Owner-side handle on the process hosting the sequencer. The master
/// replica lives in the same reactor as the sequencer.
pub struct MasterHandle<M: Mutation> {
    commands: UnboundedSender<MasterCommand<M>>,
    local_addr: SocketAddr,
    clock: MasterClock,
}

impl<M: Mutation> Clone for MasterHandle<M> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            local_addr: self.local_addr,
            clock: self.clock.clone(),
        }
    }
}

impl<M: Mutation> MasterHandle<M> {
    pub async fn bind(
        config: &Config,
        address: impl ToSocketAddrs,
        state: M::State,
    ) -> Result<(Self, UnboundedReceiver<NetworkEvent>, JoinHandle<()>), ConnectionError> {
        let listener = TcpListener::bind(address).await?;
        let local_addr = listener.local_addr()?;

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();

        let reactor = MasterReactor::new(config.clone(), listener, state, events)?;
        info!("Sequencer listening on {}", local_addr);
        let thread = tokio::spawn(reactor.run(commands_rx));

        let handle = Self {
            commands,
            local_addr,
            // Offset stays zero, the master is the reference clock
            clock: MasterClock::new(),
        };
        Ok((handle, events_rx, thread))
    }

    fn send(&self, command: MasterCommand<M>) {
        if let Err(err) = self.commands.send(command) {
            error!("Master reactor is gone: {}", err);
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn dispatch(&self, action: M) {
        self.send(MasterCommand::Dispatch(action));
    }

    pub fn undo(&self) {
        self.send(MasterCommand::Undo);
    }

    pub fn undo_action(&self, id: ClientActionId) {
        self.send(MasterCommand::UndoAction(id));
    }

    pub fn redo(&self) {
        self.send(MasterCommand::Redo);
    }

    pub fn sync(&self, state: M::State) {
        self.send(MasterCommand::Sync(state));
    }

    pub fn quit(&self) {
        self.send(MasterCommand::Quit);
    }

    pub async fn inspect<R, F>(&self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&Sequencer<M>, &Replica<M>) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.send(MasterCommand::Inspect(Box::new(move |sequencer, replica| {
            let _ = tx.send(f(sequencer, replica));
        })));
        rx.await.ok()
    }

    pub fn clock(&self) -> &MasterClock {
        &self.clock
    }

    pub fn master_time_millis(&self) -> i64 {
        self.clock.now_millis()
    }
}

struct Connection {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

struct MasterReactor<M: Mutation> {
    sequencer: Sequencer<M>,
    replica: Replica<M>,
    /// The master replica's seat at the sequencer.
    local: ParticipantId,
    local_inbox: UnboundedReceiver<Message<M>>,

    listener: TcpListener,
    config: Config,
    events: UnboundedSender<NetworkEvent>,

    accepted: (
        UnboundedSender<(TcpStream, ClientId)>,
        UnboundedReceiver<(TcpStream, ClientId)>,
    ),
    network: (
        UnboundedSender<ConnectionEvent<ParticipantId, M>>,
        UnboundedReceiver<ConnectionEvent<ParticipantId, M>>,
    ),
    connections: HashMap<ParticipantId, Connection>,

    undo_status: (bool, bool),
}

impl<M: Mutation> MasterReactor<M> {
    fn new(
        config: Config,
        listener: TcpListener,
        state: M::State,
        events: UnboundedSender<NetworkEvent>,
    ) -> Result<Self, ConnectionError> {
        let mut sequencer = Sequencer::new(state.clone(), config.action_stack_max_size);
        let replica = Replica::new(state, config.redo_list_max_size);
        let (local_tx, local_inbox) = mpsc::unbounded_channel();
        let local = sequencer.join(local_tx, replica.client_id(), true)?;

        let mut reactor = Self {
            sequencer,
            replica,
            local,
            local_inbox,
            listener,
            config,
            events,
            accepted: mpsc::unbounded_channel(),
            network: mpsc::unbounded_channel(),
            connections: HashMap::new(),
            undo_status: (false, false),
        };
        reactor.pump();

        Ok(reactor)
    }

    async fn run(mut self, mut commands: UnboundedReceiver<MasterCommand<M>>) {
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => {
                    let command = match command {
                        Some(command) => command,
                        None => MasterCommand::Quit,
                    };
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Some(event) = self.network.1.recv() => {
                    self.handle_connection_event(event);
                }
                Some((stream, client)) = self.accepted.1.recv() => {
                    self.join(stream, client);
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, address)) => self.handshake(stream, address),
                    Err(err) => warn!("Failed to accept a connection: {}", err),
                },
            }

            self.pump();
            self.notify_undo_status();
        }

        self.shutdown().await;
    }

    fn handle_command(&mut self, command: MasterCommand<M>) -> bool {
        let result = match command {
            MasterCommand::Dispatch(action) => self.replica.dispatch(action).map(|_| ()),
            MasterCommand::Undo => self.replica.undo().map(|_| ()),
            MasterCommand::UndoAction(id) => self.replica.undo_action(id),
            MasterCommand::Redo => self.replica.redo().map(|_| ()),
            MasterCommand::Sync(state) => self.replica.sync(state),
            MasterCommand::Inspect(f) => {
                f(&self.sequencer, &self.replica);
                Ok(())
            }
            MasterCommand::Quit => return false,
        };

        if let Err(err) = result {
            error!("Master replica: {}", err);
        }
        true
    }

    /// Runs the handshake off the reactor, the stream comes back once done.
    fn handshake(&self, mut stream: TcpStream, address: SocketAddr) {
        let timeout = self.config.connect_timeout();
        let max_body_size = self.config.max_body_size;
        let accepted = self.accepted.0.clone();

        tokio::spawn(async move {
            match tokio::time::timeout(timeout, network::accept(&mut stream, max_body_size)).await
            {
                Ok(Ok(client)) => {
                    info!("Handshake with {} complete, client {}", address, client);
                    let _ = accepted.send((stream, client));
                }
                Ok(Err(err)) => warn!("Handshake with {} failed: {}", address, err),
                Err(_) => warn!("Handshake with {} timed out", address),
            }
        });
    }

    fn join(&mut self, stream: TcpStream, client: ClientId) {
        if let Err(err) = stream.set_nodelay(true) {
            debug!("Could not disable nagle: {}", err);
        }

        // Nothing the old socket still has buffered may reach the sequencer
        if let Some(previous) = self.sequencer.participant_of(client) {
            if previous == self.local {
                warn!("Client {} claims the master replica's id, refusing it", client);
                return;
            }
            info!("Client {} reconnected, dropping participant {}", client, previous);
            self.kick(previous);
        }

        let (read_half, write_half) = stream.into_split();
        let (queue, queue_rx) = mpsc::unbounded_channel();

        let id = match self.sequencer.join(queue, client, false) {
            Ok(id) => id,
            Err(err) => {
                error!("Failed to join participant: {}", err);
                return;
            }
        };

        let writer = network::spawn_writer(write_half, id, queue_rx, self.network.0.clone());
        let reader = network::spawn_reader(
            read_half,
            id,
            self.config.max_body_size,
            self.network.0.clone(),
        );
        self.connections.insert(id, Connection { reader, writer });
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent<ParticipantId, M>) {
        match event {
            ConnectionEvent::Inbound { key, message } => {
                let quit = matches!(message, Message::Quit);
                if let Err(err) = self.sequencer.handle_message(key, message) {
                    error!("Participant {}: {}, dropping it", key, err);
                    self.kick(key);
                } else if quit {
                    // The writer ends by itself once the sequencer drops its queue
                    self.connections.remove(&key);
                }
            }
            ConnectionEvent::Closed { key, error } => {
                match error {
                    Some(err) => warn!("Participant {} lost: {}", key, err),
                    None => info!("Participant {} disconnected", key),
                }
                self.kick(key);
            }
        }
    }

    fn kick(&mut self, id: ParticipantId) {
        self.sequencer.leave(id);
        if let Some(connection) = self.connections.remove(&id) {
            connection.reader.abort();
            connection.writer.abort();
        }
    }

    /// Shuttles messages between the master replica and the sequencer until
    /// neither has anything left for the other.
    fn pump(&mut self) {
        loop {
            let mut progressed = false;

            while let Ok(message) = self.local_inbox.try_recv() {
                progressed = true;
                if matches!(message, Message::Quit) {
                    continue;
                }
                if let Err(err) = self.replica.receive(message) {
                    error!("Master replica: {}", err);
                }
            }

            for message in self.replica.take_outbox() {
                progressed = true;
                if let Err(err) = self.sequencer.handle_message(self.local, message) {
                    error!("Sequencer rejected master message: {}", err);
                }
            }

            if !progressed {
                break;
            }
        }
    }

    fn notify_undo_status(&mut self) {
        let status = (self.replica.can_undo(), self.replica.can_redo());
        if status != self.undo_status {
            self.undo_status = status;
            let _ = self.events.send(NetworkEvent::UndoStatus {
                can_undo: status.0,
                can_redo: status.1,
            });
        }
    }

    /// Sends `QUIT` to everyone and waits for the writers to flush it.
    async fn shutdown(&mut self) {
        self.sequencer.quit();

        let timeout = self.config.connect_timeout();
        for (id, connection) in self.connections.drain() {
            connection.reader.abort();
            if tokio::time::timeout(timeout, connection.writer).await.is_err() {
                warn!("Participant {} did not flush before shutdown", id);
            }
        }

        info!("Sequencer stopped");
        let _ = self.events.send(NetworkEvent::ConnectionShutdown);
    }
}
