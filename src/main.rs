use std::{env, process};

use log::{error, info, warn};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc::UnboundedReceiver,
};

use tourney_sync::{
    config::Config,
    repl::{self, ReplCommand, HELP},
    replica::{ClientHandle, NetworkEvent},
    sequencer::MasterHandle,
    tournament::{TournamentAction, TournamentState},
    CONFIG,
};

/// Either end of the replication, seen from the console.
enum Station {
    Master(MasterHandle<TournamentAction>),
    Client(ClientHandle<TournamentAction>),
}

impl Station {
    fn master_time_millis(&self) -> i64 {
        match self {
            Station::Master(master) => master.master_time_millis(),
            Station::Client(client) => client.master_time_millis(),
        }
    }

    fn dispatch(&self, action: TournamentAction) {
        match self {
            Station::Master(master) => master.dispatch(action),
            Station::Client(client) => client.dispatch(action),
        }
    }

    fn undo(&self) {
        match self {
            Station::Master(master) => master.undo(),
            Station::Client(client) => client.undo(),
        }
    }

    fn redo(&self) {
        match self {
            Station::Master(master) => master.redo(),
            Station::Client(client) => client.redo(),
        }
    }

    fn quit(&self) {
        match self {
            Station::Master(master) => master.quit(),
            Station::Client(client) => client.quit(),
        }
    }

    async fn state(&self) -> Option<TournamentState> {
        match self {
            Station::Master(master) => master.inspect(|_, replica| replica.state().clone()).await,
            Station::Client(client) => client.inspect(|replica| replica.state().clone()).await,
        }
    }
}

fn usage() -> ! {
    eprintln!("usage: tourney-sync server | tourney-sync client <host>");
    process::exit(2);
}

fn load_config() -> Config {
    match env::var("TOURNEY_SYNC_CONFIG") {
        Ok(path) => match Config::from_file(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("{}: {}", path, err);
                process::exit(1);
            }
        },
        Err(_) => CONFIG.clone(),
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = load_config();
    let args: Vec<String> = env::args().collect();

    let (station, thread) = match args.get(1).map(String::as_str) {
        Some("server") => {
            let address = ("0.0.0.0", config.port);
            let state = TournamentState::new("Tournament");

            match MasterHandle::bind(&config, address, state).await {
                Ok((master, events, thread)) => {
                    tokio::spawn(log_events(events));
                    (Station::Master(master), thread)
                }
                Err(err) => {
                    error!("Failed to start the sequencer: {}", err);
                    process::exit(1);
                }
            }
        }
        Some("client") => {
            let host = match args.get(2) {
                Some(host) => host.clone(),
                None => usage(),
            };
            let (client, events, thread) =
                ClientHandle::spawn(&config, TournamentState::default());
            client.connect(host.clone(), config.port);
            tokio::spawn(reconnect(client.clone(), events, host, config.clone()));

            (Station::Client(client), thread)
        }
        _ => usage(),
    };

    console(&station).await;

    station.quit();
    if let Err(err) = thread.await {
        error!("Reactor panicked: {}", err);
    }
}

async fn console(station: &Station) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", HELP);

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(err) => {
                error!("Failed to read stdin: {}", err);
                return;
            }
        };

        let command = match repl::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                println!("{}", err);
                continue;
            }
        };

        match command {
            ReplCommand::Undo => station.undo(),
            ReplCommand::Redo => station.redo(),
            ReplCommand::Show => match station.state().await {
                Some(state) => print!("{}", repl::render(&state, station.master_time_millis())),
                None => return,
            },
            ReplCommand::Help => println!("{}", HELP),
            ReplCommand::Quit => return,
            command => {
                if let Some(action) = command.to_action(station.master_time_millis()) {
                    station.dispatch(action);
                }
            }
        }
    }
}

async fn log_events(mut events: UnboundedReceiver<NetworkEvent>) {
    while let Some(event) = events.recv().await {
        info!("{:?}", event);
    }
}

/// The core never retries, the owner does.
async fn reconnect(
    client: ClientHandle<TournamentAction>,
    mut events: UnboundedReceiver<NetworkEvent>,
    host: String,
    config: Config,
) {
    while let Some(event) = events.recv().await {
        match event {
            NetworkEvent::ConnectionAttemptFailed(reason) => {
                warn!("Connection failed ({}), retrying", reason);
            }
            NetworkEvent::ConnectionLost => {
                warn!("Connection lost, retrying");
            }
            NetworkEvent::ConnectionShutdown => {
                info!("Connection shut down");
                continue;
            }
            event => {
                info!("{:?}", event);
                continue;
            }
        }

        tokio::time::sleep(config.reconnect_interval()).await;
        client.connect(host.clone(), config.port);
    }
}
