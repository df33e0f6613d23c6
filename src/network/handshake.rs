use log::debug;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    clock::{estimate_offset, local_time_millis},
    error::ConnectionError,
    ids::ClientId,
    wire::{read_frame, write_frame, Message, MessageType, ProtocolVersion},
};

// Handshake traffic carries no actions
type Control = Message<()>;

async fn send<S>(stream: &mut S, message: Control) -> Result<(), ConnectionError>
where
    S: AsyncWrite + Unpin,
{
    write_frame(stream, &message.to_frame()?).await?;
    Ok(())
}

async fn receive<S>(stream: &mut S, max_body_size: u64) -> Result<Control, ConnectionError>
where
    S: AsyncRead + Unpin,
{
    match read_frame(stream, max_body_size).await {
        Ok(frame) => Ok(Message::from_frame(&frame)?),
        Err(err) if err.is_eof() => Err(ConnectionError::Closed),
        Err(err) => Err(err.into()),
    }
}

fn check_version(version: ProtocolVersion) -> Result<(), ConnectionError> {
    if ProtocolVersion::CURRENT.compatible(&version) {
        Ok(())
    } else {
        Err(ConnectionError::IncompatibleVersion(version))
    }
}

fn unexpected(expected: MessageType, got: &Control) -> ConnectionError {
    ConnectionError::UnexpectedMessage {
        expected,
        got: got.message_type(),
    }
}

/// Sequencer side: greets, checks the peer's version and answers its clock
/// request. Returns the client the peer speaks for; the caller pushes `SYNC`
/// next.
pub async fn accept<S>(stream: &mut S, max_body_size: u64) -> Result<ClientId, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    send(
        stream,
        Message::Handshake {
            version: ProtocolVersion::CURRENT,
            client: None,
        },
    )
    .await?;

    let client = match receive(stream, max_body_size).await? {
        Message::Handshake { version, client } => {
            check_version(version)?;
            client.ok_or(ConnectionError::Anonymous)?
        }
        other => return Err(unexpected(MessageType::Handshake, &other)),
    };

    match receive(stream, max_body_size).await? {
        Message::ClockSyncRequest { timestamp_millis } => {
            debug!("Clock sync requested at peer time {}", timestamp_millis);
            send(
                stream,
                Message::ClockSync {
                    timestamp_millis: local_time_millis(),
                },
            )
            .await?;
            Ok(client)
        }
        other => Err(unexpected(MessageType::ClockSyncRequest, &other)),
    }
}

/// Replica side. Returns the estimated offset of the sequencer's clock.
pub async fn join<S>(
    stream: &mut S,
    client: ClientId,
    max_body_size: u64,
) -> Result<i64, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match receive(stream, max_body_size).await? {
        Message::Handshake { version, .. } => check_version(version)?,
        other => return Err(unexpected(MessageType::Handshake, &other)),
    }
    send(
        stream,
        Message::Handshake {
            version: ProtocolVersion::CURRENT,
            client: Some(client),
        },
    )
    .await?;

    let sent = local_time_millis();
    send(
        stream,
        Message::ClockSyncRequest {
            timestamp_millis: sent,
        },
    )
    .await?;

    match receive(stream, max_body_size).await? {
        Message::ClockSync { timestamp_millis } => {
            let offset = estimate_offset(sent, timestamp_millis, local_time_millis());
            debug!("Clock offset estimated at {} ms", offset);
            Ok(offset)
        }
        other => Err(unexpected(MessageType::ClockSync, &other)),
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::{accept, join};
    use crate::{
        error::ConnectionError,
        ids::ClientId,
        wire::{write_frame, Message, ProtocolVersion},
    };

    const MAX_BODY: u64 = 1 << 20;

    #[tokio::test]
    async fn handshake_then_clock_sync() {
        let (mut server, mut client) = duplex(1024);

        let (accepted, offset) = tokio::join!(
            accept(&mut server, MAX_BODY),
            join(&mut client, ClientId(42), MAX_BODY)
        );

        assert_eq!(accepted.unwrap(), ClientId(42));
        // Both ends share a clock here
        assert!(offset.unwrap().abs() < 1_000);
    }

    #[tokio::test]
    async fn incompatible_major_is_refused() {
        let (mut server, mut client) = duplex(1024);

        let future = ProtocolVersion {
            major: ProtocolVersion::CURRENT.major + 1,
            minor: 0,
        };
        let frame = Message::<()>::Handshake {
            version: future,
            client: None,
        }
        .to_frame()
        .unwrap();
        write_frame(&mut server, &frame).await.unwrap();

        match join(&mut client, ClientId(1), MAX_BODY).await {
            Err(ConnectionError::IncompatibleVersion(version)) => assert_eq!(version, future),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn replica_without_client_id_is_refused() {
        let (mut server, mut client) = duplex(1024);

        let greeting = Message::<()>::Handshake {
            version: ProtocolVersion::CURRENT,
            client: None,
        }
        .to_frame()
        .unwrap();
        write_frame(&mut client, &greeting).await.unwrap();

        assert!(matches!(
            accept(&mut server, MAX_BODY).await,
            Err(ConnectionError::Anonymous)
        ));
    }

    #[tokio::test]
    async fn peer_closing_early_is_reported() {
        let (server, mut client) = duplex(1024);
        drop(server);

        assert!(matches!(
            join(&mut client, ClientId(1), MAX_BODY).await,
            Err(ConnectionError::Closed)
        ));
    }
}
