use log::{debug, warn};
use serde::{de::DeserializeOwned, Serialize};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

use crate::wire::{read_frame, write_frame, Message, WireError};

/// What the socket tasks report back to the reactor owning the connection.
/// `key` tells the reactor which connection it came from.
#[derive(Debug)]
pub enum ConnectionEvent<K, M> {
    Inbound { key: K, message: Message<M> },
    /// `error` is `None` when the peer closed the stream cleanly.
    Closed { key: K, error: Option<WireError> },
}

/// Reads frames until the stream ends, the peer says `QUIT`, or the reactor
/// stops listening.
pub fn spawn_reader<R, K, M>(
    mut reader: R,
    key: K,
    max_body_size: u64,
    events: UnboundedSender<ConnectionEvent<K, M>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    K: Copy + Send + 'static,
    M: Serialize + DeserializeOwned + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let frame = match read_frame(&mut reader, max_body_size).await {
                Ok(frame) => frame,
                Err(err) => {
                    let error = if err.is_eof() { None } else { Some(err) };
                    let _ = events.send(ConnectionEvent::Closed { key, error });
                    return;
                }
            };

            let message = match Message::from_frame(&frame) {
                Ok(message) => message,
                Err(err) => {
                    warn!("Dropping connection on undecodable {:?}", frame.message_type());
                    let _ = events.send(ConnectionEvent::Closed {
                        key,
                        error: Some(err),
                    });
                    return;
                }
            };

            let quit = matches!(message, Message::Quit);
            if events.send(ConnectionEvent::Inbound { key, message }).is_err() || quit {
                return;
            }
        }
    })
}

/// Writes queued messages one at a time, in order. Stops after `QUIT` or
/// when the queue is dropped, closing the write half either way.
pub fn spawn_writer<W, K, M>(
    mut writer: W,
    key: K,
    mut queue: UnboundedReceiver<Message<M>>,
    events: UnboundedSender<ConnectionEvent<K, M>>,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
    K: Copy + Send + 'static,
    M: Serialize + DeserializeOwned + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(message) = queue.recv().await {
            let quit = matches!(message, Message::Quit);

            let result = match message.to_frame() {
                Ok(frame) => write_frame(&mut writer, &frame).await,
                Err(err) => Err(err),
            };

            if let Err(err) = result {
                // Everything still queued is abandoned with the connection
                let _ = events.send(ConnectionEvent::Closed {
                    key,
                    error: Some(err),
                });
                return;
            }

            if quit {
                debug!("Quit flushed, closing write half");
                break;
            }
        }

        let _ = writer.shutdown().await;
    })
}

#[cfg(test)]
mod tests {
    use tokio::{io::duplex, sync::mpsc};

    use super::{spawn_reader, spawn_writer, ConnectionEvent};
    use crate::{
        ids::{ActionId, ClientActionId, ClientId},
        wire::Message,
    };

    #[tokio::test]
    async fn messages_cross_in_order_until_quit() {
        let (near, far) = duplex(64);
        let (queue, queue_rx) = mpsc::unbounded_channel::<Message<u32>>();
        let (events, mut events_rx) = mpsc::unbounded_channel::<ConnectionEvent<u8, u32>>();
        let (writer_events, mut writer_events_rx) =
            mpsc::unbounded_channel::<ConnectionEvent<u8, u32>>();

        let writer = spawn_writer(near, 0u8, queue_rx, writer_events);
        let reader = spawn_reader(far, 1u8, 1 << 16, events);

        let ids: Vec<_> = (0..20)
            .map(|i| ClientActionId::new(ClientId(7), ActionId(i)))
            .collect();
        for (i, id) in ids.iter().enumerate() {
            queue
                .send(Message::Action {
                    id: *id,
                    action: i as u32,
                })
                .unwrap();
        }
        queue.send(Message::Quit).unwrap();

        for (i, id) in ids.iter().enumerate() {
            match events_rx.recv().await {
                Some(ConnectionEvent::Inbound {
                    key: 1,
                    message: Message::Action { id: got, action },
                }) => {
                    assert_eq!(got, *id);
                    assert_eq!(action, i as u32);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(matches!(
            events_rx.recv().await,
            Some(ConnectionEvent::Inbound {
                message: Message::Quit,
                ..
            })
        ));

        writer.await.unwrap();
        reader.await.unwrap();
        assert!(writer_events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn clean_close_has_no_error() {
        let (near, far) = duplex(64);
        let (events, mut events_rx) = mpsc::unbounded_channel::<ConnectionEvent<u8, u32>>();

        let reader = spawn_reader(far, 3u8, 1 << 16, events);
        drop(near);

        assert!(matches!(
            events_rx.recv().await,
            Some(ConnectionEvent::Closed {
                key: 3,
                error: None
            })
        ));
        reader.await.unwrap();
    }
}
