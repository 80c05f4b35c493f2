//! AMQP 1.0 adapters: queue receiver (the relay input) and one-shot sender
//! (the test publisher).
//!
//! One connection, one session, one link per consumption context. No
//! reconnect inside this module; see [`Relay`](crate::app::Relay).

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use fe2o3_amqp::connection::ConnectionHandle;
use fe2o3_amqp::link::receiver::CreditMode;
use fe2o3_amqp::session::SessionHandle;
use fe2o3_amqp::types::definitions::Error as AmqpError;
use fe2o3_amqp::types::messaging::{AmqpValue, Body, Message, Outcome};
use fe2o3_amqp::types::primitives::{Binary, Value};
use fe2o3_amqp::{Connection, Delivery, Receiver, Sender, Session};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::domain::{AckError, ConnectError, InboundMessage, PublishError, ReceiveError};
use crate::ports::{MessageSource, Publisher, SourceConnector};

/// Link credit granted to the broker. One message is in flight at a time, so
/// nothing queues up in the client while the current one is forwarded.
const RECEIVER_CREDIT: u32 = 1;

fn receiver_credit() -> CreditMode {
    CreditMode::Auto(RECEIVER_CREDIT)
}

/// Connection and session shared by the receiver and the sender.
struct Link {
    name: String,
    connection: ConnectionHandle<()>,
    session: SessionHandle<()>,
}

impl Link {
    async fn open(url: &str) -> Result<Self, ConnectError> {
        let name = format!("relay-{}", Ulid::new());
        let mut connection = Connection::open(name.clone(), url)
            .await
            .map_err(|e| ConnectError::Connection {
                endpoint: url.to_string(),
                reason: e.to_string(),
            })?;

        let session = match Session::begin(&mut connection).await {
            Ok(session) => session,
            Err(e) => {
                let _ = connection.close().await;
                return Err(ConnectError::Session {
                    reason: e.to_string(),
                });
            }
        };

        Ok(Self {
            name,
            connection,
            session,
        })
    }

    async fn close(mut self) {
        if let Err(e) = self.session.end().await {
            warn!(error = %e, "failed to end broker session");
        }
        if let Err(e) = self.connection.close().await {
            warn!(error = %e, "failed to close broker connection");
        }
    }
}

/// Opens [`AmqpSource`]s on `queue` at `url`.
#[derive(Debug, Clone)]
pub struct AmqpConnector {
    url: String,
    queue: String,
}

impl AmqpConnector {
    pub fn new(url: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            queue: queue.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

#[async_trait]
impl SourceConnector for AmqpConnector {
    type Source = AmqpSource;

    async fn connect(&self) -> Result<AmqpSource, ConnectError> {
        info!(url = %self.url, "connecting to broker");
        let mut link = Link::open(&self.url).await?;

        let link_name = format!("{}-receiver", link.name);
        let attached = Receiver::builder()
            .name(link_name)
            .source(self.queue.as_str())
            .credit_mode(receiver_credit())
            .attach(&mut link.session)
            .await;
        let receiver = match attached {
            Ok(receiver) => receiver,
            Err(e) => {
                link.close().await;
                return Err(ConnectError::Receiver {
                    queue: self.queue.clone(),
                    reason: e.to_string(),
                });
            }
        };

        info!(queue = %self.queue, credit = RECEIVER_CREDIT, "receiver attached, waiting for messages");
        Ok(AmqpSource {
            link,
            receiver,
            queue: self.queue.clone(),
            next_seq: 0,
        })
    }
}

/// Delivery kept until the message is settled.
pub struct AmqpAck {
    seq: u64,
    delivery: Delivery<Body<Value>>,
}

pub struct AmqpSource {
    link: Link,
    receiver: Receiver,
    queue: String,
    next_seq: u64,
}

/// Flatten a message body into the bytes forwarded downstream.
///
/// `data` sections are concatenated, string and binary values are taken as
/// is, any other value is rendered with `Debug`.
fn body_bytes(body: &Body<Value>) -> Bytes {
    match body {
        Body::Data(sections) => concat_sections(sections.iter().map(|data| &data.0[..])),
        Body::Value(AmqpValue(Value::String(s))) => Bytes::copy_from_slice(s.as_bytes()),
        Body::Value(AmqpValue(Value::Binary(b))) => Bytes::copy_from_slice(b),
        Body::Value(AmqpValue(other)) => Bytes::from(format!("{other:?}")),
        Body::Empty => Bytes::new(),
        other => Bytes::from(format!("{other:?}")),
    }
}

fn concat_sections<'a>(sections: impl IntoIterator<Item = &'a [u8]>) -> Bytes {
    let mut buf = BytesMut::new();
    for section in sections {
        buf.extend_from_slice(section);
    }
    buf.freeze()
}

#[async_trait]
impl MessageSource for AmqpSource {
    type Ack = AmqpAck;

    async fn receive_next(&mut self) -> Result<InboundMessage<AmqpAck>, ReceiveError> {
        let delivery = self
            .receiver
            .recv::<Body<Value>>()
            .await
            .map_err(|e| ReceiveError::Link(e.to_string()))?;

        self.next_seq += 1;
        let seq = self.next_seq;
        let payload = body_bytes(delivery.body());
        Ok(InboundMessage::new(seq, payload, AmqpAck { seq, delivery }))
    }

    async fn acknowledge(&mut self, ack: AmqpAck) -> Result<(), AckError> {
        self.receiver
            .accept(&ack.delivery)
            .await
            .map(|_| ())
            .map_err(|e| AckError::Disposition {
                seq: ack.seq,
                reason: e.to_string(),
            })
    }

    async fn reject(&mut self, ack: AmqpAck) -> Result<(), AckError> {
        self.receiver
            .reject(&ack.delivery, None::<AmqpError>)
            .await
            .map(|_| ())
            .map_err(|e| AckError::Disposition {
                seq: ack.seq,
                reason: e.to_string(),
            })
    }

    async fn close(self) {
        debug!(queue = %self.queue, "closing receiver");
        if let Err(e) = self.receiver.close().await {
            warn!(error = %e, "failed to detach receiver");
        }
        self.link.close().await;
    }
}

/// Sends single messages to an address. Used by the `publish` command.
#[derive(Debug, Clone)]
pub struct AmqpPublisher {
    url: String,
    address: String,
}

impl AmqpPublisher {
    pub fn new(url: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            address: address.into(),
        }
    }
}

#[async_trait]
impl Publisher for AmqpPublisher {
    /// Dial, send `body` as one `data` section, wait for the outcome, close.
    async fn publish(&self, body: Vec<u8>) -> Result<(), PublishError> {
        let mut link = Link::open(&self.url).await?;

        let link_name = format!("{}-sender", link.name);
        let mut sender =
            match Sender::attach(&mut link.session, link_name, self.address.as_str()).await {
                Ok(sender) => sender,
                Err(e) => {
                    link.close().await;
                    return Err(ConnectError::Sender {
                        address: self.address.clone(),
                        reason: e.to_string(),
                    }
                    .into());
                }
            };

        let message = Message::builder().data(Binary::from(body)).build();
        let outcome = sender.send(message).await;

        if let Err(e) = sender.close().await {
            warn!(error = %e, "failed to detach sender");
        }
        link.close().await;

        match outcome {
            Ok(Outcome::Accepted(_)) => Ok(()),
            Ok(other) => Err(PublishError::NotAccepted(format!("{other:?}"))),
            Err(e) => Err(PublishError::Send(e.to_string())),
        }
    }

    fn address(&self) -> &str {
        &self.address
    }
}
