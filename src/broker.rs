// ===============================
// src/broker.rs (AMQP topology + delivery adapter)
// ===============================
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, Stream, StreamExt};
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    Connection, ExchangeKind,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::connection::{ConnectError, ConnectionManager};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("amqp: {0}")]
    Amqp(#[from] lapin::Error),
    #[error("consume stream closed")]
    StreamClosed,
}

#[derive(Debug, Clone)]
pub struct Topology {
    pub exchange: String,
    pub queue: String,
    pub consumer_tag: String,
}

impl Topology {
    pub fn new(exchange: impl Into<String>, queue: impl Into<String>) -> Self {
        Self { exchange: exchange.into(), queue: queue.into(), consumer_tag: "payment-service".to_string() }
    }
}

/// What to do with a delivery once the handler is done with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
}

/// One inbound message: a body plus a way to settle it with the broker.
/// Settling consumes the message, so it can only happen once.
pub trait Inbound: Send {
    fn body(&self) -> &[u8];
    fn settle(self, disposition: Disposition) -> BoxFuture<'static, Result<(), TransportError>>;
}

impl Inbound for Delivery {
    fn body(&self) -> &[u8] {
        &self.data
    }

    fn settle(self, disposition: Disposition) -> BoxFuture<'static, Result<(), TransportError>> {
        let acker = self.acker;
        async move {
            match disposition {
                Disposition::Ack => {
                    acker.ack(BasicAckOptions::default()).await?;
                }
                Disposition::Requeue => {
                    acker
                        .nack(BasicNackOptions { multiple: false, requeue: true })
                        .await?;
                }
            }
            Ok(())
        }
        .boxed()
    }
}

/// Declare exchange/queue/binding, set prefetch to 1 and start an explicit-ack
/// consumer. The returned stream yields one delivery at a time.
pub async fn open_consumer(
    conn: &Connection,
    topo: &Topology,
) -> Result<BoxStream<'static, Result<Delivery, TransportError>>, TransportError> {
    let ch = conn.create_channel().await?;

    // satu pesan in-flight: pesan berikutnya baru dikirim setelah ack/nack
    ch.basic_qos(1, BasicQosOptions::default()).await?;

    ch.exchange_declare(
        &topo.exchange,
        ExchangeKind::Fanout,
        ExchangeDeclareOptions { durable: true, ..Default::default() },
        FieldTable::default(),
    )
    .await?;
    ch.queue_declare(
        &topo.queue,
        QueueDeclareOptions { durable: true, ..Default::default() },
        FieldTable::default(),
    )
    .await?;
    ch.queue_bind(&topo.queue, &topo.exchange, "", QueueBindOptions::default(), FieldTable::default())
        .await?;

    let consumer = ch
        .basic_consume(
            &topo.queue,
            &topo.consumer_tag,
            BasicConsumeOptions { no_ack: false, ..Default::default() },
            FieldTable::default(),
        )
        .await?;

    info!(exchange = %topo.exchange, queue = %topo.queue, "waiting for order events");
    Ok(consumer.map(|d| d.map_err(TransportError::from)).boxed())
}

/// Broker session lifecycle as the supervisor sees it: dial a link, open a
/// consume stream on it, close it. Lets the reconnect loop run without AMQP.
pub trait Broker: Send + Sync {
    type Conn: Send + 'static;
    type Msg: Inbound + 'static;
    type Stream: Stream<Item = Result<Self::Msg, TransportError>> + Send + Unpin + 'static;

    /// One connect cycle, with state and backoff owned by `manager`.
    fn connect<'a>(
        &'a self,
        manager: &'a ConnectionManager,
        max_attempts: u32,
    ) -> BoxFuture<'a, Result<Self::Conn, ConnectError>>;

    fn open<'a>(&'a self, conn: &'a Self::Conn, topo: &'a Topology) -> BoxFuture<'a, Result<Self::Stream, TransportError>>;

    fn close(&self, conn: Self::Conn) -> BoxFuture<'static, ()>;
}

/// RabbitMQ via lapin.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmqpBroker;

impl Broker for AmqpBroker {
    type Conn = Connection;
    type Msg = Delivery;
    type Stream = BoxStream<'static, Result<Delivery, TransportError>>;

    fn connect<'a>(
        &'a self,
        manager: &'a ConnectionManager,
        max_attempts: u32,
    ) -> BoxFuture<'a, Result<Connection, ConnectError>> {
        manager.connect(max_attempts).boxed()
    }

    fn open<'a>(&'a self, conn: &'a Connection, topo: &'a Topology) -> BoxFuture<'a, Result<Self::Stream, TransportError>> {
        open_consumer(conn, topo).boxed()
    }

    fn close(&self, conn: Connection) -> BoxFuture<'static, ()> {
        async move {
            if let Err(e) = conn.close(200, "payment service closing").await {
                warn!(error = %e, "broker close failed");
            }
        }
        .boxed()
    }
}
