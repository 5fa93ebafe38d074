use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        ConfirmSelectOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    uri::{AMQPUri, AMQPUserInfo},
};
use mailagent_common::{config::BrokerConfig, internal, outgoing};

use crate::{
    broker::{Broker, BrokerConnector, Subscription},
    error::{BrokerError, Result},
    types::{Acknowledger, ConsumeOptions, Delivery, Publication, QueueDeclaration},
};

/// Queue argument enabling message priorities.
const MAX_PRIORITY_ARGUMENT: &str = "x-max-priority";

/// AMQP delivery mode that asks the broker to persist the message.
const PERSISTENT: u8 = 2;

/// Opens AMQP 0-9-1 connections to the configured broker.
#[derive(Debug, Clone)]
pub struct AmqpConnector {
    uri: AMQPUri,
    name: Option<String>,
}

impl AmqpConnector {
    #[must_use]
    pub fn new(config: &BrokerConfig) -> Self {
        let mut uri = AMQPUri::default();
        uri.authority.host.clone_from(&config.host);
        uri.authority.port = config.port;
        uri.vhost.clone_from(&config.virtual_host);

        if let Some((username, password)) = config.credentials() {
            uri.authority.userinfo = AMQPUserInfo {
                username: username.to_string(),
                password: password.to_string(),
            };
        }

        Self { uri, name: None }
    }

    /// Name shown for the connection in the broker's management tools.
    #[must_use]
    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub const fn uri(&self) -> &AMQPUri {
        &self.uri
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(&self) -> Result<Box<dyn Broker>> {
        let mut properties = ConnectionProperties::default();
        if let Some(name) = &self.name {
            properties = properties.with_connection_name(name.as_str().into());
        }

        let connection = Connection::connect_uri(self.uri.clone(), properties).await?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        internal!(
            level = DEBUG,
            "Connected to broker at {}:{}{}",
            self.uri.authority.host,
            self.uri.authority.port,
            self.uri.vhost
        );

        Ok(Box::new(AmqpBroker {
            connection,
            channel,
        }))
    }
}

/// One AMQP connection with a single channel.
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn declare_queue(&self, queue: &QueueDeclaration) -> Result<()> {
        self.channel
            .queue_declare(
                &queue.name,
                QueueDeclareOptions {
                    durable: queue.durable,
                    ..QueueDeclareOptions::default()
                },
                queue_arguments(queue),
            )
            .await?;

        Ok(())
    }

    /// Publish and wait for the broker's confirm.
    async fn publish(&self, publication: Publication) -> Result<()> {
        outgoing!(
            "Publishing {} bytes to {} (priority {})",
            publication.body.len(),
            publication.routing_key,
            publication.priority
        );

        let confirmation = self
            .channel
            .basic_publish(
                "",
                &publication.routing_key,
                BasicPublishOptions::default(),
                &publication.body,
                publish_properties(&publication),
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(BrokerError::NotConfirmed(publication.routing_key));
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        options: &ConsumeOptions,
    ) -> Result<Box<dyn Subscription>> {
        self.channel
            .basic_qos(options.prefetch, BasicQosOptions::default())
            .await?;

        let consumer = self
            .channel
            .basic_consume(
                queue,
                &options.consumer_tag,
                BasicConsumeOptions {
                    no_ack: options.auto_ack,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        Ok(Box::new(AmqpSubscription { consumer }))
    }

    async fn close(&self) -> Result<()> {
        self.connection.close(200, "OK").await?;
        Ok(())
    }
}

fn queue_arguments(queue: &QueueDeclaration) -> FieldTable {
    let mut arguments = FieldTable::default();
    if queue.max_priority > 0 {
        arguments.insert(
            MAX_PRIORITY_ARGUMENT.into(),
            AMQPValue::LongInt(i32::from(queue.max_priority)),
        );
    }
    arguments
}

fn publish_properties(publication: &Publication) -> BasicProperties {
    let properties = BasicProperties::default().with_priority(publication.priority);
    if publication.persistent {
        properties.with_delivery_mode(PERSISTENT)
    } else {
        properties
    }
}

struct AmqpSubscription {
    consumer: Consumer,
}

#[async_trait]
impl Subscription for AmqpSubscription {
    async fn next(&mut self) -> Option<Result<Delivery>> {
        let delivery = match self.consumer.next().await? {
            Ok(delivery) => delivery,
            Err(err) => return Some(Err(err.into())),
        };

        Some(Ok(Delivery::new(
            delivery.delivery_tag,
            delivery.data,
            delivery.redelivered,
            Box::new(AmqpAcker {
                acker: delivery.acker,
            }),
        )))
    }
}

struct AmqpAcker {
    acker: Acker,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self, _tag: u64) -> Result<()> {
        self.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }
}
