//! AMQP notification sink.
//!
//! Maintains a persistent connection and channel to RabbitMQ, reconnecting
//! on failure. Publish failures surface as errors to the caller, which
//! treats broadcasting as best-effort.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, QueueDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::{NotificationSink, TrackingUpdate};

#[derive(Clone)]
pub struct AmqpSink {
    inner: Arc<AmqpSinkInner>,
}

struct AmqpSinkInner {
    url: String,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
}

impl AmqpSink {
    /// Create a sink for the given RabbitMQ URL. Connection is lazy.
    pub fn new(url: String) -> Self {
        Self {
            inner: Arc::new(AmqpSinkInner {
                url,
                connection: RwLock::new(None),
                channel: RwLock::new(None),
            }),
        }
    }

    /// Ensure we have a valid connection and channel.
    async fn ensure_connected(&self, queue: &str) -> Result<Channel> {
        // Check if we have a valid channel
        {
            let channel = self.inner.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok(ch.clone());
                }
            }
        }

        // Need to reconnect
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Double-check after acquiring write lock
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }

        info!("amqp_sink_connecting");

        let conn = Connection::connect(&self.inner.url, ConnectionProperties::default())
            .await
            .context("Failed to connect to RabbitMQ")?;

        let ch = conn
            .create_channel()
            .await
            .context("Failed to create channel")?;

        // Idempotent declare so consumers can bind before we publish
        ch.queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("Failed to declare tracking queue")?;

        info!(queue = queue, "amqp_sink_connected");

        *connection = Some(conn);
        *channel = Some(ch.clone());

        Ok(ch)
    }

    /// Close the connection gracefully.
    pub async fn close(&self) {
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Normal shutdown").await {
                warn!(error = %e, "amqp_channel_close_error");
            }
        }

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "amqp_connection_close_error");
            }
        }

        info!("amqp_sink_closed");
    }
}

#[async_trait]
impl NotificationSink for AmqpSink {
    async fn broadcast(&self, topic: &str, update: &TrackingUpdate) -> Result<()> {
        let channel = self.ensure_connected(topic).await?;

        let body = serde_json::to_vec(update).context("Failed to serialize update")?;

        channel
            .basic_publish(
                "",
                topic,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into())
                    .with_message_id(update.id.to_string().into()),
            )
            .await
            .context("Failed to publish tracking update")?
            .await
            .context("Failed to confirm publish")?;

        info!(
            queue = topic,
            log_id = update.log_id,
            event_type = update.event_type.as_str(),
            status = update.status.as_str(),
            "tracking_update_published"
        );

        Ok(())
    }
}
