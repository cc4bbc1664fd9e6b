use anyhow::Result;
use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;
use shared::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::CheckoutError;
use crate::orchestrator::CheckoutOrchestrator;

/// Runs checkouts for settled payments arriving on the command topic.
pub struct CheckoutCommandHandler {
    orchestrator: Arc<CheckoutOrchestrator>,
    producer: FutureProducer,
    reply_topic: String,
}

impl CheckoutCommandHandler {
    pub fn new(orchestrator: Arc<CheckoutOrchestrator>, producer: FutureProducer, reply_topic: String) -> Self {
        Self { orchestrator, producer, reply_topic }
    }

    pub async fn run(&self, consumer: StreamConsumer) {
        let mut message_stream = consumer.stream();

        while let Some(message) = message_stream.next().await {
            match message {
                Ok(m) => {
                    if let Some(payload) = m.payload_view::<str>() {
                        match payload {
                            Ok(json_str) => match serde_json::from_str::<CheckoutCommand>(json_str) {
                                Ok(command) => {
                                    if let Err(e) = self.handle_command(command).await {
                                        error!(error = %e, "Error handling checkout command");
                                    }
                                }
                                Err(e) => warn!(error = %e, "Skipping malformed checkout command"),
                            },
                            Err(e) => error!(error = %e, "Error parsing payload"),
                        }
                    }
                    if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                        error!(error = %e, "Error committing message");
                    }
                }
                Err(e) => error!(error = %e, "Error receiving message"),
            }
        }
    }

    async fn handle_command(&self, command: CheckoutCommand) -> Result<()> {
        info!(command_id = %command.id, user_id = %command.request.user_id, "Received checkout command");
        let command_id = command.id;
        let request = request_for(command);

        let result = self.orchestrator.place_order(request).await;
        self.send_reply(reply_for(command_id, result)).await
    }

    async fn send_reply(&self, reply: CheckoutReply) -> Result<()> {
        let json = serde_json::to_string(&reply)?;
        let key = reply.command_id.to_string();
        let record = FutureRecord::to(&self.reply_topic).payload(&json).key(&key);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to send reply: {}", e))?;

        Ok(())
    }
}

/// Redelivered commands carry the same key, so they replay the recorded order.
fn request_for(command: CheckoutCommand) -> CheckoutRequest {
    let mut request = command.request;
    if request.idempotency_key.is_none() {
        request.idempotency_key = Some(command.idempotency_key);
    }
    request
}

fn reply_for(command_id: Uuid, result: Result<CheckoutOutcome, CheckoutError>) -> CheckoutReply {
    match result {
        Ok(outcome) => CheckoutReply::success(command_id, outcome),
        Err(e) => CheckoutReply::failed(command_id, e.stage(), e.to_string()),
    }
}
