//! Message intake: decode, classify, fan out
//!
//! Runs on the transport worker for every inbound publish. Nothing in here
//! returns an error to the caller; a bad payload or a failed effect is logged
//! and the next message is handled normally.

use std::sync::Arc;
use tracing::{info, warn};

use crate::effects::{self, DesktopEffects};
use crate::payload::{self, Classification, SmsEnvelope};

/// What happened to one inbound payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Handled(Classification),
    Dropped,
}

/// Decode + fan-out composition registered as the delivery handler
#[derive(Clone)]
pub struct MessagePipeline {
    effects: Arc<dyn DesktopEffects>,
}

impl MessagePipeline {
    pub fn new(effects: Arc<dyn DesktopEffects>) -> Self {
        Self { effects }
    }

    /// Handle one raw payload received on `topic`
    pub fn handle(&self, topic: &str, payload: &[u8]) -> Outcome {
        match payload::decode(payload) {
            Ok((envelope, classification)) => {
                self.fan_out(&envelope, classification);
                Outcome::Handled(classification)
            }
            Err(err) => {
                warn!(topic = %topic, bytes = payload.len(), error = %format!("{err:#}"), "Dropping malformed payload");
                Outcome::Dropped
            }
        }
    }

    /// Clipboard first (codes only), then the notification
    fn fan_out(&self, envelope: &SmsEnvelope, classification: Classification) {
        let notification = match classification {
            Classification::Code => {
                info!(
                    sender = %envelope.sender,
                    code = %envelope.sms_code,
                    phone = %envelope.phone_number,
                    "Received verification code"
                );
                if let Err(err) = self.effects.set_clipboard(&envelope.sms_code) {
                    warn!(error = %format!("{err:#}"), "Failed to copy code to clipboard");
                }
                effects::code_notification(
                    &envelope.phone_number,
                    &envelope.sms_code,
                    &envelope.sender,
                )
            }
            Classification::Message => {
                info!(
                    content = %envelope.sms_msg,
                    phone = %envelope.phone_number,
                    "Received message"
                );
                effects::message_notification(&envelope.phone_number, &envelope.sms_msg)
            }
        };

        if let Err(err) = self.effects.notify(&notification) {
            warn!(error = %format!("{err:#}"), title = %notification.title, "Failed to show notification");
        }
    }
}
