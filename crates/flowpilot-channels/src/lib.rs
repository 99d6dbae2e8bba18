//! # FlowPilot Channels
//! Outbound message senders and the production `ActionExecutor`.
//!
//! Each sender wraps one provider API (WhatsApp Cloud API, SMTP, Twilio).
//! `ChannelExecutor` routes dispatched actions to the right sender and
//! materializes task/meeting/reminder actions as entity records.

pub mod email;
pub mod executor;
pub mod sms;
pub mod whatsapp;

pub use email::EmailSender;
pub use executor::{ChannelExecutor, RecordingExecutor};
pub use sms::SmsSender;
pub use whatsapp::WhatsAppSender;
