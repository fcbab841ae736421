//! Notification retry queue.
//!
//! Alert messages and control tokens arrive on one queue. The head message
//! is retried every [`RETRY_WAIT`] until one subscribed channel delivers it
//! or it has failed [`MAX_RETRY`] times.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()` in production code
//! - Channel failures are counted against the message, never propagated

pub mod channels;
pub mod templates;

pub use channels::{
    AtSession, ChannelError, ChannelResult, EmailChannel, GsmModem, LoggingMailer, LoggingSms,
    SmsChannel, SmtpMailer,
};

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use argus_core::{NotificationMessage, NotificationOptions};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::broadcast::{ControlSink, ControlToken, SinkError};
use crate::storage::Store;

/// Attempts per message before it is dropped.
pub const MAX_RETRY: u32 = 5;

/// Pause between attempts, and the idle wait of the queue.
pub const RETRY_WAIT: Duration = Duration::from_secs(30);

/// What travels on the notifier queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierItem {
    Message(NotificationMessage),
    Control(ControlToken),
}

/// Producer side of the notifier queue.
#[derive(Clone)]
pub struct NotifierHandle {
    tx: mpsc::UnboundedSender<NotifierItem>,
}

impl NotifierHandle {
    pub fn new(tx: mpsc::UnboundedSender<NotifierItem>) -> Self {
        Self { tx }
    }

    /// Queues a message.
    pub fn notify(&self, message: NotificationMessage) {
        if self.tx.send(NotifierItem::Message(message)).is_err() {
            warn!("Notifier is not running, message dropped");
        }
    }
}

impl ControlSink for NotifierHandle {
    fn name(&self) -> &'static str {
        "notifier"
    }

    fn accepts(&self, token: ControlToken) -> bool {
        matches!(token, ControlToken::Stop | ControlToken::UpdateConfig)
    }

    fn deliver(&self, token: ControlToken) -> Result<(), SinkError> {
        self.tx
            .send(NotifierItem::Control(token))
            .map_err(SinkError::from)
    }
}

/// Creates the notifier queue.
pub fn queue() -> (NotifierHandle, mpsc::UnboundedReceiver<NotifierItem>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (NotifierHandle::new(tx), rx)
}

// ============================================================================
// Notifier
// ============================================================================

pub struct Notifier {
    rx: mpsc::UnboundedReceiver<NotifierItem>,
    store: Arc<dyn Store>,
    sms: Box<dyn SmsChannel>,
    email: Box<dyn EmailChannel>,
    options: NotificationOptions,
    /// Set after a terminal SMS error, cleared on reconfiguration.
    sms_disabled: bool,
    pending: VecDeque<NotificationMessage>,
    retry_at: Option<Instant>,
    retry_wait: Duration,
}

impl Notifier {
    pub fn new(
        rx: mpsc::UnboundedReceiver<NotifierItem>,
        store: Arc<dyn Store>,
        sms: Box<dyn SmsChannel>,
        email: Box<dyn EmailChannel>,
    ) -> Self {
        Self {
            rx,
            store,
            sms,
            email,
            options: NotificationOptions::default(),
            sms_disabled: false,
            pending: VecDeque::new(),
            retry_at: None,
            retry_wait: RETRY_WAIT,
        }
    }

    pub fn with_retry_wait(mut self, retry_wait: Duration) -> Self {
        self.retry_wait = retry_wait;
        self
    }

    pub async fn run(mut self) {
        info!("Notifier started");
        self.reload();

        loop {
            match timeout(self.next_wait(), self.rx.recv()).await {
                Ok(Some(NotifierItem::Message(message))) => {
                    debug!(alert_id = %message.alert_id, kind = ?message.kind, "Notification queued");
                    self.pending.push_back(message);
                }
                Ok(Some(NotifierItem::Control(ControlToken::UpdateConfig))) => self.reload(),
                Ok(Some(NotifierItem::Control(ControlToken::Stop))) | Ok(None) => break,
                Ok(Some(NotifierItem::Control(token))) => {
                    debug!(token = %token, "Token ignored by notifier");
                }
                Err(_) => {}
            }

            self.process_due().await;
        }

        if !self.pending.is_empty() {
            warn!(pending = self.pending.len(), "Notifier stopping with undelivered messages");
        }
        info!("Notifier stopped");
    }

    fn reload(&mut self) {
        match self.store.load_notification_options() {
            Ok(options) => {
                self.options = options;
                debug!("Notification options loaded");
            }
            Err(e) => {
                error!(error = %e, "Failed to load notification options, keeping previous");
            }
        }
        self.sms_disabled = false;
        self.sms.reset();
    }

    fn next_wait(&self) -> Duration {
        match (self.pending.is_empty(), self.retry_at) {
            (true, _) => self.retry_wait,
            (false, Some(at)) => at.saturating_duration_since(Instant::now()),
            (false, None) => Duration::ZERO,
        }
    }

    /// Works through the queue until it is empty or the head must wait.
    async fn process_due(&mut self) {
        while let Some(mut message) = self.pending.pop_front() {
            if let Some(at) = self.retry_at {
                if Instant::now() < at {
                    self.pending.push_front(message);
                    return;
                }
            }
            self.retry_at = None;

            if self.deliver(&message).await {
                info!(alert_id = %message.alert_id, kind = ?message.kind, "Notification delivered");
                continue;
            }

            message.retries += 1;
            if message.retries >= MAX_RETRY {
                error!(
                    alert_id = %message.alert_id,
                    kind = ?message.kind,
                    retries = message.retries,
                    "Notification failed, dropping"
                );
                continue;
            }

            warn!(
                alert_id = %message.alert_id,
                retries = message.retries,
                retry_in_secs = self.retry_wait.as_secs(),
                "Notification failed, will retry"
            );
            self.retry_at = Some(Instant::now() + self.retry_wait);
            self.pending.push_front(message);
            return;
        }
    }

    /// True if any subscribed channel delivered, or nothing is subscribed.
    async fn deliver(&mut self, message: &NotificationMessage) -> bool {
        let subscriptions = self.options.subscriptions;
        let mut subscribed = false;
        let mut delivered = false;

        if subscriptions.sms.wants(message.kind) {
            subscribed = true;
            if self.sms_disabled {
                debug!("SMS channel disabled until reconfigured");
            } else {
                let text = templates::sms_text(message);
                match self.sms.send_sms(&self.options.gsm, &text).await {
                    Ok(()) => delivered = true,
                    Err(e) if e.is_terminal() => {
                        error!(error = %e, "SMS channel disabled");
                        self.sms_disabled = true;
                        self.sms.reset();
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to send SMS");
                        self.sms.reset();
                    }
                }
            }
        }

        if subscriptions.email.wants(message.kind) {
            subscribed = true;
            let subject = templates::email_subject(message);
            let body = templates::email_body(message);
            match self
                .email
                .send_email(&self.options.email, subject, &body)
                .await
            {
                Ok(()) => delivered = true,
                Err(e) => warn!(error = %e, "Failed to send e-mail"),
            }
        }

        if !subscribed {
            debug!(kind = ?message.kind, "No subscription for notification");
        }
        delivered || !subscribed
    }
}
