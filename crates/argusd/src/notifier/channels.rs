//! Delivery channels: SMS through a GSM modem, e-mail through SMTP.
//!
//! The AT session is generic over the transport and tested against
//! in-memory duplex pipes; on the device it runs over a serial port.
//! E-mail goes through `lettre`, which upgrades the relay connection with
//! STARTTLS before it authenticates.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use argus_core::{EmailOptions, GsmOptions};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::extension::ClientId;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, info};

/// Answer timeout for a single modem or SMTP exchange.
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the modem to register on the network.
pub const COVERAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Name sent in EHLO.
const HELLO_NAME: &str = "argus";

const CTRL_Z: u8 = 0x1A;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("No answer within {0:?}")]
    Timeout(Duration),

    #[error("SIM card PIN required")]
    PinRequired,

    #[error("Incorrect SIM card PIN")]
    IncorrectPin,

    #[error("Network signal is not sufficient")]
    NoCoverage,

    #[error("Modem error: {0}")]
    Modem(String),

    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("Invalid e-mail address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Invalid e-mail message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("Unexpected reply: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

impl ChannelError {
    /// Errors that will not go away until the channel is reconfigured.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PinRequired | Self::IncorrectPin)
    }
}

pub type ChannelResult<T> = Result<T, ChannelError>;

async fn within<T, F>(limit: Duration, fut: F) -> ChannelResult<T>
where
    F: Future<Output = ChannelResult<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ChannelError::Timeout(limit))?
}

#[async_trait]
pub trait SmsChannel: Send {
    async fn send_sms(&mut self, gsm: &GsmOptions, text: &str) -> ChannelResult<()>;

    /// Forgets any open session; the next send starts from scratch.
    fn reset(&mut self) {}
}

#[async_trait]
pub trait EmailChannel: Send {
    async fn send_email(
        &mut self,
        options: &EmailOptions,
        subject: &str,
        body: &str,
    ) -> ChannelResult<()>;
}

// ============================================================================
// GSM modem
// ============================================================================

/// AT command session over any byte stream.
pub struct AtSession<T> {
    io: BufReader<T>,
}

impl<T> AtSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: T) -> Self {
        Self {
            io: BufReader::new(stream),
        }
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> ChannelResult<()> {
        self.io.write_all(bytes).await?;
        self.io.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> ChannelResult<String> {
        let mut line = String::new();
        let read = within(EXCHANGE_TIMEOUT, async {
            self.io.read_line(&mut line).await.map_err(ChannelError::from)
        })
        .await?;
        if read == 0 {
            return Err(ChannelError::Io(io::ErrorKind::UnexpectedEof.into()));
        }
        Ok(line.trim().to_string())
    }

    /// Reads lines up to the final result code and returns the
    /// intermediate ones.
    async fn read_response(&mut self, echo: &str) -> ChannelResult<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line.is_empty() || line == echo {
                continue;
            }
            if line == "OK" {
                return Ok(lines);
            }
            if line == "ERROR" || line.starts_with("+CME ERROR") || line.starts_with("+CMS ERROR") {
                return Err(ChannelError::Modem(line));
            }
            lines.push(line);
        }
    }

    /// Sends one command and waits for its final result code.
    pub async fn command(&mut self, cmd: &str) -> ChannelResult<Vec<String>> {
        debug!(cmd, "AT command");
        self.write_raw(format!("{cmd}\r").as_bytes()).await?;
        self.read_response(cmd).await
    }

    /// Brings the modem into SMS text mode, entering the PIN if asked.
    pub async fn initialise(&mut self, pin: &str) -> ChannelResult<()> {
        self.command("AT").await?;
        self.command("ATE0").await?;

        let status = self.command("AT+CPIN?").await?;
        let ready = status.iter().any(|l| l.contains("READY"));
        if !ready {
            if pin.is_empty() {
                return Err(ChannelError::PinRequired);
            }
            self.command(&format!("AT+CPIN={pin}"))
                .await
                .map_err(|_| ChannelError::IncorrectPin)?;
        }

        self.command("AT+CMGF=1").await?;
        Ok(())
    }

    /// Polls the registration status until home or roaming.
    pub async fn wait_for_coverage(&mut self, limit: Duration) -> ChannelResult<()> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let status = self.command("AT+CREG?").await?;
            let registered = status
                .iter()
                .any(|l| l.starts_with("+CREG:") && (l.ends_with(",1") || l.ends_with(",5")));
            if registered {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ChannelError::NoCoverage);
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    pub async fn send_text(&mut self, number: &str, text: &str) -> ChannelResult<()> {
        self.write_raw(format!("AT+CMGS=\"{number}\"\r").as_bytes())
            .await?;

        within(EXCHANGE_TIMEOUT, async {
            loop {
                match self.io.read_u8().await {
                    Ok(b'>') => return Ok(()),
                    Ok(_) => {}
                    Err(e) => return Err(ChannelError::from(e)),
                }
            }
        })
        .await?;

        let mut payload = text.as_bytes().to_vec();
        payload.push(CTRL_Z);
        self.write_raw(&payload).await?;

        let lines = self.read_response("").await?;
        if lines.iter().any(|l| l.starts_with("+CMGS")) {
            Ok(())
        } else {
            Err(ChannelError::Protocol(lines.join(" ")))
        }
    }
}

/// SMS sender on a serial-attached modem.
///
/// The session is opened lazily and dropped after any failure so the next
/// attempt reconnects.
pub struct GsmModem {
    device: PathBuf,
    baud: u32,
    session: Option<AtSession<SerialStream>>,
}

impl GsmModem {
    pub fn new(device: impl Into<PathBuf>, baud: u32) -> Self {
        Self {
            device: device.into(),
            baud,
            session: None,
        }
    }

    async fn connect(&self, pin: &str) -> ChannelResult<AtSession<SerialStream>> {
        info!(device = %self.device.display(), baud = self.baud, "Connecting to GSM modem");
        let port = tokio_serial::new(self.device.to_string_lossy(), self.baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(EXCHANGE_TIMEOUT)
            .open_native_async()?;
        let mut session = AtSession::new(port);
        session.initialise(pin).await?;
        debug!("GSM modem connected");
        Ok(session)
    }

    async fn try_send(&mut self, gsm: &GsmOptions, text: &str) -> ChannelResult<()> {
        let mut session = match self.session.take() {
            Some(session) => session,
            None => self.connect(&gsm.pin_code).await?,
        };

        session.wait_for_coverage(COVERAGE_TIMEOUT).await?;
        session.send_text(&gsm.phone_number, text).await?;
        self.session = Some(session);
        Ok(())
    }
}

#[async_trait]
impl SmsChannel for GsmModem {
    async fn send_sms(&mut self, gsm: &GsmOptions, text: &str) -> ChannelResult<()> {
        if gsm.phone_number.is_empty() {
            return Err(ChannelError::NotConfigured("phone number"));
        }
        self.try_send(gsm, text).await?;
        info!(phone_number = %gsm.phone_number, "SMS sent");
        Ok(())
    }

    fn reset(&mut self) {
        self.session = None;
    }
}

// ============================================================================
// SMTP
// ============================================================================

/// Builds the plain-text alert e-mail.
fn build_message(from: &str, to: &str, subject: &str, body: &str) -> ChannelResult<Message> {
    let message = Message::builder()
        .from(from.parse::<Mailbox>()?)
        .to(to.parse::<Mailbox>()?)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())?;
    Ok(message)
}

/// E-mail sender submitting to an SMTP relay.
///
/// Every submission opens a fresh connection. STARTTLS is required: if the
/// relay does not offer it or the upgrade fails, nothing is authenticated
/// or sent.
pub struct SmtpMailer {
    host: String,
    port: u16,
    sender: String,
}

impl SmtpMailer {
    pub fn new(host: impl Into<String>, port: u16, sender: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            sender: sender.into(),
        }
    }

    fn transport(&self, options: &EmailOptions) -> ChannelResult<AsyncSmtpTransport<Tokio1Executor>> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)?
            .port(self.port)
            .hello_name(ClientId::Domain(HELLO_NAME.to_string()))
            .timeout(Some(EXCHANGE_TIMEOUT));
        if !options.smtp_username.is_empty() {
            builder = builder.credentials(Credentials::new(
                options.smtp_username.clone(),
                options.smtp_password.clone(),
            ));
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl EmailChannel for SmtpMailer {
    async fn send_email(
        &mut self,
        options: &EmailOptions,
        subject: &str,
        body: &str,
    ) -> ChannelResult<()> {
        if options.email_address.is_empty() {
            return Err(ChannelError::NotConfigured("e-mail address"));
        }

        let message = build_message(&self.sender, &options.email_address, subject, body)?;
        let transport = self.transport(options)?;

        debug!(host = %self.host, port = self.port, "Sending e-mail");
        transport.send(message).await?;
        info!(to = %options.email_address, "E-mail sent");
        Ok(())
    }
}

// ============================================================================
// Logging channels
// ============================================================================

/// SMS channel for simulated hardware: logs instead of sending.
#[derive(Debug, Default)]
pub struct LoggingSms;

#[async_trait]
impl SmsChannel for LoggingSms {
    async fn send_sms(&mut self, gsm: &GsmOptions, text: &str) -> ChannelResult<()> {
        info!(phone_number = %gsm.phone_number, text, "SMS (simulated)");
        Ok(())
    }
}

/// E-mail channel for simulated hardware: logs instead of sending.
#[derive(Debug, Default)]
pub struct LoggingMailer;

#[async_trait]
impl EmailChannel for LoggingMailer {
    async fn send_email(
        &mut self,
        options: &EmailOptions,
        subject: &str,
        _body: &str,
    ) -> ChannelResult<()> {
        info!(to = %options.email_address, subject, "E-mail (simulated)");
        Ok(())
    }
}
