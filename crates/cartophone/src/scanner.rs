//! Tag scanning hardware capability.
//!
//! [`CardScanner`] is the seam the poller drives. [`SerialScanner`] talks to a
//! reader module attached over a serial line that prints one detected tag per
//! line as hex bytes.

use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

/// Longest line accepted from the reader; anything longer is noise.
const MAX_LINE_LENGTH: usize = 256;

/// Longest UID we accept (triple-size ISO 14443 UIDs are 10 bytes).
const MAX_UID_BYTES: usize = 10;

/// Modulation/baud pairs a reader can poll for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modulation {
    #[default]
    #[serde(rename = "iso14443a-106")]
    Iso14443a106,
    #[serde(rename = "iso14443b-106")]
    Iso14443b106,
    #[serde(rename = "felica-212")]
    Felica212,
}

/// Parameters of one `scan` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    pub modulations: Vec<Modulation>,
    pub max_attempts: u32,
    pub period: Duration,
    /// Pause after a hardware error before the next scan.
    pub retry_delay: Duration,
    /// Pause after a detection so a tag left on the reader does not retrigger.
    pub cooldown: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            modulations: vec![Modulation::Iso14443a106],
            max_attempts: 10,
            period: Duration::from_millis(300),
            retry_delay: Duration::from_secs(1),
            cooldown: Duration::from_secs(1),
        }
    }
}

impl ScanConfig {
    /// Total time one scan may spend polling before reporting no tag.
    pub fn window(&self) -> Duration {
        self.period.saturating_mul(self.max_attempts.max(1))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("reader error: {0}")]
    Device(String),
    #[error("reader I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed tag line: {0:?}")]
    Malformed(String),
    #[error("reader stream closed")]
    Closed,
}

impl From<LinesCodecError> for ScanError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::Io(io) => ScanError::Io(io),
            LinesCodecError::MaxLineLengthExceeded => {
                ScanError::Device("line length limit exceeded".to_string())
            }
        }
    }
}

/// Hardware capability: poll for a single tag.
#[async_trait]
pub trait CardScanner: Send {
    /// Returns the hex-formatted UID of a detected tag, `None` if nothing was
    /// seen within the configured attempts.
    async fn scan(&mut self, config: &ScanConfig) -> Result<Option<String>, ScanError>;
}

/// Format raw UID bytes as upper-case hex separated by single spaces.
pub fn format_uid(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (idx, byte) in bytes.iter().enumerate() {
        if idx > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02X}", byte);
    }
    out
}

/// Parse a reader line such as `04a1b2c3`, `04 A1 B2 C3` or `04:A1:B2:C3`.
pub fn parse_uid(line: &str) -> Result<Vec<u8>, ScanError> {
    let digits: String = line
        .chars()
        .filter(|c| !matches!(c, ' ' | ':' | '-'))
        .collect();

    if digits.is_empty()
        || digits.len() % 2 != 0
        || digits.len() / 2 > MAX_UID_BYTES
        || !digits.chars().all(|c| c.is_ascii_hexdigit())
    {
        return Err(ScanError::Malformed(line.to_string()));
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| ScanError::Malformed(line.to_string()))
        })
        .collect()
}

/// Reader attached over a serial line.
pub struct SerialScanner<R> {
    lines: FramedRead<R, LinesCodec>,
}

impl SerialScanner<tokio::fs::File> {
    /// Open the reader's tty (e.g. `/dev/ttyUSB0`).
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ScanError> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        Ok(Self::new(file))
    }
}

impl<R: AsyncRead + Unpin + Send> SerialScanner<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> CardScanner for SerialScanner<R> {
    async fn scan(&mut self, config: &ScanConfig) -> Result<Option<String>, ScanError> {
        // FramedRead keeps partial lines buffered, so dropping `next()` on
        // timeout loses nothing.
        match tokio::time::timeout(config.window(), self.lines.next()).await {
            Err(_) => Ok(None),
            Ok(None) => Err(ScanError::Closed),
            Ok(Some(Err(e))) => Err(e.into()),
            Ok(Some(Ok(line))) => {
                let line = line.trim();
                if line.is_empty() {
                    return Ok(None);
                }
                let bytes = parse_uid(line)?;
                Ok(Some(format_uid(&bytes)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn fast_config() -> ScanConfig {
        ScanConfig {
            max_attempts: 2,
            period: Duration::from_millis(20),
            ..ScanConfig::default()
        }
    }

    #[test]
    fn scan_config_defaults() {
        let config = ScanConfig::default();
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.period, Duration::from_millis(300));
        assert_eq!(config.retry_delay, Duration::from_secs(1));
        assert_eq!(config.cooldown, Duration::from_secs(1));
        assert_eq!(config.modulations, vec![Modulation::Iso14443a106]);
        assert_eq!(config.window(), Duration::from_secs(3));
    }

    #[test]
    fn modulation_serde_names() {
        assert_eq!(
            serde_json::from_str::<Modulation>("\"iso14443a-106\"").unwrap(),
            Modulation::Iso14443a106
        );
        assert_eq!(
            serde_json::to_string(&Modulation::Felica212).unwrap(),
            "\"felica-212\""
        );
    }

    #[test]
    fn format_uid_spaced_upper_hex() {
        assert_eq!(format_uid(&[0x04, 0xa1, 0x0b, 0xff]), "04 A1 0B FF");
        assert_eq!(format_uid(&[]), "");
    }

    #[test]
    fn parse_uid_accepts_common_separators() {
        let expected = vec![0x04, 0xA1, 0xB2, 0xC3];
        assert_eq!(parse_uid("04a1b2c3").unwrap(), expected);
        assert_eq!(parse_uid("04 A1 B2 C3").unwrap(), expected);
        assert_eq!(parse_uid("04:a1:b2:c3").unwrap(), expected);
        assert_eq!(parse_uid("04-A1-B2-C3").unwrap(), expected);
    }

    #[test]
    fn parse_uid_rejects_garbage() {
        assert!(matches!(parse_uid("zz"), Err(ScanError::Malformed(_))));
        assert!(matches!(parse_uid("abc"), Err(ScanError::Malformed(_))));
        assert!(matches!(parse_uid("   "), Err(ScanError::Malformed(_))));
        assert!(matches!(
            parse_uid("0102030405060708090A0B"),
            Err(ScanError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn serial_scanner_reads_uid_line() {
        let (mut device, host) = tokio::io::duplex(64);
        let mut scanner = SerialScanner::new(host);

        device.write_all(b"04a1b2c3\r\n").await.unwrap();

        let uid = scanner.scan(&fast_config()).await.unwrap();
        assert_eq!(uid.as_deref(), Some("04 A1 B2 C3"));
    }

    #[tokio::test]
    async fn serial_scanner_no_tag_within_window() {
        let (_device, host) = tokio::io::duplex(64);
        let mut scanner = SerialScanner::new(host);

        let uid = scanner.scan(&fast_config()).await.unwrap();
        assert!(uid.is_none());
    }

    #[tokio::test]
    async fn serial_scanner_keeps_partial_line_across_timeout() {
        let (mut device, host) = tokio::io::duplex(64);
        let mut scanner = SerialScanner::new(host);

        device.write_all(b"04 A1").await.unwrap();
        assert!(scanner.scan(&fast_config()).await.unwrap().is_none());

        device.write_all(b" B2 C3\n").await.unwrap();
        let uid = scanner.scan(&fast_config()).await.unwrap();
        assert_eq!(uid.as_deref(), Some("04 A1 B2 C3"));
    }

    #[tokio::test]
    async fn serial_scanner_reports_malformed_line() {
        let (mut device, host) = tokio::io::duplex(64);
        let mut scanner = SerialScanner::new(host);

        device.write_all(b"not-a-tag\n").await.unwrap();

        let err = scanner.scan(&fast_config()).await.unwrap_err();
        assert!(matches!(err, ScanError::Malformed(_)));
    }

    #[tokio::test]
    async fn serial_scanner_reports_closed_stream() {
        let (device, host) = tokio::io::duplex(64);
        let mut scanner = SerialScanner::new(host);
        drop(device);

        let err = scanner.scan(&fast_config()).await.unwrap_err();
        assert!(matches!(err, ScanError::Closed));
    }
}
