//! Per-connection transaction audit log.
//!
//! Every accepted connection gets its own append-only file.  Each
//! transaction writes a `CMD` line and a `RES` line; connection lifecycle
//! events are written as `META` lines.  Lines are pipe-separated so external
//! tools can re-run the decoder over old sessions (see [`parse_log_line`]):
//!
//! ```text
//! 2026-10-17 09:14:02.118 | INFO | CMD | SetAccv | 02 01 00 08 40 02 01 03 00 E0 2E 00 |  | - |
//! 2026-10-17 09:14:02.121 | INFO | RES | SetAccv | 02 01 00 08 40 02 01 03 00 E0 2E 00 |  | OK |
//! 2026-10-17 09:14:07.530 | ERR  | RES | SetHT | 02 01 00 07 40 02 00 02 00 01 00 |  | FAIL | vacuum not ready; dev=0x02 sense=70 00 05 ...
//! ```
//!
//! I/O failures are returned to the caller; the connection handler treats
//! them as fatal for the connection.

use std::fs::{self, File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use uuid::Uuid;

use sem_core::decoder::{Decoded, Severity};
use sem_core::domain::transaction::{hex_bytes, payload_sample};
use sem_core::{RequestFrame, TransactionOutcome};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const SEPARATOR: &str = " | ";

/// Kind of log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTag {
    Cmd,
    Res,
    Meta,
}

impl LogTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cmd => "CMD",
            Self::Res => "RES",
            Self::Meta => "META",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "CMD" => Some(Self::Cmd),
            "RES" => Some(Self::Res),
            "META" => Some(Self::Meta),
            _ => None,
        }
    }
}

/// Writer for one session's log file.
#[derive(Debug)]
pub struct SessionLogger {
    out: LineWriter<File>,
    path: PathBuf,
    session_id: Uuid,
}

impl SessionLogger {
    /// Creates a new session file in `dir` and writes the opening meta lines.
    ///
    /// # Errors
    ///
    /// Any failure creating the directory or file, or writing to it.
    pub fn create(dir: &Path, peer: SocketAddr) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let session_id = Uuid::new_v4();
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let short_id = &session_id.simple().to_string()[..8];
        let path = dir.join(format!("session_{stamp}_{short_id}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut logger = Self {
            out: LineWriter::new(file),
            path,
            session_id,
        };
        logger.meta(Severity::Info, "Session Started")?;
        logger.meta(Severity::Info, &format!("Client Connected: {peer}"))?;
        Ok(logger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn meta(&mut self, severity: Severity, message: &str) -> io::Result<()> {
        writeln!(
            self.out,
            "{}{SEPARATOR}{:<4}{SEPARATOR}{}{SEPARATOR}{message}",
            timestamp(),
            severity,
            LogTag::Meta.as_str()
        )
    }

    /// Logs the inbound command, sampling the outbound payload.
    pub fn command(&mut self, decoded: &Decoded, request: &RequestFrame) -> io::Result<()> {
        self.transaction(
            decoded.severity,
            LogTag::Cmd,
            &decoded.name,
            &request.cdb,
            &request.payload,
            "-",
            None,
        )
    }

    /// Logs the outcome, sampling `data` (the response payload sent back).
    ///
    /// A failed outcome is logged at `ERR` whatever the decoded severity.
    pub fn response(
        &mut self,
        decoded: &Decoded,
        request: &RequestFrame,
        outcome: &TransactionOutcome,
        data: &[u8],
    ) -> io::Result<()> {
        let (severity, status) = if outcome.ok {
            (decoded.severity, "OK")
        } else {
            (Severity::Error, "FAIL")
        };
        let detail = response_detail(outcome);
        self.transaction(
            severity,
            LogTag::Res,
            &decoded.name,
            &request.cdb,
            data,
            status,
            detail.as_deref(),
        )
    }

    pub fn error(&mut self, detail: &str) -> io::Result<()> {
        self.meta(Severity::Error, &format!("Error: {detail}"))
    }

    /// Writes the closing meta line and flushes.
    pub fn finish(mut self) -> io::Result<()> {
        self.meta(Severity::Info, "Session Ended")?;
        self.out.flush()
    }

    #[allow(clippy::too_many_arguments)]
    fn transaction(
        &mut self,
        severity: Severity,
        tag: LogTag,
        name: &str,
        cdb: &[u8],
        payload: &[u8],
        status: &str,
        detail: Option<&str>,
    ) -> io::Result<()> {
        writeln!(
            self.out,
            "{ts}{SEPARATOR}{severity:<4}{SEPARATOR}{tag}{SEPARATOR}{name}{SEPARATOR}{cdb}{SEPARATOR}{payload}{SEPARATOR}{status}{SEPARATOR}{detail}",
            ts = timestamp(),
            tag = tag.as_str(),
            cdb = hex_bytes(cdb),
            payload = payload_sample(payload),
            detail = detail.unwrap_or(""),
        )
    }
}

fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

fn response_detail(outcome: &TransactionOutcome) -> Option<String> {
    let mut parts: Vec<String> = outcome.detail.iter().cloned().collect();
    if !outcome.ok {
        parts.push(format!(
            "dev=0x{:02X} host=0x{:04X} drv=0x{:04X}",
            outcome.device_status, outcome.host_status, outcome.driver_status
        ));
        if !outcome.sense.is_empty() {
            parts.push(format!("sense={}", hex_bytes(&outcome.sense)));
        }
    }
    (!parts.is_empty()).then(|| parts.join("; "))
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// A parsed session log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Transaction(TransactionLine),
    Meta {
        timestamp: NaiveDateTime,
        severity: Severity,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionLine {
    pub timestamp: NaiveDateTime,
    pub severity: Severity,
    pub tag: LogTag,
    pub name: String,
    pub cdb: Vec<u8>,
    /// Hex sample as written, possibly ending in `...`.
    pub payload_sample: String,
    /// `None` on `CMD` lines.
    pub ok: Option<bool>,
    pub detail: Option<String>,
}

/// Parses one line written by [`SessionLogger`]. Returns `None` for lines
/// that do not follow the format.
pub fn parse_log_line(line: &str) -> Option<LogRecord> {
    let mut fields = line.trim_end_matches(['\r', '\n']).splitn(8, SEPARATOR);
    let timestamp = NaiveDateTime::parse_from_str(fields.next()?, TIMESTAMP_FORMAT).ok()?;
    let severity: Severity = fields.next()?.parse().ok()?;
    let tag = LogTag::parse(fields.next()?)?;

    if tag == LogTag::Meta {
        let message: Vec<&str> = fields.collect();
        return Some(LogRecord::Meta {
            timestamp,
            severity,
            message: message.join(SEPARATOR),
        });
    }

    let name = fields.next()?.to_string();
    let cdb = parse_hex(fields.next()?)?;
    let payload_sample = fields.next()?.to_string();
    let ok = match fields.next()? {
        "-" => None,
        "OK" => Some(true),
        "FAIL" => Some(false),
        _ => return None,
    };
    let detail = fields
        .next()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);

    Some(LogRecord::Transaction(TransactionLine {
        timestamp,
        severity,
        tag,
        name,
        cdb,
        payload_sample,
        ok,
        detail,
    }))
}

fn parse_hex(s: &str) -> Option<Vec<u8>> {
    s.split_whitespace()
        .map(|b| u8::from_str_radix(b, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sem_core::decoder::DecodeKind;

    fn decoded(name: &str, severity: Severity) -> Decoded {
        Decoded {
            name: name.to_string(),
            severity,
            kind: DecodeKind::Matched,
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:50123".parse().unwrap()
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_create_writes_opening_meta_lines() {
        let dir = tempfile::tempdir().unwrap();

        let logger = SessionLogger::create(dir.path(), peer()).unwrap();
        let path = logger.path().to_path_buf();
        logger.finish().unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("META | Session Started"));
        assert!(lines[1].ends_with("Client Connected: 127.0.0.1:50123"));
        assert!(lines[2].ends_with("Session Ended"));
    }

    #[test]
    fn test_transaction_writes_cmd_then_res() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let mut logger = SessionLogger::create(dir.path(), peer()).unwrap();
        let req = RequestFrame::read(vec![0xC6, 0x11, 0x00, 0x04], 4);
        let dec = decoded("GetAccv", Severity::Debug);
        let outcome = TransactionOutcome::ok(vec![0x98, 0x3A, 0, 0]);

        // Act
        logger.command(&dec, &req).unwrap();
        logger.response(&dec, &req, &outcome, &outcome.data).unwrap();
        let path = logger.path().to_path_buf();
        drop(logger);

        // Assert
        let lines = read_lines(&path);
        let cmd = parse_log_line(&lines[2]).unwrap();
        let res = parse_log_line(&lines[3]).unwrap();
        match (cmd, res) {
            (LogRecord::Transaction(cmd), LogRecord::Transaction(res)) => {
                assert_eq!(cmd.tag, LogTag::Cmd);
                assert_eq!(cmd.ok, None);
                assert_eq!(cmd.cdb, vec![0xC6, 0x11, 0x00, 0x04]);
                assert_eq!(res.tag, LogTag::Res);
                assert_eq!(res.severity, Severity::Debug);
                assert_eq!(res.payload_sample, "98 3A 00 00");
                assert_eq!(res.ok, Some(true));
                assert_eq!(res.detail, None);
            }
            other => panic!("unexpected records: {other:?}"),
        }
    }

    #[test]
    fn test_failed_response_is_logged_at_err_with_sense() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = SessionLogger::create(dir.path(), peer()).unwrap();
        let req = RequestFrame::no_data(vec![0x02, 0x01]);
        let outcome = TransactionOutcome::interlock("vacuum not ready");

        logger
            .response(&decoded("SetHT", Severity::Info), &req, &outcome, &[])
            .unwrap();
        let path = logger.path().to_path_buf();
        drop(logger);

        let last = read_lines(&path).pop().unwrap();
        let Some(LogRecord::Transaction(res)) = parse_log_line(&last) else {
            panic!("not a transaction line: {last}");
        };
        assert_eq!(res.severity, Severity::Error);
        assert_eq!(res.ok, Some(false));
        let detail = res.detail.unwrap();
        assert!(detail.starts_with("vacuum not ready; dev=0x02"));
        assert!(detail.contains("sense=70 00 05"));
    }

    #[test]
    fn test_long_payload_sample_is_elided() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = SessionLogger::create(dir.path(), peer()).unwrap();
        let req = RequestFrame::write(vec![0xFA, 0x00], vec![0xAB; 40]);

        logger.command(&decoded("FA<X>", Severity::Info), &req).unwrap();
        let path = logger.path().to_path_buf();
        drop(logger);

        let Some(LogRecord::Transaction(cmd)) = parse_log_line(&read_lines(&path)[2]) else {
            panic!("expected transaction line");
        };
        assert!(cmd.payload_sample.ends_with("AB..."));
    }

    #[test]
    fn test_parse_meta_and_garbage() {
        let meta = "2026-10-17 09:14:02.118 | ERR  | META | Error: connection closed mid-frame";
        assert_eq!(
            parse_log_line(meta),
            Some(LogRecord::Meta {
                timestamp: NaiveDateTime::parse_from_str(
                    "2026-10-17 09:14:02.118",
                    TIMESTAMP_FORMAT
                )
                .unwrap(),
                severity: Severity::Error,
                message: "Error: connection closed mid-frame".to_string(),
            })
        );
        assert_eq!(parse_log_line("not a log line"), None);
    }

    #[test]
    fn test_each_connection_gets_its_own_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = SessionLogger::create(dir.path(), peer()).unwrap();
        let b = SessionLogger::create(dir.path(), peer()).unwrap();
        assert_ne!(a.path(), b.path());
        assert_ne!(a.session_id(), b.session_id());
    }
}
