//! Login accounting records (utmp/wtmp).
//!
//! Records use the glibc x86-64 layout: 384 bytes each, little-endian
//! integers, NUL-padded strings and a 16 byte address in network order.
//!
//! | offset | size | field                    |
//! |--------|------|--------------------------|
//! | 0      | 2    | type (+2 padding)        |
//! | 4      | 4    | pid                      |
//! | 8      | 32   | line                     |
//! | 40     | 4    | id                       |
//! | 44     | 32   | user                     |
//! | 76     | 256  | host                     |
//! | 332    | 4    | exit status              |
//! | 336    | 4    | session                  |
//! | 340    | 8    | seconds + microseconds   |
//! | 348    | 16   | address                  |
//! | 364    | 20   | unused                   |

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use tracing::debug;

use crate::error::{FirewallError, Result};

/// Size of one on-disk record.
pub const RECORD_SIZE: usize = 384;

/// Default login history file.
pub const DEFAULT_WTMP_FILE: &str = "/var/log/wtmp";

const LINE: (usize, usize) = (8, 32);
const ID: (usize, usize) = (40, 4);
const USER: (usize, usize) = (44, 32);
const HOST: (usize, usize) = (76, 256);
const PID: usize = 4;
const SESSION: usize = 336;
const TV_SEC: usize = 340;
const TV_USEC: usize = 344;
const ADDR: usize = 348;

/// Record types from `<utmp.h>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Empty,
    RunLevel,
    BootTime,
    NewTime,
    OldTime,
    InitProcess,
    LoginProcess,
    UserProcess,
    DeadProcess,
    Accounting,
    Unknown(i16),
}

impl From<i16> for RecordType {
    fn from(value: i16) -> Self {
        match value {
            0 => RecordType::Empty,
            1 => RecordType::RunLevel,
            2 => RecordType::BootTime,
            3 => RecordType::NewTime,
            4 => RecordType::OldTime,
            5 => RecordType::InitProcess,
            6 => RecordType::LoginProcess,
            7 => RecordType::UserProcess,
            8 => RecordType::DeadProcess,
            9 => RecordType::Accounting,
            other => RecordType::Unknown(other),
        }
    }
}

/// One decoded login record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UtmpRecord {
    pub record_type: RecordType,
    pub pid: i32,
    pub line: String,
    pub id: String,
    pub user: String,
    pub host: String,
    pub session: i32,
    pub time: DateTime<Utc>,
    pub ip: Option<IpAddr>,
}

impl UtmpRecord {
    /// Decode a single record.
    pub fn decode(raw: &[u8; RECORD_SIZE]) -> Self {
        let host = c_string(raw, HOST);
        let ip = decode_address(&raw[ADDR..ADDR + 16]).or_else(|| host_address(&host));

        Self {
            record_type: RecordType::from(i16::from_le_bytes([raw[0], raw[1]])),
            pid: le_i32(raw, PID),
            line: c_string(raw, LINE),
            id: c_string(raw, ID),
            user: c_string(raw, USER),
            host,
            session: le_i32(raw, SESSION),
            time: timestamp(le_i32(raw, TV_SEC), le_i32(raw, TV_USEC)),
            ip,
        }
    }

    pub fn is_user_process(&self) -> bool {
        self.record_type == RecordType::UserProcess
    }
}

/// Read every record from a utmp/wtmp file, in file order.
pub fn read<P: AsRef<Path>>(path: P) -> Result<Vec<UtmpRecord>> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| FirewallError::io(path, e))?;
    let records = read_bytes(path, &data)?;
    debug!("Read {} login records from {}", records.len(), path.display());
    Ok(records)
}

/// Decode an in-memory record stream. `path` is only used for errors.
pub fn read_bytes(path: &Path, data: &[u8]) -> Result<Vec<UtmpRecord>> {
    if data.len() % RECORD_SIZE != 0 {
        return Err(FirewallError::CorruptRecord {
            path: path.to_path_buf(),
            len: data.len(),
            record_size: RECORD_SIZE,
        });
    }

    Ok(data
        .chunks_exact(RECORD_SIZE)
        .filter_map(|chunk| <&[u8; RECORD_SIZE]>::try_from(chunk).ok())
        .map(UtmpRecord::decode)
        .collect())
}

fn le_i32(raw: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]])
}

fn c_string(raw: &[u8], (offset, len): (usize, usize)) -> String {
    let field = &raw[offset..offset + len];
    let end = field.iter().position(|&b| b == 0).unwrap_or(len);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn timestamp(sec: i32, usec: i32) -> DateTime<Utc> {
    let usec = u32::try_from(usec).unwrap_or(0).min(999_999);
    DateTime::from_timestamp(i64::from(sec), usec * 1000).unwrap_or_default()
}

/// Interpret the address field.
///
/// The kernel-side writers store IPv4 either in the first word only or as
/// an IPv4-mapped IPv6 address. Both come back as plain IPv4.
fn decode_address(bytes: &[u8]) -> Option<IpAddr> {
    let octets: [u8; 16] = bytes.try_into().ok()?;
    let words = [
        u32::from_be_bytes([octets[0], octets[1], octets[2], octets[3]]),
        u32::from_be_bytes([octets[4], octets[5], octets[6], octets[7]]),
        u32::from_be_bytes([octets[8], octets[9], octets[10], octets[11]]),
        u32::from_be_bytes([octets[12], octets[13], octets[14], octets[15]]),
    ];

    match words {
        [0, 0, 0, 0] => None,
        [0, 0, 0x0000_ffff, v4] => Some(IpAddr::V4(Ipv4Addr::from(v4))),
        [v4, 0, 0, 0] => Some(IpAddr::V4(Ipv4Addr::from(v4))),
        _ => Some(IpAddr::V6(Ipv6Addr::from(octets))),
    }
}

/// Fall back to a host field that is itself a literal address.
fn host_address(host: &str) -> Option<IpAddr> {
    match host.parse::<IpAddr>().ok()? {
        IpAddr::V6(v6) => Some(
            v6.to_ipv4_mapped()
                .map(IpAddr::V4)
                .unwrap_or(IpAddr::V6(v6)),
        ),
        v4 => Some(v4),
    }
}
