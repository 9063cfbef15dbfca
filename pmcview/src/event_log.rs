//! The recorded event stream.
//!
//! A sample log is a little-endian framed binary file: a magic/version
//! header followed by records of `kind`, `payload length`, `payload`.
//! Unrecognized kinds surface as [`Event::Unhandled`] so the dispatcher can
//! skip them without the reader knowing what they mean.

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

/// Map-in and exec events for this pid describe the kernel address space.
pub const KERNEL_PID: i32 = -1;

pub const LOG_MAGIC: [u8; 4] = *b"PMCL";
pub const LOG_VERSION: u32 = 1;

pub const RECORD_MAP_IN: u32 = 1;
pub const RECORD_EXEC: u32 = 2;
pub const RECORD_CALLCHAIN: u32 = 3;
pub const RECORD_PC_SAMPLE: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    MapIn {
        pid: i32,
        start: u64,
        path: String,
    },
    Exec {
        pid: i32,
        path: String,
        entry_addr: u64,
    },
    Sample {
        kernel: bool,
        pid: i32,
        pcs: Vec<u64>,
    },
    Unhandled {
        kind: u32,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a sample log (bad magic)")]
    BadMagic,

    #[error("unsupported sample log version {0}")]
    UnsupportedVersion(u32),

    #[error("truncated record (kind {kind}, {len} bytes)")]
    TruncatedRecord { kind: u32, len: u32 },
}

/// Kernel text lives above the 32-bit address range on the target.
pub fn is_kernel_address(pc: u64) -> bool {
    pc > u32::MAX as u64
}

pub struct EventLogReader<R: Read> {
    input: R,
    finished: bool,
}

impl<R: Read> EventLogReader<R> {
    pub fn new(mut input: R) -> Result<Self, LogError> {
        let mut magic = [0u8; 4];
        input.read_exact(&mut magic)?;
        if magic != LOG_MAGIC {
            return Err(LogError::BadMagic);
        }
        let version = input.read_u32::<LittleEndian>()?;
        if version != LOG_VERSION {
            return Err(LogError::UnsupportedVersion(version));
        }
        Ok(EventLogReader {
            input,
            finished: false,
        })
    }

    fn read_record(&mut self) -> Result<Option<Event>, LogError> {
        let kind = match self.input.read_u32::<LittleEndian>() {
            Ok(kind) => kind,
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let len = self.input.read_u32::<LittleEndian>()?;
        let mut payload = vec![0u8; len as usize];
        self.input
            .read_exact(&mut payload)
            .map_err(|_| LogError::TruncatedRecord { kind, len })?;

        let truncated = || LogError::TruncatedRecord { kind, len };
        let mut cursor = &payload[..];
        let event = match kind {
            RECORD_MAP_IN => {
                let pid = cursor.read_i32::<LittleEndian>().map_err(|_| truncated())?;
                let start = cursor.read_u64::<LittleEndian>().map_err(|_| truncated())?;
                let path = read_path(&mut cursor).ok_or_else(truncated)?;
                Event::MapIn { pid, start, path }
            }
            RECORD_EXEC => {
                let pid = cursor.read_i32::<LittleEndian>().map_err(|_| truncated())?;
                let entry_addr = cursor.read_u64::<LittleEndian>().map_err(|_| truncated())?;
                let path = read_path(&mut cursor).ok_or_else(truncated)?;
                Event::Exec {
                    pid,
                    path,
                    entry_addr,
                }
            }
            RECORD_CALLCHAIN => {
                let pid = cursor.read_i32::<LittleEndian>().map_err(|_| truncated())?;
                let usermode = cursor.read_u32::<LittleEndian>().map_err(|_| truncated())?;
                let npc = cursor.read_u32::<LittleEndian>().map_err(|_| truncated())?;
                let kernel = usermode == 0;
                let mut pcs = Vec::with_capacity(npc as usize);
                for _ in 0..npc {
                    let pc = cursor.read_u64::<LittleEndian>().map_err(|_| truncated())?;
                    // A captured chain stops at the first kernel/user
                    // transition; the rest belongs to the other mode.
                    if is_kernel_address(pc) != kernel {
                        break;
                    }
                    pcs.push(pc);
                }
                Event::Sample { kernel, pid, pcs }
            }
            RECORD_PC_SAMPLE => {
                let pid = cursor.read_i32::<LittleEndian>().map_err(|_| truncated())?;
                let usermode = cursor.read_u32::<LittleEndian>().map_err(|_| truncated())?;
                let pc = cursor.read_u64::<LittleEndian>().map_err(|_| truncated())?;
                Event::Sample {
                    kernel: usermode == 0,
                    pid,
                    pcs: vec![pc],
                }
            }
            kind => Event::Unhandled { kind },
        };
        Ok(Some(event))
    }
}

fn read_path(cursor: &mut &[u8]) -> Option<String> {
    let len = cursor.read_u16::<LittleEndian>().ok()? as usize;
    if cursor.len() < len {
        return None;
    }
    let (bytes, rest) = cursor.split_at(len);
    *cursor = rest;
    // Tolerate a recorded trailing NUL.
    let end = memchr::memchr(0, bytes).unwrap_or(bytes.len());
    Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

impl<R: Read> Iterator for EventLogReader<R> {
    type Item = Result<Event, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_record() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    fn header() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&LOG_MAGIC);
        out.write_u32::<LittleEndian>(LOG_VERSION).unwrap();
        out
    }

    fn push_record(out: &mut Vec<u8>, kind: u32, payload: &[u8]) {
        out.write_u32::<LittleEndian>(kind).unwrap();
        out.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
        out.extend_from_slice(payload);
    }

    fn map_in_payload(pid: i32, start: u64, path: &str) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.write_i32::<LittleEndian>(pid).unwrap();
        payload.write_u64::<LittleEndian>(start).unwrap();
        payload
            .write_u16::<LittleEndian>(path.len() as u16)
            .unwrap();
        payload.extend_from_slice(path.as_bytes());
        payload
    }

    fn callchain_payload(pid: i32, usermode: u32, pcs: &[u64]) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.write_i32::<LittleEndian>(pid).unwrap();
        payload.write_u32::<LittleEndian>(usermode).unwrap();
        payload.write_u32::<LittleEndian>(pcs.len() as u32).unwrap();
        for &pc in pcs {
            payload.write_u64::<LittleEndian>(pc).unwrap();
        }
        payload
    }

    #[test]
    fn reads_map_in_and_sample_records() {
        let mut log = header();
        push_record(
            &mut log,
            RECORD_MAP_IN,
            &map_in_payload(5, 0x400000, "/bin/dd"),
        );
        push_record(&mut log, RECORD_CALLCHAIN, &callchain_payload(5, 1, &[0x400540]));

        let events: Vec<Event> = EventLogReader::new(&log[..])
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            events,
            vec![
                Event::MapIn {
                    pid: 5,
                    start: 0x400000,
                    path: "/bin/dd".to_string(),
                },
                Event::Sample {
                    kernel: false,
                    pid: 5,
                    pcs: vec![0x400540],
                },
            ]
        );
    }

    #[test]
    fn callchain_truncates_at_mode_transition() {
        let mut log = header();
        push_record(
            &mut log,
            RECORD_CALLCHAIN,
            &callchain_payload(9, 0, &[0xffff_8000_0000_0100, 0xffff_8000_0000_0200, 0x400080]),
        );

        let events: Vec<Event> = EventLogReader::new(&log[..])
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            events,
            vec![Event::Sample {
                kernel: true,
                pid: 9,
                pcs: vec![0xffff_8000_0000_0100, 0xffff_8000_0000_0200],
            }]
        );
    }

    #[test]
    fn unknown_kinds_surface_as_unhandled() {
        let mut log = header();
        push_record(&mut log, 0x77, b"whatever");
        push_record(&mut log, RECORD_PC_SAMPLE, &{
            let mut payload = Vec::new();
            payload.write_i32::<LittleEndian>(3).unwrap();
            payload.write_u32::<LittleEndian>(1).unwrap();
            payload.write_u64::<LittleEndian>(0x1234).unwrap();
            payload
        });

        let events: Vec<Event> = EventLogReader::new(&log[..])
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            events,
            vec![
                Event::Unhandled { kind: 0x77 },
                Event::Sample {
                    kernel: false,
                    pid: 3,
                    pcs: vec![0x1234],
                },
            ]
        );
    }

    #[test]
    fn bad_magic_is_rejected() {
        let log = b"NOPE\x01\x00\x00\x00";
        assert!(matches!(
            EventLogReader::new(&log[..]),
            Err(LogError::BadMagic)
        ));
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut log = header();
        log.write_u32::<LittleEndian>(RECORD_MAP_IN).unwrap();
        log.write_u32::<LittleEndian>(64).unwrap();
        log.extend_from_slice(&[0u8; 10]);

        let results: Vec<_> = EventLogReader::new(&log[..]).unwrap().collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0],
            Err(LogError::TruncatedRecord { kind: RECORD_MAP_IN, .. })
        ));
    }
}
