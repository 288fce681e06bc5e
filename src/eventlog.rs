/// Dispatch trace and replay verification.
///
/// Records every dispatched event into an append-only log. Two runs built
/// from the same configuration and seed must produce identical logs; the
/// hash, the text export and `logs_match` are the tools for checking that.

use std::io::{self, BufRead, Write};

use crate::event::{EventId, EventKind};
use crate::process::ProcessId;
use crate::store::StoreId;
use crate::time::SimTime;

// ── Hash utility ──────────────────────────────────────────────────────

/// Combine two u64 hashes deterministically.
pub fn hash_combine(a: u64, b: u64) -> u64 {
    let mut h = a;
    h = h.wrapping_mul(0x517cc1b727220a95);
    h = h.wrapping_add(b);
    h ^= h >> 32;
    h
}

// ── Trace entry ───────────────────────────────────────────────────────

/// Where a dispatched event was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum TraceTarget {
    /// Delivered to the suspended process.
    Process(ProcessId),
    /// Woke the combined wait it races in.
    Parent(EventId),
    /// Nobody waits on it yet.
    Parked,
}

/// One dispatched event.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TraceEntry {
    /// Position in the log.
    pub index: u64,
    pub time: SimTime,
    pub event: EventId,
    pub kind: EventKind,
    pub target: TraceTarget,
}

// ── Event Log ─────────────────────────────────────────────────────────

/// Append-only log of dispatched events.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: Vec<TraceEntry>,
}

impl EventLog {
    /// Create an empty event log.
    pub fn new() -> Self {
        EventLog {
            entries: Vec::new(),
        }
    }

    /// Record a dispatched event.
    pub fn record(&mut self, time: SimTime, event: EventId, kind: EventKind, target: TraceTarget) {
        let index = self.entries.len() as u64;
        self.entries.push(TraceEntry {
            index,
            time,
            event,
            kind,
            target,
        });
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compute a deterministic hash of the entire log.
    pub fn log_hash(&self) -> u64 {
        let mut h: u64 = 0;
        for entry in &self.entries {
            h = hash_combine(h, entry.event.raw());
            h = hash_combine(h, entry.time.as_f64().to_bits());
            h = hash_combine(h, kind_hash(&entry.kind));
            h = hash_combine(h, target_hash(&entry.target));
        }
        h
    }

    // ── Export / Import ───────────────────────────────────────────

    /// Export the log to a writer in a deterministic text format.
    ///
    /// One line per entry: `E <index> <time> <event> <kind> <target>`.
    pub fn export<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "# SIMFLOW EVENT LOG v1")?;
        writeln!(w, "# entries: {}", self.entries.len())?;

        for entry in &self.entries {
            write!(
                w,
                "E {} {} {} ",
                entry.index,
                entry.time.as_f64(),
                entry.event.raw()
            )?;
            serialize_kind(w, &entry.kind)?;
            write!(w, " ")?;
            serialize_target(w, &entry.target)?;
            writeln!(w)?;
        }

        Ok(())
    }

    /// Import a log from a reader.
    pub fn import<R: BufRead>(r: R) -> io::Result<Self> {
        let mut entries = Vec::new();

        for line in r.lines() {
            let line = line?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let entry = deserialize_entry(line)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            entries.push(entry);
        }

        Ok(EventLog { entries })
    }
}

// ── Verification ──────────────────────────────────────────────────────

/// Compare two logs for identical dispatch order, times and routing.
pub fn logs_match(a: &EventLog, b: &EventLog) -> bool {
    a.entries == b.entries
}

/// Index of the first entry where two logs diverge, if they do.
pub fn first_divergence(a: &EventLog, b: &EventLog) -> Option<usize> {
    let common = a.entries.len().min(b.entries.len());
    (0..common)
        .find(|&i| a.entries[i] != b.entries[i])
        .or_else(|| (a.entries.len() != b.entries.len()).then_some(common))
}

// ── Serialization helpers ─────────────────────────────────────────────

fn serialize_kind<W: Write>(w: &mut W, kind: &EventKind) -> io::Result<()> {
    match kind {
        EventKind::Start => write!(w, "Start"),
        EventKind::Timeout => write!(w, "Timeout"),
        EventKind::Get(store) => write!(w, "Get:{}", store.raw()),
        EventKind::Put(store) => write!(w, "Put:{}", store.raw()),
        EventKind::Interrupt => write!(w, "Interrupt"),
        EventKind::AnyOf => write!(w, "AnyOf"),
    }
}

fn serialize_target<W: Write>(w: &mut W, target: &TraceTarget) -> io::Result<()> {
    match target {
        TraceTarget::Process(pid) => write!(w, "P:{}", pid.raw()),
        TraceTarget::Parent(event) => write!(w, "E:{}", event.raw()),
        TraceTarget::Parked => write!(w, "-"),
    }
}

fn deserialize_entry(line: &str) -> Result<TraceEntry, String> {
    let parts: Vec<&str> = line.split(' ').collect();
    if parts.len() != 6 || parts[0] != "E" {
        return Err(format!("invalid entry line: {}", line));
    }

    let index: u64 = parts[1].parse().map_err(|e| format!("index: {}", e))?;
    let time: f64 = parts[2].parse().map_err(|e| format!("time: {}", e))?;
    let event: u64 = parts[3].parse().map_err(|e| format!("event: {}", e))?;
    let kind = deserialize_kind(parts[4])?;
    let target = deserialize_target(parts[5])?;

    Ok(TraceEntry {
        index,
        time: SimTime::new(time),
        event: EventId::new(event),
        kind,
        target,
    })
}

fn deserialize_kind(s: &str) -> Result<EventKind, String> {
    match s.split_once(':') {
        None => match s {
            "Start" => Ok(EventKind::Start),
            "Timeout" => Ok(EventKind::Timeout),
            "Interrupt" => Ok(EventKind::Interrupt),
            "AnyOf" => Ok(EventKind::AnyOf),
            other => Err(format!("unknown event kind: {}", other)),
        },
        Some(("Get", store)) => Ok(EventKind::Get(StoreId::new(parse_raw(store, "store")?))),
        Some(("Put", store)) => Ok(EventKind::Put(StoreId::new(parse_raw(store, "store")?))),
        Some(_) => Err(format!("unknown event kind: {}", s)),
    }
}

fn deserialize_target(s: &str) -> Result<TraceTarget, String> {
    if s == "-" {
        return Ok(TraceTarget::Parked);
    }
    match s.split_once(':') {
        Some(("P", raw)) => Ok(TraceTarget::Process(ProcessId::new(parse_raw(raw, "process")?))),
        Some(("E", raw)) => Ok(TraceTarget::Parent(EventId::new(parse_raw(raw, "parent")?))),
        _ => Err(format!("unknown target: {}", s)),
    }
}

fn parse_raw(s: &str, label: &str) -> Result<u64, String> {
    s.parse().map_err(|e| format!("{}: {}", label, e))
}

fn kind_hash(kind: &EventKind) -> u64 {
    match kind {
        EventKind::Start => 1,
        EventKind::Timeout => 2,
        EventKind::Get(store) => hash_combine(3, store.raw()),
        EventKind::Put(store) => hash_combine(4, store.raw()),
        EventKind::Interrupt => 5,
        EventKind::AnyOf => 6,
    }
}

fn target_hash(target: &TraceTarget) -> u64 {
    match target {
        TraceTarget::Process(pid) => hash_combine(1, pid.raw()),
        TraceTarget::Parent(event) => hash_combine(2, event.raw()),
        TraceTarget::Parked => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> EventLog {
        let mut log = EventLog::new();
        log.record(SimTime::ZERO, EventId::new(0), EventKind::Start, TraceTarget::Process(ProcessId::new(0)));
        log.record(
            SimTime::new(2.5),
            EventId::new(3),
            EventKind::Get(StoreId::new(1)),
            TraceTarget::Parent(EventId::new(5)),
        );
        log.record(SimTime::new(2.5), EventId::new(4), EventKind::Put(StoreId::new(1)), TraceTarget::Parked);
        log.record(
            SimTime::new(0.1 + 0.2),
            EventId::new(5),
            EventKind::AnyOf,
            TraceTarget::Process(ProcessId::new(2)),
        );
        log
    }

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(hash_combine(1, 2), hash_combine(1, 2));
        assert_ne!(hash_combine(1, 2), hash_combine(2, 1));
    }

    #[test]
    fn test_export_import_preserves_entries() {
        let log = sample_log();
        let mut buf = Vec::new();
        log.export(&mut buf).unwrap();

        let imported = EventLog::import(io::Cursor::new(&buf)).unwrap();
        assert!(logs_match(&log, &imported));
        assert_eq!(log.log_hash(), imported.log_hash());
    }

    #[test]
    fn test_export_format() {
        let log = sample_log();
        let mut buf = Vec::new();
        log.export(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.starts_with("# SIMFLOW EVENT LOG v1\n# entries: 4\n"));
        assert!(text.contains("E 1 2.5 3 Get:1 E:5\n"));
        assert!(text.contains("E 2 2.5 4 Put:1 -\n"));
    }

    #[test]
    fn test_import_rejects_garbage() {
        let bad = "E 0 1.0 7 Teleport P:1\n";
        assert!(EventLog::import(io::Cursor::new(bad)).is_err());
    }

    #[test]
    fn test_divergence_detection() {
        let a = sample_log();
        let mut b = sample_log();
        assert_eq!(first_divergence(&a, &b), None);

        b.record(SimTime::new(9.0), EventId::new(9), EventKind::Timeout, TraceTarget::Parked);
        assert!(!logs_match(&a, &b));
        assert_eq!(first_divergence(&a, &b), Some(4));
        assert_ne!(a.log_hash(), b.log_hash());
    }
}
