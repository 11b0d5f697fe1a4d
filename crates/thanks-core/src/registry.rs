//! Channel registry backed by a flat CSV file.
//!
//! ## Schema
//!
//!   username,channel_id,message
//!
//! The header row decides column order; extra columns are carried through on
//! rewrite untouched. Rows with an empty `channel_id` are pending resolution
//! (see `thanks-channels fill`) and are not polled.
//!
//! Nothing is cached: the file may be edited by hand between poll cycles, so
//! every `load` re-reads it.

use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

use crate::model::Channel;
use crate::platform;

pub const DEFAULT_HEADER: [&str; 3] = ["username", "channel_id", "message"];

/// One raw row, including rows that have no channel id yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryRow {
    pub username: String,
    pub channel_id: String,
    pub message: String,
}

pub struct ChannelRegistry {
    path: PathBuf,
}

impl ChannelRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Channels ready to poll, in file order. Missing file is an empty registry.
    pub fn load(&self) -> anyhow::Result<Vec<Channel>> {
        let channels: Vec<Channel> = self
            .entries()?
            .into_iter()
            .filter(|row| !row.channel_id.is_empty())
            .map(|row| Channel {
                display_name: row.username.trim_start_matches('@').to_string(),
                channel_id: row.channel_id,
                message: row.message,
            })
            .collect();
        debug!("[registry] loaded {} channels from {:?}", channels.len(), self.path);
        Ok(channels)
    }

    /// Every row in the file, pending ones included.
    pub fn entries(&self) -> anyhow::Result<Vec<RegistryRow>> {
        let Some(table) = Table::read(&self.path)? else {
            return Ok(Vec::new());
        };
        if table.headers.is_empty() {
            return Ok(Vec::new());
        }

        let channel_col = table
            .column("channel_id")
            .ok_or_else(|| anyhow::anyhow!("{:?}: no channel_id column", self.path))?;
        let username_col = table.column("username");
        let message_col = table.column("message");

        Ok(table
            .rows
            .iter()
            .map(|cols| RegistryRow {
                username: field(cols, username_col),
                channel_id: field(cols, Some(channel_col)),
                message: field(cols, message_col),
            })
            .collect())
    }

    pub fn contains(&self, channel_id: &str) -> anyhow::Result<bool> {
        Ok(self.entries()?.iter().any(|row| row.channel_id == channel_id))
    }

    /// Append one channel, keeping existing rows and column order.
    /// Returns false (file untouched) on any read or write failure.
    pub fn append(&self, channel: &Channel) -> bool {
        let result = self.rewrite(|table| {
            let mut row = vec![String::new(); table.headers.len()];
            table.set(&mut row, "username", &channel.display_name);
            table.set(&mut row, "channel_id", &channel.channel_id);
            table.set(&mut row, "message", &channel.message);
            table.rows.push(row);
            true
        });
        match result {
            Ok(_) => true,
            Err(e) => {
                error!("[registry] append {} failed: {:#}", channel.channel_id, e);
                false
            }
        }
    }

    /// Fill the channel id of the first pending row for `username`.
    /// Returns false if no such row exists or the write fails.
    pub fn set_channel_id(&self, username: &str, channel_id: &str) -> bool {
        let wanted = username.trim_start_matches('@');
        let result = self.rewrite(|table| {
            let (Some(user_col), Some(id_col)) =
                (table.column("username"), table.column("channel_id"))
            else {
                return false;
            };
            let row = table.rows.iter_mut().find(|cols| {
                field(cols, Some(user_col)).trim_start_matches('@') == wanted
                    && field(cols, Some(id_col)).is_empty()
            });
            match row {
                Some(cols) => {
                    if cols.len() <= id_col {
                        cols.resize(id_col + 1, String::new());
                    }
                    cols[id_col] = channel_id.to_string();
                    true
                }
                None => false,
            }
        });
        match result {
            Ok(changed) => changed,
            Err(e) => {
                error!("[registry] update {} failed: {:#}", username, e);
                false
            }
        }
    }

    /// Read, mutate, atomically write back. The closure returns whether it
    /// changed anything; unchanged tables are not written.
    fn rewrite<F>(&self, mutate: F) -> anyhow::Result<bool>
    where
        F: FnOnce(&mut Table) -> bool,
    {
        let mut table = Table::read(&self.path)?.unwrap_or_default();
        if table.headers.is_empty() {
            table.headers = DEFAULT_HEADER.iter().map(|h| h.to_string()).collect();
        }
        for required in DEFAULT_HEADER {
            if table.column(required).is_none() {
                warn!("[registry] {:?} lacks column {}, adding it", self.path, required);
                table.headers.push(required.to_string());
            }
        }

        if !mutate(&mut table) {
            return Ok(false);
        }
        platform::write_atomic(&self.path, table.encode().as_bytes())?;
        Ok(true)
    }
}

fn field(cols: &[String], idx: Option<usize>) -> String {
    idx.and_then(|i| cols.get(i))
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

// ── CSV table ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn read(path: &Path) -> anyhow::Result<Option<Self>> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut records = parse_csv(content.trim_start_matches('\u{feff}'));
        if records.is_empty() {
            return Ok(Some(Self::default()));
        }
        let headers = records
            .remove(0)
            .into_iter()
            .map(|h| h.trim().to_string())
            .collect();
        Ok(Some(Self {
            headers,
            rows: records,
        }))
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn set(&self, row: &mut [String], name: &str, value: &str) {
        if let Some(i) = self.column(name) {
            row[i] = value.to_string();
        }
    }

    fn encode(&self) -> String {
        let mut out = encode_record(&self.headers);
        for row in &self.rows {
            out.push_str(&encode_record(row));
        }
        out
    }
}

/// Split CSV text into records. Quoted fields may hold commas, quotes (as
/// `""`) and line breaks. Blank lines are skipped.
fn parse_csv(content: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                push_record(&mut records, std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        push_record(&mut records, record);
    }
    records
}

fn push_record(records: &mut Vec<Vec<String>>, record: Vec<String>) {
    let blank = record.len() == 1 && record[0].trim().is_empty();
    if !blank {
        records.push(record);
    }
}

fn encode_record(fields: &[String]) -> String {
    let mut line = fields
        .iter()
        .map(|f| {
            if f.contains([',', '"', '\n', '\r']) {
                format!("\"{}\"", f.replace('"', "\"\""))
            } else {
                f.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(id: &str, name: &str, message: &str) -> Channel {
        Channel {
            channel_id: id.into(),
            display_name: name.into(),
            message: message.into(),
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ChannelRegistry::new(dir.path().join("channel_list.csv"));
        assert!(registry.load().unwrap().is_empty());
    }

    #[test]
    fn test_load_skips_pending_rows_and_keeps_messages_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channel_list.csv");
        std::fs::write(
            &path,
            "\u{feff}username,channel_id,message\n\
             @alpha,UCaaaaaaaaaaaaaaaaaaaaaa,first\n\
             pending,,never polled\n\
             \n\
             beta,UCbbbbbbbbbbbbbbbbbbbbbb,\"thanks, really\"\n",
        )
        .unwrap();

        let channels = ChannelRegistry::new(&path).load().unwrap();
        assert_eq!(
            channels,
            vec![
                channel("UCaaaaaaaaaaaaaaaaaaaaaa", "alpha", "first"),
                channel("UCbbbbbbbbbbbbbbbbbbbbbb", "beta", "thanks, really"),
            ]
        );
    }

    #[test]
    fn test_append_preserves_column_order_and_extra_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channel_list.csv");
        std::fs::write(&path, "message,channel_id,username,note\nhi,UC1,one,keep me\n").unwrap();

        let registry = ChannelRegistry::new(&path);
        assert!(registry.append(&channel("UC2", "two", "hello \"there\"")));

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "message,channel_id,username,note\nhi,UC1,one,keep me\n\"hello \"\"there\"\"\",UC2,two,\n"
        );
        assert_eq!(registry.load().unwrap().len(), 2);
    }

    #[test]
    fn test_append_creates_file_with_default_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("channel_list.csv");
        let registry = ChannelRegistry::new(&path);

        assert!(registry.append(&channel("UC1", "one", "thanks")));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "username,channel_id,message\none,UC1,thanks\n"
        );
    }

    #[test]
    fn test_append_failure_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channel_list.csv");
        std::fs::write(&path, "username,channel_id,message\none,UC1,hi\n").unwrap();
        std::fs::create_dir(dir.path().join("channel_list.csv.tmp")).unwrap();

        let registry = ChannelRegistry::new(&path);
        assert!(!registry.append(&channel("UC2", "two", "x")));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "username,channel_id,message\none,UC1,hi\n"
        );
    }

    #[test]
    fn test_set_channel_id_fills_pending_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channel_list.csv");
        std::fs::write(&path, "username,channel_id,message\n@someone,,hey\n").unwrap();

        let registry = ChannelRegistry::new(&path);
        assert!(registry.set_channel_id("someone", "UCxyz"));
        assert!(!registry.set_channel_id("someone", "UCother"));
        assert!(registry.contains("UCxyz").unwrap());
        assert_eq!(registry.load().unwrap()[0].message, "hey");
    }

    #[test]
    fn test_missing_channel_id_column_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channel_list.csv");
        std::fs::write(&path, "username,message\none,hi\n").unwrap();
        assert!(ChannelRegistry::new(&path).load().is_err());
    }

    #[test]
    fn test_parse_csv_quoted_newline() {
        let records = parse_csv("a,\"multi\nline\",c\r\nd,e,f");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0][1], "multi\nline");
        assert_eq!(records[1], vec!["d", "e", "f"]);
    }
}
