//! ipfw(8) table backend.
//!
//! Drives the `ipfw` utility (`ipfw -q table N add A/P`) and reads the
//! table count from the `net.inet.ip.fw.tables_max` sysctl. The tool
//! reports an existing key with "File exists", which maps to
//! [`AdapterError::AlreadyExists`].

use std::path::PathBuf;
use std::process::{Command, Output};

use tracing::debug;

use super::{AdapterError, TableAdapter, TableEntry};

const TABLES_MAX_SYSCTL: &str = "net.inet.ip.fw.tables_max";

/// Table backend that shells out to ipfw.
#[derive(Debug, Clone)]
pub struct IpfwTables {
    ipfw: PathBuf,
    sysctl: PathBuf,
}

impl IpfwTables {
    /// Create a backend using the ipfw binary at `ipfw`.
    pub fn new(ipfw: impl Into<PathBuf>) -> Self {
        Self {
            ipfw: ipfw.into(),
            sysctl: PathBuf::from("/sbin/sysctl"),
        }
    }

    /// Override the sysctl binary used for the table-count query.
    pub fn with_sysctl(mut self, sysctl: impl Into<PathBuf>) -> Self {
        self.sysctl = sysctl.into();
        self
    }

    fn table(&self, table: u8, args: &[&str]) -> Result<(), AdapterError> {
        let table = table.to_string();
        let mut argv = vec!["-q", "table", table.as_str()];
        argv.extend_from_slice(args);
        debug!(ipfw = %self.ipfw.display(), args = ?argv, "Running ipfw");

        let output = Command::new(&self.ipfw).args(&argv).output()?;
        check(output)
    }
}

fn check(output: Output) -> Result<(), AdapterError> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.contains("File exists") {
        return Err(AdapterError::AlreadyExists);
    }
    Err(AdapterError::Failed(if stderr.is_empty() {
        format!("ipfw exited with {}", output.status)
    } else {
        stderr.to_string()
    }))
}

impl TableAdapter for IpfwTables {
    fn name(&self) -> &str {
        "ipfw"
    }

    fn max_tables(&mut self) -> Result<u32, AdapterError> {
        let output = Command::new(&self.sysctl)
            .args(["-n", TABLES_MAX_SYSCTL])
            .output()?;
        if !output.status.success() {
            return Err(AdapterError::Failed(format!(
                "sysctl {TABLES_MAX_SYSCTL} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let value = String::from_utf8_lossy(&output.stdout);
        value.trim().parse::<u32>().map_err(|e| {
            AdapterError::Failed(format!(
                "unexpected {TABLES_MAX_SYSCTL} value {:?}: {e}",
                value.trim()
            ))
        })
    }

    fn add(&mut self, entry: &TableEntry) -> Result<(), AdapterError> {
        self.table(entry.table, &["add", entry.to_string().as_str()])
    }

    fn delete(&mut self, entry: &TableEntry) -> Result<(), AdapterError> {
        self.table(entry.table, &["delete", entry.to_string().as_str()])
    }

    fn flush(&mut self, table: u8) -> Result<(), AdapterError> {
        self.table(table, &["flush"])
    }
}
