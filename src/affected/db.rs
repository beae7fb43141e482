//! SQLite backed package → affectedness table.
//!
//! The data is kept in a single unnormalized table so databases written by
//! earlier versions of the tool stay readable.

use super::record::{PackageRecord, Summary};
use crate::apt_lists::{AptLists, BinaryPackage};
use crate::error::{Result, ToolsError};
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS package_affected(
    package TEXT PRIMARY KEY UNIQUE NOT NULL,
    source TEXT NOT NULL,
    section TEXT NOT NULL,
    install_affected INTEGER,
    install_duration REAL,
    install_version TEXT,
    remove_affected INTEGER,
    remove_duration REAL)";

const SELECT_RECORDS: &str = "SELECT package, source, section, install_affected, install_duration, \
    install_version, remove_affected, remove_duration FROM package_affected";

/// Origin of the archives whose packages are tracked.
const UBUNTU_ORIGIN: &str = "Ubuntu";

pub struct AffectionDb {
    conn: Connection,
}

impl AffectionDb {
    /// Open (and create if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Opening affectedness database {}", path.display());
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(SCHEMA, [])?;
        Ok(Self { conn })
    }

    fn record_from_row(row: &Row) -> rusqlite::Result<PackageRecord> {
        Ok(PackageRecord {
            name: row.get(0)?,
            source: row.get(1)?,
            section: row.get(2)?,
            install_affected: row.get(3)?,
            install_duration: row.get(4)?,
            install_version: row.get(5)?,
            remove_affected: row.get(6)?,
            remove_duration: row.get(7)?,
        })
    }

    /// Add an unprocessed package.
    pub fn add_package(&self, name: &str, source: &str, section: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO package_affected (package, source, section) VALUES (?1, ?2, ?3)",
            params![name, source, section],
        )?;
        Ok(())
    }

    /// Add every Ubuntu package for `architecture` found in the APT lists.
    ///
    /// The highest Ubuntu version of a package determines its source and
    /// section. Packages already in the database are left alone. Returns
    /// the number of distinct packages with an Ubuntu origin.
    pub fn add_from_apt_lists(&mut self, lists: &AptLists, architecture: &str) -> Result<usize> {
        let packages = lists.packages()?;
        let mut newest: BTreeMap<&str, &BinaryPackage> = BTreeMap::new();
        for package in packages.iter().filter(|package| {
            package.matches_architecture(architecture)
                && package.origin.as_deref() == Some(UBUNTU_ORIGIN)
        }) {
            newest
                .entry(package.name.as_str())
                .and_modify(|current| {
                    if package.version > current.version {
                        *current = package;
                    }
                })
                .or_insert(package);
        }

        let tx = self.conn.transaction()?;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO package_affected (package, source, section) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(package) DO NOTHING",
            )?;
            for package in newest.values() {
                insert.execute(params![package.name, package.source, package.component])?;
            }
        }
        tx.commit()?;

        info!("Added {} packages from the APT lists.", newest.len());
        Ok(newest.len())
    }

    /// Install-affected flag of `name`.
    pub fn affected(&self, name: &str) -> Result<Option<bool>> {
        self.conn
            .query_row(
                "SELECT install_affected FROM package_affected WHERE package = ?1",
                [name],
                |row| row.get::<_, Option<bool>>(0),
            )
            .optional()?
            .ok_or_else(|| ToolsError::UnknownPackage(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Result<PackageRecord> {
        let mut statement =
            self.conn.prepare_cached(&format!("{} WHERE package = ?1", SELECT_RECORDS))?;
        statement
            .query_row([name], Self::record_from_row)
            .optional()?
            .ok_or_else(|| ToolsError::UnknownPackage(name.to_string()))
    }

    /// All records ordered by package name.
    pub fn records(&self) -> Result<Vec<PackageRecord>> {
        let mut statement =
            self.conn.prepare_cached(&format!("{} ORDER BY package ASC", SELECT_RECORDS))?;
        let records = statement
            .query_map([], Self::record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Package names in ascending order.
    pub fn names(&self) -> Result<Vec<String>> {
        let mut statement = self
            .conn
            .prepare_cached("SELECT package FROM package_affected ORDER BY package ASC")?;
        let names = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    /// Package name → install-affected flag.
    pub fn affection_map(&self) -> Result<BTreeMap<String, Option<bool>>> {
        let mut statement = self
            .conn
            .prepare_cached("SELECT package, install_affected FROM package_affected")?;
        let map = statement
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<bool>>(1)?))
            })?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
        Ok(map)
    }

    pub fn len(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM package_affected", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn is_empty(&self) -> Result<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM package_affected LIMIT 1", [], |_| Ok(()))
            .optional()?;
        Ok(found.is_none())
    }

    /// Names of packages that need processing or a retry.
    ///
    /// `package_regex` and `section_regex` are searched for anywhere in the
    /// name and section. Ordered by section, then name.
    pub fn unprocessed(
        &self,
        package_regex: &str,
        section_regex: &str,
        retry: f64,
    ) -> Result<Vec<String>> {
        let package_re = Regex::new(package_regex)?;
        let section_re = Regex::new(section_regex)?;

        let mut statement = self.conn.prepare_cached(&format!(
            "{} ORDER BY section ASC, package ASC",
            SELECT_RECORDS
        ))?;
        let records = statement
            .query_map([], Self::record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records
            .into_iter()
            .filter(|record| {
                (record.needs_processing() || record.needs_retry(retry))
                    && package_re.is_match(&record.name)
                    && section_re.is_match(&record.section)
            })
            .map(|record| record.name)
            .collect())
    }

    /// Store the result of an install probe.
    pub fn set_install(
        &self,
        name: &str,
        affected: Option<bool>,
        duration: f64,
        version: Option<&str>,
    ) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE package_affected \
             SET install_affected = ?1, install_duration = ?2, install_version = ?3 \
             WHERE package = ?4",
            params![affected, duration, version, name],
        )?;
        if updated == 0 {
            return Err(ToolsError::UnknownPackage(name.to_string()));
        }
        Ok(())
    }

    /// Store the result of a removal probe.
    pub fn set_remove(&self, name: &str, affected: Option<bool>, duration: f64) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE package_affected SET remove_affected = ?1, remove_duration = ?2 \
             WHERE package = ?3",
            params![affected, duration, name],
        )?;
        if updated == 0 {
            return Err(ToolsError::UnknownPackage(name.to_string()));
        }
        Ok(())
    }

    pub fn summary(&self) -> Result<Summary> {
        Ok(Summary::from_records(&self.records()?))
    }

    /// Write all records as a JSON array to `path`.
    pub fn export_json(&self, path: impl AsRef<Path>) -> Result<usize> {
        let records = self.records()?;
        let file = std::fs::File::create(path.as_ref())?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), &records)?;
        info!("Exported {} records to {}", records.len(), path.as_ref().display());
        Ok(records.len())
    }
}
