//! Tenancy resolution against admin-managed reference data.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::domain::PartitionKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingCompany {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Broker {
    pub code: String,
    pub name: String,
}

/// Funding account under a broker, owned by exactly one operating company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerAccount {
    pub code: String,
    pub broker_code: String,
    pub opco_code: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Snapshot of the reference entities the resolver reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionReferenceData {
    #[serde(default)]
    pub opcos: Vec<OperatingCompany>,
    #[serde(default)]
    pub brokers: Vec<Broker>,
    #[serde(default)]
    pub accounts: Vec<BrokerAccount>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionError {
    #[error("partition field '{field}' is required")]
    Missing { field: &'static str },
    #[error("partition is invalid: {reason}")]
    Invalid { reason: String },
    #[error("partition reference data unavailable: {0}")]
    Directory(String),
}

/// Read-only view of partition reference data. Lookups ignore case and
/// surrounding whitespace.
pub trait PartitionDirectory: Send + Sync {
    fn operating_company(&self, code: &str) -> Result<Option<OperatingCompany>, PartitionError>;
    fn broker(&self, code: &str) -> Result<Option<Broker>, PartitionError>;
    fn broker_account(&self, code: &str) -> Result<Option<BrokerAccount>, PartitionError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryPartitionDirectory {
    data: PartitionReferenceData,
}

impl InMemoryPartitionDirectory {
    pub fn new(data: PartitionReferenceData) -> Self {
        Self { data }
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, PartitionError> {
        let data: PartitionReferenceData = serde_json::from_reader(reader)
            .map_err(|err| PartitionError::Directory(err.to_string()))?;
        Ok(Self::new(data))
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, PartitionError> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|err| PartitionError::Directory(format!("{}: {err}", path.display())))?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn data(&self) -> &PartitionReferenceData {
        &self.data
    }
}

fn same_code(left: &str, right: &str) -> bool {
    left.trim().eq_ignore_ascii_case(right.trim())
}

impl PartitionDirectory for InMemoryPartitionDirectory {
    fn operating_company(&self, code: &str) -> Result<Option<OperatingCompany>, PartitionError> {
        Ok(self
            .data
            .opcos
            .iter()
            .find(|opco| same_code(&opco.code, code))
            .cloned())
    }

    fn broker(&self, code: &str) -> Result<Option<Broker>, PartitionError> {
        Ok(self
            .data
            .brokers
            .iter()
            .find(|broker| same_code(&broker.code, code))
            .cloned())
    }

    fn broker_account(&self, code: &str) -> Result<Option<BrokerAccount>, PartitionError> {
        Ok(self
            .data
            .accounts
            .iter()
            .find(|account| same_code(&account.code, code))
            .cloned())
    }
}

fn required<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str, PartitionError> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(PartitionError::Missing { field }),
    }
}

fn invalid(reason: impl Into<String>) -> PartitionError {
    PartitionError::Invalid {
        reason: reason.into(),
    }
}

/// Bind caller-supplied identifiers to a fully resolved partition triple.
/// Returned codes are the canonical spellings from the reference data.
pub fn resolve_partition<D: PartitionDirectory + ?Sized>(
    directory: &D,
    opco_code: Option<&str>,
    broker_account_code: Option<&str>,
) -> Result<PartitionKey, PartitionError> {
    let opco_code = required(opco_code, "opco_code")?;
    let account_code = required(broker_account_code, "broker_account_code")?;

    let opco = directory
        .operating_company(opco_code)?
        .ok_or_else(|| invalid(format!("unknown operating company '{opco_code}'")))?;
    let account = directory
        .broker_account(account_code)?
        .ok_or_else(|| invalid(format!("unknown broker account '{account_code}'")))?;

    if !same_code(&account.opco_code, &opco.code) {
        return Err(invalid(format!(
            "broker account '{}' does not belong to operating company '{}'",
            account.code, opco.code
        )));
    }
    if !account.active {
        return Err(invalid(format!(
            "broker account '{}' is inactive",
            account.code
        )));
    }

    let broker = directory.broker(&account.broker_code)?.ok_or_else(|| {
        invalid(format!(
            "broker '{}' for account '{}' is not registered",
            account.broker_code, account.code
        ))
    })?;

    Ok(PartitionKey {
        opco_code: opco.code,
        broker_code: broker.code,
        broker_account_code: account.code,
    })
}
