use crate::infra::{build_intake_service, ApiIntakeService};
use clap::Args;
use fleet_intake::config::AppConfig;
use fleet_intake::error::AppError;
use fleet_intake::intake::IntakeRequest;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub(crate) struct UploadArgs {
    /// Manifest or trip log to read
    #[arg(long)]
    pub(crate) file: PathBuf,
    /// Operating company code the file belongs to
    #[arg(long)]
    pub(crate) opco: Option<String>,
    /// Broker account code the file belongs to
    #[arg(long)]
    pub(crate) account: Option<String>,
    /// Import even when the same file already completed in this partition
    #[arg(long)]
    pub(crate) force: bool,
}

pub(crate) fn run_preview(args: UploadArgs) -> Result<(), AppError> {
    let service = configured_service()?;
    let request = read_upload(&args)?;
    let preview = service.preview(&request)?;
    print_json(&mut std::io::stdout().lock(), &preview)
}

/// The batch store lives only for this process; the ledger persists when
/// `INTAKE_AUDIT_LOG_PATH` is set.
pub(crate) fn run_commit(args: UploadArgs) -> Result<(), AppError> {
    let service = configured_service()?;
    let request = read_upload(&args)?;
    let result = service.commit(&request)?;
    print_json(&mut std::io::stdout().lock(), &result)
}

pub(crate) fn run_formats() -> Result<(), AppError> {
    let service = configured_service()?;
    print_json(&mut std::io::stdout().lock(), &service.catalog())
}

fn configured_service() -> Result<ApiIntakeService, AppError> {
    let config = AppConfig::load()?;
    build_intake_service(&config.intake)
}

pub(crate) fn read_upload(args: &UploadArgs) -> Result<IntakeRequest, AppError> {
    let content = std::fs::read_to_string(&args.file)?;
    Ok(IntakeRequest {
        file_name: display_name(&args.file),
        content,
        opco_code: args.opco.clone(),
        broker_account_code: args.account.clone(),
        force: args.force,
    })
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<(), AppError> {
    serde_json::to_writer_pretty(&mut *out, value).map_err(std::io::Error::from)?;
    writeln!(out)?;
    Ok(())
}
