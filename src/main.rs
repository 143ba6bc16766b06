/// Version injected at compile time via VCENSUS_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("VCENSUS_VERSION") {
    Some(v) => v,
    None => "dev",
};

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use vcensus::aws::{client::AwsClient, AwsCredentials, AwsProvider};
use vcensus::azure::{auth::AzureCredentials, client::AzureClient, AzureProvider};
use vcensus::config::Config;
use vcensus::gcp::{auth as gcp_auth, client::GcpClient, GcpProvider};
use vcensus::inventory::{run_scan, Provider, Scope, ScopeRequest, SetupError};
use vcensus::report::{self, OutputMode};

/// Estimate licensable vCPU capacity across a cloud account hierarchy
#[derive(Parser, Debug)]
#[command(name = "vcensus", version = VERSION, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    cloud: Cloud,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Subcommand, Debug)]
enum Cloud {
    /// Google Cloud: organizations, folders and projects
    Gcp {
        /// Project ids (repeatable or comma separated)
        #[arg(long, value_delimiter = ',')]
        project: Vec<String>,

        /// Folder ids
        #[arg(long, value_delimiter = ',')]
        folder: Vec<String>,

        /// Organization ids
        #[arg(long, value_delimiter = ',')]
        organization: Vec<String>,
    },

    /// Azure: management groups and subscriptions
    Azure {
        #[arg(long, value_delimiter = ',')]
        subscription: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        management_group: Vec<String>,
    },

    /// AWS: organization root, organizational units and accounts
    Aws {
        #[arg(long, value_delimiter = ',')]
        account: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        organizational_unit: Vec<String>,

        /// Scan the whole organization from its root
        #[arg(long)]
        organization: bool,

        /// Role assumed in member accounts
        #[arg(long)]
        role_name: Option<String>,
    },
}

#[derive(ClapArgs, Debug)]
struct CommonArgs {
    /// Only scan these regions
    #[arg(long, value_delimiter = ',', global = true)]
    regions: Vec<String>,

    #[arg(long, value_enum, default_value = "full", global = true)]
    output: OutputMode,

    /// Log progress (raises the log level to at least info)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Maximum concurrent API calls
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(
    level: LogLevel,
    log_file: Option<&PathBuf>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let (non_blocking, guard) = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    tracing::info!("vcensus {} started with log level: {:?}", VERSION, level);
    if let Some(path) = log_file {
        tracing::info!("Log file: {:?}", path);
    }

    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.common.verbose {
        args.common.log_level.max(LogLevel::Info)
    } else {
        args.common.log_level
    };
    let _log_guard = match setup_logging(level, args.common.log_file.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load();
    let options = config.scan_options(args.common.concurrency, &args.common.regions);
    let timeout = config.request_timeout();
    let mode = args.common.output;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing in-flight calls");
            eprintln!("Interrupted: reporting partial results");
            on_interrupt.cancel();
        }
    });

    match args.cloud {
        Cloud::Gcp {
            project,
            folder,
            organization,
        } => {
            let request = gcp_request(&project, &folder, &organization)?;
            let credentials = gcp_auth::GcpCredentials::from_env().await?;
            preflight("GCP", credentials.get_token().await)?;
            let provider = GcpProvider::new(GcpClient::new(credentials, timeout)?);
            scan(provider, request, &options, cancel, mode).await
        }

        Cloud::Azure {
            subscription,
            management_group,
        } => {
            let request = azure_request(&subscription, &management_group)?;
            let credentials = AzureCredentials::from_env();
            preflight("Azure", credentials.get_token().await)?;
            let provider = AzureProvider::new(AzureClient::new(credentials, timeout)?);
            scan(provider, request, &options, cancel, mode).await
        }

        Cloud::Aws {
            account,
            organizational_unit,
            organization,
            role_name,
        } => {
            let credentials = AwsCredentials::load()?;
            let role_name = config.effective_role_name(role_name.as_deref());
            let provider = AwsProvider::new(AwsClient::new(timeout)?, credentials, role_name);
            preflight("AWS", provider.caller_account().await.map(|_| ()))?;

            let mut roots = aws_roots(&account, &organizational_unit)?;
            if organization {
                roots.extend(
                    provider
                        .organization_roots()
                        .await
                        .context("Failed to list organization roots")?,
                );
            }
            scan(provider, request(roots), &options, cancel, mode).await
        }
    }
}

/// A credential that cannot produce a token is fatal before any scope is
/// touched
fn preflight<T>(provider: &'static str, result: Result<T>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.downcast_ref::<SetupError>().is_some() => Err(e),
        Err(e) => Err(SetupError::NoCredentials {
            provider,
            reason: format!("{:#}", e),
        }
        .into()),
    }
}

async fn scan<P: Provider>(
    provider: P,
    request: ScopeRequest,
    options: &vcensus::inventory::ScanOptions,
    cancel: CancellationToken,
    mode: OutputMode,
) -> Result<()> {
    let report = run_scan(Arc::new(provider), request, options, cancel).await;
    tracing::info!("{} SKU lookups", report.sku_lookups);
    report::render(std::io::stdout().lock(), &report, mode).context("Failed to write report")
}

// ============================================================================
// Scope selection
// ============================================================================

fn request(roots: Vec<Scope>) -> ScopeRequest {
    if roots.is_empty() {
        ScopeRequest::Visible
    } else {
        ScopeRequest::Roots(roots)
    }
}

fn gcp_request(projects: &[String], folders: &[String], organizations: &[String]) -> Result<ScopeRequest, SetupError> {
    let mut roots = Vec::new();
    for id in organizations {
        let id = id.trim().trim_start_matches("organizations/");
        if !gcp_auth::validate_numeric_id(id) {
            return Err(SetupError::InvalidScope(format!("organization id '{}' is not numeric", id)));
        }
        roots.push(Scope::organization(id));
    }
    for id in folders {
        let id = id.trim().trim_start_matches("folders/");
        if !gcp_auth::validate_numeric_id(id) {
            return Err(SetupError::InvalidScope(format!("folder id '{}' is not numeric", id)));
        }
        roots.push(Scope::folder(id));
    }
    for id in projects {
        let id = id.trim();
        if !gcp_auth::validate_project_id(id) {
            return Err(SetupError::InvalidScope(format!("'{}' is not a valid project id", id)));
        }
        roots.push(Scope::terminal(id));
    }
    Ok(request(roots))
}

fn azure_request(subscriptions: &[String], groups: &[String]) -> Result<ScopeRequest, SetupError> {
    let mut roots = Vec::new();
    for id in groups.iter().map(|s| s.trim()) {
        if id.is_empty() || id.contains('/') {
            return Err(SetupError::InvalidScope(format!("'{}' is not a management group name", id)));
        }
        roots.push(Scope::folder(id));
    }
    for id in subscriptions.iter().map(|s| s.trim()) {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
            return Err(SetupError::InvalidScope(format!("'{}' is not a subscription id", id)));
        }
        roots.push(Scope::terminal(id));
    }
    Ok(request(roots))
}

fn aws_roots(accounts: &[String], units: &[String]) -> Result<Vec<Scope>, SetupError> {
    let mut roots = Vec::new();
    for id in units.iter().map(|s| s.trim()) {
        if !(id.starts_with("ou-") || id.starts_with("r-")) {
            return Err(SetupError::InvalidScope(format!("'{}' is not an organizational unit or root id", id)));
        }
        roots.push(Scope::folder(id));
    }
    for id in accounts.iter().map(|s| s.trim()) {
        if id.len() != 12 || !id.chars().all(|c| c.is_ascii_digit()) {
            return Err(SetupError::InvalidScope(format!("'{}' is not a 12-digit account id", id)));
        }
        roots.push(Scope::terminal(id));
    }
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gcp_request() {
        let request = gcp_request(
            &["my-project-1".to_string()],
            &["folders/123".to_string()],
            &[],
        )
        .unwrap();
        assert_eq!(
            request,
            ScopeRequest::Roots(vec![Scope::folder("123"), Scope::terminal("my-project-1")])
        );

        assert_eq!(gcp_request(&[], &[], &[]).unwrap(), ScopeRequest::Visible);
        assert!(gcp_request(&["Bad_Project".to_string()], &[], &[]).is_err());
        assert!(gcp_request(&[], &[], &["org-x".to_string()]).is_err());
    }

    #[test]
    fn test_aws_roots() {
        let roots = aws_roots(&["111122223333".to_string()], &["ou-ab12-cdef3456".to_string()]).unwrap();
        assert_eq!(roots, vec![Scope::folder("ou-ab12-cdef3456"), Scope::terminal("111122223333")]);
        assert!(aws_roots(&["1234".to_string()], &[]).is_err());
        assert!(aws_roots(&[], &["folder-1".to_string()]).is_err());
    }

    #[test]
    fn test_azure_request() {
        let request = azure_request(&["0000-aaaa".to_string()], &["mg-root".to_string()]).unwrap();
        assert_eq!(
            request,
            ScopeRequest::Roots(vec![Scope::folder("mg-root"), Scope::terminal("0000-aaaa")])
        );
        assert!(azure_request(&["not a sub".to_string()], &[]).is_err());
    }

    #[test]
    fn test_verbose_raises_level() {
        assert_eq!(LogLevel::Warn.max(LogLevel::Info), LogLevel::Info);
        assert_eq!(LogLevel::Debug.max(LogLevel::Info), LogLevel::Debug);
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "vcensus",
            "aws",
            "--organization",
            "--regions",
            "eu-west-1,us-east-1",
            "--output",
            "data-no-header",
        ])
        .unwrap();
        assert_eq!(args.common.regions, vec!["eu-west-1", "us-east-1"]);
        assert_eq!(args.common.output, OutputMode::DataNoHeader);
        assert!(matches!(args.cloud, Cloud::Aws { organization: true, .. }));
    }
}
