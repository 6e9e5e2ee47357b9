//! mtls-guard - mutual-TLS server and certificate store tooling

use std::fs;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use mtls_guard::{
    cli::{CertsCommand, Cli, Command},
    client::{ClientIdentity, ClientOutcome, request},
    config::Config,
    inspect::{StoreInventory, inspect, inventory},
    provision::{SubjectParams, bootstrap, issue_client},
    server::MtlsServer,
    setup_tracing,
    store::CertificateStore,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Certs(cmd)) => run_certs_command(cmd, &config),
        Some(Command::Client { id, path }) => run_client(&config, &id, &path).await,
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> mtls_guard::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    if let Some(ref dir) = cli.cert_dir {
        config.trust.cert_dir = dir.clone();
    }
    Ok(config)
}

/// Run the mTLS server
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        cert_dir = %config.trust.cert_dir.display(),
        "Starting mtls-guard"
    );

    // Trust material is loaded here; nothing is bound if it fails.
    let server = match MtlsServer::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to load trust material: {e}");
            if e.is_startup_error() {
                error!("Run `mtls-guard certs init` to create a certificate store");
            }
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}

/// Call a running server and print what came back
async fn run_client(config: &Config, id: &str, path: &str) -> ExitCode {
    let identity = match ClientIdentity::parse(id) {
        Ok(identity) => identity,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    match request(config, &identity, path).await {
        Ok(ClientOutcome::Response { status, body }) => {
            println!("✅ {identity} → {path}: HTTP {status}");
            let printed = print_json(&body);
            if (200..300).contains(&status) {
                printed
            } else {
                ExitCode::FAILURE
            }
        }
        Ok(ClientOutcome::Refused { detail }) => {
            println!("🚫 {identity} → {path}: refused during TLS ({detail})");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run certificate store commands
fn run_certs_command(cmd: CertsCommand, config: &Config) -> ExitCode {
    let store = config.trust.store();

    match cmd {
        CertsCommand::Init {
            force,
            ca_name,
            server_name,
        } => match bootstrap(&store, &ca_name, &server_name, force) {
            Ok(report) => {
                for id in &report.created {
                    println!("✅ Created {id}");
                }
                for id in &report.skipped {
                    println!("⏭️  Kept existing {id} (use --force to replace)");
                }
                println!("\nCertificate store: {}", store.dir().display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("❌ Initialisation failed: {e}");
                ExitCode::FAILURE
            }
        },

        CertsCommand::IssueClient {
            name,
            organization,
            unit,
            email,
            days,
            force,
        } => {
            let mut subject = match SubjectParams::client(&name).valid_for_days(days) {
                Ok(subject) => subject,
                Err(e) => {
                    eprintln!("❌ Issuance failed: {e}");
                    return ExitCode::FAILURE;
                }
            };
            if let Some(o) = organization {
                subject = subject.with_organization(o);
            }
            if let Some(ou) = unit {
                subject = subject.with_organizational_unit(ou);
            }
            if let Some(email) = email {
                subject = subject.with_email(email);
            }

            match issue_client(&store, &name, &subject, force) {
                Ok(path) => {
                    println!("✅ Issued {name}: {}", path.display());
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("❌ Issuance failed: {e}");
                    ExitCode::FAILURE
                }
            }
        }

        CertsCommand::Status { format } => match inventory(&store) {
            Ok(inv) if format == "json" => print_json(&inv),
            Ok(inv) => {
                print_inventory(&store, &inv);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("❌ Failed to read certificate store: {e}");
                ExitCode::FAILURE
            }
        },

        CertsCommand::Inspect { id } => {
            let bytes = match read_certificate(&store, &id) {
                Ok(bytes) => bytes,
                Err(e) => {
                    eprintln!("❌ {e}");
                    return ExitCode::FAILURE;
                }
            };
            match inspect(&bytes) {
                Ok(fields) => print_json(&fields),
                Err(e) => {
                    eprintln!("❌ {e}");
                    ExitCode::FAILURE
                }
            }
        }

        CertsCommand::Pem { id } => match store
            .resolve(&id)
            .and_then(|path| fs::read_to_string(&path).map_err(Into::into))
        {
            Ok(pem) => {
                print!("{pem}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("❌ Cannot read certificate '{id}': {e}");
                ExitCode::FAILURE
            }
        },
    }
}

/// Print `value` as pretty JSON; serialization failures exit non-zero
fn print_json<T: serde::Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Failed to serialize to JSON: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Read a certificate by store id, or by path when `id` names a file
fn read_certificate(store: &CertificateStore, id: &str) -> mtls_guard::Result<Vec<u8>> {
    let path = match store.resolve(id) {
        Ok(path) => path,
        Err(_) if Path::new(id).is_file() => Path::new(id).to_path_buf(),
        Err(e) => return Err(e),
    };
    Ok(fs::read(&path)?)
}

fn print_inventory(store: &CertificateStore, inv: &StoreInventory) {
    println!("Certificate store: {}\n", store.dir().display());

    let entries = inv
        .ca
        .iter()
        .chain(inv.server.iter())
        .chain(inv.clients.iter());

    let mut any = false;
    for entry in entries {
        any = true;
        println!("📄 {}", entry.name);
        println!("   Path: {}", entry.path.display());
        match (&entry.certificate, &entry.error) {
            (Some(cert), _) => {
                println!("   Subject: {}", cert.summary.display_name());
                println!(
                    "   Issuer: {}",
                    cert.summary.issuer.get("CN").map_or("<unknown>", String::as_str)
                );
                println!(
                    "   Valid: {} → {}{}",
                    cert.summary.valid_from,
                    cert.summary.valid_to,
                    if cert.currently_valid { "" } else { "  ⚠️ not currently valid" }
                );
                if cert.self_signed {
                    println!("   Self-signed");
                }
            }
            (None, Some(err)) => println!("   ❌ {err}"),
            (None, None) => {}
        }
        println!();
    }

    if !any {
        println!("No certificates found.");
        println!("\n💡 Tip: Run `mtls-guard certs init` to create a CA, server and clients");
    }
}
