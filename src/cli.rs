//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Mutual-TLS server: only clients holding a certificate from the trusted CA
/// get through
#[derive(Parser, Debug)]
#[command(name = "mtls-guard")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MTLS_GUARD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Certificate store directory
    #[arg(long, env = "MTLS_GUARD_CERT_DIR", global = true)]
    pub cert_dir: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "MTLS_GUARD_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "MTLS_GUARD_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "MTLS_GUARD_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MTLS_GUARD_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the mTLS server (default)
    Serve,

    /// Certificate store management commands
    #[command(subcommand)]
    Certs(CertsCommand),

    /// Call a running server as a stored client, or with no certificate
    Client {
        /// Client id (`client1`, ...) or `none`
        id: String,

        /// Request path
        #[arg(long, default_value = "/api/status")]
        path: String,
    },
}

/// Certificate store subcommands
#[derive(Subcommand, Debug)]
pub enum CertsCommand {
    /// Create the CA, server and two client certificates
    Init {
        /// Overwrite existing files
        #[arg(long)]
        force: bool,

        /// CA common name
        #[arg(long, default_value = "mtls-guard CA")]
        ca_name: String,

        /// Server common name (also added as a DNS SAN)
        #[arg(long, default_value = "localhost")]
        server_name: String,
    },

    /// Issue a client certificate signed by the stored CA
    IssueClient {
        /// Certificate id, `client` followed by letters, digits, `-` or `_`
        #[arg(required = true)]
        name: String,

        /// Organization (O)
        #[arg(long)]
        organization: Option<String>,

        /// Organizational unit (OU)
        #[arg(long)]
        unit: Option<String>,

        /// Email address
        #[arg(long)]
        email: Option<String>,

        /// Validity in days (1 to 36500)
        #[arg(
            long,
            default_value_t = 365,
            value_parser = clap::value_parser!(i64).range(1..=36500)
        )]
        days: i64,

        /// Overwrite an existing certificate with the same id
        #[arg(long)]
        force: bool,
    },

    /// List every certificate in the store
    Status {
        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Print the decoded fields of one certificate as JSON
    Inspect {
        /// Certificate id (`ca`, `server`, `client<name>`) or a file path
        #[arg(required = true)]
        id: String,
    },

    /// Print the PEM of one certificate
    Pem {
        /// Certificate id (`ca`, `server`, `client<name>`)
        #[arg(required = true)]
        id: String,
    },
}
