//! # Command Line Interface
//!
//! `certvault` commands: install a root CA, fetch a vault certificate, serve
//! HTTPS with it, load vault-backed configuration, and GET a URL through the
//! local trust store.

pub mod output;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use crate::certificates::DecodedCertificate;
use crate::config::{ProcessEnv, ProvisioningOverrides, Settings};
use crate::observability::{init_logging, LoggingConfig};
use crate::provisioning::{
    trusted_http_client, CertificateSource, ConfigurationOptions, InstallOptions, InstallOutcome,
    Provisioner,
};
use crate::server::{default_router, serve_certificate};
use crate::trust_store::{OpenMode, StoreLocation, StoreName, TrustStore};

use output::{flatten_config, print_json, print_table_header, truncate, OutputFormat};

#[derive(Parser)]
#[command(name = "certvault")]
#[command(about = "Key vault certificate and configuration provisioning")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Trust store root directory override
    #[arg(long, global = true)]
    pub trust_store_dir: Option<PathBuf>,

    /// Output format (json or table)
    #[arg(short, long, global = true, default_value = "table")]
    pub output: OutputFormat,
}

/// Explicit values take precedence over `KeyVaultName`, `CertificateName` and
/// `AzureConnectionString`.
#[derive(Args, Debug, Clone, Default)]
pub struct VaultArgs {
    #[arg(long)]
    pub vault_name: Option<String>,

    #[arg(long)]
    pub certificate_name: Option<String>,

    /// `RunAs=App[;AppId=..;TenantId=..;AppKey=..]`
    #[arg(long)]
    pub connection_string: Option<String>,
}

impl VaultArgs {
    fn overrides(&self) -> ProvisioningOverrides {
        ProvisioningOverrides {
            vault_name: self.vault_name.clone(),
            certificate_name: self.certificate_name.clone(),
            connection_string: self.connection_string.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, default_value = "Root")]
    pub store_name: StoreName,

    #[arg(long, default_value = "CurrentUser")]
    pub store_location: StoreLocation,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add the vault certificate to a local trust store
    InstallRootCa {
        #[command(flatten)]
        vault: VaultArgs,

        #[command(flatten)]
        store: StoreArgs,

        /// Read the certificate object instead of the secret
        #[arg(long)]
        certificate_object: bool,
    },

    /// Fetch and decode the vault certificate without installing it
    Fetch {
        #[command(flatten)]
        vault: VaultArgs,

        /// Read the certificate object instead of the secret
        #[arg(long)]
        certificate_object: bool,

        /// Write the leaf certificate as PEM to this file instead of stdout
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
    },

    /// Serve HTTPS with the vault certificate
    Serve {
        #[command(flatten)]
        vault: VaultArgs,

        /// Listening port (defaults to 443, or 5001 in development)
        #[arg(long)]
        port: Option<u16>,

        /// Also install this vault item as a root CA before serving
        #[arg(long, value_name = "CERTIFICATE_NAME")]
        install_root_ca: Option<String>,
    },

    /// Load vault secrets (and App Configuration) as configuration
    Config {
        #[command(flatten)]
        vault: VaultArgs,

        /// Key holding the App Configuration connection string
        #[arg(long, default_value = crate::configuration::DEFAULT_APP_CONFIG_KEY)]
        app_config_key: String,

        /// Key whose change triggers a reload
        #[arg(long, default_value = crate::configuration::DEFAULT_SENTINEL_KEY)]
        sentinel_key: String,

        /// Print values instead of redacting them
        #[arg(long)]
        show_values: bool,

        /// Poll the sentinel key and reload on change, every N seconds
        #[arg(long, value_name = "SECONDS")]
        watch: Option<u64>,
    },

    /// GET a URL trusting the certificates of a local store
    Get {
        url: String,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// List certificates in a local trust store
    ListStore {
        #[command(flatten)]
        store: StoreArgs,
    },
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&LoggingConfig::from_env(&ProcessEnv, cli.verbose));

    let mut settings = Settings::from_env(&ProcessEnv)?;
    if let Some(dir) = cli.trust_store_dir.clone() {
        settings.trust_store_dir = Some(dir);
    }
    let settings = Arc::new(settings);
    let provisioner = Provisioner::new(settings.clone(), Arc::new(ProcessEnv));

    match cli.command {
        Commands::InstallRootCa { vault, store, certificate_object } => {
            let trust_store = TrustStore::from_settings(&settings)?;
            let options = InstallOptions {
                store_name: store.store_name,
                store_location: store.store_location,
                source: certificate_source(certificate_object),
            };
            let outcome =
                provisioner.install_root_ca(&vault.overrides(), &trust_store, &options).await?;
            print_install_outcome(&outcome, cli.output)?;
        }
        Commands::Fetch { vault, certificate_object, out } => {
            let certificate = provisioner
                .fetch_certificate(&vault.overrides(), certificate_source(certificate_object))
                .await?
                .context("No certificate fetched; check the vault and certificate names")?;
            if let Some(path) = &out {
                std::fs::write(path, certificate.leaf_pem())
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!(path = %path.display(), "Wrote leaf certificate");
            }
            print_certificate(&certificate, out.is_none(), cli.output)?;
        }
        Commands::Serve { vault, port, install_root_ca } => {
            if let Some(root_name) = install_root_ca {
                let trust_store = TrustStore::from_settings(&settings)?;
                let overrides = ProvisioningOverrides {
                    certificate_name: Some(root_name),
                    ..vault.overrides()
                };
                let outcome = provisioner
                    .install_root_ca(&overrides, &trust_store, &InstallOptions::default())
                    .await?;
                print_install_outcome(&outcome, cli.output)?;
            }

            let serving = provisioner
                .provision_serving_certificate(&vault.overrides(), port)
                .await?
                .context(
                    "No serving certificate available; set KeyVaultName and CertificateName",
                )?;
            serve_certificate(&serving, default_router()).await?;
        }
        Commands::Config { vault, app_config_key, sentinel_key, show_values, watch } => {
            let options = ConfigurationOptions {
                app_config_key,
                sentinel_key,
                include_app_configuration: true,
            };
            let overrides = vault.overrides();
            let built = provisioner.build_configuration(&overrides, &options).await?;
            print_configuration(&built.config, show_values, cli.output)?;

            if let (Some(seconds), Some(sentinel)) = (watch, built.sentinel.as_ref()) {
                let mut interval = tokio::time::interval(Duration::from_secs(seconds.max(1)));
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = interval.tick() => {}
                        _ = tokio::signal::ctrl_c() => break,
                    }
                    match sentinel.check().await {
                        Ok(true) => {
                            info!(
                                key = %sentinel.key(),
                                "Sentinel changed, reloading configuration"
                            );
                            let rebuilt =
                                provisioner.build_configuration(&overrides, &options).await?;
                            print_configuration(&rebuilt.config, show_values, cli.output)?;
                        }
                        Ok(false) => {}
                        Err(e) => warn!(error = %e, "Sentinel check failed"),
                    }
                }
            }
        }
        Commands::Get { url, store } => {
            let trust_store = TrustStore::from_settings(&settings)?;
            let opened =
                trust_store.open(store.store_name, store.store_location, OpenMode::ReadOnly)?;
            let client = trusted_http_client(&opened, &settings)?;
            drop(opened);

            let response = client
                .get(&url)
                .send()
                .await
                .with_context(|| format!("Request to {} failed", url))?;
            println!("{} {}", response.status(), url);
        }
        Commands::ListStore { store } => {
            let trust_store = TrustStore::from_settings(&settings)?;
            let opened =
                trust_store.open(store.store_name, store.store_location, OpenMode::ReadOnly)?;
            let certificates = opened.certificates()?;
            match cli.output {
                OutputFormat::Json => {
                    let rows: Vec<_> = certificates
                        .iter()
                        .map(|c| {
                            serde_json::json!({
                                "thumbprint": c.thumbprint,
                                "path": c.path.display().to_string(),
                            })
                        })
                        .collect();
                    print_json(&rows)?;
                }
                OutputFormat::Table => {
                    print_table_header(&[("Thumbprint", 42), ("Path", 60)]);
                    for certificate in &certificates {
                        println!(
                            "{:<42} {}",
                            certificate.thumbprint,
                            truncate(&certificate.path.display().to_string(), 60)
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

fn certificate_source(certificate_object: bool) -> CertificateSource {
    if certificate_object {
        CertificateSource::CertificateObject
    } else {
        CertificateSource::Secret
    }
}

fn print_certificate(
    certificate: &DecodedCertificate,
    include_pem: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let info = &certificate.info;
    match format {
        OutputFormat::Json => {
            let mut summary = serde_json::json!({
                "thumbprint": certificate.thumbprint(),
                "subject": info.subject,
                "issuer": info.issuer,
                "serial": info.serial,
                "notBefore": info.not_before.to_rfc3339(),
                "notAfter": info.not_after.to_rfc3339(),
                "isCa": info.is_ca,
                "hasPrivateKey": certificate.has_private_key(),
                "chainLength": certificate.chain.len(),
            });
            if include_pem {
                summary["pem"] = serde_json::Value::String(certificate.leaf_pem());
            }
            print_json(&summary)?;
        }
        OutputFormat::Table => {
            println!("Thumbprint:  {}", certificate.thumbprint());
            println!("Subject:     {}", info.subject);
            println!("Issuer:      {}", info.issuer);
            println!("Valid:       {} .. {}", info.not_before, info.not_after);
            println!("Private key: {}", if certificate.has_private_key() { "yes" } else { "no" });
            if include_pem {
                print!("{}", certificate.leaf_pem());
            }
        }
    }
    Ok(())
}

fn print_install_outcome(outcome: &InstallOutcome, format: OutputFormat) -> anyhow::Result<()> {
    let summary = match outcome {
        InstallOutcome::Installed { thumbprint, subject, newly_added } => serde_json::json!({
            "status": if *newly_added { "installed" } else { "already-present" },
            "thumbprint": thumbprint,
            "subject": subject,
        }),
        InstallOutcome::Skipped { diagnostics } => serde_json::json!({
            "status": "skipped",
            "diagnostics": diagnostics.iter().map(|d| d.message.clone()).collect::<Vec<_>>(),
        }),
        InstallOutcome::Unrecognized { content_type } => serde_json::json!({
            "status": "unrecognized",
            "contentType": content_type,
        }),
    };

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Table => match outcome {
            InstallOutcome::Installed { thumbprint, subject, newly_added: true } => {
                println!("Installed {} ({})", thumbprint, subject)
            }
            InstallOutcome::Installed { thumbprint, subject, newly_added: false } => {
                println!("Already present {} ({})", thumbprint, subject)
            }
            InstallOutcome::Skipped { diagnostics } => {
                println!("Skipped:");
                for diagnostic in diagnostics {
                    println!("  {}", diagnostic.message);
                }
            }
            InstallOutcome::Unrecognized { content_type } => {
                println!("Skipped: content type '{}' is not a certificate format", content_type)
            }
        },
    }
    Ok(())
}

fn print_configuration(
    config: &config::Config,
    show_values: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let tree: serde_json::Value = config
        .clone()
        .try_deserialize()
        .context("Configuration could not be rendered")?;
    let entries = flatten_config(&tree, show_values);

    match format {
        OutputFormat::Json => {
            let map: serde_json::Map<_, _> =
                entries.into_iter().map(|(k, v)| (k, serde_json::Value::String(v))).collect();
            print_json(&map)?;
        }
        OutputFormat::Table => {
            print_table_header(&[("Key", 48), ("Value", 60)]);
            for (key, value) in entries {
                println!("{:<48} {}", truncate(&key, 48), truncate(&value, 60));
            }
        }
    }
    Ok(())
}
