use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use bytes::Bytes;
use bytesize::ByteSize;
use clap::{CommandFactory, Parser, Subcommand, ValueHint};
use clap_complete::{ArgValueCompleter, CompletionCandidate};
use iocraft::prelude::*;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use upld::{HttpTransport, PartPlan, SessionIds, UploadOptions, Uploader, choose_part_size};
use url::Url;

use crate::config::Config;
use crate::ui::{
    ConfigHeader, ErrorMessage, InputPrompt, PartPlanTable, ProfileList, ProgressBar,
    SuccessMessage,
};

mod config;
mod ui;

#[derive(Parser)]
#[command(name = "upld")]
#[command(version)]
#[command(about = "Upload files through a chunked upload backend")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file
    Upload {
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
        /// Upload profile to send the file through
        #[arg(short, long, add = ArgValueCompleter::new(profile_completer))]
        profile: Option<String>,
        /// Name to upload the file as (defaults to its file name)
        #[arg(short, long)]
        name: Option<String>,
        /// Content type (derived from the file extension by default)
        #[arg(long)]
        content_type: Option<String>,
        /// Extra form field sent with direct uploads, as KEY=VALUE
        #[arg(short = 'F', long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,
        /// Print the result as JSON instead of a progress bar
        #[arg(long)]
        json: bool,
    },
    /// Show how a payload of the given size would be uploaded
    Plan {
        /// Payload size, e.g. "12 MiB"
        size: ByteSize,
        /// Preferred part size (defaults to the configured one)
        #[arg(long)]
        part_size: Option<ByteSize>,
    },
    /// Release an abandoned multipart upload
    Abort {
        #[arg(short, long, add = ArgValueCompleter::new(profile_completer))]
        profile: Option<String>,
        #[arg(long)]
        upload_id: String,
        #[arg(long)]
        s3_key: String,
    },
    /// List upload profiles
    Profiles,
    /// Configure upld interactively
    Config,
    /// Store your API token in the OS keyring
    SetApiToken { api_token: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    let _rt_guard = rt.enter();
    clap_complete::CompleteEnv::with_factory(Cli::command).complete();
    let cli = Cli::parse();

    rt.block_on(async {
        match cli.command {
            Commands::Config => interactive_config(),
            Commands::SetApiToken { api_token } => config::set_api_token_keyring(api_token),
            requires_config => {
                let config = config::read_config()?;

                match requires_config {
                    Commands::Upload {
                        file,
                        profile,
                        name,
                        content_type,
                        fields,
                        json,
                    } => {
                        upload_file(&config, &file, profile.as_deref(), name, content_type, fields, json)
                            .await
                    }
                    Commands::Plan { size, part_size } => print_plan(&config, size, part_size),
                    Commands::Abort {
                        profile,
                        upload_id,
                        s3_key,
                    } => abort_upload(&config, profile.as_deref(), upload_id, s3_key).await,
                    Commands::Profiles => list_profiles(&config),
                    Commands::Config | Commands::SetApiToken { .. } => {
                        unreachable!("handled before reading the config")
                    }
                }
            }
        }
    })
}

fn parse_field(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty field name in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}

fn uploader(config: &Config) -> Result<Uploader> {
    let transport = HttpTransport::with_timeout(config.api_token.clone(), config.request_timeout)?;
    Ok(Uploader::new(transport, config.settings.clone()))
}

async fn upload_file(
    config: &Config,
    file: &Path,
    profile: Option<&str>,
    name: Option<String>,
    content_type: Option<String>,
    fields: Vec<(String, String)>,
    json: bool,
) -> Result<()> {
    let (profile, endpoints) = config.profile(profile)?;

    let filename = match name {
        Some(name) => name,
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("{} has no file name", file.display()))?,
    };

    let payload = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let uploader = uploader(config)?;

    let (tx, rx) = watch::channel(0u8);
    let mut options = UploadOptions::new().on_progress(move |percent| {
        let _ = tx.send(percent);
    });
    for (key, value) in fields {
        options = options.field(key, value);
    }
    if let Some(content_type) = content_type {
        options = options.content_type(content_type);
    }

    let upload = uploader.upload(Bytes::from(payload), &filename, &endpoints, options);

    let result = if json {
        upload.await
    } else {
        let mut progress_bar = element!(ProgressBar(
            title: format!("Uploading {} via {}", filename, profile),
            progress: Some(rx)
        ));

        tokio::select! {
            result = upload => result,
            _ = progress_bar.render_loop() => {
                unreachable!("render_loop should not terminate")
            }
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    let file = result.into_result().map_err(|error| anyhow!(error))?;

    if !json {
        element!(SuccessMessage(
            message: format!("Uploaded {} ({}) to {}", file.filename, ByteSize(file.file_size).to_string_as(true), file.url)
        ))
        .print();
    }

    Ok(())
}

fn print_plan(config: &Config, size: ByteSize, part_size: Option<ByteSize>) -> Result<()> {
    let size = size.as_u64();

    if size < config.settings.multipart_threshold {
        println!(
            "{} is below the multipart threshold of {}: sent in a single request",
            ByteSize(size).to_string_as(true),
            ByteSize(config.settings.multipart_threshold).to_string_as(true)
        );
        return Ok(());
    }

    let preferred = part_size.map_or(config.settings.part_size, |p| p.as_u64());
    let plan = PartPlan::new(size, choose_part_size(size, preferred)?)?;

    println!(
        "{} in {} parts of {}",
        ByteSize(size).to_string_as(true),
        plan.total_parts(),
        ByteSize(plan.part_size()).to_string_as(true)
    );

    let parts = plan
        .parts()
        .map(|(part_number, range)| (part_number, range.start, range.end))
        .collect::<Vec<_>>();
    element!(PartPlanTable(parts: parts)).print();

    Ok(())
}

async fn abort_upload(
    config: &Config,
    profile: Option<&str>,
    upload_id: String,
    s3_key: String,
) -> Result<()> {
    let (_, endpoints) = config.profile(profile)?;
    let uploader = uploader(config)?;
    let ids = SessionIds { upload_id, s3_key };

    uploader
        .abort(&endpoints.complete_multipart, &ids)
        .await?;

    element!(SuccessMessage(message: format!("Aborted multipart upload {}", ids.upload_id))).print();
    Ok(())
}

fn list_profiles(config: &Config) -> Result<()> {
    let profiles = config
        .profiles
        .keys()
        .map(|name| config.profile(Some(name.as_str())))
        .collect::<Result<Vec<_>>>()?;

    element!(ProfileList(profiles: profiles, default_profile: config.default_profile.clone())).print();
    Ok(())
}

fn profile_completer(current: &std::ffi::OsStr) -> Vec<CompletionCandidate> {
    let Some(current) = current.to_str() else {
        return vec![];
    };

    let Ok(config) = config::read_config() else {
        return vec![];
    };

    config
        .profiles
        .keys()
        .filter(|name| name.starts_with(current))
        .map(CompletionCandidate::new)
        .collect()
}

fn read_input(prompt: &str, default: Option<&str>, description: Option<&str>) -> Result<String> {
    element! {
        InputPrompt(
            prompt: prompt.to_string(),
            default: default.map(|s| s.to_string()),
            description: description.map(|s| s.to_string())
        )
    }
    .print();

    print!("> ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim().to_string();

    if input.is_empty() {
        Ok(default.map(str::to_string).unwrap_or(input))
    } else {
        Ok(input)
    }
}

fn interactive_config() -> Result<()> {
    element!(ConfigHeader()).print();

    let path = config::config_path()?;
    let mut config_file = config::load_config_file(&path)?;

    let current_base_url = config_file.base_url.as_ref().map(Url::to_string);
    let base_url = loop {
        let base_url_str = read_input(
            "Base URL",
            current_base_url.as_deref(),
            Some("The site whose upload endpoints profiles point at"),
        )?;

        match Url::parse(&base_url_str) {
            Ok(url) => break url,
            Err(e) => {
                element!(ErrorMessage(message: format!("Invalid URL: {}", e))).print();
                println!();
            }
        }
    };

    let default_profile = read_input(
        "Default Profile",
        Some(
            config_file
                .default_profile
                .as_deref()
                .unwrap_or(config::DEFAULT_PROFILE),
        ),
        Some("Profile used when --profile is not given"),
    )?;

    let api_token = read_input(
        "API Token",
        None,
        Some("Optional: bearer token for the upload backend (stored securely in OS keyring)"),
    )?;
    if !api_token.is_empty() {
        config::set_api_token_keyring(api_token)?;
    }

    config_file.base_url = Some(base_url);
    config_file.default_profile = Some(default_profile);
    config::write_config(&config_file)?;

    element!(SuccessMessage(message: format!("Configuration written to {}", path.display()))).print();

    Ok(())
}
