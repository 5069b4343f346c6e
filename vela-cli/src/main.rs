use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;

use vela_core::gateway::WaitPolicy;
use vela_core::provider::{
    CheckRequest, CreateRequest, DeleteRequest, NameRequest, NameResponse, Provider,
    ProviderError, ReadRequest, ReadResponse, UpdateImpactRequest, UpdateRequest,
};
use vela_core::resource::{PropertyBag, ResourceHandle};
use vela_core::schema::ResourceSchema;
use vela_provider_aws::schemas::{self, instance::INSTANCE};
use vela_provider_aws::{AwsContext, AwsProvider, ContextConfig};

#[derive(Parser)]
#[command(name = "vela")]
#[command(about = "Drive cloud resource lifecycles from JSON property files", long_about = None)]
struct Cli {
    /// Resource type token
    #[arg(long = "type", global = true, default_value = INSTANCE)]
    resource_type: String,

    /// AWS region (falls back to the SDK default chain)
    #[arg(long, global = true, env = "AWS_REGION")]
    region: Option<String>,

    /// Named AWS profile
    #[arg(long, global = true, env = "AWS_PROFILE")]
    profile: Option<String>,

    /// Seconds to wait for a resource to reach its target state
    #[arg(long, global = true, env = "VELA_WAIT_TIMEOUT", default_value_t = 600)]
    wait_timeout: u64,

    /// Seconds between state polls
    #[arg(
        long,
        global = true,
        env = "VELA_POLL_INTERVAL",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    poll_interval: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a property file
    Check {
        /// Path to JSON property file
        file: PathBuf,
    },
    /// Ask the provider for a physical name
    Name {
        /// Path to JSON property file
        file: PathBuf,
    },
    /// Create a resource and print its handle
    Create {
        /// Path to JSON property file
        file: PathBuf,
    },
    /// Show the live properties of a resource
    Read {
        /// Resource handle (e.g., i-0123456789abcdef0)
        handle: String,
    },
    /// Apply a change to an existing resource
    Update {
        /// Resource handle
        handle: String,

        /// Properties the resource currently has
        #[arg(long)]
        olds: PathBuf,

        /// Desired properties
        #[arg(long)]
        news: PathBuf,
    },
    /// Show which changes would force replacement
    Impact {
        /// Properties the resource currently has
        #[arg(long)]
        olds: PathBuf,

        /// Desired properties
        #[arg(long)]
        news: PathBuf,
    },
    /// Delete a resource
    Delete {
        /// Resource handle
        handle: String,
    },
    /// Print resource schemas
    Schema,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    if let Commands::Schema = cli.command {
        return run_schema(&cli.resource_type);
    }

    let provider = get_provider(&cli).await;
    let provider = provider.as_ref();
    let resource_type = cli.resource_type;

    match cli.command {
        Commands::Check { file } => run_check(provider, resource_type, &file).await,
        Commands::Name { file } => run_name(provider, resource_type, &file).await,
        Commands::Create { file } => run_create(provider, resource_type, &file).await,
        Commands::Read { handle } => run_read(provider, resource_type, handle).await,
        Commands::Update { handle, olds, news } => {
            run_update(provider, resource_type, handle, &olds, &news).await
        }
        Commands::Impact { olds, news } => {
            run_impact(provider, resource_type, &olds, &news).await
        }
        Commands::Delete { handle } => run_delete(provider, resource_type, handle).await,
        Commands::Schema => Ok(()),
    }
}

async fn get_provider(cli: &Cli) -> Box<dyn Provider> {
    let config = ContextConfig {
        region: cli.region.clone(),
        profile: cli.profile.clone(),
        wait: WaitPolicy::new(
            Duration::from_secs(cli.wait_timeout),
            Duration::from_secs(cli.poll_interval),
        ),
    };
    let ctx = AwsContext::load(&config).await;
    log::debug!("Using AWS region {:?}", ctx.region());
    Box::new(AwsProvider::new(&ctx))
}

/// Read a JSON object from disk into a property bag
fn load_properties(path: &Path) -> Result<PropertyBag, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    let json: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))?;
    PropertyBag::from_json(json).map_err(|e| format!("{}: {}", path.display(), e))
}

fn print_properties(properties: &PropertyBag) -> Result<(), String> {
    let json = serde_json::to_string_pretty(properties).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

fn describe_error(err: ProviderError) -> String {
    match err.ambiguous_handle() {
        Some(handle) => format!(
            "{}\n  {} resource '{}' may exist; read it before retrying",
            err,
            "!".yellow().bold(),
            handle
        ),
        None => err.to_string(),
    }
}

async fn run_check(
    provider: &dyn Provider,
    resource_type: String,
    file: &Path,
) -> Result<(), String> {
    let properties = load_properties(file)?;
    let response = provider
        .check(CheckRequest {
            resource_type,
            properties,
        })
        .await
        .map_err(describe_error)?;

    if response.failures.is_empty() {
        println!("{}", "Configuration is valid.".green().bold());
        return Ok(());
    }

    for failure in &response.failures {
        println!("  {} {}", "✗".red(), failure);
    }
    Err(format!(
        "{} check failure(s) in {}",
        response.failures.len(),
        file.display()
    ))
}

async fn run_name(
    provider: &dyn Provider,
    resource_type: String,
    file: &Path,
) -> Result<(), String> {
    let properties = load_properties(file)?;
    let response = provider
        .name_resource(NameRequest {
            resource_type,
            properties,
        })
        .await
        .map_err(describe_error)?;

    match response {
        NameResponse::Named(name) => println!("{}", name),
        NameResponse::UseDefault => println!("{}", "(provider default)".dimmed()),
    }
    Ok(())
}

async fn run_create(
    provider: &dyn Provider,
    resource_type: String,
    file: &Path,
) -> Result<(), String> {
    let properties = load_properties(file)?;
    let response = provider
        .create(CreateRequest {
            resource_type: resource_type.clone(),
            handle: ResourceHandle::default(),
            properties,
        })
        .await
        .map_err(describe_error)?;

    println!(
        "{} {} {}",
        "+".green().bold(),
        resource_type.cyan(),
        response.handle.to_string().bold()
    );
    Ok(())
}

async fn run_read(
    provider: &dyn Provider,
    resource_type: String,
    handle: String,
) -> Result<(), String> {
    let response = provider
        .read(ReadRequest {
            resource_type,
            handle: ResourceHandle::new(handle.clone()),
        })
        .await
        .map_err(describe_error)?;

    match response {
        ReadResponse::Found(properties) => print_properties(&properties),
        ReadResponse::NotFound => {
            println!("{} '{}' not found", "?".yellow().bold(), handle);
            Ok(())
        }
    }
}

async fn run_update(
    provider: &dyn Provider,
    resource_type: String,
    handle: String,
    olds: &Path,
    news: &Path,
) -> Result<(), String> {
    let olds = load_properties(olds)?;
    let news = load_properties(news)?;

    let diff = olds.diff(&news);
    if diff.is_empty() {
        println!("{}", "No changes. Resource is up to date.".green());
        return Ok(());
    }
    for name in diff.keys() {
        println!("  {} {}", "~".yellow().bold(), name);
    }

    provider
        .update(UpdateRequest {
            resource_type,
            handle: ResourceHandle::new(handle.clone()),
            olds,
            news,
        })
        .await
        .map_err(describe_error)?;

    println!("{} '{}' updated", "✓".green().bold(), handle);
    Ok(())
}

async fn run_impact(
    provider: &dyn Provider,
    resource_type: String,
    olds: &Path,
    news: &Path,
) -> Result<(), String> {
    let olds = load_properties(olds)?;
    let news = load_properties(news)?;
    let diff = olds.diff(&news);

    let response = provider
        .update_impact(UpdateImpactRequest {
            resource_type,
            olds,
            news,
        })
        .await
        .map_err(describe_error)?;

    if diff.is_empty() {
        println!("{}", "No changes.".green());
        return Ok(());
    }

    for name in diff.keys() {
        if response.replaces.iter().any(|r| r == name) {
            println!("  {} {} {}", "-/+".magenta().bold(), name, "(forces replacement)".red());
        } else {
            println!("  {} {}", "~".yellow().bold(), name);
        }
    }
    Ok(())
}

async fn run_delete(
    provider: &dyn Provider,
    resource_type: String,
    handle: String,
) -> Result<(), String> {
    provider
        .delete(DeleteRequest {
            resource_type,
            handle: ResourceHandle::new(handle.clone()),
        })
        .await
        .map_err(describe_error)?;

    println!("{} '{}' deleted", "-".red().bold(), handle);
    Ok(())
}

fn run_schema(resource_type: &str) -> Result<(), String> {
    let all: Vec<ResourceSchema> = schemas::all_schemas();
    let schema = all
        .iter()
        .find(|s| s.resource_type == resource_type)
        .ok_or_else(|| format!("Unknown resource type: {}", resource_type))?;

    println!("{}", schema.resource_type.cyan().bold());
    if let Some(desc) = &schema.description {
        println!("  {}", desc.dimmed());
    }
    for attr in &schema.attributes {
        let required = if attr.required { " (required)" } else { "" };
        println!(
            "  {}: {}{} [{}]",
            attr.name.bold(),
            attr.attr_type,
            required,
            attr.update
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_update_arguments() {
        let cli = Cli::try_parse_from([
            "vela",
            "update",
            "i-0123",
            "--olds",
            "old.json",
            "--news",
            "new.json",
            "--wait-timeout",
            "30",
        ])
        .unwrap();

        assert_eq!(cli.resource_type, INSTANCE);
        assert_eq!(cli.wait_timeout, 30);
        match cli.command {
            Commands::Update { handle, olds, news } => {
                assert_eq!(handle, "i-0123");
                assert_eq!(olds, PathBuf::from("old.json"));
                assert_eq!(news, PathBuf::from("new.json"));
            }
            _ => panic!("expected update command"),
        }
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let result = Cli::try_parse_from(["vela", "read", "i-0123", "--poll-interval", "0"]);
        assert!(result.is_err());

        let cli =
            Cli::try_parse_from(["vela", "read", "i-0123", "--poll-interval", "1"]).unwrap();
        assert_eq!(cli.poll_interval, 1);
    }

    #[test]
    fn loads_property_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"imageId": "ami-123", "keyName": null, "tags": {{"env": "dev"}}}}"#
        )
        .unwrap();

        let bag = load_properties(file.path()).unwrap();
        assert_eq!(bag.len(), 2);
        assert_eq!(bag.req_string("imageId").unwrap(), "ami-123");
        assert!(!bag.contains("keyName"));
    }

    #[test]
    fn rejects_malformed_property_files() {
        let dir = tempfile::tempdir().unwrap();

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{ not json").unwrap();
        assert!(load_properties(&broken).unwrap_err().contains("Failed to parse"));

        let array = dir.path().join("array.json");
        fs::write(&array, "[1, 2]").unwrap();
        assert!(load_properties(&array).is_err());

        let missing = dir.path().join("missing.json");
        assert!(load_properties(&missing).unwrap_err().contains("Failed to read"));
    }

    #[test]
    fn schema_of_unknown_type_fails() {
        assert!(run_schema("aws:s3/bucket:Bucket").is_err());
        assert!(run_schema(INSTANCE).is_ok());
    }
}
