//! Nova CLI tool.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use nova_config::OutputFormat;
use nova_pipeline::{DeployOptions, TemplateOutput};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "nova")]
#[command(about = "Deploy project components as managed stacks", long_about = None)]
struct Cli {
    /// System configuration file [default: nova.kdl]
    #[arg(long, env = "NOVA_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Directory holding <project>.kdl files
    #[arg(long, env = "NOVA_PROJECTS_DIR", global = true)]
    projects_dir: Option<PathBuf>,

    /// Output format: text or json
    #[arg(long, env = "NOVA_OUTPUT_FORMAT", global = true)]
    output_format: Option<OutputFormat>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a component and report its stack outputs
    Deploy {
        /// Wait for the stack to settle before reporting
        #[arg(long)]
        wait: bool,
        /// Render and validate the template without deploying it
        #[arg(long)]
        noop: bool,
        /// Also write the rendered template to PATH ("-" for stdout)
        #[arg(long, value_name = "PATH")]
        template_output: Option<TemplateOutput>,
        /// Component to deploy, as <project>/<component>
        component: String,
    },
    /// Validate a project file and every component's dependencies
    Validate {
        /// Project name
        project: String,
    },
    /// Print the order a component and its dependencies deploy in
    Order {
        /// Component, as <project>/<component>
        component: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = commands::Settings::load(
        cli.config.as_deref(),
        cli.projects_dir,
        cli.output_format,
    )?;

    match cli.command {
        Commands::Deploy {
            wait,
            noop,
            template_output,
            component,
        } => {
            let options = DeployOptions {
                wait,
                noop,
                template_output,
            };
            commands::deploy(&settings, &component, &options).await?;
        }
        Commands::Validate { project } => {
            commands::validate(&settings, &project)?;
        }
        Commands::Order { component } => {
            commands::order(&settings, &component)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_deploy() {
        let cli = Cli::try_parse_from([
            "nova",
            "--output-format",
            "json",
            "deploy",
            "--wait",
            "--template-output",
            "out.json",
            "shop/api",
        ])
        .unwrap();

        assert_eq!(cli.output_format, Some(OutputFormat::Json));
        match cli.command {
            Commands::Deploy {
                wait,
                noop,
                template_output,
                component,
            } => {
                assert!(wait);
                assert!(!noop);
                assert_eq!(
                    template_output,
                    Some(TemplateOutput::File(PathBuf::from("out.json")))
                );
                assert_eq!(component, "shop/api");
            }
            _ => panic!("expected deploy"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "nova",
            "order",
            "shop/api",
            "--projects-dir",
            "infra",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.projects_dir, Some(PathBuf::from("infra")));
        assert!(matches!(cli.command, Commands::Order { .. }));
    }

    #[test]
    fn test_template_output_dash_is_stdout() {
        let cli =
            Cli::try_parse_from(["nova", "deploy", "--noop", "--template-output", "-", "a/b"])
                .unwrap();
        match cli.command {
            Commands::Deploy {
                noop,
                template_output,
                ..
            } => {
                assert!(noop);
                assert_eq!(template_output, Some(TemplateOutput::Stdout));
            }
            _ => panic!("expected deploy"),
        }
    }

    #[test]
    fn test_rejects_unknown_output_format() {
        assert!(Cli::try_parse_from(["nova", "--output-format", "yaml", "validate", "shop"]).is_err());
    }

    #[test]
    fn test_deploy_requires_component() {
        assert!(Cli::try_parse_from(["nova", "deploy", "--wait"]).is_err());
    }
}
