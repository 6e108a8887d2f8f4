use beast_agent::Agent;
use beast_core::{AgentConfig, AgentConfigBuilder, Headers, Platform};
use beast_platform::{FunctionBody, FunctionRequest};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "beast-agent", version)]
#[command(about = "Beast AI dev agent for Cloud Run, GKE and Cloud Functions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP adapter until SIGTERM or Ctrl+C
    Serve {
        /// Platform to serve as (cloud_run, gke); overrides PLATFORM
        #[arg(long)]
        platform: Option<Platform>,
        /// Listener port; overrides PORT
        #[arg(long)]
        port: Option<u16>,
    },
    /// Perform one single-shot function invocation and print the reply
    Invoke {
        /// Platform to invoke as
        #[arg(long, default_value = "cloud_functions")]
        platform: Platform,
        /// Request method
        #[arg(long, default_value = "POST")]
        method: String,
        /// Request path; empty runs analyze
        #[arg(long, default_value = "")]
        path: String,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
        /// Request header as NAME=VALUE, repeatable
        #[arg(long = "header", value_name = "NAME=VALUE")]
        headers: Vec<String>,
    },
}

fn load_config(platform: Option<Platform>, port: Option<u16>) -> AgentConfig {
    let builder = match AgentConfigBuilder::from_env() {
        Ok(builder) => builder,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(2);
        }
    };
    let builder = match platform {
        Some(platform) => builder.platform(platform),
        None => builder,
    };
    let builder = match port {
        Some(port) => builder.port(port),
        None => builder,
    };
    match builder.build() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(2);
        }
    }
}

fn build_agent(config: AgentConfig, fallback: Platform) -> Agent {
    match Agent::builder(config).fallback_platform(fallback).build() {
        Ok(agent) => agent,
        Err(e) => {
            tracing::error!(error = %e, "Failed to assemble agent");
            std::process::exit(2);
        }
    }
}

fn parse_headers(raw: &[String]) -> Headers {
    raw.iter()
        .filter_map(|h| h.split_once('='))
        .map(|(name, value)| (name.trim(), value.trim().to_string()))
        .collect()
}

#[tokio::main]
async fn main() {
    // Initialize JSON logging once.
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let env_filter = match "info".parse() {
        Ok(directive) => env_filter.add_directive(directive),
        Err(_) => env_filter,
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .json()
        .try_init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { platform, port } => {
            let agent = build_agent(load_config(platform, port), Platform::CloudRun);
            if let Err(e) = agent.serve().await {
                tracing::error!(error = %e, "Agent stopped with an error");
                std::process::exit(1);
            }
        }
        Commands::Invoke {
            platform,
            method,
            path,
            body,
            headers,
        } => {
            let agent = build_agent(load_config(Some(platform), None), platform);
            let request = FunctionRequest::new(method, path)
                .with_headers(parse_headers(&headers))
                .with_body(match body {
                    Some(body) => FunctionBody::Raw(body.into_bytes()),
                    None => FunctionBody::Empty,
                });

            let reply = agent.invoke(request).await;
            agent.shutdown().await;

            match serde_json::to_string_pretty(&reply.body) {
                Ok(body) => println!("{body}"),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to render reply");
                    std::process::exit(1);
                }
            }
        }
    }
}
