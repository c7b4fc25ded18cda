use clap::Parser;
use sip_agent::{
    spawn_agent, utils, AgentOptions, AutoAnswerOptions, EndpointConfig, RemoteControlOptions,
};
use sip_agent::lifecycle::ConfigTestReport;

use tracing::{error, info, warn};

/// SIP Agent CLI Application
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// SIP server address (e.g., pbx.example.com:5060)
    #[arg(short, long, env = "SIP_SERVER")]
    server: Option<String>,

    /// SIP username (e.g., 1001)
    #[arg(short, long, env = "SIP_USER")]
    user: Option<String>,

    /// SIP password
    #[arg(short, long, env = "SIP_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// SIP domain (defaults to the server host)
    #[arg(short, long, env = "SIP_DOMAIN")]
    domain: Option<String>,

    /// Operation mode (run/test)
    #[arg(short, long, default_value = "run")]
    mode: String,

    /// Disable BroadSoft Call-Info auto-answer
    #[arg(long)]
    no_auto_answer: bool,

    /// Override the auto-answer delay in seconds
    #[arg(long)]
    answer_delay: Option<u32>,

    /// Ignore BroadSoft "Event: hold" NOTIFYs
    #[arg(long)]
    no_hold_events: bool,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    utils::initialize_logging(args.log_level.as_str());

    let config = build_config(&args)?;
    match args.mode.as_str() {
        "run" => run_agent_mode(&args, config).await,
        "test" => run_test_mode(&args, config).await,
        _ => {
            eprintln!("Invalid mode. Use 'run' or 'test'");
            Ok(())
        }
    }
}

fn build_config(args: &Args) -> Result<EndpointConfig, Box<dyn std::error::Error>> {
    let server = args.server.clone().ok_or("SIP server address is required")?;
    let user = args.user.clone().ok_or("SIP user is required")?;
    let password = args.password.clone().ok_or("SIP password is required")?;

    let mut config = EndpointConfig::new(&server, &user, &password)?;
    if let Some(domain) = &args.domain {
        config = config.with_domain(domain.as_str());
    }
    Ok(config)
}

fn build_options(args: &Args) -> AgentOptions {
    let mut auto_answer = if args.no_auto_answer {
        AutoAnswerOptions::default()
    } else {
        AutoAnswerOptions::enabled()
            .on_before_answer(|delay| {
                info!("Auto-answering in {}s...", delay);
                Ok(())
            })
            .on_after_answer(|| {
                info!("Call active (auto-answered)");
                Ok(())
            })
    };
    auto_answer.delay_override = args.answer_delay;

    let mut remote_control = RemoteControlOptions::default().on_talk_event(|action| {
        info!("Remote control: {:?}", action);
        Ok(())
    });
    if args.no_hold_events {
        remote_control = remote_control.without_hold_events();
    }

    AgentOptions {
        auto_answer,
        remote_control,
        ..Default::default()
    }
}

async fn run_agent_mode(args: &Args, config: EndpointConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting SIP agent for {}@{}", config.username, config.server);
    let (agent, task) = spawn_agent(build_options(args));

    match agent.initialize(config).await {
        Ok(()) => info!("SIP agent initialized: {}", agent.status()),
        Err(e) if e.is_recoverable() => {
            warn!("Initial connection failed, retrying in background: {}", e);
        }
        Err(e) => {
            error!("SIP agent initialization failed: {}", e);
            error!("Error code: {}", e.error_code());
            return Err(format!("SIP agent initialization failed: {}", e).into());
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    agent.shutdown().await?;
    drop(agent);
    task.await?;
    Ok(())
}

async fn run_test_mode(args: &Args, config: EndpointConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Testing configuration for {}@{}", config.username, config.server);
    let (agent, _task) = spawn_agent(build_options(args));

    let report = agent.test_configuration(&config).await;
    println!("{}", report);
    match report {
        ConfigTestReport::Failed { kind, .. } => Err(format!("{:?}", kind).into()),
        _ => Ok(()),
    }
}
