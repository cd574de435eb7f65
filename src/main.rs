//! prompt-anywhere - global-hotkey AI prompt surface
//!
//! USAGE:
//!   prompt-anywhere                     # run the prompt surface + hotkey
//!   prompt-anywhere --agent <name>      # run with a specific agent
//!   prompt-anywhere sessions            # list saved sessions
//!   prompt-anywhere doctor              # check config, agents, host
//!   prompt-anywhere config set key val  # non-interactive config

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use prompt_anywhere::agent::{find_executable, supported_agents};
use prompt_anywhere::config::{self, Config};
use prompt_anywhere::coordinator::Coordinator;
use prompt_anywhere::session::SessionStore;
use prompt_anywhere::ui;

// ═══════════════════════════════════════════════════════════════
// CLI
// ═══════════════════════════════════════════════════════════════

#[derive(Debug)]
enum Command {
    Run { agent: Option<String> },
    Sessions,
    Doctor,
    ConfigSet { key: String, value: String },
    Help,
}

fn parse_args() -> Command {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        return Command::Help;
    }

    match args.first().map(|s| s.as_str()) {
        Some("doctor") => return Command::Doctor,
        Some("sessions") => return Command::Sessions,
        Some("config") if args.get(1).map(|s| s.as_str()) == Some("set") => {
            return Command::ConfigSet {
                key: args.get(2).cloned().unwrap_or_default(),
                value: args.get(3).cloned().unwrap_or_default(),
            };
        }
        _ => {}
    }

    let mut agent = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--agent" | "-a" => {
                i += 1;
                agent = args.get(i).cloned();
            }
            _ => {}
        }
        i += 1;
    }

    Command::Run { agent }
}

fn print_help() {
    println!(
        r#"prompt-anywhere - global-hotkey AI prompt surface

USAGE:
    prompt-anywhere                       # run the prompt surface + hotkey
    prompt-anywhere --agent <name>        # run with a specific agent
    prompt-anywhere sessions              # list saved sessions
    prompt-anywhere doctor                # check config, agents, host
    prompt-anywhere config set key value  # set a config value

FLAGS:
    -a, --agent <name>      Agent backend: {agents}
    -h, --help              Show this help

CONFIG:
    ~/.config/prompt-anywhere/config.json      hotkey, default agent, theme
    ~/.local/state/prompt-anywhere/sessions.json   saved conversations

CONTROLS:
    <hotkey>  Summon the prompt surface (default ctrl+alt+x)
    Enter     Send prompt
    Esc       Stop stream / hide surface
    ^N        New session
    ^C        Quit
"#,
        agents = supported_agents().join(", ")
    );
}

// ═══════════════════════════════════════════════════════════════
// MAIN
// ═══════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match parse_args() {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Doctor => run_doctor().await,
        Command::Sessions => run_sessions(),
        Command::ConfigSet { key, value } => run_config_set(&key, &value),
        Command::Run { agent } => run_surface(agent).await,
    }
}

// ═══════════════════════════════════════════════════════════════
// COMMANDS
// ═══════════════════════════════════════════════════════════════

async fn run_surface(agent_override: Option<String>) -> Result<()> {
    config::ensure_dirs()?;
    let mut cfg = Config::load()?;
    if let Some(agent) = agent_override {
        cfg.default_agent = agent;
    }

    let store = SessionStore::new(config::sessions_path()?);
    let coordinator = Coordinator::new(cfg, store)?;
    ui::run(coordinator).await
}

fn run_sessions() -> Result<()> {
    let store = SessionStore::new(config::sessions_path()?);
    let sessions = store.load_all()?;

    if sessions.is_empty() {
        println!("No saved sessions.");
        return Ok(());
    }

    println!("Sessions ({}):\n", sessions.len());
    for s in sessions {
        println!(
            "  {}  {:>3} msgs  {}  {}",
            s.updated_at.format("%Y-%m-%d %H:%M"),
            s.message_count,
            &s.id[..8],
            s.title
        );
    }
    Ok(())
}

async fn run_doctor() -> Result<()> {
    println!("prompt-anywhere doctor\n");

    let cfg = Config::load()?;
    println!(
        "[✓] Config: {} (hotkey {}, agent {})",
        config::config_path()?.display(),
        cfg.hotkey,
        cfg.default_agent
    );

    for name in supported_agents() {
        let found = find_executable(&[name]).is_some();
        println!(
            "[{}] Agent '{}': {}",
            if found { "✓" } else { "✗" },
            name,
            if found { "executable on PATH" } else { "not found" }
        );
    }

    let sessions_path = config::sessions_path()?;
    println!(
        "[{}] Session store: {}",
        if sessions_path.exists() { "✓" } else { "-" },
        sessions_path.display()
    );

    print!("[?] Agent host: checking...");
    let client = reqwest::Client::new();
    match client
        .get("http://127.0.0.1:17123/health")
        .timeout(std::time::Duration::from_millis(500))
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => {
            println!("\r[✓] Agent host: up            ");
        }
        _ => println!("\r[-] Agent host: not running (optional)"),
    }

    Ok(())
}

fn run_config_set(key: &str, value: &str) -> Result<()> {
    let mut cfg = Config::load()?;

    match key {
        "hotkey" => {
            cfg.hotkey = value.to_string();
            cfg.save()?;
            println!("Hotkey set to: {}", value);
        }
        "agent" | "default_agent" => {
            if !supported_agents().contains(&value) {
                anyhow::bail!(
                    "Unknown agent: {}. Valid agents: {}",
                    value,
                    supported_agents().join(", ")
                );
            }
            cfg.default_agent = value.to_string();
            cfg.save()?;
            println!("Default agent set to: {}", value);
        }
        "theme" => {
            cfg.theme = value.to_string();
            cfg.save()?;
            println!("Theme set to: {}", value);
        }
        _ => {
            anyhow::bail!("Unknown config key: {}. Valid keys: hotkey, agent, theme", key);
        }
    }
    Ok(())
}
