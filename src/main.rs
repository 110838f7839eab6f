//! Line-oriented console over the coordinator

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;

use shellfleet::config::{ConfigStorage, NewConnection};
use shellfleet::session::{AuthResolver, ConnectionId};
use shellfleet::{init_logging, Coordinator, Update};

const DEFAULT_WINDOW: usize = 20;
const PAGE: usize = 10;

const HELP: &str = "\
commands:
  add <alias> <user>@<host>[:port] [key_path]
  del [n|alias]          remove a connection
  ls                     list connections
  sel <n|alias>          select a connection (next / prev also work)
  connect [n|alias]      connect (defaults to the selected one)
  disconnect [n|alias]
  ping [n|alias]         liveness check
  run <command>          run on the selected connection (or `!<command>`)
  history                list command history
  up / down              recall history
  show [lines]           print the transcript window
  pgup / pgdn            scroll the transcript
  quit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let storage = ConfigStorage::new()?;
    let mut coordinator = Coordinator::load(storage, AuthResolver::from_env()).await?;

    println!("shellfleet: {} connection(s) loaded, `help` for commands", coordinator.registry().len());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&mut coordinator, line.trim()).await {
                    break;
                }
            }
            Some(event) = coordinator.next_event() => {
                let update = coordinator.apply(event);
                report(&coordinator, &update);
            }
        }
    }

    Ok(())
}

/// Returns `false` to quit
async fn handle_line(coordinator: &mut Coordinator, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }
    if let Some(command) = line.strip_prefix('!') {
        submit(coordinator, command.trim()).await;
        return true;
    }

    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let arg = (!rest.is_empty()).then_some(rest);

    match verb {
        "help" => println!("{}", HELP),
        "quit" | "exit" => return false,
        "ls" => list(coordinator),
        "add" => add(coordinator, rest).await,
        "del" => match target(coordinator, arg) {
            Some(id) => {
                if let Err(e) = coordinator.delete_connection(id).await {
                    println!("{}", e);
                }
            }
            None => println!("no such connection"),
        },
        "sel" => match target(coordinator, arg) {
            Some(id) => {
                let _ = coordinator.select(id);
                list(coordinator);
            }
            None => println!("no such connection"),
        },
        "next" => {
            coordinator.select_next();
            list(coordinator);
        }
        "prev" => {
            coordinator.select_previous();
            list(coordinator);
        }
        "connect" => match target(coordinator, arg) {
            Some(id) => match coordinator.connect(id) {
                Ok(true) => println!("connecting..."),
                Ok(false) => println!("already connecting or connected"),
                Err(e) => println!("{}", e),
            },
            None => println!("no such connection"),
        },
        "disconnect" => match target(coordinator, arg) {
            Some(id) => {
                if let Err(e) = coordinator.disconnect(id) {
                    println!("{}", e);
                }
            }
            None => println!("no such connection"),
        },
        "ping" => match target(coordinator, arg) {
            Some(id) => {
                if let Err(e) = coordinator.check_alive(id) {
                    println!("{}", e);
                }
            }
            None => println!("no such connection"),
        },
        "run" => submit(coordinator, rest).await,
        "history" => {
            let history = coordinator.history();
            for i in (0..history.size()).rev() {
                if let Some(entry) = history.get(i) {
                    println!("{:>4}  {}", history.size() - i, entry);
                }
            }
        }
        "up" => match coordinator.history_up() {
            Some(entry) => println!("{}", entry),
            None => println!("(history empty)"),
        },
        "down" => println!("{}", coordinator.history_down()),
        "show" => {
            let height = rest.parse().unwrap_or(DEFAULT_WINDOW);
            show(coordinator, height);
        }
        "pgup" => {
            coordinator.scroll_up(PAGE);
            show(coordinator, DEFAULT_WINDOW);
        }
        "pgdn" => {
            coordinator.scroll_down(PAGE);
            show(coordinator, DEFAULT_WINDOW);
        }
        other => println!("unknown command `{}`, try `help`", other),
    }
    true
}

async fn submit(coordinator: &mut Coordinator, command: &str) {
    if command.is_empty() {
        return;
    }
    if let Err(e) = coordinator.submit(command).await {
        println!("{}", e);
    }
}

async fn add(coordinator: &mut Coordinator, args: &str) {
    let mut parts = args.split_whitespace();
    let (Some(alias), Some(target)) = (parts.next(), parts.next()) else {
        println!("usage: add <alias> <user>@<host>[:port] [key_path]");
        return;
    };
    let Some((user, host_port)) = target.split_once('@') else {
        println!("expected <user>@<host>");
        return;
    };
    let (host, port) = match host_port.rsplit_once(':') {
        Some((host, port)) => (host, port),
        None => (host_port, ""),
    };

    let form = NewConnection {
        alias: alias.to_string(),
        host: host.to_string(),
        user: user.to_string(),
        port: port.to_string(),
        key_path: parts.next().unwrap_or_default().to_string(),
    };

    match coordinator.add_connection(&form).await {
        Ok(_) => list(coordinator),
        Err(e) => println!("{}", e),
    }
}

/// Connection by 1-based index or alias; the selected one when `arg` is empty
fn target(coordinator: &Coordinator, arg: Option<&str>) -> Option<ConnectionId> {
    let registry = coordinator.registry();
    let Some(arg) = arg else {
        return registry.selected_id();
    };
    if let Ok(n) = arg.parse::<usize>() {
        return registry.iter().nth(n.checked_sub(1)?).map(|s| s.id);
    }
    registry
        .iter()
        .find(|s| s.connection.alias == arg)
        .map(|s| s.id)
}

fn list(coordinator: &Coordinator) {
    let registry = coordinator.registry();
    if registry.is_empty() {
        println!("(no connections)");
        return;
    }
    let selected = registry.selected_id();
    for (i, state) in registry.iter().enumerate() {
        let marker = if Some(state.id) == selected { '>' } else { ' ' };
        let busy = if state.is_executing() { " [executing]" } else { "" };
        println!(
            "{} {:>2}. {:<16} {}@{}  {}{}",
            marker,
            i + 1,
            state.connection.alias,
            state.connection.user,
            state.connection.address(),
            state.status_string(),
            busy
        );
    }
}

fn show(coordinator: &Coordinator, height: usize) {
    let Some(selected) = coordinator.selected() else {
        println!("(no connection selected)");
        return;
    };
    println!("--- {} ---", selected.connection.alias);
    if let Some(current) = &selected.current {
        println!("$ {}\n[Executing...]", current.command);
    }
    let window = coordinator.transcript_window(height);
    if window.is_empty() && selected.current.is_none() {
        println!("(no commands executed yet)");
    }
    for line in window {
        println!("{}", line);
    }
}

fn report(coordinator: &Coordinator, update: &Update) {
    let alias = |id: &ConnectionId| {
        coordinator
            .registry()
            .get(*id)
            .map(|s| s.connection.alias.clone())
            .unwrap_or_else(|| id.to_string())
    };

    match update {
        Update::StatusChanged {
            connection_id,
            status,
            error,
        } => match error {
            Some(e) => println!("[{}] {}: {}", alias(connection_id), status, e),
            None => println!("[{}] {}", alias(connection_id), status),
        },
        Update::ExecutionAppended {
            connection_id,
            command,
            exit_code,
        } => {
            println!("[{}] `{}` finished (exit {})", alias(connection_id), command, exit_code);
            show(coordinator, DEFAULT_WINDOW);
        }
        Update::ExecutionFailed { connection_id, error: e } => {
            error!("Command on {} failed: {}", alias(connection_id), e);
            println!("[{}] command failed: {}", alias(connection_id), e);
        }
        Update::Liveness {
            connection_id,
            alive,
            error: e,
        } => match (alive, e) {
            (true, _) => println!("[{}] alive", alias(connection_id)),
            (false, Some(e)) => println!("[{}] not responding: {}", alias(connection_id), e),
            (false, None) => println!("[{}] not responding", alias(connection_id)),
        },
        Update::Ignored { .. } => {}
    }
}
