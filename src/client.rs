use serde_json::Value;
use std::io::Write;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::db::connection::ConnectionConfig;
use crate::db::executor::QueryResult;
use crate::db::introspect::SchemaDescription;
use crate::session::backend::{HttpBackend, QueryBackend};
use crate::session::speech::{CommandCapture, Dictation, SpeechCapture, SpeechEvent, Unsupported};
use crate::session::storage::{FileStore, SessionStore, StoreError};
use crate::session::{Session, SessionStatus};

const HELP: &str = "\
Type a question to run it against the connected database.
  :connect HOST[:PORT] USER DATABASE [PASSWORD]   connect and load the schema
  :test HOST[:PORT] USER DATABASE [PASSWORD]      check a connection without using it
  :reconnect [PASSWORD]                           reuse the saved profile
  :history                                        list recent questions
  :select N                                       show history entry N again
  :token TOKEN                                    store a bearer token
  :sync                                           replace history with the server's
  :listen                                         start or stop dictation
  :run                                            run the current (dictated) text
  :clear                                          forget the current question
  :quit";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Terminal I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Ask(String),
    Connect(ConnectionConfig),
    Test(ConnectionConfig),
    Reconnect(String),
    History,
    Select(usize),
    Token(String),
    Sync,
    Listen,
    Run,
    Clear,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

pub fn parse_command(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }
    let Some(rest) = line.strip_prefix(':') else {
        return ReplCommand::Ask(line.to_string());
    };

    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();
    match (name, args.as_slice()) {
        ("connect", args) => parse_connection(args).map_or_else(usage, ReplCommand::Connect),
        ("test", args) => parse_connection(args).map_or_else(usage, ReplCommand::Test),
        ("reconnect", []) => ReplCommand::Reconnect(String::new()),
        ("reconnect", [password]) => ReplCommand::Reconnect(password.to_string()),
        ("history", []) => ReplCommand::History,
        ("select", [n]) => match n.parse::<usize>() {
            Ok(n) if n > 0 => ReplCommand::Select(n),
            _ => ReplCommand::Invalid(format!("Not a history number: {}", n)),
        },
        ("token", [token]) => ReplCommand::Token(token.to_string()),
        ("sync", []) => ReplCommand::Sync,
        ("listen", []) => ReplCommand::Listen,
        ("run", []) => ReplCommand::Run,
        ("clear", []) => ReplCommand::Clear,
        ("help", _) => ReplCommand::Help,
        ("quit" | "q" | "exit", _) => ReplCommand::Quit,
        _ => ReplCommand::Invalid(format!("Unknown command :{} (try :help)", name)),
    }
}

fn usage() -> ReplCommand {
    ReplCommand::Invalid("Usage: HOST[:PORT] USER DATABASE [PASSWORD]".to_string())
}

fn parse_connection(args: &[&str]) -> Option<ConnectionConfig> {
    let (address, user, database, password) = match args {
        [address, user, database] => (address, user, database, ""),
        [address, user, database, password] => (address, user, database, *password),
        _ => return None,
    };
    let (host, port) = match address.rsplit_once(':') {
        Some((host, port)) => (host, Some(port.parse().ok()?)),
        None => (*address, None),
    };
    Some(ConnectionConfig {
        host: host.to_string(),
        port,
        user: user.to_string(),
        password: password.to_string(),
        database: database.to_string(),
    })
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Renders rows as an aligned text table, columns in `fields` order.
pub fn render_table(result: &QueryResult) -> String {
    if result.fields.is_empty() {
        return "(no rows)".to_string();
    }

    let cells: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| {
            result
                .fields
                .iter()
                .map(|f| row.get(f).map(display_value).unwrap_or_default())
                .collect()
        })
        .collect();

    let widths: Vec<usize> = result
        .fields
        .iter()
        .enumerate()
        .map(|(i, f)| {
            cells
                .iter()
                .map(|r| r[i].chars().count())
                .chain(std::iter::once(f.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |values: &[String]| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<width$}", v, width = *w))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = vec![
        line(&result.fields),
        widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-"),
    ];
    out.extend(cells.iter().map(|r| line(r)));
    out.push(format!("({} rows)", result.rows.len()));
    out.join("\n")
}

/// One-line summary printed after a successful connect.
pub fn connect_summary(schema: &SchemaDescription) -> String {
    if schema.is_empty() {
        "Connected, but no tables were found.".to_string()
    } else {
        format!("Connected. {} tables loaded.", schema.len())
    }
}

/// What to print while a question is in flight.
pub fn progress_message(status: SessionStatus) -> Option<&'static str> {
    if status.is_processing() {
        Some("Generating SQL...")
    } else if status.is_loading() {
        Some("Running query...")
    } else {
        None
    }
}

/// Pulls server history when a token is stored. The local cache stays on failure.
pub async fn restore_history<B: QueryBackend, S: SessionStore>(session: &mut Session<B, S>) -> Option<usize> {
    let token = match session.store().load_token() {
        Ok(Some(token)) => token,
        Ok(None) => return None,
        Err(e) => {
            warn!("Could not read stored token: {}", e);
            return None;
        }
    };
    match session.sync_history(&token).await {
        Ok(n) => Some(n),
        Err(e) => {
            warn!("History sync failed, keeping {} local entries: {}", session.history().len(), e);
            None
        }
    }
}

fn prompt<B: QueryBackend, S: SessionStore>(session: &Session<B, S>) -> std::io::Result<()> {
    match session.connection() {
        Some(active) => print!("nl-sql:{}> ", active.config.database),
        None => print!("nl-sql> "),
    }
    std::io::stdout().flush()
}

fn show_outcome(session: &Session<HttpBackend, FileStore>) {
    if let Some(sql) = session.sql_query() {
        println!("SQL: {}", sql);
    }
    match session.status() {
        SessionStatus::Failed => println!("Error: {}", session.error().unwrap_or("unknown error")),
        SessionStatus::Ready => {
            if let Some(results) = session.results() {
                println!("{}", render_table(results));
            }
        }
        _ => {}
    }
}

/// Interactive loop over stdin, talking to the server at `config.server_url`.
pub async fn run_repl(config: &ClientConfig) -> Result<(), ClientError> {
    let store = FileStore::new(&config.data_dir)?;
    let token = store.load_token()?;
    let backend = HttpBackend::new(&config.server_url).with_token(token);
    let mut session = Session::new(backend, store);

    let capture: Box<dyn SpeechCapture> = match &config.dictation_command {
        Some(command) => Box::new(CommandCapture::new(command.clone())),
        None => Box::new(Unsupported),
    };
    let mut dictation = Dictation::new(capture);

    info!("Client using server {}", config.server_url);
    println!("Connected to {}. Type :help for commands.", config.server_url);
    if let Some(profile) = session.saved_profile() {
        println!(
            "Saved profile: {}@{}/{} (:reconnect PASSWORD to use it)",
            profile.user, profile.host, profile.database
        );
    }

    if let Some(n) = restore_history(&mut session).await {
        println!("Loaded {} history entries from the server.", n);
    }

    let mut updates = session.subscribe();
    let progress = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let status = *updates.borrow_and_update();
            if let Some(message) = progress_message(status) {
                println!("{}", message);
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt(&session)?;
    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
            Some(event) = dictation.next_event(), if dictation.is_listening() => {
                dictation.apply(&mut session, &event);
                match event {
                    SpeechEvent::Partial(text) => println!("\n... {}", text),
                    SpeechEvent::Final(text) => println!("\nHeard: {} (:run to ask it)", text),
                    SpeechEvent::Error(e) => println!("\nDictation error: {}", e),
                    SpeechEvent::Ended => println!("\nDictation stopped."),
                }
                prompt(&session)?;
                continue;
            }
        };

        match parse_command(&line) {
            ReplCommand::Quit => break,
            ReplCommand::Empty => {}
            ReplCommand::Help => println!("{}", HELP),
            ReplCommand::Invalid(message) => println!("{}", message),
            ReplCommand::Ask(question) => {
                session.process_query(&question).await;
                show_outcome(&session);
            }
            ReplCommand::Run => {
                let question = session.current_text().to_string();
                if question.trim().is_empty() {
                    println!("Nothing to run.");
                } else {
                    session.process_query(&question).await;
                    show_outcome(&session);
                }
            }
            ReplCommand::Connect(db) => match session.connect(&db).await {
                Ok(schema) => println!("{}", connect_summary(&schema)),
                Err(e) => println!("Error: {}", e),
            },
            ReplCommand::Test(db) => match session.test_connection(&db).await {
                Ok(()) => println!("Connection OK."),
                Err(e) => println!("Error: {}", e),
            },
            ReplCommand::Reconnect(password) => {
                let Some(db) = session.saved_profile().map(|p| p.with_password(&password)) else {
                    println!("No saved profile.");
                    prompt(&session)?;
                    continue;
                };
                match session.connect(&db).await {
                    Ok(schema) => println!("{}", connect_summary(&schema)),
                    Err(e) => println!("Error: {}", e),
                }
            }
            ReplCommand::History => {
                if session.history().is_empty() {
                    println!("No history yet.");
                }
                for (i, entry) in session.history().iter().enumerate() {
                    println!("{:>2}. {}", i + 1, entry.text);
                }
            }
            ReplCommand::Select(n) => {
                let id = session.history().get(n - 1).map(|h| h.id.clone());
                match id.map(|id| session.select_history_entry(&id)) {
                    Some(Ok(())) => {
                        println!("Q: {}", session.current_text());
                        show_outcome(&session);
                    }
                    Some(Err(e)) => println!("{}", e),
                    None => println!("No history entry {}.", n),
                }
            }
            ReplCommand::Token(token) => {
                session.store_mut().save_token(&token)?;
                session.backend_mut().set_token(Some(token));
                println!("Token saved.");
            }
            ReplCommand::Sync => match session.store().load_token()? {
                Some(token) => match session.sync_history(&token).await {
                    Ok(n) => println!("Loaded {} entries from the server.", n),
                    Err(e) => println!("Error: {}", e),
                },
                None => println!("No token stored. Use :token first."),
            },
            ReplCommand::Listen => match dictation.toggle() {
                Ok(true) => println!("Listening..."),
                Ok(false) => println!("Stopped listening."),
                Err(e) => {
                    warn!("Dictation unavailable: {}", e);
                    println!("{}", e);
                }
            },
            ReplCommand::Clear => session.clear_current(),
        }
        prompt(&session)?;
    }

    dictation.stop();
    progress.abort();
    Ok(())
}
