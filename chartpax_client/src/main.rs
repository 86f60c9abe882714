//! Chartpax one-shot client executable: editing commands against an
//! assigned replica, plus dispatcher administration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use log::{self, LevelFilter};
use chartpax::{
    logger_init, pf_error, ApiReply, ChartpaxError, ClientCtrlStub,
    EditorSession, ReplicaId, ReplicaStatus,
};
use tokio::runtime::Builder;

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Dispatcher control API address.
    #[arg(short, long, default_value = "127.0.0.1:52700")]
    dispatcher: SocketAddr,

    #[command(subcommand)]
    command: Command,
}

/// Client commands. Commands acting as a logged-in user take the token
/// printed by `login`.
#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Register a new account.
    Register { name: String, password: String },

    /// Log in, printing the session token.
    Login { name: String, password: String },

    Logout { name: String, token: String },

    /// Create a document with the given number of sections.
    Create {
        name: String,
        token: String,
        document: String,
        sections: usize,
    },

    /// Begin editing a section, printing its channel address and writing
    /// its content to `output` (or stdout).
    Edit {
        name: String,
        token: String,
        document: String,
        section: usize,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Finish editing a section with the content of `input`.
    Endedit {
        name: String,
        token: String,
        document: String,
        section: usize,
        input: PathBuf,
    },

    /// List documents the user may edit.
    List { name: String, token: String },

    /// Share a document with another user.
    Share {
        name: String,
        token: String,
        document: String,
        target: String,
    },

    /// Fetch pending share notifications.
    News { name: String, token: String },

    /// Mark a replica dead.
    Kill { id: ReplicaId },

    /// Restart a dead replica from a live peer's snapshot.
    Restart { id: ReplicaId },

    /// Print every replica's status.
    Status,

    /// Set a replica's status: live, busy, or dead.
    SetStatus { id: ReplicaId, status: String },
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(())` on success or
    /// `Err(ChartpaxError)` on any error.
    fn sanitize(&self) -> Result<(), ChartpaxError> {
        match self.command {
            Command::Create { sections: 0, .. } => Err(ChartpaxError::msg(
                "number of sections must be positive",
            )),
            Command::SetStatus { ref status, .. } => {
                parse_status(status).map(|_| ())
            }
            _ => Ok(()),
        }
    }
}

/// Parses a replica status name.
fn parse_status(s: &str) -> Result<ReplicaStatus, ChartpaxError> {
    match s.to_lowercase().as_str() {
        "live" | "emptylive" | "0" => Ok(ReplicaStatus::EmptyLive),
        "busy" | "1" => Ok(ReplicaStatus::Busy),
        "dead" | "2" => Ok(ReplicaStatus::Dead),
        _ => Err(ChartpaxError::msg(format!("unrecognized status '{}'", s))),
    }
}

/// Prints a replica reply; returns an error if it reports failure.
fn report(reply: ApiReply) -> Result<(), ChartpaxError> {
    if reply.is_success() {
        println!("{}", reply.message);
        for note in &reply.notifications {
            println!("  {}", note);
        }
        Ok(())
    } else {
        Err(ChartpaxError(reply.message))
    }
}

/// Runs one editing command through an assigned replica.
async fn run_session_command(
    dispatcher: SocketAddr,
    command: Command,
) -> Result<(), ChartpaxError> {
    let name = match &command {
        Command::Register { name, .. }
        | Command::Login { name, .. }
        | Command::Logout { name, .. }
        | Command::Create { name, .. }
        | Command::Edit { name, .. }
        | Command::Endedit { name, .. }
        | Command::List { name, .. }
        | Command::Share { name, .. }
        | Command::News { name, .. } => name.clone(),
        _ => return Err(ChartpaxError::msg("not an editing command")),
    };
    let mut session = EditorSession::new_by_assign(dispatcher, name).await?;

    match command {
        Command::Register { password, .. } => {
            report(session.register(&password).await?)?
        }
        Command::Login { password, .. } => {
            report(session.login(&password).await?)?
        }
        Command::Logout { token, .. } => {
            session.resume(token);
            report(session.logout().await?)?
        }
        Command::Create {
            token,
            document,
            sections,
            ..
        } => {
            session.resume(token);
            report(session.create_document(&document, sections).await?)?
        }
        Command::Edit {
            token,
            document,
            section,
            output,
            ..
        } => {
            session.resume(token);
            let reply = session.begin_edit(&document, section).await?;
            let content = reply.content.clone().unwrap_or_default();
            report(reply)?;
            match output {
                Some(path) => tokio::fs::write(path, &content).await?,
                None => println!("{}", String::from_utf8_lossy(&content)),
            }
        }
        Command::Endedit {
            token,
            document,
            section,
            input,
            ..
        } => {
            session.resume(token);
            let content = Bytes::from(tokio::fs::read(input).await?);
            report(session.end_edit(&document, section, content).await?)?
        }
        Command::List { token, .. } => {
            session.resume(token);
            report(session.list_documents().await?)?
        }
        Command::Share {
            token,
            document,
            target,
            ..
        } => {
            session.resume(token);
            report(session.share_document(&document, &target).await?)?
        }
        Command::News { token, .. } => {
            session.resume(token);
            report(session.fetch_notifications().await?)?
        }
        _ => {}
    }

    session.leave().await
}

/// Runs one administrative command against the dispatcher.
async fn run_admin_command(
    dispatcher: SocketAddr,
    command: Command,
) -> Result<(), ChartpaxError> {
    let mut ctrl_stub = ClientCtrlStub::new_by_connect(dispatcher).await?;
    match command {
        Command::Kill { id } => {
            ctrl_stub.kill(id).await?;
            println!("replica {} marked dead", id);
        }
        Command::Restart { id } => {
            if ctrl_stub.restart(id).await? {
                println!("replica {} recovered", id);
            } else {
                println!("replica {} could not be recovered", id);
            }
        }
        Command::Status => {
            for (id, status) in ctrl_stub.statuses().await? {
                println!("{} {:?}", id, status);
            }
        }
        Command::SetStatus { id, status } => {
            ctrl_stub.set_status(id, parse_status(&status)?).await?;
            println!("replica {} set to {}", id, status);
        }
        _ => return Err(ChartpaxError::msg("not an admin command")),
    }
    ctrl_stub.leave().await
}

/// Actual main function of the Chartpax client.
fn client_main() -> Result<(), ChartpaxError> {
    // read in and parse command line arguments
    let args = CliArgs::parse();
    args.sanitize()?;

    let log_level = log::max_level();
    {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .thread_name("tokio-worker-client")
            .build()?;

        runtime.block_on(async move {
            match args.command {
                Command::Kill { .. }
                | Command::Restart { .. }
                | Command::Status
                | Command::SetStatus { .. } => {
                    run_admin_command(args.dispatcher, args.command).await?
                }
                command => run_session_command(args.dispatcher, command).await?,
            }

            log::set_max_level(LevelFilter::Off);
            Ok::<(), ChartpaxError>(())
        })?;
    }

    log::set_max_level(log_level);
    Ok(())
}

/// Main function of the Chartpax client.
fn main() -> ExitCode {
    logger_init();

    if let Err(ref e) = client_main() {
        pf_error!("c"; "client_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
