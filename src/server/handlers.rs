//! Command handlers.

use log::{info, warn};

use super::connection::Session;
use super::router;
use super::shutdown::Phase;
use crate::command::{Command, CommandLine, Verb};
use crate::constants::{DIRECTORY_HEADER, HELP_TEXT, NO_FILES};
use crate::storage::create_user_dir;
use crate::transfer;
use crate::{Error, Result};

/// What the session loop does after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Turn a raw line into a command, checking preconditions in order: known
/// verb, server still running, registration, arity. Leaving is always allowed.
pub fn preflight(line: &str, registered: bool, phase: Phase) -> Result<Command> {
    let parsed = CommandLine::tokenize(line)?;
    if phase != Phase::Running && parsed.verb != Verb::Leave {
        return Err(Error::ShuttingDown);
    }
    if parsed.verb.requires_handle() && !registered {
        return Err(Error::NotRegistered);
    }
    Command::from_parts(parsed.verb, &parsed.args)
}

/// Handle one command line. Errors that are not connection faults are sent
/// back to the client by the caller.
pub async fn dispatch(session: &mut Session, line: &str) -> Result<Flow> {
    let phase = session.ctx.coordinator.phase();
    let command = preflight(line, session.handle.is_some(), phase)?;

    match command {
        Command::Register { handle } => handle_register(session, handle).await,
        Command::Store { filename } => handle_store(session, filename).await,
        Command::Dir => handle_dir(session).await,
        Command::Get { filename } => handle_get(session, filename).await,
        Command::Unicast { target, message } => handle_unicast(session, target, message).await,
        Command::Broadcast { message } => handle_broadcast(session, message).await,
        Command::Leave => {
            session.reply("Goodbye.").await?;
            Ok(Flow::Close)
        }
        Command::Shutdown => handle_shutdown(session).await,
        Command::Help => {
            session.reply(HELP_TEXT).await?;
            Ok(Flow::Continue)
        }
    }
}

fn sender_handle(session: &Session) -> Result<String> {
    session.handle.clone().ok_or(Error::NotRegistered)
}

async fn handle_register(session: &mut Session, handle: String) -> Result<Flow> {
    if let Some(existing) = &session.handle {
        return Err(Error::AlreadyRegistered(existing.clone()));
    }

    session.ctx.state.write().await.register(session.id, &handle)?;
    session.handle = Some(handle.clone());
    info!("User registered: {handle} from {}", session.addr);

    match create_user_dir(&session.ctx.config.user_root, &handle).await {
        Ok(dir) => info!("User directory ready: {}", dir.display()),
        Err(e) => warn!("No user directory for {handle}: {e}"),
    }

    session
        .reply(format!("Handle {handle} registered successfully."))
        .await?;
    Ok(Flow::Continue)
}

async fn handle_store(session: &mut Session, filename: String) -> Result<Flow> {
    let opts = session.ctx.config.transfer_options();

    let result = match session.ctx.store.create_partial(&filename, session.id).await {
        Ok(mut partial) => {
            let received =
                transfer::receive(&mut session.reader, &mut session.writer, partial.file(), &opts)
                    .await;
            match received {
                Ok(report) => partial.commit().await.map(|_| report),
                Err(e) => {
                    partial.discard().await;
                    Err(e)
                }
            }
        }
        Err(e) => {
            // Swallow the upload so the next command starts on a line boundary.
            let mut sink = tokio::io::sink();
            transfer::receive(&mut session.reader, &mut session.writer, &mut sink, &opts)
                .await
                .and(Err(e))
        }
    };

    match result {
        Ok(report) => {
            info!(
                "Stored {filename} ({} bytes) from {}",
                report.bytes,
                session.label()
            );
            session
                .reply(format!(
                    "File {filename} stored successfully ({} bytes).",
                    report.bytes
                ))
                .await?;
            Ok(Flow::Continue)
        }
        Err(e) if e.is_fatal() => Err(e),
        Err(
            e @ (Error::Integrity { .. } | Error::Storage(_) | Error::InvalidFilename(_)),
        ) => {
            warn!("Upload of {filename} from {} rejected: {e}", session.label());
            Err(e)
        }
        Err(e) => {
            // The byte stream can no longer be trusted to be on a line boundary.
            warn!("Upload of {filename} from {} aborted: {e}", session.label());
            session.reply_error(&e).await?;
            Ok(Flow::Close)
        }
    }
}

async fn handle_get(session: &mut Session, filename: String) -> Result<Flow> {
    let opts = session.ctx.config.transfer_options();
    let (mut file, len) = session.ctx.store.open_read(&filename).await?;

    match transfer::send(
        &mut session.reader,
        &mut session.writer,
        &mut file,
        len,
        &opts,
        None,
    )
    .await
    {
        Ok(report) => {
            info!(
                "Sent {filename} ({} bytes) to {}",
                report.bytes,
                session.label()
            );
            Ok(Flow::Continue)
        }
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!("Download of {filename} by {} aborted: {e}", session.label());
            Ok(Flow::Close)
        }
    }
}

async fn handle_dir(session: &mut Session) -> Result<Flow> {
    let names = session.ctx.store.list().await?;
    let body = if names.is_empty() {
        NO_FILES.to_string()
    } else {
        names.join("\n")
    };
    session.reply(format!("{DIRECTORY_HEADER}\n{body}")).await?;
    Ok(Flow::Continue)
}

async fn handle_unicast(session: &mut Session, target: String, message: String) -> Result<Flow> {
    let from = sender_handle(session)?;
    router::unicast(&session.ctx.state, &from, &target, &message).await?;
    session.reply(format!("Message sent to {target}.")).await?;
    Ok(Flow::Continue)
}

async fn handle_broadcast(session: &mut Session, message: String) -> Result<Flow> {
    let from = sender_handle(session)?;
    let reached = router::broadcast(&session.ctx.state, session.id, &from, &message).await;
    session
        .reply(format!("Broadcast sent to {reached} recipient(s)."))
        .await?;
    Ok(Flow::Continue)
}

async fn handle_shutdown(session: &mut Session) -> Result<Flow> {
    let from = sender_handle(session)?;
    if from != session.ctx.config.admin_handle {
        warn!("Unauthorized shutdown attempt by {}", session.label());
        return Err(Error::Unauthorized);
    }

    if !session.ctx.coordinator.trigger(&from) {
        return Err(Error::ShuttingDown);
    }
    session.reply("Shutdown initiated.").await?;
    Ok(Flow::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preflight_order() {
        assert!(matches!(
            preflight("", false, Phase::Running),
            Err(Error::EmptyCommand)
        ));
        assert!(matches!(
            preflight("/nope x", false, Phase::Running),
            Err(Error::UnknownCommand(v)) if v == "/nope"
        ));
        // Registration is checked before arity.
        assert!(matches!(
            preflight("/dir extra", false, Phase::Running),
            Err(Error::NotRegistered)
        ));
        assert!(matches!(
            preflight("/dir extra", true, Phase::Running),
            Err(Error::Arity { .. })
        ));
    }

    #[test]
    fn test_preflight_register_and_help_need_no_handle() {
        assert_eq!(
            preflight("/register bob", false, Phase::Running).unwrap(),
            Command::Register {
                handle: "bob".to_string()
            }
        );
        assert_eq!(preflight("/?", false, Phase::Running).unwrap(), Command::Help);
        assert_eq!(preflight("/leave", false, Phase::Running).unwrap(), Command::Leave);
        assert!(matches!(
            preflight("/broadcast hi", false, Phase::Running),
            Err(Error::NotRegistered)
        ));
    }

    #[test]
    fn test_preflight_rejects_while_draining() {
        assert!(matches!(
            preflight("/dir", true, Phase::Draining),
            Err(Error::ShuttingDown)
        ));
        assert!(matches!(
            preflight("/register late", false, Phase::Stopped),
            Err(Error::ShuttingDown)
        ));
        assert_eq!(
            preflight("/leave", true, Phase::Draining).unwrap(),
            Command::Leave
        );
    }
}
