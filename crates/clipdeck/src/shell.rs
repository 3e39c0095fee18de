//! Interactive playback shell.
//!
//! Reads commands from an injected input source and drives the playback
//! session until close, natural end of the clip, or end of input. A reader
//! thread forwards lines over a channel so the loop can also poll the
//! session for end-of-track between commands.

use std::io::BufRead;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{Receiver, select, tick};

use clipdeck_core::device::ClipDevice;
use clipdeck_core::session::{PlaybackSession, PlaybackState, SessionError};
use clipdeck_core::timecode::{format_minutes, parse_timecode};

/// How often the loop checks whether the clip played to its end.
const END_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One parsed shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Pause,
    Resume,
    Restart,
    /// Raw `mm:ss` argument; parsed at dispatch so a bad timecode can be
    /// reported and re-prompted.
    Seek(String),
    Close,
    Unknown(String),
}

/// Why the shell returned. The session is closed in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellOutcome {
    /// The user closed the session (or the input source ended).
    Closed,
    /// Playback ended and a follow-up input ended the session.
    Ended,
}

/// Parse one input line. Word commands and the single-letter menu keys are
/// both accepted.
pub fn parse_command(line: &str) -> ShellCommand {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return ShellCommand::Unknown(String::new());
    };
    let arg = words.next();
    let extra = words.next();

    match (head.to_ascii_lowercase().as_str(), arg, extra) {
        ("pause" | "p", None, _) => ShellCommand::Pause,
        ("resume" | "r", None, _) => ShellCommand::Resume,
        ("restart" | "h", None, _) => ShellCommand::Restart,
        ("seek" | "s", Some(t), None) => ShellCommand::Seek(t.to_string()),
        ("seek" | "s", None, _) => ShellCommand::Seek(String::new()),
        ("close" | "e", None, _) => ShellCommand::Close,
        _ => ShellCommand::Unknown(line.trim().to_string()),
    }
}

/// Run the shell over `input` until it finishes.
pub fn run<D, R>(session: &mut PlaybackSession<D>, input: R) -> Result<ShellOutcome>
where
    D: ClipDevice,
    R: BufRead + Send + 'static,
{
    let lines = spawn_line_reader(input);
    run_with_lines(session, &lines)
}

fn spawn_line_reader<R: BufRead + Send + 'static>(input: R) -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    std::thread::spawn(move || {
        for line in input.lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn run_with_lines<D: ClipDevice>(
    session: &mut PlaybackSession<D>,
    lines: &Receiver<String>,
) -> Result<ShellOutcome> {
    let ticker = tick(END_POLL_INTERVAL);
    print_menu();

    loop {
        select! {
            recv(lines) -> line => {
                let Ok(line) = line else {
                    // Input source is gone; shut the session down.
                    session.close()?;
                    return Ok(ShellOutcome::Closed);
                };
                report_if_ended(session);
                match dispatch(session, &line)? {
                    Some(outcome) => return Ok(outcome),
                    None => print_menu(),
                }
            }
            recv(ticker) -> _ => {
                report_if_ended(session);
            }
        }
    }
}

fn report_if_ended<D: ClipDevice>(session: &mut PlaybackSession<D>) {
    if session.poll_ended() {
        println!("Playback finished.");
    }
}

/// Handle one line. Returns `Some` when the loop should end.
fn dispatch<D: ClipDevice>(
    session: &mut PlaybackSession<D>,
    line: &str,
) -> Result<Option<ShellOutcome>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    match parse_command(line) {
        ShellCommand::Pause => report(session.pause(), "Playback paused.")?,
        ShellCommand::Resume => report(session.resume(), "Playback resumed.")?,
        ShellCommand::Restart => report(session.restart(), "Restarting from the top.")?,
        ShellCommand::Seek(raw) => seek(session, &raw)?,
        ShellCommand::Close => {
            session.close()?;
            println!("Session closed.");
            return Ok(Some(ShellOutcome::Closed));
        }
        ShellCommand::Unknown(token) => {
            // While something is playing or paused an unknown token is a
            // no-op; once playback has ended it ends the session instead.
            let engaged = matches!(
                session.state(),
                PlaybackState::Playing | PlaybackState::Paused
            );
            if engaged {
                println!("Unknown command {token:?}.");
            } else {
                session.close()?;
                return Ok(Some(ShellOutcome::Ended));
            }
        }
    }
    Ok(None)
}

/// Print the success line, or the named failure for a rejected transition.
/// Device failures propagate; the session has already closed itself.
fn report(result: std::result::Result<(), SessionError>, success: &str) -> Result<()> {
    match result {
        Ok(()) => {
            println!("{success}");
            Ok(())
        }
        Err(err @ SessionError::Device(_)) => Err(err.into()),
        Err(err) => {
            println!("{err}");
            Ok(())
        }
    }
}

fn seek<D: ClipDevice>(session: &mut PlaybackSession<D>, raw: &str) -> Result<()> {
    let target = match parse_timecode(raw) {
        Ok(target) => target,
        Err(err) => {
            println!("{err}");
            return Ok(());
        }
    };
    report(
        session.seek(target),
        &format!(
            "Seeking to {raw} (clip runs {:.3} minutes).",
            format_minutes(session.usable_end())
        ),
    )
}

fn print_menu() {
    println!();
    println!("Commands: pause  resume  restart  seek <mm:ss>  close");
}
