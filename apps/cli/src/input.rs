use apollolytics_dialogue::ShellCommand;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Map one line of terminal input to a command.
///
/// An empty line toggles recording, `/retry` re-sends a failed turn and
/// `/quit` leaves. Anything else is a typed reply.
pub fn parse_line(line: &str) -> ShellCommand {
    match line.trim() {
        "" => ShellCommand::ToggleRecording,
        "/retry" => ShellCommand::RetrySend,
        "/quit" | "/q" => ShellCommand::Quit,
        text => ShellCommand::SubmitText(text.to_string()),
    }
}

/// Forward stdin lines as commands until stdin closes or the runner stops.
pub fn spawn_stdin_reader(commands: mpsc::UnboundedSender<ShellCommand>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if commands.send(parse_line(&line)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read stdin");
                    break;
                }
            }
        }
    });
}
