//! Line-oriented console commands for driving a server or client by hand.
//!
//! Parsing is pure: a line of text becomes a command value or a
//! [`CommandError`]. Executing a command makes exactly one call on the
//! [`Server`] or [`Client`] it is given and renders the result as text.
//!
//! ```text
//! server:  a            accept one pending client
//!          i            show information
//!          s <n> <file> send <file> to client number <n>
//!          c            check for requests
//!          r            answer requests
//!          q            quit
//!
//! client:  r            read a file the server sends
//!          s <code>     send a request code (1 = info file, 2 = join)
//!          q            quit
//! ```

use std::path::PathBuf;
use std::str::FromStr;

use infoserve_protocol::RequestCode;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{Client, Dispatch, InfoserveError, RequestOutcome, Server};

/// Menu shown by the server console.
pub const SERVER_HELP: &str = "\
Choose one and hit enter:
\ta -> accept connection
\ti -> get information
\ts <number> <file> -> send file
\tc -> check for requests
\tr -> answer requests
\tq -> quit";

/// Menu shown by the client console.
pub const CLIENT_HELP: &str = "\
Choose one and hit enter:
\tr -> read file
\ts <code> -> send request (1 - get information file, 2 - join the game)
\tq -> quit";

/// Why a console line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}'")]
    Unknown(String),

    #[error("'{command}' needs {expected}")]
    MissingArgument {
        command: &'static str,
        expected: &'static str,
    },

    #[error("'{value}' is not a valid {expected}")]
    InvalidArgument {
        value: String,
        expected: &'static str,
    },
}

/// What the console loop should do after a command ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Print this and keep reading commands.
    Show(String),
    /// Leave the loop.
    Quit,
}

// ---------------------------------------------------------------------------
// Server commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    Accept,
    Info,
    SendFile { slot: usize, path: PathBuf },
    Check,
    Answer,
    Quit,
}

impl FromStr for ServerCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().ok_or(CommandError::Empty)?;
        match command {
            "a" => Ok(Self::Accept),
            "i" => Ok(Self::Info),
            "c" => Ok(Self::Check),
            "r" => Ok(Self::Answer),
            "q" => Ok(Self::Quit),
            "s" => {
                let slot = parse_arg(words.next(), "s", "a client number")?;
                let path = words.next().ok_or(CommandError::MissingArgument {
                    command: "s",
                    expected: "a file name",
                })?;
                Ok(Self::SendFile {
                    slot,
                    path: PathBuf::from(path),
                })
            }
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

impl ServerCommand {
    /// Runs the command against `server`.
    pub async fn execute(self, server: &mut Server) -> Result<Reply, InfoserveError> {
        let text = match self {
            Self::Accept => match server.accept_connection().await? {
                Some(slot) => format!("accepted client number {slot}"),
                None => "nobody is waiting to connect".to_string(),
            },
            Self::Info => server.get_information(),
            Self::SendFile { slot, path } => {
                let bytes = server.send_file(slot, &path).await?;
                format!("sent {bytes} bytes of {} to client {slot}", path.display())
            }
            Self::Check => {
                if server.check_for_requests().await? {
                    "There are new requests!".to_string()
                } else {
                    "There isn't any new request".to_string()
                }
            }
            Self::Answer => render_dispatches(&server.answer_requests().await?),
            Self::Quit => {
                server.stop().await;
                return Ok(Reply::Quit);
            }
        };
        Ok(Reply::Show(text))
    }
}

fn render_dispatches(outcomes: &[Dispatch]) -> String {
    if outcomes.is_empty() {
        return "no requests to answer".to_string();
    }
    let mut text = String::new();
    for outcome in outcomes {
        let line = match *outcome {
            Dispatch::Served { slot, bytes } => {
                format!("client {slot}: sent information file ({bytes} bytes)")
            }
            Dispatch::TransferFailed { slot } => {
                format!("client {slot}: sending information file failed")
            }
            Dispatch::JoinRequested { slot } => {
                format!("client {slot}: wants to join the game")
            }
            Dispatch::Unhandled { slot, code } => {
                format!("client {slot}: unknown request code {code}")
            }
            Dispatch::Dropped { slot } => format!("client {slot}: disconnected"),
        };
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&line);
    }
    text
}

// ---------------------------------------------------------------------------
// Client commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    ReadFile,
    SendRequest(RequestCode),
    Quit,
}

impl FromStr for ClientCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().ok_or(CommandError::Empty)?;
        match command {
            "r" => Ok(Self::ReadFile),
            "q" => Ok(Self::Quit),
            "s" => {
                let code: i32 = parse_arg(words.next(), "s", "request code")?;
                Ok(Self::SendRequest(RequestCode::from(code)))
            }
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

impl ClientCommand {
    /// Runs the command against `client`.
    pub async fn execute<S>(self, client: &mut Client<S>) -> Result<Reply, InfoserveError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let text = match self {
            Self::ReadFile => {
                let path = client.config().output_path.clone();
                let bytes = client.receive_file(&path).await?;
                format!("received {bytes} bytes into {}", path.display())
            }
            Self::SendRequest(code) => match client.send_request(code).await? {
                RequestOutcome::Sent => format!("sent request {code}"),
                RequestOutcome::Received { path, bytes } => {
                    format!("received {bytes} bytes into {}", path.display())
                }
            },
            Self::Quit => {
                client.close().await;
                return Ok(Reply::Quit);
            }
        };
        Ok(Reply::Show(text))
    }
}

fn parse_arg<T: FromStr>(
    word: Option<&str>,
    command: &'static str,
    expected: &'static str,
) -> Result<T, CommandError> {
    let word = word.ok_or(CommandError::MissingArgument { command, expected })?;
    word.parse().map_err(|_| CommandError::InvalidArgument {
        value: word.to_string(),
        expected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServerConfig;

    #[test]
    fn test_parse_server_commands() {
        assert_eq!("a".parse(), Ok(ServerCommand::Accept));
        assert_eq!("  i ".parse(), Ok(ServerCommand::Info));
        assert_eq!("c".parse(), Ok(ServerCommand::Check));
        assert_eq!("r".parse(), Ok(ServerCommand::Answer));
        assert_eq!("q".parse(), Ok(ServerCommand::Quit));
        assert_eq!(
            "s 1 notes.xml".parse(),
            Ok(ServerCommand::SendFile {
                slot: 1,
                path: PathBuf::from("notes.xml")
            })
        );
    }

    #[test]
    fn test_parse_server_command_errors() {
        assert_eq!("".parse::<ServerCommand>(), Err(CommandError::Empty));
        assert_eq!(
            "x".parse::<ServerCommand>(),
            Err(CommandError::Unknown("x".into()))
        );
        assert!(matches!(
            "s".parse::<ServerCommand>(),
            Err(CommandError::MissingArgument { .. })
        ));
        assert!(matches!(
            "s 2".parse::<ServerCommand>(),
            Err(CommandError::MissingArgument {
                expected: "a file name",
                ..
            })
        ));
        assert!(matches!(
            "s two file".parse::<ServerCommand>(),
            Err(CommandError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_parse_client_commands() {
        assert_eq!("r".parse(), Ok(ClientCommand::ReadFile));
        assert_eq!("q".parse(), Ok(ClientCommand::Quit));
        assert_eq!(
            "s 1".parse(),
            Ok(ClientCommand::SendRequest(RequestCode::FetchInfo))
        );
        assert_eq!(
            "s 99".parse(),
            Ok(ClientCommand::SendRequest(RequestCode::Unknown(99)))
        );
        assert!(matches!(
            "s abc".parse::<ClientCommand>(),
            Err(CommandError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_render_dispatches() {
        assert_eq!(render_dispatches(&[]), "no requests to answer");
        let text = render_dispatches(&[
            Dispatch::Served { slot: 0, bytes: 10 },
            Dispatch::Unhandled { slot: 1, code: 99 },
        ]);
        assert_eq!(
            text,
            "client 0: sent information file (10 bytes)\nclient 1: unknown request code 99"
        );
    }

    #[tokio::test]
    async fn test_server_commands_on_idle_server() {
        let mut server = Server::new(ServerConfig {
            port: 0,
            bind_host: "127.0.0.1".into(),
            ..ServerConfig::default()
        });
        server.setup_port().await.unwrap();
        server.open_port_for_listening().await.unwrap();

        let reply = ServerCommand::Info.execute(&mut server).await.unwrap();
        assert!(matches!(reply, Reply::Show(text) if text.contains("Number of clients: 0")));

        let reply = ServerCommand::Check.execute(&mut server).await.unwrap();
        assert_eq!(reply, Reply::Show("There isn't any new request".into()));

        let err = ServerCommand::SendFile {
            slot: 3,
            path: "info.xml".into(),
        }
        .execute(&mut server)
        .await
        .unwrap_err();
        assert!(matches!(err, InfoserveError::NoSuchConnection(3)));

        let reply = ServerCommand::Quit.execute(&mut server).await.unwrap();
        assert_eq!(reply, Reply::Quit);
    }
}
