//! Line based stand-in for a request form and a response log.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use log::{info, warn};
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio::time::timeout;

use webrtc_http::one_to_one::NetworkManager;

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub path: String,
    pub body: Option<String>,
}

impl Display for RequestLine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)?;
        if let Some(body) = &self.body {
            write!(f, " {body}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Request(RequestLine),
    History,
    Reset,
    Quit,
}

/// `METHOD PATH [BODY]`, a bare `PATH` meaning `GET PATH`, or one of
/// `history`, `reset`, `quit`. Blank lines parse to `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    match line {
        "history" => return Ok(Some(Command::History)),
        "reset" => return Ok(Some(Command::Reset)),
        "quit" | "exit" => return Ok(Some(Command::Quit)),
        _ => {}
    }
    if line.starts_with('/') && !line.contains(char::is_whitespace) {
        return Ok(Some(Command::Request(RequestLine {
            method: "GET".to_owned(),
            path: line.to_owned(),
            body: None,
        })));
    }

    let mut parts = line.splitn(3, char::is_whitespace);
    let method = parts.next().unwrap_or_default().to_uppercase();
    let path = match parts.next() {
        Some(path) if path.starts_with('/') => path.to_owned(),
        Some(path) => return Err(format!("path must start with '/': {path}")),
        None => return Err(format!("missing path after {method}")),
    };
    let body = parts
        .next()
        .map(str::trim)
        .filter(|body| !body.is_empty())
        .map(str::to_owned);
    Ok(Some(Command::Request(RequestLine { method, path, body })))
}

struct Exchange {
    request: RequestLine,
    response: String,
}

/// Read commands from stdin until it closes, printing every response.
pub async fn run(client: &mut NetworkManager) -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = client.wait_until_connected().await {
        warn!("not connected yet: {e}; type `reset` to try again");
    }
    println!("type `METHOD PATH [BODY]`, `history`, `reset` or `quit`");

    let mut history: Vec<Exchange> = Vec::new();
    let mut lines = BufReader::new(stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };
        match command {
            Command::Quit => break,
            Command::History => {
                for (n, exchange) in history.iter().enumerate() {
                    println!("{:>3}  {}  ->  {}", n + 1, exchange.request, exchange.response);
                }
            }
            Command::Reset => {
                client.reset().await;
                match client.wait_until_connected().await {
                    Ok(()) => info!("connected again"),
                    Err(e) => warn!("reset did not reconnect: {e}"),
                }
            }
            Command::Request(request) => {
                let id = match client
                    .send_request(&request.path, &request.method, request.body.clone())
                    .await
                {
                    Ok(id) => id,
                    Err(e) => {
                        eprintln!("not sent: {e} (state: {})", client.state());
                        continue;
                    }
                };
                match timeout(RESPONSE_TIMEOUT, client.next_response()).await {
                    Ok(Some(response)) => {
                        if response.id.is_some_and(|answered| answered != id) {
                            warn!("response belongs to an earlier request");
                        }
                        let text = response
                            .text()
                            .map(str::to_owned)
                            .unwrap_or_else(|| response.data.to_string());
                        println!("{text}");
                        history.push(Exchange {
                            request,
                            response: text,
                        });
                    }
                    Ok(None) => break,
                    Err(_) => warn!("no response to request {id} within {RESPONSE_TIMEOUT:?}"),
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn request(method: &str, path: &str, body: Option<&str>) -> Option<Command> {
        Some(Command::Request(RequestLine {
            method: method.to_owned(),
            path: path.to_owned(),
            body: body.map(str::to_owned),
        }))
    }

    #[test]
    fn request_lines() {
        assert_eq!(parse_command("GET /"), Ok(request("GET", "/", None)));
        assert_eq!(parse_command("/greet"), Ok(request("GET", "/greet", None)));
        assert_eq!(
            parse_command("post /echo  hello there "),
            Ok(request("POST", "/echo", Some("hello there")))
        );
    }

    #[test]
    fn keywords_and_blanks() {
        assert_eq!(parse_command("   "), Ok(None));
        assert_eq!(parse_command("history"), Ok(Some(Command::History)));
        assert_eq!(parse_command("reset"), Ok(Some(Command::Reset)));
        assert_eq!(parse_command("exit"), Ok(Some(Command::Quit)));
    }

    #[test]
    fn bad_lines() {
        assert!(parse_command("GET").is_err());
        assert!(parse_command("GET greet").is_err());
    }

    #[test]
    fn request_line_display() {
        let line = RequestLine {
            method: "POST".to_owned(),
            path: "/echo".to_owned(),
            body: Some("hi".to_owned()),
        };
        assert_eq!(line.to_string(), "POST /echo hi");
    }
}
