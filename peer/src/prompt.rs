use std::fmt::Display;
use std::str::FromStr;

use tokio::io::{stdout, AsyncBufRead, AsyncWriteExt, Lines};

use udpchat_backend::config::PeerConfig;

/// Line-oriented questions with defaults for empty answers
pub struct Prompter<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> Prompter<R> {
    pub fn new(lines: Lines<R>) -> Self {
        Self { lines }
    }

    pub async fn ask(&mut self, question: &str, default: &str) -> anyhow::Result<String> {
        let mut out = stdout();
        out.write_all(question.as_bytes()).await?;
        out.flush().await?;

        let answer = self.lines.next_line().await?.unwrap_or_default();
        let answer = answer.trim();
        if answer.is_empty() {
            Ok(default.to_string())
        } else {
            Ok(answer.to_string())
        }
    }

    /// Ask until the answer parses
    pub async fn ask_parsed<T>(&mut self, question: &str, default: T) -> anyhow::Result<T>
    where
        T: FromStr + Display,
    {
        loop {
            let answer = self.ask(question, &default.to_string()).await?;
            match answer.parse() {
                Ok(value) => return Ok(value),
                Err(_) => println!("'{}' is not valid, try again.", answer),
            }
        }
    }

    /// Fill in a peer configuration interactively, starting from `defaults`
    pub async fn peer_config(&mut self, defaults: PeerConfig) -> anyhow::Result<PeerConfig> {
        let mut config = defaults;

        config.ntp_host = self
            .ask(
                &format!("Enter the NTP host address (empty for {}): ", config.ntp_host),
                &config.ntp_host,
            )
            .await?;
        config.ntp_port = self
            .ask_parsed(
                &format!("Enter the NTP host port (empty for {}): ", config.ntp_port),
                config.ntp_port,
            )
            .await?;
        config.registry_host = self
            .ask(
                &format!("Enter the HTTP host address (empty for {}): ", config.registry_host),
                &config.registry_host,
            )
            .await?;
        config.username = self
            .ask(
                &format!("Enter your username (empty for {}): ", config.username),
                &config.username,
            )
            .await?;
        config.ip = self
            .ask(&format!("Enter your address (empty for {}): ", config.ip), &config.ip)
            .await?;
        config.port = self
            .ask_parsed("Enter your port (empty or 0 for auto-detect): ", config.port)
            .await?;

        Ok(config)
    }

    pub fn into_lines(self) -> Lines<R> {
        self.lines
    }
}
