use crate::report::Message;
use anyhow::{bail, ensure, Context, Result};
use itertools::Itertools;
use log::info;
use serde::Deserialize;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Delivery of a composed message.
pub trait Sink {
    fn deliver(&self, message: &Message) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    #[default]
    Console,
    Email,
}

/// Print the message to standard output.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl Sink for ConsoleSink {
    fn deliver(&self, message: &Message) -> Result<()> {
        println!("{}\n\n{}", message.subject, message.body);
        Ok(())
    }
}

/// Send the message as a plain-text email through a local `sendmail`.
#[derive(Debug, Clone)]
pub struct EmailSink {
    pub sendmail: PathBuf,
    pub sender: String,
    pub recipients: Vec<String>,
}

impl EmailSink {
    /// The message as handed to sendmail, headers included.
    pub fn render(&self, message: &Message) -> String {
        format!(
            "From: {}\nTo: {}\nSubject: {}\nContent-Type: text/plain; charset=utf-8\n\n{}",
            self.sender,
            self.recipients.iter().join(", "),
            message.subject,
            message.body
        )
    }
}

impl Sink for EmailSink {
    fn deliver(&self, message: &Message) -> Result<()> {
        ensure!(
            !self.recipients.is_empty(),
            "Email notification requested but no recipients are configured"
        );
        let mut child = Command::new(&self.sendmail)
            .args(["-i", "-t"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to run {}", self.sendmail.display()))?;

        {
            let Some(stdin) = child.stdin.as_mut() else {
                bail!("Failed to open stdin of {}", self.sendmail.display());
            };
            stdin
                .write_all(self.render(message).as_bytes())
                .with_context(|| format!("Failed to write to {}", self.sendmail.display()))?;
        }

        let invocation = child
            .wait_with_output()
            .with_context(|| format!("Failed to wait for {}", self.sendmail.display()))?;
        ensure!(
            invocation.status.success(),
            "{} failed: {}",
            self.sendmail.display(),
            String::from_utf8_lossy(&invocation.stderr).trim()
        );
        info!(
            "sent '{}' to {}",
            message.subject,
            self.recipients.iter().join(", ")
        );
        Ok(())
    }
}
