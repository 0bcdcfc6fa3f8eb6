//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Operator CLI for interacting with ONQL modules over the bus."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::{anyhow, Result};
use clap::Args;
use onql_sdk::{Message, Response, Sdk, WaitOutcome, STATUS_OK};
use tracing::info;

#[derive(Debug, Args)]
pub struct RequestCommand {
    /// Destination subject, e.g. `onql.store`.
    #[arg(long = "to", value_name = "SUBJECT")]
    to: String,

    #[arg(long)]
    command: String,

    #[arg(long, default_value = "")]
    args: String,

    /// Metadata entries expressed as KEY=VALUE.
    #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_meta)]
    meta: Vec<(String, String)>,
}

impl RequestCommand {
    pub async fn execute(self, sdk: &Sdk) -> Result<()> {
        let message = build_message(self.command, self.args, self.meta);
        let reply = sdk.request(&self.to, &message).await?;
        println!("{}", serde_json::to_string_pretty(&reply)?);
        if reply.is_ok() {
            Ok(())
        } else {
            Err(anyhow!("request returned status '{}'", reply.status))
        }
    }
}

#[derive(Debug, Args)]
pub struct RespondCommand {
    #[arg(long, default_value = STATUS_OK)]
    status: String,

    #[arg(long, default_value = "")]
    message: String,

    #[arg(long)]
    data: Option<String>,

    /// Command of the request being answered, used for logging only.
    #[arg(long = "in-reply-to", default_value = "")]
    in_reply_to: String,
}

impl RespondCommand {
    pub async fn execute(self, sdk: &Sdk) -> Result<()> {
        let original = Message::new(self.in_reply_to, "");
        let mut response = Response::new(self.status, self.message);
        response.data = self.data;
        sdk.respond(&original, &response).await;
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct ServeCommand {
    /// Subject or pattern to answer on. Defaults to this module's own subject.
    #[arg(long, value_name = "SUBJECT")]
    subject: Option<String>,
}

impl ServeCommand {
    pub async fn execute(self, sdk: &Sdk) -> Result<()> {
        let subject = match self.subject {
            Some(subject) => subject,
            None => sdk
                .subjects()
                .map(|subjects| subjects.base().to_owned())
                .ok_or_else(|| anyhow!("module is not initialized"))?,
        };
        sdk.subscribe(&subject, echo).await?;
        info!(%subject, "echo responder running");

        let outcome = sdk.wait().await;
        info!(?outcome, "echo responder stopping");
        if outcome == WaitOutcome::NotInitialized {
            return Err(anyhow!("module is not initialized"));
        }
        Ok(())
    }
}

fn echo(message: Message) -> Response {
    Response::ok(format!("echo {}", message.command)).with_data(message.args)
}

fn build_message(command: String, args: String, meta: Vec<(String, String)>) -> Message {
    meta.into_iter()
        .fold(Message::new(command, args), |message, (key, value)| {
            message.with_meta(key, value)
        })
}

fn parse_meta(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.to_owned()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_meta_splits_on_first_equals() {
        assert_eq!(
            parse_meta("trace=a=b").unwrap(),
            ("trace".to_owned(), "a=b".to_owned())
        );
        assert!(parse_meta("novalue").is_err());
        assert!(parse_meta("=value").is_err());
    }

    #[test]
    fn build_message_collects_meta() {
        let message = build_message(
            "put".into(),
            "x".into(),
            vec![("tenant".into(), "acme".into())],
        );
        assert_eq!(message.command, "put");
        assert_eq!(message.meta.get("tenant").map(String::as_str), Some("acme"));
    }

    #[test]
    fn echo_reflects_command_and_args() {
        let response = echo(Message::new("ping", "payload"));
        assert!(response.is_ok());
        assert_eq!(response.message, "echo ping");
        assert_eq!(response.data.as_deref(), Some("payload"));
    }
}
