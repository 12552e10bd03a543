//! Send Mail
//!
//! Sends a single message through the transport configured in the
//! environment (`MAIL_TRANSPORT=smtp|graph`, see `mailer::MailerConfig`).
//!
//! Run with: cargo run -p send_mail -- send --from noreply@contoso.com --to user@example.com --subject Hi --text Hello

use clap::{Parser, Subcommand};
use eyre::{Result, WrapErr};
use mailer::{AttachOptions, Mailer};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "send-mail")]
#[command(about = "Send email over SMTP or Microsoft Graph")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message
    Send {
        /// Sender address
        #[arg(short, long)]
        from: String,

        /// Recipients (comma separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        to: Vec<String>,

        /// Carbon copy recipients (comma separated)
        #[arg(long, value_delimiter = ',')]
        cc: Vec<String>,

        /// Blind carbon copy recipients (comma separated)
        #[arg(long, value_delimiter = ',')]
        bcc: Vec<String>,

        #[arg(short, long, default_value = "")]
        subject: String,

        /// Plain text body
        #[arg(long)]
        text: Option<String>,

        /// HTML body
        #[arg(long)]
        html: Option<String>,

        /// Files to attach
        #[arg(short, long)]
        attach: Vec<PathBuf>,
    },

    /// Check that the configured transport can authenticate / connect
    Check,
}

fn init_tracing() {
    let is_production = std::env::var("APP_ENV")
        .map(|env| env.eq_ignore_ascii_case("production"))
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if is_production {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .flatten_event(true),
            )
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_target(false).pretty())
            .with(filter)
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing already initialized, skipping re-initialization");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();

    let mailer = Mailer::from_env().wrap_err("Failed to configure mailer")?;
    info!(transport = mailer.transport_name(), "Mailer ready");

    match cli.command {
        Commands::Send {
            from,
            to,
            cc,
            bcc,
            subject,
            text,
            html,
            attach,
        } => {
            let mut message = mailer.compose();
            message
                .set_from(from)
                .set_to(to)
                .set_cc(cc)
                .set_bcc(bcc)
                .set_subject(subject);
            if let Some(text) = text {
                message.set_text_body(text);
            }
            if let Some(html) = html {
                message.set_html_body(html);
            }
            for path in &attach {
                message.attach(path, AttachOptions::new());
            }

            let accepted = mailer.send(message).await.wrap_err("Failed to send email")?;
            if !accepted {
                eyre::bail!("The {} transport did not accept the message", mailer.transport_name());
            }
            println!("Email accepted by {}", mailer.transport_name());
        }
        Commands::Check => {
            mailer
                .health_check()
                .await
                .wrap_err("Health check failed")?;
            println!("{} transport is reachable", mailer.transport_name());
        }
    }

    Ok(())
}
