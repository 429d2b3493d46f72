use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use outreach_mailer::checkpoint::JsonProgressStore;
use outreach_mailer::composer::MessageComposer;
use outreach_mailer::config::{self, MailerConfig};
use outreach_mailer::logging;
use outreach_mailer::pipeline::{PipelineState, RunReport, SendPipeline, TokioPauser};
use outreach_mailer::recipients::RecipientSource;
use outreach_mailer::transport::{self, SmtpMailer};

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is fine; variables may come from the real environment.
    let _ = dotenvy::dotenv();

    transport::install_crypto_provider();

    // Held until return so the run log is flushed on every exit path.
    let (_guard, log_path) = match logging::init(&config::log_dir_from_env()) {
        Ok(init) => init,
        Err(e) => {
            eprintln!("Error: failed to initialize logging: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    eprintln!("📧 Outreach mailer v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Run log: {}", log_path.display());

    match run().await {
        Ok(report) => {
            info!(
                state = %report.state,
                attempted = report.stats.attempted,
                sent = report.stats.sent,
                failed = report.stats.failed,
                resumed_from = report.resumed_from,
                last_row = report.checkpoint.last_row,
                next_row = report.checkpoint.resume_index(),
                "Run completed"
            );
            if report.state == PipelineState::Aborted {
                error!(
                    reason = report.abort_reason.as_deref().unwrap_or("unknown"),
                    "Run aborted"
                );
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<RunReport> {
    let config = MailerConfig::from_env().context("invalid configuration")?;

    let table = RecipientSource::new()
        .load(&config.source.location, config.source.remote)
        .await
        .context("failed to load recipients")?;

    let store = Arc::new(JsonProgressStore::new(&config.state_file));
    let composer = MessageComposer::new(&config.message);
    let mailer = SmtpMailer::new(&config.smtp, &config.sender);
    let pauser = TokioPauser;

    info!(
        daily_limit = config.pacing.daily_limit,
        batch_size = config.pacing.batch_size,
        min_delay_secs = config.pacing.min_delay.as_secs(),
        max_delay_secs = config.pacing.max_delay.as_secs(),
        "Sending mails"
    );

    let mut pipeline = SendPipeline::new(
        &config.pacing,
        &config.sender,
        &composer,
        store,
        &pauser,
    );
    let report = pipeline
        .run(&table, &mailer)
        .await
        .context("run aborted before sending")?;

    Ok(report)
}
