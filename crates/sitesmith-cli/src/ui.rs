use std::time::Duration;

use sitesmith_core::{SessionError, SessionEvent, StepStatus, TurnOutcome, TurnStream};

/// Print a turn's progress to stderr until it ends or `timeout_secs` passes.
pub async fn drive(
    mut stream: TurnStream,
    timeout_secs: Option<u64>,
) -> Result<TurnOutcome, SessionError> {
    let run = async {
        while let Some(event) = stream.next().await {
            match event {
                SessionEvent::TurnComplete { outcome } => return Ok(*outcome),
                SessionEvent::Error { error } => return Err(error),
                other => render(&other),
            }
        }
        Err(SessionError::Interrupted)
    };

    match timeout_secs.map(Duration::from_secs) {
        Some(limit) => tokio::time::timeout(limit, run)
            .await
            .unwrap_or(Err(SessionError::SoftTimeout(limit))),
        None => run.await,
    }
}

fn render(event: &SessionEvent) {
    match event {
        SessionEvent::UserMessage { .. } => eprintln!("Generating..."),
        SessionEvent::Classified { tier, budget } => {
            eprintln!("  tier {tier}, up to {} tokens", budget.max_tokens)
        }
        SessionEvent::Generated { len } => eprintln!("  received {len} bytes"),
        SessionEvent::StepsParsed { steps, skipped, .. } => {
            for step in steps {
                let mark = match step.status {
                    StepStatus::Completed => "✓",
                    StepStatus::Pending => "✗",
                };
                eprintln!("  {mark} {}", step.title);
            }
            if *skipped > 0 {
                eprintln!("  ({skipped} unusable action(s) skipped)");
            }
        }
        SessionEvent::TreeUpdated { rejected, files, .. } => {
            for (id, reason) in rejected {
                eprintln!("  step {id} rejected: {reason}");
            }
            eprintln!("  {files} file(s) in project");
        }
        SessionEvent::Sync(state) => eprintln!("  preview: {state}"),
        SessionEvent::PreviewReady { url } => eprintln!("Preview ready at {url}"),
        SessionEvent::SyncFailed { cause } => eprintln!("Preview failed: {cause}"),
        SessionEvent::TurnComplete { .. } | SessionEvent::Error { .. } => {}
    }
}
