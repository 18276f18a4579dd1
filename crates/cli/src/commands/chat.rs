//! `local-llm chat`: One streamed conversation turn.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use local_llm_agent::{Orchestrator, RunOptions, RunOutcome};
use local_llm_config::AppConfig;
use local_llm_core::message::{AttachmentRef, ContentRecord, ConversationHistory};
use local_llm_core::provider::DeltaEvent;
use local_llm_providers::OpenAiCompatProvider;
use tokio::sync::mpsc;

pub struct ChatArgs {
    pub message: String,
    pub attachments: Vec<PathBuf>,
    pub system: Option<String>,
    pub schema: Option<PathBuf>,
    pub schema_name: String,
    pub deadline_secs: Option<u64>,
}

pub async fn run(args: ChatArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let provider = Arc::new(OpenAiCompatProvider::from_config(&config.provider)?);

    let options = run_options(&args)?;
    let mut history = build_history(args);
    let orchestrator = Orchestrator::new(provider, config.chat.clone());

    let (tx, mut rx) = mpsc::channel(64);
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            if let DeltaEvent::Content { text } = event {
                let _ = write!(stdout, "{text}");
                let _ = stdout.flush();
            }
        }
    });

    let result = orchestrator.run_streaming(&mut history, &options, tx).await;
    let _ = printer.await;
    println!();

    match result? {
        RunOutcome::Done { .. } => {}
        RunOutcome::IterationCapReached { iterations } => {
            eprintln!("Stopped after {iterations} model calls without a final answer");
        }
        RunOutcome::AwaitingToolResults { pending, .. } => {
            for call in pending {
                eprintln!(
                    "Model requested tool `{}` ({}) with {}",
                    call.name,
                    call.id,
                    serde_json::Value::Object(call.args)
                );
            }
        }
    }

    Ok(())
}

fn build_history(args: ChatArgs) -> ConversationHistory {
    let mut history = ConversationHistory::new();
    if let Some(system) = args.system {
        history.push(ContentRecord::system(system));
    }

    let attachments = args.attachments.into_iter().map(AttachmentRef::new).collect();
    history.push(ContentRecord::user_with_attachments(args.message, attachments));
    history
}

fn run_options(args: &ChatArgs) -> Result<RunOptions, Box<dyn std::error::Error>> {
    let mut options = RunOptions::default();

    if let Some(path) = &args.schema {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read schema {}: {e}", path.display()))?;
        let schema: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| format!("Schema {} is not valid JSON: {e}", path.display()))?;
        options = options.with_structure(args.schema_name.clone(), schema);
    }

    if let Some(secs) = args.deadline_secs {
        options = options.with_deadline(Duration::from_secs(secs));
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ChatArgs {
        ChatArgs {
            message: "Describe this".into(),
            attachments: vec![PathBuf::from("photo.png")],
            system: Some("Be brief".into()),
            schema: None,
            schema_name: "response".into(),
            deadline_secs: None,
        }
    }

    #[test]
    fn history_has_system_then_user() {
        let history = build_history(args());
        assert_eq!(history.len(), 2);
        assert_eq!(history.records()[0], ContentRecord::system("Be brief"));
        match &history.records()[1] {
            ContentRecord::User { text, attachments } => {
                assert_eq!(text, "Describe this");
                assert_eq!(attachments[0].path, PathBuf::from("photo.png"));
            }
            other => panic!("expected user record, got {other:?}"),
        }
    }

    #[test]
    fn schema_file_becomes_structure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("answer.json");
        std::fs::write(&path, r#"{"type":"object","properties":{}}"#).unwrap();

        let mut args = args();
        args.schema = Some(path);
        args.schema_name = "Answer".into();
        args.deadline_secs = Some(30);

        let options = run_options(&args).unwrap();
        let structure = options.structure.unwrap();
        assert_eq!(structure.name, "Answer");
        assert_eq!(structure.schema["type"], "object");
        assert_eq!(options.deadline, Some(Duration::from_secs(30)));
    }

    #[test]
    fn invalid_schema_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{nope").unwrap();

        let mut args = args();
        args.schema = Some(path);
        let err = run_options(&args).unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }
}
