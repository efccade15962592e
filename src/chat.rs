//! Terminal question answering: one-shot `docqa ask` and the `docqa chat`
//! loop.
//!
//! The chat loop keeps one [`Session`] for the whole run. `exit` or `quit`
//! ends it, `/reset` clears the conversation, and Ctrl-C cancels the
//! question in flight without touching the session.

use anyhow::{bail, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::answer::format_citation;
use crate::context::AppContext;
use crate::error::DocQaError;
use crate::index::Index;
use crate::models::AnswerResult;

/// Answer text followed by its sources, as printed by the CLI.
pub fn render_answer(result: &AnswerResult) -> String {
    let mut out = result.answer_text.trim().to_string();
    out.push_str("\n\n");
    if result.grounded && !result.citations.is_empty() {
        out.push_str("Sources:");
        for citation in &result.citations {
            out.push_str("\n - ");
            out.push_str(&format_citation(citation));
        }
    } else {
        out.push_str("No sources because the answer was not found in the documents.");
    }
    out
}

/// Load the index for answering, turning "missing" and "corrupt" into
/// distinct instructions for the user.
pub fn load_for_query(ctx: &AppContext) -> Result<Index> {
    match ctx.load_index() {
        Ok(index) => Ok(index),
        Err(DocQaError::IndexNotFound(dir)) => bail!(
            "No index found at {}. Run `docqa ingest` to index your PDFs first.",
            dir.display()
        ),
        Err(e @ DocQaError::IndexCorrupt { .. }) => {
            bail!("{}\nRun `docqa ingest --rebuild` to replace it.", e)
        }
        Err(e) => Err(e.into()),
    }
}

/// `docqa ask "<question>"`
pub async fn run_ask(ctx: &AppContext, question: &str, k: Option<usize>) -> Result<()> {
    if question.trim().is_empty() {
        bail!("question must not be empty");
    }
    let index = load_for_query(ctx)?;
    let k = k.unwrap_or(ctx.config.retrieval.top_k);
    let mut session = ctx.new_session();

    let result = ctx.ask(&index, &mut session, question.trim(), k).await?;
    println!("{}", render_answer(&result));
    Ok(())
}

/// What a line typed at the chat prompt asks for.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Skip,
    Exit,
    Reset,
    Ask,
}

impl Command {
    /// Commands are matched case-insensitively on the trimmed line.
    fn parse(line: &str) -> Self {
        match line.trim().to_ascii_lowercase().as_str() {
            "" => Command::Skip,
            "exit" | "quit" => Command::Exit,
            "/reset" => Command::Reset,
            _ => Command::Ask,
        }
    }
}

/// `docqa chat`
pub async fn run_chat(ctx: &AppContext, k: Option<usize>) -> Result<()> {
    let index = load_for_query(ctx)?;
    let k = k.unwrap_or(ctx.config.retrieval.top_k);
    let mut session = ctx.new_session();

    println!(
        "Ask questions about your documents ({} chunks indexed).",
        index.len()
    );
    println!("Type `exit` or `quit` to leave, `/reset` to start a new conversation.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"\nYou: ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        match Command::parse(question) {
            Command::Skip => continue,
            Command::Exit => break,
            Command::Reset => {
                session.reset();
                println!("Conversation reset.");
                continue;
            }
            Command::Ask => {}
        }

        tokio::select! {
            result = ctx.ask(&index, &mut session, question, k) => match result {
                Ok(answer) => println!("\nAssistant: {}", render_answer(&answer)),
                Err(e) => {
                    tracing::debug!(error = %e, "question failed");
                    eprintln!("Error: {}", e);
                    if e.is_retryable() {
                        eprintln!("The service may be temporarily unavailable; ask again.");
                    }
                }
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\ncancelled");
            }
        }
    }

    Ok(())
}
